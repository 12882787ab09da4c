//! Labeled feature vectors.

use std::sync::Arc;

/// An immutable labeled feature vector with a training weight.
///
/// The feature buffer is shared: [`with_weight`](Instance::with_weight)
/// produces a new instance that points at the same features, so bagging
/// replicas cost one allocation-free clone.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    features: Arc<[f64]>,
    label: f64,
    weight: f64,
}

impl Instance {
    /// Create an instance with unit weight.
    pub fn new(features: impl Into<Arc<[f64]>>, label: f64) -> Self {
        Self {
            features: features.into(),
            label,
            weight: 1.0,
        }
    }

    /// Copy of this instance carrying `weight`.
    pub fn with_weight(&self, weight: f64) -> Self {
        Self {
            features: Arc::clone(&self.features),
            label: self.label,
            weight,
        }
    }

    /// Feature values.
    #[inline]
    pub fn features(&self) -> &[f64] {
        &self.features
    }

    /// Value of one feature.
    #[inline]
    pub fn feature(&self, index: usize) -> f64 {
        self.features[index]
    }

    /// Number of features (the label is not counted).
    #[inline]
    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Target value.
    #[inline]
    pub fn label(&self) -> f64 {
        self.label
    }

    /// Training weight.
    #[inline]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Weight as a whole number of replications (negative weights count as zero).
    #[inline]
    pub fn replications(&self) -> u64 {
        self.weight.round().max(0.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_weight_shares_features() {
        let inst = Instance::new(vec![1.0, 2.0, 3.0], 4.0);
        let heavy = inst.with_weight(3.0);

        assert_eq!(inst.weight(), 1.0);
        assert_eq!(heavy.weight(), 3.0);
        assert_eq!(heavy.label(), 4.0);
        assert!(Arc::ptr_eq(&inst.features, &heavy.features));
    }

    #[test]
    fn replications_round_weight() {
        let inst = Instance::new(vec![0.0], 0.0);
        assert_eq!(inst.with_weight(0.0).replications(), 0);
        assert_eq!(inst.with_weight(2.0).replications(), 2);
        assert_eq!(inst.with_weight(-1.0).replications(), 0);
    }
}
