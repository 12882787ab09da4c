//! Parameter groups shared by the forest and its member trees.

use crate::error::ConfigError;

// =============================================================================
// TreeParams
// =============================================================================

/// Growth parameters of one member tree.
///
/// # Example
///
/// ```
/// use qrforest::model::TreeParams;
///
/// // Frozen structure: leaves keep learning but never split
/// let params = TreeParams::stump();
/// assert!(!params.growth_allowed);
///
/// // At most 32 learning leaves per tree
/// let params = TreeParams::default().with_max_active_leaves(32);
/// assert_eq!(params.max_active_leaves, Some(32));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TreeParams {
    /// Weight a leaf must see between split attempts. Default: 200.
    pub grace_period: f64,
    /// Allowed probability of choosing the wrong split (δ). Default: 1e-7.
    pub split_confidence: f64,
    /// Bound below which close candidates are split anyway (τ). Default: 0.05.
    pub tie_threshold: f64,
    /// Whether leaves may split at all. Default: true.
    pub growth_allowed: bool,
    /// Learning leaves kept per tree; the least promising are frozen beyond it.
    /// `None` means unlimited.
    pub max_active_leaves: Option<usize>,
    /// Bins each attribute observer keeps. Default: 64.
    pub max_split_candidates: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            grace_period: 200.0,
            split_confidence: 1e-7,
            tie_threshold: 0.05,
            growth_allowed: true,
            max_active_leaves: None,
            max_split_candidates: 64,
        }
    }
}

impl TreeParams {
    /// Single-leaf trees.
    pub fn stump() -> Self {
        Self {
            growth_allowed: false,
            ..Default::default()
        }
    }

    /// Limit the number of learning leaves.
    pub fn with_max_active_leaves(mut self, max_active_leaves: usize) -> Self {
        self.max_active_leaves = Some(max_active_leaves);
        self
    }

    /// Set the grace period.
    pub fn with_grace_period(mut self, grace_period: f64) -> Self {
        self.grace_period = grace_period;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if !(self.grace_period > 0.0) {
            return Err(ConfigError::InvalidTreeParam {
                field: "grace_period",
                value: self.grace_period,
            });
        }
        if !(self.split_confidence > 0.0 && self.split_confidence < 1.0) {
            return Err(ConfigError::InvalidTreeParam {
                field: "split_confidence",
                value: self.split_confidence,
            });
        }
        if !(0.0..=1.0).contains(&self.tie_threshold) {
            return Err(ConfigError::InvalidTreeParam {
                field: "tie_threshold",
                value: self.tie_threshold,
            });
        }
        if self.max_active_leaves == Some(0) {
            return Err(ConfigError::InvalidTreeParam {
                field: "max_active_leaves",
                value: 0.0,
            });
        }
        if self.max_split_candidates < 2 {
            return Err(ConfigError::InvalidTreeParam {
                field: "max_split_candidates",
                value: self.max_split_candidates as f64,
            });
        }
        Ok(())
    }
}
