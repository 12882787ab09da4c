//! Per-feature attribute observers for streaming split search.
//!
//! An observer keeps a bounded, sorted list of bins over the feature's values,
//! each carrying the weighted label moments of the instances that fell on it.
//! When the list grows past its capacity the two closest bins are merged, so
//! memory stays fixed no matter how many distinct values stream through.

use super::split::{sdr_merit, SplitSuggestion};

/// Weighted label moments.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct Moments {
    pub weight: f64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl Moments {
    #[inline]
    fn add(&mut self, other: &Moments) {
        self.weight += other.weight;
        self.sum += other.sum;
        self.sum_sq += other.sum_sq;
    }

    #[inline]
    fn sub(&self, other: &Moments) -> Moments {
        Moments {
            weight: self.weight - other.weight,
            sum: self.sum - other.sum,
            sum_sq: self.sum_sq - other.sum_sq,
        }
    }

    /// Population standard deviation of the labels.
    pub fn std_dev(&self) -> f64 {
        if self.weight <= 0.0 {
            return 0.0;
        }
        let mean = self.sum / self.weight;
        (self.sum_sq / self.weight - mean * mean).max(0.0).sqrt()
    }
}

#[derive(Debug, Clone, Copy)]
struct Bin {
    value: f64,
    moments: Moments,
}

/// Bounded numeric attribute observer.
#[derive(Debug, Clone)]
pub struct AttributeObserver {
    bins: Vec<Bin>,
    max_bins: usize,
}

impl AttributeObserver {
    pub fn new(max_bins: usize) -> Self {
        Self {
            bins: Vec::new(),
            max_bins: max_bins.max(2),
        }
    }

    /// Number of bins currently held.
    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// Record a weighted label at `value`. Missing values are not observed.
    pub fn observe(&mut self, value: f64, label: f64, weight: f64) {
        if !value.is_finite() || weight <= 0.0 {
            return;
        }
        let point = Moments {
            weight,
            sum: weight * label,
            sum_sq: weight * label * label,
        };

        let idx = self.bins.partition_point(|b| b.value < value);
        match self.bins.get_mut(idx) {
            Some(bin) if bin.value == value => bin.moments.add(&point),
            _ => {
                self.bins.insert(
                    idx,
                    Bin {
                        value,
                        moments: point,
                    },
                );
                if self.bins.len() > self.max_bins {
                    self.merge_closest();
                }
            }
        }
    }

    fn merge_closest(&mut self) {
        let Some(i) = (0..self.bins.len() - 1).min_by(|&a, &b| {
            let gap_a = self.bins[a + 1].value - self.bins[a].value;
            let gap_b = self.bins[b + 1].value - self.bins[b].value;
            gap_a.total_cmp(&gap_b)
        }) else {
            return;
        };

        let right = self.bins.remove(i + 1);
        let left = &mut self.bins[i];
        let total = left.moments.weight + right.moments.weight;
        left.value += (right.value - left.value) * right.moments.weight / total;
        left.moments.add(&right.moments);
    }

    /// Best binary split on this feature by standard deviation reduction.
    ///
    /// Thresholds sit halfway between adjacent bins. Returns `None` when
    /// fewer than two bins have been observed.
    pub fn best_split(&self, feature: u32) -> Option<SplitSuggestion> {
        if self.bins.len() < 2 {
            return None;
        }
        let mut total = Moments::default();
        for bin in &self.bins {
            total.add(&bin.moments);
        }

        let mut best: Option<SplitSuggestion> = None;
        let mut left = Moments::default();
        for pair in self.bins.windows(2) {
            left.add(&pair[0].moments);
            let right = total.sub(&left);
            if left.weight <= 0.0 || right.weight <= 0.0 {
                continue;
            }
            let merit = sdr_merit(&total, &left, &right);
            if best.map_or(true, |b| merit > b.merit) {
                best = Some(SplitSuggestion {
                    feature,
                    threshold: (pair[0].value + pair[1].value) / 2.0,
                    merit,
                    left_weight: left.weight,
                    right_weight: right.weight,
                });
            }
        }
        best
    }
}
