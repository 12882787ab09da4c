//! Split evaluation: standard deviation reduction and the Hoeffding test.

use crate::model::TreeParams;

use super::observer::Moments;

/// Candidate split proposed by an attribute observer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitSuggestion {
    pub feature: u32,
    pub threshold: f64,
    /// Standard deviation reduction.
    pub merit: f64,
    pub left_weight: f64,
    pub right_weight: f64,
}

/// Standard deviation reduction of splitting `parent` into `left` and `right`.
pub(crate) fn sdr_merit(parent: &Moments, left: &Moments, right: &Moments) -> f64 {
    let total = parent.weight;
    parent.std_dev()
        - (left.weight / total) * left.std_dev()
        - (right.weight / total) * right.std_dev()
}

/// Hoeffding bound `sqrt(R² ln(1/δ) / 2n)`.
#[inline]
pub fn hoeffding_bound(range: f64, confidence: f64, n: f64) -> f64 {
    (range * range * (1.0 / confidence).ln() / (2.0 * n)).sqrt()
}

/// Pick the split to apply, if any.
///
/// With two or more positive candidates, the best one wins when the
/// second-best/best merit ratio is clearly below one (`ratio < 1 − ε`) or when
/// the bound has shrunk under the tie threshold. A single positive candidate
/// always wins.
pub fn decide(
    mut suggestions: Vec<SplitSuggestion>,
    weight_seen: f64,
    params: &TreeParams,
) -> Option<SplitSuggestion> {
    suggestions.retain(|s| s.merit > 0.0 && s.merit.is_finite());
    suggestions.sort_by(|a, b| b.merit.total_cmp(&a.merit));

    match suggestions.as_slice() {
        [] => None,
        [only] => Some(*only),
        [best, second, ..] => {
            let ratio = second.merit / best.merit;
            let epsilon = hoeffding_bound(1.0, params.split_confidence, weight_seen);
            (ratio < 1.0 - epsilon || epsilon < params.tie_threshold).then_some(*best)
        }
    }
}
