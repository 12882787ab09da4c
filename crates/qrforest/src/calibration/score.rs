//! Nonconformity scores.

/// Error between an out-of-bag prediction and the true label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorFunction {
    /// `|prediction − label|`
    #[default]
    Absolute,
    /// `(prediction − label)²`
    Squared,
}

impl ErrorFunction {
    /// Score of `prediction` against `label`.
    #[inline]
    pub fn score(self, prediction: f64, label: f64) -> f64 {
        let diff = prediction - label;
        match self {
            ErrorFunction::Absolute => diff.abs(),
            ErrorFunction::Squared => diff * diff,
        }
    }

    /// Half-width of the interval around a point prediction whose error
    /// would score `score`.
    #[inline]
    pub fn inverse(self, score: f64) -> f64 {
        match self {
            ErrorFunction::Absolute => score,
            ErrorFunction::Squared => score.max(0.0).sqrt(),
        }
    }
}

/// The `⌈(n+1)·c⌉`-th smallest score, clamped to the largest one.
///
/// Returns `None` for an empty set.
pub fn conformal_quantile(scores: impl IntoIterator<Item = f64>, confidence: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = scores.into_iter().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len();
    let idx = ((n + 1) as f64 * confidence).ceil() as usize;
    let idx = idx.saturating_sub(1).min(n - 1);
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_functions() {
        assert_eq!(ErrorFunction::Absolute.score(1.0, 4.0), 3.0);
        assert_eq!(ErrorFunction::Squared.score(1.0, 4.0), 9.0);
        assert_eq!(ErrorFunction::Squared.inverse(9.0), 3.0);
        assert_eq!(ErrorFunction::Absolute.inverse(3.0), 3.0);
    }

    #[test]
    fn quantile_index() {
        let scores = (1..=9).map(f64::from);
        // ceil(10 * 0.9) = 9th smallest
        assert_eq!(conformal_quantile(scores.clone(), 0.9), Some(9.0));
        // ceil(10 * 0.5) = 5th smallest
        assert_eq!(conformal_quantile(scores.clone(), 0.5), Some(5.0));
        // beyond n: the largest score
        assert_eq!(conformal_quantile(scores, 0.99), Some(9.0));
        assert_eq!(conformal_quantile(std::iter::empty(), 0.9), None);
    }
}
