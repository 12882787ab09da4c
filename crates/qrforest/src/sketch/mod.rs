//! Mergeable rank sketches.
//!
//! Leaves summarize the labels routed to them with a [`RankSketch`]. The
//! forest answers interval queries by merging the sketches of the leaves an
//! instance reaches in every member, then reading two quantiles from the
//! union.
//!
//! - [`RankSketch`]: the contract any leaf summary must honor
//! - [`QuantileSketch`]: a merging t-digest implementing it

mod tdigest;

pub use tdigest::QuantileSketch;

/// Approximate, mergeable summary of a multiset of values.
///
/// # Contract
///
/// - `merge` does not mutate its inputs and is commutative and associative up
///   to the error bound implied by the capacity parameter.
/// - `quantile` returns `None` only when the sketch is empty.
/// - Weighted insertion is not part of the contract; callers insert a value
///   once per unit of weight.
pub trait RankSketch: Clone + Send + Sync {
    /// Create an empty sketch with the given resolution.
    fn new(capacity: usize) -> Self;

    /// Insert one value.
    fn insert(&mut self, value: f64);

    /// Union of `self` and `other` as a new sketch.
    fn merge(&self, other: &Self) -> Self;

    /// Value at `rank` in [0, 1].
    fn quantile(&self, rank: f64) -> Option<f64>;

    /// Whether no value has been inserted.
    fn is_empty(&self) -> bool;

    /// Number of values summarized.
    fn count(&self) -> u64;

    /// Mean of the summarized values.
    fn mean(&self) -> Option<f64>;

    /// Approximate heap footprint in bytes.
    fn memory_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}
