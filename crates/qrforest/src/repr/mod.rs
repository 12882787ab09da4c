//! Streaming regression tree representation.
//!
//! A [`QuantileTree`] is an arena of [`Node`]s. Learning leaves run
//! incremental split search over a lazily fixed feature subspace and summarize
//! their labels with a [`RankSketch`](crate::sketch::RankSketch); splits route
//! by a numeric threshold test; inactive leaves keep only their sketch.

mod node;
mod observer;
mod sampling;
mod split;
mod tree;

pub use node::{InactiveNode, LeafNode, LeafStats, Node, NodeId, SplitNode, SplitTest, ROOT};
pub use observer::AttributeObserver;
pub use sampling::sample_without_replacement;
pub use split::{decide, hoeffding_bound, SplitSuggestion};
pub use tree::{LearnOutcome, QuantileTree, TreeValidationError};
