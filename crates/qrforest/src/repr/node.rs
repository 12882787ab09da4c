//! Tree node types.
//!
//! Nodes live in an arena owned by [`QuantileTree`](super::QuantileTree) and
//! refer to their children by [`NodeId`]. Every variant can answer
//! [`Node::prediction_sketch`]: leaves and inactive leaves return their own
//! sketch, splits delegate to the child selected by their test.

use rand::Rng;

use crate::data::Instance;
use crate::sketch::RankSketch;

use super::observer::AttributeObserver;
use super::sampling::sample_without_replacement;
use super::split::SplitSuggestion;

/// Index of a node in the tree arena.
pub type NodeId = u32;

/// The root is always the first node in the arena.
pub const ROOT: NodeId = 0;

// =============================================================================
// SplitTest
// =============================================================================

/// Numeric binary test: `feature <= threshold` goes to branch 0.
///
/// Missing values (NaN) fail the comparison and go to branch 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitTest {
    pub feature: u32,
    pub threshold: f64,
}

impl SplitTest {
    /// Branch taken by `features`.
    #[inline]
    pub fn branch(&self, features: &[f64]) -> usize {
        if features[self.feature as usize] <= self.threshold {
            0
        } else {
            1
        }
    }
}

// =============================================================================
// LeafStats
// =============================================================================

/// Weighted sufficient statistics of the labels a leaf has seen.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LeafStats {
    pub weight: f64,
    pub sum: f64,
    pub sum_sq: f64,
}

impl LeafStats {
    /// Fold in one weighted label.
    pub fn update(&mut self, label: f64, weight: f64) {
        self.weight += weight;
        self.sum += weight * label;
        self.sum_sq += weight * label * label;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.weight > 0.0).then(|| self.sum / self.weight)
    }

    pub fn variance(&self) -> Option<f64> {
        self.mean()
            .map(|mean| (self.sum_sq / self.weight - mean * mean).max(0.0))
    }
}

// =============================================================================
// Node variants
// =============================================================================

/// A learning leaf.
#[derive(Debug, Clone)]
pub struct LeafNode<S> {
    pub(crate) sketch: S,
    pub(crate) stats: LeafStats,
    /// Features this leaf may split on. Chosen on the first update, then fixed.
    pub(crate) subspace: Option<Box<[u32]>>,
    /// One observer per subspace feature, in the same order.
    pub(crate) observers: Vec<AttributeObserver>,
    pub(crate) weight_at_last_attempt: f64,
    /// Weight the leaf inherited from its parent's split plus what it has seen.
    pub(crate) promise: f64,
    pub(crate) depth: u32,
}

impl<S: RankSketch> LeafNode<S> {
    pub(crate) fn new(sketch_capacity: usize, depth: u32, inherited_weight: f64) -> Self {
        Self {
            sketch: S::new(sketch_capacity),
            stats: LeafStats::default(),
            subspace: None,
            observers: Vec::new(),
            weight_at_last_attempt: 0.0,
            promise: inherited_weight,
            depth,
        }
    }

    /// Fix the feature subspace if this is the first update.
    pub(crate) fn ensure_subspace<R: Rng>(
        &mut self,
        n_features: usize,
        subspace_size: usize,
        max_bins: usize,
        rng: &mut R,
    ) {
        if self.subspace.is_some() {
            return;
        }
        let subspace = sample_without_replacement(n_features, subspace_size, rng);
        self.observers = subspace
            .iter()
            .map(|_| AttributeObserver::new(max_bins))
            .collect();
        self.subspace = Some(subspace);
    }

    /// Update statistics, observers and the sketch with a weighted instance.
    pub(crate) fn learn(&mut self, instance: &Instance) {
        let label = instance.label();
        let weight = instance.weight();

        self.stats.update(label, weight);
        self.promise += weight;

        if let Some(subspace) = &self.subspace {
            for (observer, &feature) in self.observers.iter_mut().zip(subspace.iter()) {
                observer.observe(instance.feature(feature as usize), label, weight);
            }
        }

        for _ in 0..instance.replications() {
            self.sketch.insert(label);
        }
    }

    /// Best split per observed feature.
    pub(crate) fn split_suggestions(&self) -> Vec<SplitSuggestion> {
        let Some(subspace) = &self.subspace else {
            return Vec::new();
        };
        self.observers
            .iter()
            .zip(subspace.iter())
            .filter_map(|(observer, &feature)| observer.best_split(feature))
            .collect()
    }

    /// Weight seen since the last split attempt.
    #[inline]
    pub(crate) fn weight_since_attempt(&self) -> f64 {
        self.stats.weight - self.weight_at_last_attempt
    }

    pub fn stats(&self) -> &LeafStats {
        &self.stats
    }

    pub fn subspace(&self) -> Option<&[u32]> {
        self.subspace.as_deref()
    }
}

/// An internal routing node.
#[derive(Debug, Clone)]
pub struct SplitNode {
    pub(crate) test: SplitTest,
    pub(crate) children: Vec<NodeId>,
    pub(crate) depth: u32,
}

impl SplitNode {
    pub fn test(&self) -> &SplitTest {
        &self.test
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Child selected by the test.
    #[inline]
    pub fn child_for(&self, features: &[f64]) -> NodeId {
        self.children[self.test.branch(features)]
    }
}

/// A frozen leaf: answers sketch queries, ignores training.
#[derive(Debug, Clone)]
pub struct InactiveNode<S> {
    pub(crate) sketch: S,
    pub(crate) depth: u32,
}

/// A node in the tree arena.
#[derive(Debug, Clone)]
pub enum Node<S> {
    Leaf(LeafNode<S>),
    Split(SplitNode),
    Inactive(InactiveNode<S>),
}

impl<S: RankSketch> Node<S> {
    /// Sketch answering queries for `features` below this node.
    pub fn prediction_sketch<'a>(&'a self, arena: &'a [Node<S>], features: &[f64]) -> &'a S {
        match self {
            Node::Leaf(leaf) => &leaf.sketch,
            Node::Inactive(inactive) => &inactive.sketch,
            Node::Split(split) => {
                arena[split.child_for(features) as usize].prediction_sketch(arena, features)
            }
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        !matches!(self, Node::Split(_))
    }

    #[inline]
    pub fn is_active_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    pub fn depth(&self) -> u32 {
        match self {
            Node::Leaf(leaf) => leaf.depth,
            Node::Split(split) => split.depth,
            Node::Inactive(inactive) => inactive.depth,
        }
    }

    /// Sketch held by a leaf or inactive leaf.
    pub fn own_sketch(&self) -> Option<&S> {
        match self {
            Node::Leaf(leaf) => Some(&leaf.sketch),
            Node::Inactive(inactive) => Some(&inactive.sketch),
            Node::Split(_) => None,
        }
    }
}
