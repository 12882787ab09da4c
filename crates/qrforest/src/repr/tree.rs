//! Streaming regression tree with sketch-carrying leaves.

use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::data::Instance;
use crate::model::TreeParams;
use crate::sketch::{QuantileSketch, RankSketch};

use super::node::{InactiveNode, LeafNode, Node, NodeId, SplitNode, SplitTest, ROOT};
use super::split::{self, SplitSuggestion};

// =============================================================================
// LearnOutcome
// =============================================================================

/// What a single [`QuantileTree::learn`] call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LearnOutcome {
    /// The instance reached a learning leaf and was absorbed.
    pub accepted: bool,
    /// Split applied to that leaf, if any.
    pub split: Option<SplitSuggestion>,
    /// Leaves frozen to respect the active-leaf limit.
    pub deactivated: usize,
}

// =============================================================================
// TreeValidationError
// =============================================================================

/// Structural problems found by [`QuantileTree::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeValidationError {
    /// The arena holds no root.
    EmptyTree,
    /// A child index points outside the arena.
    ChildOutOfBounds { node: NodeId, child: NodeId },
    /// A node is referenced by more than one parent (or by itself).
    DuplicateReference { node: NodeId },
    /// A node is never reached from the root.
    Unreachable { node: NodeId },
}

impl std::fmt::Display for TreeValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTree => write!(f, "tree has no root"),
            Self::ChildOutOfBounds { node, child } => {
                write!(f, "node {node} references missing child {child}")
            }
            Self::DuplicateReference { node } => write!(f, "node {node} has several parents"),
            Self::Unreachable { node } => write!(f, "node {node} is unreachable"),
        }
    }
}

impl std::error::Error for TreeValidationError {}

// =============================================================================
// QuantileTree
// =============================================================================

/// One ensemble member.
///
/// Nodes are stored in an arena; splitting a leaf rewrites its slot in place
/// as a [`Node::Split`] and appends two fresh leaves. Nothing is ever removed,
/// so node ids stay valid for the life of the tree.
///
/// Every accepted update stamps the tree with the caller's logical time, which
/// the calibration engine compares against its own records to detect stale
/// out-of-bag predictions.
#[derive(Debug, Clone)]
pub struct QuantileTree<S: RankSketch = QuantileSketch> {
    nodes: Vec<Node<S>>,
    params: TreeParams,
    n_features: usize,
    subspace_size: usize,
    sketch_capacity: usize,
    rng: Xoshiro256PlusPlus,
    last_updated: u64,
    n_updates: u64,
    n_splits: u64,
    n_deactivated: u64,
}

impl<S: RankSketch> QuantileTree<S> {
    /// Create a single-leaf tree.
    pub fn new(
        n_features: usize,
        subspace_size: usize,
        sketch_capacity: usize,
        params: TreeParams,
        seed: u64,
    ) -> Self {
        Self {
            nodes: vec![Node::Leaf(LeafNode::new(sketch_capacity, 0, 0.0))],
            params,
            n_features,
            subspace_size: subspace_size.min(n_features),
            sketch_capacity,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            last_updated: 0,
            n_updates: 0,
            n_splits: 0,
            n_deactivated: 0,
        }
    }

    // -------------------------------------------------------------------------
    // Learning
    // -------------------------------------------------------------------------

    /// Route a weighted instance to its leaf and learn from it.
    ///
    /// Instances reaching an inactive leaf, with a non-positive weight or with
    /// a non-finite label are ignored and leave the tree (including its clock)
    /// untouched.
    pub fn learn(&mut self, instance: &Instance, now: u64) -> LearnOutcome {
        if instance.weight() <= 0.0 || !instance.label().is_finite() {
            return LearnOutcome::default();
        }
        let leaf_id = self.find_leaf(instance.features());

        let Node::Leaf(leaf) = &mut self.nodes[leaf_id as usize] else {
            return LearnOutcome::default();
        };
        leaf.ensure_subspace(
            self.n_features,
            self.subspace_size,
            self.params.max_split_candidates,
            &mut self.rng,
        );
        leaf.learn(instance);
        let ready = leaf.weight_since_attempt() >= self.params.grace_period;

        self.last_updated = now;
        self.n_updates += 1;

        let mut outcome = LearnOutcome {
            accepted: true,
            ..Default::default()
        };
        if self.params.growth_allowed && ready {
            outcome.split = self.attempt_split(leaf_id);
            if outcome.split.is_some() {
                outcome.deactivated = self.enforce_active_leaf_limit();
            }
        }
        outcome
    }

    fn attempt_split(&mut self, leaf_id: NodeId) -> Option<SplitSuggestion> {
        let Node::Leaf(leaf) = &mut self.nodes[leaf_id as usize] else {
            return None;
        };
        leaf.weight_at_last_attempt = leaf.stats.weight;
        let chosen = split::decide(leaf.split_suggestions(), leaf.stats.weight, &self.params)?;
        let depth = leaf.depth;

        let left = self.push_leaf(depth + 1, chosen.left_weight);
        let right = self.push_leaf(depth + 1, chosen.right_weight);
        // The old leaf, and its sketch, is dropped here.
        self.nodes[leaf_id as usize] = Node::Split(SplitNode {
            test: SplitTest {
                feature: chosen.feature,
                threshold: chosen.threshold,
            },
            children: vec![left, right],
            depth,
        });
        self.n_splits += 1;
        Some(chosen)
    }

    fn push_leaf(&mut self, depth: u32, inherited_weight: f64) -> NodeId {
        let id = self.nodes.len() as NodeId;
        self.nodes.push(Node::Leaf(LeafNode::new(
            self.sketch_capacity,
            depth,
            inherited_weight,
        )));
        id
    }

    /// Freeze the least promising learning leaves until at most
    /// `max_active_leaves` remain. Returns how many were frozen.
    fn enforce_active_leaf_limit(&mut self) -> usize {
        let Some(limit) = self.params.max_active_leaves else {
            return 0;
        };
        let mut active: Vec<(NodeId, f64)> = self
            .nodes
            .iter()
            .enumerate()
            .filter_map(|(id, node)| match node {
                Node::Leaf(leaf) => Some((id as NodeId, leaf.promise)),
                _ => None,
            })
            .collect();
        if active.len() <= limit {
            return 0;
        }
        active.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

        let excess = active.len() - limit;
        for &(id, _) in &active[..excess] {
            self.deactivate(id);
        }
        excess
    }

    /// Freeze a learning leaf, moving its sketch into an inactive node.
    ///
    /// Returns `false` if `id` is not a learning leaf.
    pub fn deactivate(&mut self, id: NodeId) -> bool {
        let Some(Node::Leaf(leaf)) = self.nodes.get_mut(id as usize) else {
            return false;
        };
        let sketch = std::mem::replace(&mut leaf.sketch, S::new(1));
        let depth = leaf.depth;
        self.nodes[id as usize] = Node::Inactive(InactiveNode { sketch, depth });
        self.n_deactivated += 1;
        true
    }

    // -------------------------------------------------------------------------
    // Prediction
    // -------------------------------------------------------------------------

    /// Id of the leaf (learning or inactive) `features` routes to.
    pub fn find_leaf(&self, features: &[f64]) -> NodeId {
        let mut id = ROOT;
        while let Node::Split(split) = &self.nodes[id as usize] {
            id = split.child_for(features);
        }
        id
    }

    /// Sketch of the leaf `features` routes to.
    pub fn prediction_sketch(&self, features: &[f64]) -> &S {
        self.nodes[ROOT as usize].prediction_sketch(&self.nodes, features)
    }

    /// Point prediction: the mean of the routed leaf's sketch, 0 when empty.
    pub fn predict(&self, features: &[f64]) -> f64 {
        self.prediction_sketch(features).mean().unwrap_or(0.0)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Whether any update has been accepted.
    #[inline]
    pub fn training_has_started(&self) -> bool {
        self.n_updates > 0
    }

    /// Logical time of the last accepted update (0 if none).
    #[inline]
    pub fn last_updated(&self) -> u64 {
        self.last_updated
    }

    #[inline]
    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    #[inline]
    pub fn n_splits(&self) -> u64 {
        self.n_splits
    }

    #[inline]
    pub fn n_deactivated(&self) -> u64 {
        self.n_deactivated
    }

    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Leaves, learning or inactive.
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn n_active_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_active_leaf()).count()
    }

    pub fn n_inactive_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Inactive(_)))
            .count()
    }

    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(Node::depth).max().unwrap_or(0)
    }

    /// Node by id.
    pub fn node(&self, id: NodeId) -> &Node<S> {
        &self.nodes[id as usize]
    }

    /// Feature subspace of a learning leaf, once fixed.
    pub fn leaf_subspace(&self, id: NodeId) -> Option<&[u32]> {
        match &self.nodes[id as usize] {
            Node::Leaf(leaf) => leaf.subspace(),
            _ => None,
        }
    }

    #[inline]
    pub fn subspace_size(&self) -> usize {
        self.subspace_size
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Approximate memory held by leaf sketches.
    pub fn sketch_memory_bytes(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(Node::own_sketch)
            .map(RankSketch::memory_bytes)
            .sum()
    }

    /// Check that the arena forms a tree rooted at [`ROOT`].
    pub fn validate(&self) -> Result<(), TreeValidationError> {
        if self.nodes.is_empty() {
            return Err(TreeValidationError::EmptyTree);
        }
        let mut seen = vec![false; self.nodes.len()];
        seen[ROOT as usize] = true;
        let mut stack = vec![ROOT];

        while let Some(id) = stack.pop() {
            if let Node::Split(split) = &self.nodes[id as usize] {
                for &child in split.children() {
                    let Some(flag) = seen.get_mut(child as usize) else {
                        return Err(TreeValidationError::ChildOutOfBounds { node: id, child });
                    };
                    if *flag {
                        return Err(TreeValidationError::DuplicateReference { node: child });
                    }
                    *flag = true;
                    stack.push(child);
                }
            }
        }

        match seen.iter().position(|&s| !s) {
            Some(node) => Err(TreeValidationError::Unreachable {
                node: node as NodeId,
            }),
            None => Ok(()),
        }
    }
}
