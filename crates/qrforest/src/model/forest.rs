//! Online quantile regression forest.
//!
//! [`QuantileForest`] owns the member trees and two worker pools. Training
//! draws a Poisson replication count per member and fans the weighted copies
//! out as one batch; prediction fetches every started member's leaf sketch for
//! the instance as a second batch, then merges them with a parallel reduction
//! on the other pool and reads a symmetric quantile pair from the union.
//!
//! # Example
//!
//! ```
//! use qrforest::data::Instance;
//! use qrforest::model::{ForestConfig, QuantileForest};
//!
//! let config = ForestConfig::builder().n_members(5).build().unwrap();
//! let mut forest: QuantileForest = QuantileForest::new(config).unwrap();
//!
//! // Nothing learned yet: the empty interval
//! let query = Instance::new(vec![0.5, 0.5], 0.0);
//! let interval = forest.predict(&query).unwrap();
//! assert_eq!((interval.lower, interval.upper), (0.0, 0.0));
//!
//! for i in 0..500 {
//!     let x = (i % 100) as f64 / 100.0;
//!     forest.train(&Instance::new(vec![x, 1.0 - x], 3.0 * x)).unwrap();
//! }
//! let interval = forest.predict(&query).unwrap();
//! assert!(interval.lower <= interval.upper);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::ForestConfig;
use crate::data::Instance;
use crate::error::{ConfigError, ForestError, ForestResult};
use crate::logger::TrainingLogger;
use crate::repr::{LearnOutcome, QuantileTree};
use crate::sketch::{QuantileSketch, RankSketch};
use crate::utils::WorkerPool;

/// Golden-ratio increment used to derive member seeds from the forest seed.
const SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

// =============================================================================
// Outputs
// =============================================================================

/// Symmetric prediction interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionInterval {
    pub lower: f64,
    pub upper: f64,
}

impl PredictionInterval {
    /// Returned when no member has learned anything yet.
    pub const EMPTY: Self = Self {
        lower: 0.0,
        upper: 0.0,
    };

    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn to_array(self) -> [f64; 2] {
        [self.lower, self.upper]
    }
}

/// Result of one [`QuantileForest::train`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainOutcome {
    replications: Vec<u32>,
}

impl TrainOutcome {
    /// Poisson draw per member; 0 means the member never saw the instance.
    pub fn replications(&self) -> &[u32] {
        &self.replications
    }

    /// Whether `member` left the instance out of its bootstrap sample.
    pub fn is_out_of_bag(&self, member: usize) -> bool {
        self.replications.get(member) == Some(&0)
    }

    /// Members for which the instance is out-of-bag.
    pub fn out_of_bag(&self) -> impl Iterator<Item = usize> + '_ {
        self.replications
            .iter()
            .enumerate()
            .filter(|(_, &k)| k == 0)
            .map(|(i, _)| i)
    }

    /// Members that trained on the instance.
    pub fn n_trained(&self) -> usize {
        self.replications.iter().filter(|&&k| k > 0).count()
    }
}

/// Structural summary of the ensemble.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForestDiagnostics {
    pub instances_seen: u64,
    pub n_members: usize,
    /// Members that have accepted at least one update.
    pub n_started: usize,
    pub n_nodes: usize,
    pub n_leaves: usize,
    pub n_inactive_leaves: usize,
    pub n_splits: u64,
    /// Leaves frozen over the lifetime of the ensemble.
    pub n_deactivated: u64,
    pub sketch_memory_bytes: usize,
    /// Per-member point predictions served so far.
    pub n_member_votes: u64,
}

// =============================================================================
// QuantileForest
// =============================================================================

/// Ensemble of [`QuantileTree`]s trained by online bagging.
///
/// Members are created on the first [`train`](Self::train) call, which fixes
/// the feature count and subspace size. Before that, predictions return
/// [`PredictionInterval::EMPTY`].
///
/// A worker fault during any batch poisons the forest: the failing call
/// returns [`ForestError::Concurrency`], later calls return
/// [`ForestError::Poisoned`].
#[derive(Debug)]
pub struct QuantileForest<S: RankSketch = QuantileSketch> {
    config: ForestConfig,
    members: Vec<QuantileTree<S>>,
    n_features: usize,
    subspace_size: usize,
    rng: Xoshiro256PlusPlus,
    poisson: Poisson<f64>,
    /// Per-member training and sketch fetch tasks. `None` after shutdown.
    member_pool: Option<WorkerPool>,
    /// Sketch merging. `None` after shutdown.
    reduce_pool: Option<WorkerPool>,
    instances_seen: u64,
    member_votes: AtomicU64,
    poisoned: AtomicBool,
    logger: TrainingLogger,
}

impl<S: RankSketch> QuantileForest<S> {
    /// Validate `config` and build the worker pools.
    ///
    /// # Errors
    ///
    /// [`ForestError::Config`] for invalid options and
    /// [`ForestError::Concurrency`] if a thread pool cannot be built.
    pub fn new(config: ForestConfig) -> ForestResult<Self> {
        config.validate()?;
        let poisson =
            Poisson::new(config.lambda).map_err(|_| ConfigError::InvalidLambda(config.lambda))?;
        let member_pool = WorkerPool::new("members", config.n_jobs)?;
        let reduce_pool = WorkerPool::new("reduce", config.n_jobs)?;

        Ok(Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(config.seed),
            logger: TrainingLogger::new(config.verbosity),
            config,
            members: Vec::new(),
            n_features: 0,
            subspace_size: 0,
            poisson,
            member_pool: Some(member_pool),
            reduce_pool: Some(reduce_pool),
            instances_seen: 0,
            member_votes: AtomicU64::new(0),
            poisoned: AtomicBool::new(false),
        })
    }

    // -------------------------------------------------------------------------
    // Training
    // -------------------------------------------------------------------------

    /// Train every member on a Poisson-weighted copy of `instance`.
    ///
    /// Members drawing `k = 0` are skipped entirely. Returns once every member
    /// task has finished.
    ///
    /// # Errors
    ///
    /// [`ForestError::NonFiniteLabel`] leaves the forest untouched: no member,
    /// clock or RNG state changes.
    pub fn train(&mut self, instance: &Instance) -> ForestResult<TrainOutcome> {
        self.check_usable()?;
        if !instance.label().is_finite() {
            return Err(ForestError::NonFiniteLabel(instance.label()));
        }
        self.ensure_initialized(instance)?;

        self.instances_seen += 1;
        let now = self.instances_seen;

        let replications: Vec<u32> = (0..self.members.len())
            .map(|_| self.poisson.sample(&mut self.rng) as u32)
            .collect();

        let tasks: Vec<(usize, &mut QuantileTree<S>, Instance)> = self
            .members
            .iter_mut()
            .zip(&replications)
            .enumerate()
            .filter(|(_, (_, &k))| k > 0)
            .map(|(i, (member, &k))| (i, member, instance.with_weight(f64::from(k))))
            .collect();

        let pool = self.member_pool.as_ref().ok_or(ForestError::ShutDown)?;
        let outcomes: Vec<(usize, LearnOutcome)> = pool
            .run_batch(tasks, |(i, member, weighted)| (i, member.learn(&weighted, now)))
            .map_err(|e| self.fault(e))?;

        for (member, outcome) in outcomes {
            if let Some(split) = &outcome.split {
                self.logger.log_split(member, split, outcome.deactivated);
            }
        }

        Ok(TrainOutcome { replications })
    }

    fn ensure_initialized(&mut self, instance: &Instance) -> ForestResult<()> {
        if !self.members.is_empty() {
            return self.check_features(instance);
        }
        let n_features = instance.n_features();
        let subspace_size = self.config.subspace.resolve(n_features)?;

        self.members = (0..self.config.n_members)
            .map(|i| {
                QuantileTree::new(
                    n_features,
                    subspace_size,
                    self.config.sketch_capacity,
                    self.config.tree.clone(),
                    member_seed(self.config.seed, i),
                )
            })
            .collect();
        self.n_features = n_features;
        self.subspace_size = subspace_size;

        let n_threads = self.member_pool.as_ref().map_or(1, WorkerPool::n_threads);
        self.logger
            .start_training(self.members.len(), n_features, subspace_size, n_threads);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Prediction
    // -------------------------------------------------------------------------

    /// Interval at the configured confidence.
    pub fn predict(&self, instance: &Instance) -> ForestResult<PredictionInterval> {
        self.predict_with_confidence(instance, self.config.confidence)
    }

    /// Interval at an arbitrary confidence, read from the same merged sketch.
    ///
    /// Returns [`PredictionInterval::EMPTY`] when no member has started
    /// training.
    pub fn predict_with_confidence(
        &self,
        instance: &Instance,
        confidence: f64,
    ) -> ForestResult<PredictionInterval> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::InvalidConfidence(confidence).into());
        }
        let sketch = self.merged_sketch(instance)?;
        let (lower_rank, upper_rank) = ForestConfig::quantile_ranks(confidence);

        match (sketch.quantile(lower_rank), sketch.quantile(upper_rank)) {
            (Some(lower), Some(upper)) => Ok(PredictionInterval { lower, upper }),
            _ => Ok(PredictionInterval::EMPTY),
        }
    }

    /// Union of the leaf sketches `instance` reaches in every started member.
    pub fn merged_sketch(&self, instance: &Instance) -> ForestResult<S> {
        self.check_usable()?;
        let capacity = self.config.sketch_capacity;
        if self.members.is_empty() {
            return Ok(S::new(capacity));
        }
        self.check_features(instance)?;
        let (member_pool, reduce_pool) = self.pools()?;

        let features = instance.features();
        let started: Vec<&QuantileTree<S>> = self
            .members
            .iter()
            .filter(|m| m.training_has_started())
            .collect();

        let sketches: Vec<&S> = member_pool
            .run_batch(started, |member| member.prediction_sketch(features))
            .map_err(|e| self.fault(e))?;

        reduce_pool
            .reduce(
                sketches,
                || S::new(capacity),
                |acc, sketch| acc.merge(sketch),
                |a, b| a.merge(&b),
            )
            .map_err(|e| self.fault(e))
    }

    /// Point prediction of one member (mean of its routed leaf sketch).
    pub fn predict_member(&self, member: usize, instance: &Instance) -> ForestResult<f64> {
        self.check_usable()?;
        self.check_features(instance)?;
        let tree = self.members.get(member).ok_or_else(|| {
            ForestError::InvariantViolation(format!(
                "member {member} out of range for {} members",
                self.members.len()
            ))
        })?;
        self.member_votes.fetch_add(1, Ordering::Relaxed);
        Ok(tree.predict(instance.features()))
    }

    /// Point predictions of several members, computed as one batch.
    ///
    /// Results are in the order of `members`.
    pub fn predict_members(
        &self,
        members: &[usize],
        instance: &Instance,
    ) -> ForestResult<Vec<(usize, f64)>> {
        self.check_usable()?;
        if members.is_empty() {
            return Ok(Vec::new());
        }
        self.check_features(instance)?;

        let mut tasks = Vec::with_capacity(members.len());
        for &i in members {
            let tree = self.members.get(i).ok_or_else(|| {
                ForestError::InvariantViolation(format!(
                    "member {i} out of range for {} members",
                    self.members.len()
                ))
            })?;
            tasks.push((i, tree));
        }

        let (member_pool, _) = self.pools()?;
        let features = instance.features();
        let votes = member_pool
            .run_batch(tasks, |(i, tree)| (i, tree.predict(features)))
            .map_err(|e| self.fault(e))?;
        self.member_votes
            .fetch_add(votes.len() as u64, Ordering::Relaxed);
        Ok(votes)
    }

    /// Mean point prediction over started members (0 when none has started).
    pub fn predict_point(&self, instance: &Instance) -> ForestResult<f64> {
        let started: Vec<usize> = self
            .members
            .iter()
            .enumerate()
            .filter(|(_, m)| m.training_has_started())
            .map(|(i, _)| i)
            .collect();
        let votes = self.predict_members(&started, instance)?;
        if votes.is_empty() {
            return Ok(0.0);
        }
        Ok(votes.iter().map(|(_, v)| v).sum::<f64>() / votes.len() as f64)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Release the worker pools. Every later call returns
    /// [`ForestError::ShutDown`].
    pub fn shutdown(&mut self) {
        if self.member_pool.is_none() && self.reduce_pool.is_none() {
            return;
        }
        self.member_pool = None;
        self.reduce_pool = None;
        let n_leaves = self.members.iter().map(QuantileTree::n_leaves).sum();
        self.logger.finish_training(self.instances_seen, n_leaves);
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.member_pool.is_none()
    }

    #[inline]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    fn check_usable(&self) -> ForestResult<()> {
        if self.is_shut_down() {
            return Err(ForestError::ShutDown);
        }
        if self.is_poisoned() {
            return Err(ForestError::Poisoned);
        }
        Ok(())
    }

    fn check_features(&self, instance: &Instance) -> ForestResult<()> {
        if !self.members.is_empty() && instance.n_features() != self.n_features {
            return Err(ForestError::FeatureCountMismatch {
                expected: self.n_features,
                found: instance.n_features(),
            });
        }
        Ok(())
    }

    fn pools(&self) -> ForestResult<(&WorkerPool, &WorkerPool)> {
        match (&self.member_pool, &self.reduce_pool) {
            (Some(members), Some(reduce)) => Ok((members, reduce)),
            _ => Err(ForestError::ShutDown),
        }
    }

    /// Record a worker fault and pass the error on.
    fn fault(&self, err: ForestError) -> ForestError {
        if let ForestError::Concurrency { stage, message } = &err {
            self.logger.log_fault(stage, message);
            self.poisoned.store(true, Ordering::Release);
        }
        err
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &ForestConfig {
        &self.config
    }

    /// Whether members have been created.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        !self.members.is_empty()
    }

    /// Training instances seen; the calibration engine's notion of "now".
    #[inline]
    pub fn instances_seen(&self) -> u64 {
        self.instances_seen
    }

    pub fn members(&self) -> &[QuantileTree<S>] {
        &self.members
    }

    pub fn member(&self, index: usize) -> Option<&QuantileTree<S>> {
        self.members.get(index)
    }

    /// Logical time of each member's last accepted update.
    pub fn member_clocks(&self) -> Vec<u64> {
        self.members.iter().map(QuantileTree::last_updated).collect()
    }

    /// Feature count fixed at initialization (0 before).
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Subspace size fixed at initialization (0 before).
    pub fn subspace_size(&self) -> usize {
        self.subspace_size
    }

    /// Per-member point predictions served so far.
    pub fn member_votes(&self) -> u64 {
        self.member_votes.load(Ordering::Relaxed)
    }

    pub fn diagnostics(&self) -> ForestDiagnostics {
        let mut diag = ForestDiagnostics {
            instances_seen: self.instances_seen,
            n_members: self.members.len(),
            n_member_votes: self.member_votes(),
            ..Default::default()
        };
        for member in &self.members {
            diag.n_started += usize::from(member.training_has_started());
            diag.n_nodes += member.n_nodes();
            diag.n_leaves += member.n_leaves();
            diag.n_inactive_leaves += member.n_inactive_leaves();
            diag.n_splits += member.n_splits();
            diag.n_deactivated += member.n_deactivated();
            diag.sketch_memory_bytes += member.sketch_memory_bytes();
        }
        diag
    }
}

fn member_seed(seed: u64, member: usize) -> u64 {
    seed.wrapping_add((member as u64 + 1).wrapping_mul(SEED_STRIDE))
}
