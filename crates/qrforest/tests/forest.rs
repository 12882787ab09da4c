//! Integration tests for the quantile forest coordinator.

use approx::assert_relative_eq;
use rstest::rstest;

use qrforest::data::Instance;
use qrforest::model::{ForestConfig, PredictionInterval, QuantileForest, SubspaceMode, TreeParams};
use qrforest::sketch::{QuantileSketch, RankSketch};
use qrforest::testing::data::{heteroscedastic_stream, linear_stream};
use qrforest::{ConfigError, ForestError};

fn config(n_members: usize, n_jobs: i32) -> ForestConfig {
    ForestConfig::builder()
        .n_members(n_members)
        .n_jobs(n_jobs)
        .seed(7)
        .build()
        .unwrap()
}

fn trained(n_jobs: i32, rows: usize) -> QuantileForest {
    let mut forest = QuantileForest::new(config(8, n_jobs)).unwrap();
    for inst in heteroscedastic_stream(rows, 1) {
        forest.train(&inst).unwrap();
    }
    forest
}

// =============================================================================
// Empty state
// =============================================================================

#[rstest]
#[case(1)]
#[case(4)]
fn predict_before_training_is_zero_interval(#[case] n_jobs: i32) {
    let forest: QuantileForest = QuantileForest::new(config(5, n_jobs)).unwrap();
    let query = Instance::new(vec![0.3, 0.7], 1.0);

    let interval = forest.predict(&query).unwrap();

    assert_eq!(interval, PredictionInterval::EMPTY);
    assert_eq!(interval.to_array(), [0.0, 0.0]);
    assert_eq!(forest.predict_point(&query).unwrap(), 0.0);
}

// =============================================================================
// Intervals
// =============================================================================

#[test]
fn interval_width_grows_with_confidence() {
    let forest = trained(1, 2_000);
    let levels = [0.0, 0.1, 0.5, 0.8, 0.9, 0.99, 1.0];

    for x in [0.1, 0.5, 0.9] {
        let query = Instance::new(vec![x, 0.5], 0.0);
        let widths: Vec<f64> = levels
            .iter()
            .map(|&c| forest.predict_with_confidence(&query, c).unwrap().width())
            .collect();
        for pair in widths.windows(2) {
            assert!(pair[0] <= pair[1], "x={x}: widths {widths:?}");
        }
        assert_relative_eq!(widths[0], 0.0);
    }
}

#[test]
fn intervals_cover_most_fresh_labels() {
    let forest = trained(1, 3_000);
    let fresh = heteroscedastic_stream(500, 99);

    let covered = fresh
        .iter()
        .filter(|inst| forest.predict(inst).unwrap().contains(inst.label()))
        .count();
    let coverage = covered as f64 / fresh.len() as f64;

    assert!(coverage > 0.7, "coverage {coverage}");
}

#[test]
fn noisier_region_gets_wider_interval() {
    let forest = trained(1, 4_000);
    let quiet = forest.predict(&Instance::new(vec![0.05, 0.5], 0.0)).unwrap();
    let noisy = forest.predict(&Instance::new(vec![0.95, 0.5], 0.0)).unwrap();
    assert!(noisy.width() > quiet.width(), "{quiet:?} vs {noisy:?}");
}

// =============================================================================
// Online bagging
// =============================================================================

#[test]
fn out_of_bag_members_are_left_untouched() {
    let mut forest = trained(1, 300);
    let inst = Instance::new(vec![0.42, 0.1], 0.4);

    let before: Vec<(u64, u64, u64)> = forest
        .members()
        .iter()
        .map(|m| (m.last_updated(), m.n_updates(), m.prediction_sketch(inst.features()).count()))
        .collect();

    let outcome = forest.train(&inst).unwrap();
    let now = forest.instances_seen();

    for (i, member) in forest.members().iter().enumerate() {
        let (clock, updates, count) = before[i];
        if outcome.is_out_of_bag(i) {
            assert_eq!(member.last_updated(), clock);
            assert_eq!(member.n_updates(), updates);
            assert_eq!(member.prediction_sketch(inst.features()).count(), count);
        } else {
            assert_eq!(member.last_updated(), now);
            assert_eq!(member.n_updates(), updates + 1);
        }
    }
    assert_eq!(
        outcome.out_of_bag().count() + outcome.n_trained(),
        forest.members().len()
    );
}

#[test]
fn replications_follow_the_configured_lambda() {
    let mut forest: QuantileForest =
        QuantileForest::new(ForestConfig::builder().n_members(20).lambda(3.0).build().unwrap())
            .unwrap();
    let (stream, _, _) = linear_stream(200, 2, 4, 0.0);

    let mut total = 0u64;
    let mut draws = 0u64;
    for inst in &stream {
        let outcome = forest.train(inst).unwrap();
        total += outcome.replications().iter().map(|&k| u64::from(k)).sum::<u64>();
        draws += outcome.replications().len() as u64;
    }
    let mean = total as f64 / draws as f64;
    assert_relative_eq!(mean, 3.0, epsilon = 0.2);
}

// =============================================================================
// Parallelism
// =============================================================================

#[test]
fn sequential_and_parallel_forests_agree() {
    let sequential = trained(1, 1_000);
    let parallel = trained(4, 1_000);

    assert_eq!(sequential.member_clocks(), parallel.member_clocks());
    assert_eq!(
        sequential.diagnostics().n_nodes,
        parallel.diagnostics().n_nodes
    );

    for x in [0.1, 0.3, 0.6, 0.9] {
        let query = Instance::new(vec![x, 0.2], 0.0);
        for (a, b) in sequential.members().iter().zip(parallel.members()) {
            assert_eq!(a.predict(query.features()), b.predict(query.features()));
        }
        assert_eq!(
            sequential.merged_sketch(&query).unwrap().count(),
            parallel.merged_sketch(&query).unwrap().count()
        );
        assert_eq!(
            sequential.predict_point(&query).unwrap(),
            parallel.predict_point(&query).unwrap()
        );
    }
}

// =============================================================================
// Configuration and errors
// =============================================================================

#[test]
fn invalid_worker_count_is_a_config_error() {
    let result = ForestConfig::builder().n_jobs(-3).build();
    assert!(matches!(result, Err(ConfigError::InvalidNJobs(-3))));
}

#[test]
fn empty_subspace_fails_before_training() {
    let config = ForestConfig::builder()
        .subspace(SubspaceMode::Count(-5))
        .build()
        .unwrap();
    let mut forest: QuantileForest = QuantileForest::new(config).unwrap();

    let result = forest.train(&Instance::new(vec![1.0, 2.0, 3.0], 0.0));

    assert!(matches!(
        result,
        Err(ForestError::Config(ConfigError::EmptySubspace {
            size: -2,
            n_features: 3
        }))
    ));
    assert!(!forest.is_initialized());
    assert_eq!(forest.instances_seen(), 0);
}

#[test]
fn diagnostics_track_growth() {
    let config = ForestConfig::builder()
        .n_members(4)
        .tree(TreeParams::default().with_grace_period(50.0))
        .build()
        .unwrap();
    let mut forest: QuantileForest = QuantileForest::new(config).unwrap();
    for inst in heteroscedastic_stream(1_500, 5) {
        forest.train(&inst).unwrap();
    }

    let diag = forest.diagnostics();
    assert_eq!(diag.instances_seen, 1_500);
    assert_eq!(diag.n_members, 4);
    assert_eq!(diag.n_started, 4);
    assert!(diag.n_splits > 0);
    assert_eq!(diag.n_nodes, 4 + 2 * diag.n_splits as usize);
    assert!(diag.sketch_memory_bytes > 0);
    assert_eq!(diag.n_deactivated, diag.n_inactive_leaves as u64);
    for member in forest.members() {
        assert!(member.validate().is_ok());
    }
}

// =============================================================================
// Worker faults
// =============================================================================

/// Sketch that panics when asked to insert a sentinel value.
#[derive(Debug, Clone)]
struct FragileSketch(QuantileSketch);

const SENTINEL: f64 = 666.0;

impl RankSketch for FragileSketch {
    fn new(capacity: usize) -> Self {
        Self(QuantileSketch::new(capacity))
    }

    fn insert(&mut self, value: f64) {
        if value == SENTINEL {
            panic!("sentinel label");
        }
        self.0.insert(value);
    }

    fn merge(&self, other: &Self) -> Self {
        Self(self.0.merge(&other.0))
    }

    fn quantile(&self, rank: f64) -> Option<f64> {
        self.0.quantile(rank)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn count(&self) -> u64 {
        self.0.count()
    }

    fn mean(&self) -> Option<f64> {
        self.0.mean()
    }
}

#[rstest]
#[case(1)]
#[case(2)]
fn worker_panic_poisons_the_forest(#[case] n_jobs: i32) {
    let mut forest: QuantileForest<FragileSketch> =
        QuantileForest::new(config(4, n_jobs)).unwrap();
    forest.train(&Instance::new(vec![0.0], 1.0)).unwrap();

    let result = forest.train(&Instance::new(vec![0.0], SENTINEL));
    match result {
        Err(ForestError::Concurrency { message, .. }) => assert!(message.contains("sentinel")),
        other => panic!("expected concurrency fault, got {other:?}"),
    }

    assert!(forest.is_poisoned());
    assert!(matches!(
        forest.train(&Instance::new(vec![0.0], 1.0)),
        Err(ForestError::Poisoned)
    ));
    assert!(matches!(
        forest.predict(&Instance::new(vec![0.0], 1.0)),
        Err(ForestError::Poisoned)
    ));
}

/// Sketch whose merge panics once both sides hold values.
#[derive(Debug, Clone)]
struct UnmergeableSketch(QuantileSketch);

impl RankSketch for UnmergeableSketch {
    fn new(capacity: usize) -> Self {
        Self(QuantileSketch::new(capacity))
    }

    fn insert(&mut self, value: f64) {
        self.0.insert(value);
    }

    fn merge(&self, other: &Self) -> Self {
        if !self.is_empty() && !other.is_empty() {
            panic!("unmergeable sketches");
        }
        Self(self.0.merge(&other.0))
    }

    fn quantile(&self, rank: f64) -> Option<f64> {
        self.0.quantile(rank)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn count(&self) -> u64 {
        self.0.count()
    }

    fn mean(&self) -> Option<f64> {
        self.0.mean()
    }
}

#[rstest]
#[case(1)]
#[case(4)]
fn merge_fault_poisons_the_forest(#[case] n_jobs: i32) {
    let config = ForestConfig::builder()
        .n_members(6)
        .n_jobs(n_jobs)
        .seed(3)
        .tree(TreeParams::stump())
        .build()
        .unwrap();
    let mut forest: QuantileForest<UnmergeableSketch> = QuantileForest::new(config).unwrap();
    for i in 0..20 {
        forest.train(&Instance::new(vec![0.5], i as f64)).unwrap();
    }
    assert!(forest.diagnostics().n_started >= 2);
    assert!(!forest.is_poisoned());

    let query = Instance::new(vec![0.5], 0.0);
    match forest.predict(&query) {
        Err(ForestError::Concurrency { stage, message }) => {
            assert_eq!(stage, "reduce");
            assert!(message.contains("unmergeable"));
        }
        other => panic!("expected concurrency fault, got {other:?}"),
    }

    assert!(forest.is_poisoned());
    assert!(matches!(forest.predict(&query), Err(ForestError::Poisoned)));
    assert!(matches!(forest.train(&query), Err(ForestError::Poisoned)));
}

// =============================================================================
// Label validation
// =============================================================================

#[rstest]
#[case(f64::NAN)]
#[case(f64::INFINITY)]
#[case(f64::NEG_INFINITY)]
fn non_finite_labels_are_rejected(#[case] label: f64) {
    let mut forest: QuantileForest = QuantileForest::new(config(4, 1)).unwrap();
    let bad = Instance::new(vec![0.5, 0.5], label);

    // Before initialization the forest stays uninitialized
    assert!(matches!(forest.train(&bad), Err(ForestError::NonFiniteLabel(_))));
    assert!(!forest.is_initialized());

    let stream = heteroscedastic_stream(200, 9);
    for inst in &stream {
        forest.train(inst).unwrap();
    }
    let clocks = forest.member_clocks();
    let before = forest.predict(&bad).unwrap();
    let diag = forest.diagnostics();

    assert!(matches!(forest.train(&bad), Err(ForestError::NonFiniteLabel(_))));
    assert!(!forest.is_poisoned());
    assert_eq!(forest.instances_seen(), 200);
    assert_eq!(forest.member_clocks(), clocks);
    assert_eq!(forest.predict(&bad).unwrap(), before);
    assert_eq!(forest.diagnostics(), diag);

    // The bagging RNG did not advance either
    let mut reference: QuantileForest = QuantileForest::new(config(4, 1)).unwrap();
    for inst in &stream {
        reference.train(inst).unwrap();
    }
    let next = Instance::new(vec![0.2, 0.8], 1.0);
    assert_eq!(
        forest.train(&next).unwrap(),
        reference.train(&next).unwrap()
    );
}
