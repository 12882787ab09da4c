//! Error types shared across the crate.
//!
//! Configuration problems are reported as [`ConfigError`] before any training
//! happens. Everything that can go wrong once the ensemble is running is a
//! [`ForestError`].

use thiserror::Error;

// =============================================================================
// ConfigError
// =============================================================================

/// Invalid option or option combination.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Ensemble must contain at least one member.
    #[error("n_members must be at least 1")]
    InvalidNMembers,

    /// Confidence must be in [0, 1].
    #[error("confidence must be in [0, 1], got {0}")]
    InvalidConfidence(f64),

    /// Sketch capacity must be at least 1.
    #[error("sketch_capacity must be at least 1")]
    InvalidSketchCapacity,

    /// Poisson mean for online bagging must be >= 1.
    #[error("lambda must be >= 1.0, got {0}")]
    InvalidLambda(f64),

    /// Worker count must be -1, 0 or positive.
    #[error("n_jobs must be >= -1, got {0}")]
    InvalidNJobs(i32),

    /// A ratio threshold is outside [0, 1].
    #[error("{field} must be in [0, 1], got {value}")]
    InvalidRatio { field: &'static str, value: f64 },

    /// A tree growth parameter is out of range.
    #[error("{field} is out of range: {value}")]
    InvalidTreeParam { field: &'static str, value: f64 },

    /// Calibration window must retain at least one instance.
    #[error("calibration window must be at least 1")]
    InvalidWindow,

    /// Feature subspace resolved to an empty set.
    #[error("feature subspace resolves to {size} of {n_features} features")]
    EmptySubspace { size: i64, n_features: usize },

    /// Instances must carry at least one feature.
    #[error("instances must have at least one feature")]
    NoFeatures,
}

// =============================================================================
// ForestError
// =============================================================================

/// Errors raised while training or querying an ensemble.
#[derive(Debug, Error)]
pub enum ForestError {
    /// Invalid configuration detected at initialization.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A worker task failed or a pool could not be created.
    ///
    /// Partial results are discarded; the call that observed the fault fails.
    #[error("worker fault during {stage}: {message}")]
    Concurrency { stage: &'static str, message: String },

    /// Instance width differs from the width the ensemble was initialized with.
    #[error("instance has {found} features, ensemble was initialized with {expected}")]
    FeatureCountMismatch { expected: usize, found: usize },

    /// Training labels must be finite.
    #[error("training label must be finite, got {0}")]
    NonFiniteLabel(f64),

    /// Internal consistency check failed.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Worker pools were shut down explicitly.
    #[error("worker pools have been shut down")]
    ShutDown,

    /// An earlier worker fault left member state indeterminate.
    #[error("ensemble state is poisoned by an earlier worker fault")]
    Poisoned,
}

/// Result alias used throughout the crate.
pub type ForestResult<T> = Result<T, ForestError>;
