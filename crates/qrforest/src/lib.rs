//! qrforest: online quantile regression forests for Rust.
//!
//! Streaming regression trees whose leaves summarize labels with mergeable
//! rank sketches, combined by online bagging into prediction intervals, with
//! an optional out-of-bag conformal calibration layer.
//!
//! # Key Types
//!
//! - [`QuantileForest`] - Trains members one instance at a time and predicts
//!   intervals by merging leaf sketches
//! - [`ConformalForest`] - Wraps a forest with out-of-bag conformal scores
//! - [`ForestConfig`] / [`CalibrationConfig`] - Configuration builders
//! - [`RankSketch`] / [`QuantileSketch`] - The leaf summary contract and its
//!   t-digest implementation
//! - [`Instance`] - A labeled feature vector
//!
//! # Training
//!
//! Use `ForestConfig::builder()` to configure, then feed instances to
//! [`QuantileForest::train`]. See the [`model`] module for details.

// Re-export approx traits for users who want to compare predictions
pub use approx;

pub mod calibration;
pub mod data;
pub mod error;
pub mod logger;
pub mod model;
pub mod repr;
pub mod sketch;
pub mod testing;
pub mod utils;

// =============================================================================
// Convenience Re-exports
// =============================================================================

// Models and their configuration
pub use calibration::{CalibrationConfig, ConformalForest, ErrorFunction, Recalibration};
pub use model::{ForestConfig, PredictionInterval, QuantileForest, SubspaceMode, TreeParams};

// Data and summaries
pub use data::Instance;
pub use sketch::{QuantileSketch, RankSketch};

// Errors and logging
pub use error::{ConfigError, ForestError, ForestResult};
pub use logger::Verbosity;

// Shared utilities
pub use utils::{Parallelism, WorkerPool};
