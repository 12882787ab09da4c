//! The forest coordinator and its configuration.
//!
//! - [`ForestConfig`]: validated options built with `ForestConfig::builder()`
//! - [`TreeParams`]: growth parameters shared by every member
//! - [`QuantileForest`]: trains members by online bagging and merges their
//!   leaf sketches into prediction intervals

mod config;
mod forest;
mod params;

pub use config::{ForestConfig, ForestConfigBuilder, SubspaceMode};
pub use forest::{ForestDiagnostics, PredictionInterval, QuantileForest, TrainOutcome};
pub use params::TreeParams;
