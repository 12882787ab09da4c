//! Forest configuration with builder pattern.
//!
//! [`ForestConfig`] uses the `bon` crate for builder generation and validates
//! every option when the builder finishes.
//!
//! # Example
//!
//! ```
//! use qrforest::model::{ForestConfig, SubspaceMode, TreeParams};
//!
//! // All defaults
//! let config = ForestConfig::builder().build().unwrap();
//! assert_eq!(config.n_members, 10);
//!
//! // 95% intervals from 25 members, sqrt(M)+1 features per leaf, 4 workers
//! let config = ForestConfig::builder()
//!     .n_members(25)
//!     .confidence(0.95)
//!     .subspace(SubspaceMode::SqrtPlusOne)
//!     .n_jobs(4)
//!     .tree(TreeParams::default().with_max_active_leaves(64))
//!     .build()
//!     .unwrap();
//! ```

use bon::Builder;

use super::TreeParams;
use crate::error::ConfigError;
use crate::logger::Verbosity;

// =============================================================================
// SubspaceMode
// =============================================================================

/// How many features each leaf may split on, given `M` features in total.
///
/// Negative counts and percentages are read as "all but": `Count(-2)` is
/// `M − 2`, `Percentage(-25)` is 75% of `M`. Results larger than `M` are
/// clamped to `M`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubspaceMode {
    /// An explicit number of features.
    Count(i64),
    /// `⌈√M⌉ + 1`.
    SqrtPlusOne,
    /// `M − (⌈√M⌉ + 1)`.
    AllMinusSqrtPlusOne,
    /// `round(M · p / 100)`.
    Percentage(i64),
}

impl Default for SubspaceMode {
    fn default() -> Self {
        SubspaceMode::Percentage(100)
    }
}

impl SubspaceMode {
    /// Resolve to a concrete subspace size for `n_features` features.
    ///
    /// # Errors
    ///
    /// [`ConfigError::NoFeatures`] when `n_features` is 0 and
    /// [`ConfigError::EmptySubspace`] when the size resolves to 0 or less.
    pub fn resolve(&self, n_features: usize) -> Result<usize, ConfigError> {
        if n_features == 0 {
            return Err(ConfigError::NoFeatures);
        }
        let m = n_features as i64;
        let sqrt_plus_one = (m as f64).sqrt().ceil() as i64 + 1;

        let size = match *self {
            SubspaceMode::Count(k) if k < 0 => m + k,
            SubspaceMode::Count(k) => k,
            SubspaceMode::SqrtPlusOne => sqrt_plus_one,
            SubspaceMode::AllMinusSqrtPlusOne => m - sqrt_plus_one,
            SubspaceMode::Percentage(p) => {
                let percent = if p < 0 { 100 + p } else { p };
                (m as f64 * percent as f64 / 100.0).round() as i64
            }
        };

        if size <= 0 {
            return Err(ConfigError::EmptySubspace { size, n_features });
        }
        Ok((size as usize).min(n_features))
    }
}

// =============================================================================
// ForestConfig
// =============================================================================

/// Configuration of an online quantile regression forest.
///
/// # Structure
///
/// - **Ensemble**: `n_members`, `lambda` (online bagging intensity)
/// - **Intervals**: `confidence`, `sketch_capacity`
/// - **Trees**: feature `subspace` and growth [`TreeParams`]
/// - **Resources**: `n_jobs`
/// - **Reproducibility & logging**: `seed`, `verbosity`
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct ForestConfig {
    // === Ensemble ===
    /// Number of member trees. Default: 10.
    #[builder(default = 10)]
    pub n_members: usize,

    /// Poisson mean of the per-member replication count. Default: 6.0.
    #[builder(default = 6.0)]
    pub lambda: f64,

    // === Intervals ===
    /// Coverage of the symmetric prediction interval. Default: 0.9.
    ///
    /// Read as the quantile pair `((1 − c)/2, 1 − (1 − c)/2)`.
    #[builder(default = 0.9)]
    pub confidence: f64,

    /// Resolution of every leaf sketch. Default: 128.
    #[builder(default = 128)]
    pub sketch_capacity: usize,

    // === Trees ===
    /// Feature subspace per leaf. Default: all features.
    #[builder(default)]
    pub subspace: SubspaceMode,

    /// Growth parameters of every member.
    #[builder(default)]
    pub tree: TreeParams,

    // === Resources ===
    /// Worker count: `-1` all cores, `0`/`1` calling thread, `n > 1` a pool
    /// of `n`. Default: 1.
    #[builder(default = 1)]
    pub n_jobs: i32,

    // === Reproducibility ===
    /// Random seed. Default: 42.
    #[builder(default = 42)]
    pub seed: u64,

    // === Logging ===
    /// Verbosity level. Default: `Silent`.
    #[builder(default)]
    pub verbosity: Verbosity,
}

/// Custom finishing function that validates the config.
impl<S: forest_config_builder::IsComplete> ForestConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any parameter is out of range.
    pub fn build(self) -> Result<ForestConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl ForestConfig {
    /// Validate the configuration.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.n_members == 0 {
            return Err(ConfigError::InvalidNMembers);
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ConfigError::InvalidConfidence(self.confidence));
        }
        if self.sketch_capacity == 0 {
            return Err(ConfigError::InvalidSketchCapacity);
        }
        if !(self.lambda >= 1.0 && self.lambda.is_finite()) {
            return Err(ConfigError::InvalidLambda(self.lambda));
        }
        if self.n_jobs < -1 {
            return Err(ConfigError::InvalidNJobs(self.n_jobs));
        }
        // Fixed counts can be checked before any data arrives
        if let SubspaceMode::Count(0) | SubspaceMode::Percentage(0) = self.subspace {
            return Err(ConfigError::EmptySubspace {
                size: 0,
                n_features: 0,
            });
        }
        self.tree.validate()
    }

    /// Lower and upper quantile ranks for `confidence`.
    pub fn quantile_ranks(confidence: f64) -> (f64, f64) {
        let half = (1.0 - confidence) / 2.0;
        (half, 1.0 - half)
    }
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self::builder().build().expect("default config is valid")
    }
}

// =============================================================================
// Tests
// =============================================================================
