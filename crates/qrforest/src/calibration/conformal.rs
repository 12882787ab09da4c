//! Out-of-bag conformal calibration around a [`QuantileForest`].

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use bon::Builder;

use super::records::{CalibrationRecords, Recalibration, RecalibrationPass};
use super::score::{conformal_quantile, ErrorFunction};
use crate::data::Instance;
use crate::error::{ConfigError, ForestResult};
use crate::logger::TrainingLogger;
use crate::model::{ForestConfig, PredictionInterval, QuantileForest};
use crate::sketch::{QuantileSketch, RankSketch};

// =============================================================================
// CalibrationConfig
// =============================================================================

/// Configuration of a [`ConformalForest`].
///
/// # Example
///
/// ```
/// use qrforest::calibration::{CalibrationConfig, ErrorFunction, Recalibration};
/// use qrforest::model::ForestConfig;
///
/// let config = CalibrationConfig::builder()
///     .forest(ForestConfig::builder().n_members(20).build().unwrap())
///     .strategy(Recalibration::Approximate { element_ratio: 0.3, set_ratio: 0.1 })
///     .error_function(ErrorFunction::Squared)
///     .window(500)
///     .build()
///     .unwrap();
/// assert_eq!(config.window, 500);
/// ```
#[derive(Debug, Clone, Builder)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct CalibrationConfig {
    /// The wrapped forest.
    #[builder(default)]
    pub forest: ForestConfig,

    /// Which cached predictions a pass refreshes. Default: approximate, 0.5/0.5.
    #[builder(default)]
    pub strategy: Recalibration,

    /// Score of an out-of-bag prediction. Default: absolute error.
    #[builder(default)]
    pub error_function: ErrorFunction,

    /// Retained calibration instances. Default: 1000.
    #[builder(default = 1000)]
    pub window: usize,
}

impl<S: calibration_config_builder::IsComplete> CalibrationConfigBuilder<S> {
    /// Build and validate the configuration.
    pub fn build(self) -> Result<CalibrationConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl CalibrationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.forest.validate()?;
        if self.window == 0 {
            return Err(ConfigError::InvalidWindow);
        }
        if let Recalibration::Approximate {
            element_ratio,
            set_ratio,
        } = self.strategy
        {
            for (field, value) in [("element_ratio", element_ratio), ("set_ratio", set_ratio)] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ConfigError::InvalidRatio { field, value });
                }
            }
        }
        Ok(())
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self::builder().build().expect("default config is valid")
    }
}

// =============================================================================
// ConformalForest
// =============================================================================

/// Cost accounting of a [`ConformalForest`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CalibrationMeasurements {
    /// Mean wall time of [`ConformalForest::train`], in nanoseconds.
    pub average_training_time_ns: f64,
    /// Member predictions requested for calibration so far.
    pub vote_calls: u64,
    /// Instances currently retained.
    pub retained: usize,
    /// The most recent calibration pass.
    pub last_pass: RecalibrationPass,
}

/// Quantile forest with conformal intervals from out-of-bag scores.
///
/// Every training instance is first fed to the forest; the members that left
/// it out of their bootstrap sample then vote on it, and the mean vote's error
/// becomes the instance's calibration score. Each call ends with a
/// recalibration pass over all retained instances.
///
/// Predictions are `point ± inverse_error(q)`, where `point` is the mean
/// member prediction and `q` the conformal quantile of the scores. Without any
/// score the forest's own sketch interval is returned.
#[derive(Debug)]
pub struct ConformalForest<S: RankSketch = QuantileSketch> {
    forest: QuantileForest<S>,
    records: CalibrationRecords,
    strategy: Recalibration,
    error_function: ErrorFunction,
    training_time: Duration,
    training_instances: u64,
    vote_calls: u64,
    last_pass: RecalibrationPass,
    logger: TrainingLogger,
}

impl<S: RankSketch> ConformalForest<S> {
    pub fn new(config: CalibrationConfig) -> ForestResult<Self> {
        config.validate()?;
        let logger = TrainingLogger::new(config.forest.verbosity);
        Ok(Self {
            records: CalibrationRecords::new(config.window),
            strategy: config.strategy,
            error_function: config.error_function,
            forest: QuantileForest::new(config.forest)?,
            training_time: Duration::ZERO,
            training_instances: 0,
            vote_calls: 0,
            last_pass: RecalibrationPass::default(),
            logger,
        })
    }

    /// Train the forest on `instance`, record its out-of-bag score and run a
    /// recalibration pass.
    pub fn train(&mut self, instance: &Instance) -> ForestResult<RecalibrationPass> {
        let start = Instant::now();

        let outcome = self.forest.train(instance)?;
        let now = self.forest.instances_seen();

        let out_of_bag: Vec<usize> = outcome
            .out_of_bag()
            .filter(|&m| {
                self.forest
                    .member(m)
                    .is_some_and(|tree| tree.training_has_started())
            })
            .collect();
        let votes = self.forest.predict_members(&out_of_bag, instance)?;
        self.vote_calls += votes.len() as u64;
        let votes: BTreeMap<usize, f64> = votes.into_iter().collect();
        self.records
            .insert(instance.clone(), votes, now, self.error_function);

        let forest = &self.forest;
        let clocks = forest.member_clocks();
        let pass = self.records.recalibrate(
            self.strategy,
            &clocks,
            now,
            self.error_function,
            |inst, members| forest.predict_members(members, inst),
        )?;
        self.vote_calls += pass.refreshed as u64;
        self.last_pass = pass;

        self.logger
            .log_recalibration(pass.retained, pass.marked, pass.refreshed, pass.triggered);
        self.training_time += start.elapsed();
        self.training_instances += 1;
        Ok(pass)
    }

    /// Interval at the forest's configured confidence.
    pub fn predict(&self, instance: &Instance) -> ForestResult<PredictionInterval> {
        self.predict_with_confidence(instance, self.forest.config().confidence)
    }

    /// Conformal interval at `confidence`.
    pub fn predict_with_confidence(
        &self,
        instance: &Instance,
        confidence: f64,
    ) -> ForestResult<PredictionInterval> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ConfigError::InvalidConfidence(confidence).into());
        }
        let Some(q) = conformal_quantile(self.records.scores(), confidence) else {
            return self.forest.predict_with_confidence(instance, confidence);
        };
        let point = self.forest.predict_point(instance)?;
        let half_width = self.error_function.inverse(q);
        Ok(PredictionInterval::new(point - half_width, point + half_width))
    }

    pub fn measurements(&self) -> CalibrationMeasurements {
        let average_training_time_ns = if self.training_instances == 0 {
            0.0
        } else {
            self.training_time.as_nanos() as f64 / self.training_instances as f64
        };
        CalibrationMeasurements {
            average_training_time_ns,
            vote_calls: self.vote_calls,
            retained: self.records.len(),
            last_pass: self.last_pass,
        }
    }

    /// Release the forest's worker pools.
    pub fn shutdown(&mut self) {
        self.forest.shutdown();
    }

    pub fn forest(&self) -> &QuantileForest<S> {
        &self.forest
    }

    pub fn records(&self) -> &CalibrationRecords {
        &self.records
    }

    pub fn strategy(&self) -> Recalibration {
        self.strategy
    }

    pub fn error_function(&self) -> ErrorFunction {
        self.error_function
    }
}
