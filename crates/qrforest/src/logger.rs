//! Verbosity-gated training events.
//!
//! Events are emitted through `tracing`; installing a subscriber is left to
//! the application. [`Verbosity`] filters at the source so a silent forest
//! does not even format its fields.

use tracing::{debug, info, warn};

use crate::repr::SplitSuggestion;

/// How much the forest reports while running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// Faults only.
    Warning,
    /// Lifecycle events.
    Info,
    /// Per-split and per-pass details.
    Debug,
}

/// Emits forest events at or below the configured [`Verbosity`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingLogger {
    verbosity: Verbosity,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }

    #[inline]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    #[inline]
    fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }

    /// The ensemble was built from the first instance.
    pub fn start_training(
        &self,
        n_members: usize,
        n_features: usize,
        subspace_size: usize,
        n_threads: usize,
    ) {
        if self.enabled(Verbosity::Info) {
            info!(
                n_members,
                n_features, subspace_size, n_threads, "Initialized quantile forest"
            );
        }
    }

    /// A member split one of its leaves.
    pub fn log_split(&self, member: usize, split: &SplitSuggestion, deactivated: usize) {
        if self.enabled(Verbosity::Debug) {
            debug!(
                member,
                feature = split.feature,
                threshold = split.threshold,
                merit = split.merit,
                deactivated,
                "Leaf split"
            );
        }
    }

    /// A calibration pass finished.
    pub fn log_recalibration(&self, retained: usize, marked: usize, refreshed: usize, triggered: bool) {
        if self.enabled(Verbosity::Debug) {
            debug!(retained, marked, refreshed, triggered, "Calibration pass");
        }
    }

    /// A worker task failed; the forest will refuse further calls.
    pub fn log_fault(&self, stage: &str, message: &str) {
        if self.enabled(Verbosity::Warning) {
            warn!(stage, error = message, "Worker fault, forest poisoned");
        }
    }

    pub fn finish_training(&self, instances_seen: u64, n_leaves: usize) {
        if self.enabled(Verbosity::Info) {
            info!(instances_seen, n_leaves, "Forest shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_is_ordered() {
        assert!(Verbosity::Silent < Verbosity::Warning);
        assert!(Verbosity::Warning < Verbosity::Info);
        assert!(Verbosity::Info < Verbosity::Debug);
        assert_eq!(Verbosity::default(), Verbosity::Silent);
    }

    #[test]
    fn gating_follows_verbosity() {
        let logger = TrainingLogger::new(Verbosity::Info);
        assert!(logger.enabled(Verbosity::Warning));
        assert!(logger.enabled(Verbosity::Info));
        assert!(!logger.enabled(Verbosity::Debug));
        assert!(!TrainingLogger::default().enabled(Verbosity::Warning));
    }
}
