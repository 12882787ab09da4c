//! Out-of-bag calibration records.
//!
//! For every retained instance the store keeps three maps over the same keys:
//!
//! - member index → cached out-of-bag prediction
//! - logical time the instance was last recalibrated
//! - calibration score (error of the mean cached prediction)
//!
//! [`CalibrationRecords::recalibrate`] decides which cached predictions to
//! refresh. A member is *stale* for an instance when its last update is later
//! than the instance's last recalibration.

use std::collections::{BTreeMap, HashMap, VecDeque};

use super::score::ErrorFunction;
use crate::data::Instance;
use crate::error::{ForestError, ForestResult};

/// Identity of a retained instance. Assigned in arrival order, never reused.
pub type InstanceKey = u64;

/// How a calibration pass picks the predictions to refresh.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recalibration {
    /// Refresh every cached prediction of every retained instance.
    Exact,
    /// Two-level gating.
    ///
    /// An instance is marked when its stale fraction of out-of-bag members is
    /// at least `element_ratio`. Marked instances are refreshed only if they
    /// make up at least `set_ratio` of all retained instances; otherwise the
    /// pass reuses every cached value.
    Approximate { element_ratio: f64, set_ratio: f64 },
}

impl Default for Recalibration {
    fn default() -> Self {
        Recalibration::Approximate {
            element_ratio: 0.5,
            set_ratio: 0.5,
        }
    }
}

/// What a recalibration pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalibrationPass {
    /// Instances retained when the pass ran.
    pub retained: usize,
    /// Instances whose stale ratio crossed the element threshold.
    pub marked: usize,
    /// Whether marked instances were actually recomputed.
    pub triggered: bool,
    /// Member predictions requested from the forest.
    pub refreshed: usize,
}

/// Calibration state of a conformal engine.
#[derive(Debug, Clone)]
pub struct CalibrationRecords {
    instances: HashMap<InstanceKey, Instance>,
    predictions: HashMap<InstanceKey, BTreeMap<usize, f64>>,
    last_recalibrated: HashMap<InstanceKey, u64>,
    scores: HashMap<InstanceKey, f64>,
    /// Keys oldest first.
    order: VecDeque<InstanceKey>,
    next_key: InstanceKey,
    window: usize,
}

impl CalibrationRecords {
    /// Empty store retaining at most `window` instances.
    pub fn new(window: usize) -> Self {
        Self {
            instances: HashMap::new(),
            predictions: HashMap::new(),
            last_recalibrated: HashMap::new(),
            scores: HashMap::new(),
            order: VecDeque::new(),
            next_key: 0,
            window: window.max(1),
        }
    }

    /// Retain `instance` with its out-of-bag predictions, recalibrated at `now`.
    ///
    /// Returns `None` (and stores nothing) when `predictions` is empty. When
    /// the window is full the oldest record is evicted from every map.
    pub fn insert(
        &mut self,
        instance: Instance,
        predictions: BTreeMap<usize, f64>,
        now: u64,
        error: ErrorFunction,
    ) -> Option<InstanceKey> {
        let score = score_of(&predictions, instance.label(), error)?;
        let key = self.next_key;
        self.next_key += 1;

        self.instances.insert(key, instance);
        self.predictions.insert(key, predictions);
        self.last_recalibrated.insert(key, now);
        self.scores.insert(key, score);
        self.order.push_back(key);

        while self.order.len() > self.window {
            if let Some(oldest) = self.order.pop_front() {
                self.remove(oldest);
            }
        }
        Some(key)
    }

    fn remove(&mut self, key: InstanceKey) {
        self.instances.remove(&key);
        self.predictions.remove(&key);
        self.last_recalibrated.remove(&key);
        self.scores.remove(&key);
    }

    /// Run one calibration pass.
    ///
    /// `member_clocks[m]` is the logical time of member `m`'s last update and
    /// `now` the time stamped on refreshed instances. `refresh` computes the
    /// current predictions of the given members for an instance.
    ///
    /// # Errors
    ///
    /// [`ForestError::InvariantViolation`] if the maps disagree on their keys
    /// before or after the pass, a cached prediction refers to an unknown
    /// member, or a stale ratio exceeds 1. Errors from `refresh` are propagated unchanged.
    pub fn recalibrate<F>(
        &mut self,
        policy: Recalibration,
        member_clocks: &[u64],
        now: u64,
        error: ErrorFunction,
        mut refresh: F,
    ) -> ForestResult<RecalibrationPass>
    where
        F: FnMut(&Instance, &[usize]) -> ForestResult<Vec<(usize, f64)>>,
    {
        self.check_invariants()?;
        let retained = self.order.len();
        let mut pass = RecalibrationPass {
            retained,
            ..Default::default()
        };
        if retained == 0 {
            return Ok(pass);
        }

        // Members to refresh per marked instance
        let mut marked: Vec<(InstanceKey, Vec<usize>)> = Vec::new();
        for &key in &self.order {
            let cache = self.predictions.get(&key).ok_or_else(|| missing(key, "predictions"))?;
            let last = *self
                .last_recalibrated
                .get(&key)
                .ok_or_else(|| missing(key, "last_recalibrated"))?;

            let mut stale = Vec::new();
            for &member in cache.keys() {
                let clock = member_clocks.get(member).ok_or_else(|| {
                    ForestError::InvariantViolation(format!(
                        "instance {key} caches unknown member {member}"
                    ))
                })?;
                if policy == Recalibration::Exact || *clock > last {
                    stale.push(member);
                }
            }

            match policy {
                Recalibration::Exact => marked.push((key, stale)),
                Recalibration::Approximate { element_ratio, .. } => {
                    let ratio = if cache.is_empty() {
                        0.0
                    } else {
                        stale.len() as f64 / cache.len() as f64
                    };
                    if ratio > 1.0 {
                        return Err(ForestError::InvariantViolation(format!(
                            "stale ratio {ratio} exceeds 1 for instance {key}"
                        )));
                    }
                    if ratio >= element_ratio {
                        marked.push((key, stale));
                    }
                }
            }
        }

        pass.marked = marked.len();
        pass.triggered = match policy {
            Recalibration::Exact => true,
            Recalibration::Approximate { set_ratio, .. } => {
                marked.len() as f64 / retained as f64 >= set_ratio
            }
        };

        if pass.triggered {
            for (key, stale) in marked {
                let instance = self.instances.get(&key).ok_or_else(|| missing(key, "instances"))?;
                let label = instance.label();
                let fresh = if stale.is_empty() {
                    Vec::new()
                } else {
                    refresh(instance, &stale)?
                };
                pass.refreshed += fresh.len();

                let cache = self
                    .predictions
                    .get_mut(&key)
                    .ok_or_else(|| missing(key, "predictions"))?;
                for (member, value) in fresh {
                    cache.insert(member, value);
                }
                if let Some(score) = score_of(cache, label, error) {
                    self.scores.insert(key, score);
                }
                self.last_recalibrated.insert(key, now);
            }
        }

        self.check_invariants()?;
        Ok(pass)
    }

    /// Verify that every map holds exactly the retained keys.
    pub fn check_invariants(&self) -> ForestResult<()> {
        let n = self.order.len();
        let sizes = [
            self.instances.len(),
            self.predictions.len(),
            self.last_recalibrated.len(),
            self.scores.len(),
        ];
        if sizes.iter().any(|&len| len != n) {
            return Err(ForestError::InvariantViolation(format!(
                "calibration maps disagree: {n} retained, sizes {sizes:?}"
            )));
        }
        for key in &self.order {
            if !(self.instances.contains_key(key)
                && self.predictions.contains_key(key)
                && self.last_recalibrated.contains_key(key)
                && self.scores.contains_key(key))
            {
                return Err(missing(*key, "calibration maps"));
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Retained keys, oldest first.
    pub fn keys(&self) -> impl Iterator<Item = InstanceKey> + '_ {
        self.order.iter().copied()
    }

    pub fn contains(&self, key: InstanceKey) -> bool {
        self.scores.contains_key(&key)
    }

    pub fn score(&self, key: InstanceKey) -> Option<f64> {
        self.scores.get(&key).copied()
    }

    /// All scores, oldest instance first.
    pub fn scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.order.iter().filter_map(|key| self.scores.get(key).copied())
    }

    pub fn cached_predictions(&self, key: InstanceKey) -> Option<&BTreeMap<usize, f64>> {
        self.predictions.get(&key)
    }

    pub fn last_recalibrated(&self, key: InstanceKey) -> Option<u64> {
        self.last_recalibrated.get(&key).copied()
    }

    pub fn instance(&self, key: InstanceKey) -> Option<&Instance> {
        self.instances.get(&key)
    }
}

fn score_of(predictions: &BTreeMap<usize, f64>, label: f64, error: ErrorFunction) -> Option<f64> {
    if predictions.is_empty() {
        return None;
    }
    let mean = predictions.values().sum::<f64>() / predictions.len() as f64;
    Some(error.score(mean, label))
}

fn missing(key: InstanceKey, map: &str) -> ForestError {
    ForestError::InvariantViolation(format!("instance {key} missing from {map}"))
}
