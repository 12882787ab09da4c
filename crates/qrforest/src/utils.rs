//! Parallelism configuration and worker pools.
//!
//! The forest runs two kinds of parallel work: per-member task batches
//! (training, sketch fetches, out-of-bag votes) and a data-parallel reduction
//! of the fetched sketches. Each kind gets its own [`WorkerPool`] so coarse
//! reductions never compete with member tasks for the same threads.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use rayon::prelude::*;

use crate::error::{ConfigError, ForestError, ForestResult};

// =============================================================================
// Parallelism Configuration
// =============================================================================

/// Whether parallel execution is allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Parallel,
}

impl Parallelism {
    /// Returns `true` if parallel execution is allowed.
    #[inline]
    pub fn is_parallel(self) -> bool {
        matches!(self, Parallelism::Parallel)
    }
}

/// Resolve a worker count into a concrete number of threads.
///
/// - `-1` = all available cores
/// - `0` or `1` = sequential, on the calling thread
/// - `n > 1` = `n` threads
///
/// Returns `None` when the work should stay on the calling thread.
pub fn resolve_jobs(n_jobs: i32) -> Result<Option<usize>, ConfigError> {
    match n_jobs {
        -1 => {
            let n = available_threads();
            Ok((n > 1).then_some(n))
        }
        0 | 1 => Ok(None),
        n if n > 1 => Ok(Some(n as usize)),
        n => Err(ConfigError::InvalidNJobs(n)),
    }
}

fn available_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// =============================================================================
// WorkerPool
// =============================================================================

/// A bounded worker pool, or the calling thread when no pool is configured.
///
/// Both entry points block until every submitted task has finished. A panic in
/// any task is caught at the join and returned as
/// [`ForestError::Concurrency`]; results of the other tasks are dropped.
#[derive(Debug)]
pub struct WorkerPool {
    stage: &'static str,
    pool: Option<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Build a pool for `n_jobs` workers. `stage` names the pool in errors.
    pub fn new(stage: &'static str, n_jobs: i32) -> ForestResult<Self> {
        let pool = match resolve_jobs(n_jobs)? {
            None => None,
            Some(n_threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n_threads)
                    .thread_name(move |i| format!("qrforest-{stage}-{i}"))
                    .build()
                    .map_err(|e| ForestError::Concurrency {
                        stage,
                        message: e.to_string(),
                    })?,
            ),
        };
        Ok(Self { stage, pool })
    }

    /// A pool that runs everything on the calling thread.
    pub fn sequential(stage: &'static str) -> Self {
        Self { stage, pool: None }
    }

    /// Number of worker threads (1 when sequential).
    pub fn n_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Parallelism used by this pool.
    pub fn parallelism(&self) -> Parallelism {
        if self.pool.is_some() {
            Parallelism::Parallel
        } else {
            Parallelism::Sequential
        }
    }

    /// Submit a batch of tasks and join them.
    ///
    /// Returns one result per task, in submission order.
    pub fn run_batch<T, R, F>(&self, tasks: Vec<T>, f: F) -> ForestResult<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync + Send,
    {
        self.guard(|| match &self.pool {
            Some(pool) => pool.install(|| tasks.into_par_iter().map(&f).collect()),
            None => tasks.into_iter().map(&f).collect(),
        })
    }

    /// Reduce `items` with an associative, commutative combine.
    ///
    /// In parallel mode each worker folds a chunk starting from `identity()`
    /// and the partial results are combined pairwise, so the grouping is not
    /// deterministic.
    pub fn reduce<T, A, ID, FOLD, OP>(
        &self,
        items: Vec<T>,
        identity: ID,
        fold: FOLD,
        combine: OP,
    ) -> ForestResult<A>
    where
        T: Send,
        A: Send,
        ID: Fn() -> A + Sync + Send,
        FOLD: Fn(A, T) -> A + Sync + Send,
        OP: Fn(A, A) -> A + Sync + Send,
    {
        self.guard(|| match &self.pool {
            Some(pool) => pool.install(|| {
                items
                    .into_par_iter()
                    .fold(&identity, &fold)
                    .reduce(&identity, &combine)
            }),
            None => items.into_iter().fold(identity(), &fold),
        })
    }

    fn guard<R>(&self, op: impl FnOnce() -> R) -> ForestResult<R> {
        catch_unwind(AssertUnwindSafe(op)).map_err(|payload| ForestError::Concurrency {
            stage: self.stage,
            message: panic_message(payload.as_ref()),
        })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}
