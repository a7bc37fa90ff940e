//! Worker pool used for compressing, decrypting and extracting entries in parallel.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::error::{Error, Result};

/// Upper bound for the number of workers of a pool
pub const MAX_WORKERS: usize = 32;

/// Number of workers used when none is configured
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKERS)
}

/// Shared progress of a long running operation, in percent
///
/// Two values are reserved: [`Progress::INDETERMINATE`] while an operation starts, and
/// [`Progress::AWAITING_KEY`] while a container cannot be read without a key.
#[derive(Debug, Clone)]
pub struct Progress(Arc<AtomicU32>);

impl Default for Progress {
    fn default() -> Self {
        Progress(Arc::new(AtomicU32::new(Self::INDETERMINATE.to_bits())))
    }
}

impl Progress {
    pub const INDETERMINATE: f32 = -1.0;
    pub const AWAITING_KEY: f32 = -2.0;

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Cooperative cancellation flag, checked between entries
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clears the flag before a new operation
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A fixed set of worker threads
pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WorkerPool({})", self.workers)
    }
}

impl WorkerPool {
    /// Spawns `workers` threads, clamped to `1..=MAX_WORKERS`
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.clamp(1, MAX_WORKERS);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("grf-worker-{i}"))
            .build()
            .map_err(|e| Error::CustomError(format!("unable to start workers: {e}")))?;
        Ok(WorkerPool { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Runs `action` over every item, returning the results in input order
    ///
    /// Items are split in contiguous chunks, one per worker. `on_progress` is called after each
    /// item and `is_cancelled` is polled before each item.
    pub fn parallel_for<T, R, F, P, C>(&self, items: &[T], on_progress: P, is_cancelled: C, action: F) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> Result<R> + Sync,
        P: Fn(f32) + Sync,
        C: Fn() -> bool + Sync,
    {
        self.parallel_for_with(self.workers, items, on_progress, is_cancelled, action)
    }

    /// Same as [`WorkerPool::parallel_for`] with at most `workers` chunks
    pub fn parallel_for_with<T, R, F, P, C>(
        &self,
        workers: usize,
        items: &[T],
        on_progress: P,
        is_cancelled: C,
        action: F,
    ) -> Result<Vec<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(usize, &T) -> Result<R> + Sync,
        P: Fn(f32) + Sync,
        C: Fn() -> bool + Sync,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let total = items.len();
        let chunk = total.div_ceil(workers.clamp(1, self.workers));
        let done = AtomicUsize::new(0);

        let chunks: Vec<Vec<R>> = self.pool.install(|| {
            items
                .par_chunks(chunk)
                .enumerate()
                .map(|(index, chunk_items)| {
                    let mut results = Vec::with_capacity(chunk_items.len());
                    for (i, item) in chunk_items.iter().enumerate() {
                        if is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        results.push(action(index * chunk + i, item)?);
                        let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
                        on_progress(finished as f32 * 100.0 / total as f32);
                    }
                    Ok(results)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        Ok(chunks.into_iter().flatten().collect())
    }
}
