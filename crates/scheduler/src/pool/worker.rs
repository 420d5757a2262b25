use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{error, info};

use super::{Executor, PoolError, Task};

/// Bounded pool of worker threads backed by rayon.
///
/// Cloning shares the pool. Tasks run in submission order as threads free up.
/// [`shutdown`](Executor::shutdown) rejects further submissions; rayon lets queued
/// tasks finish and retires the threads once the last clone is dropped.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    threads: usize,
    pool: rayon::ThreadPool,
    shutdown: AtomicBool,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Create a pool with `threads` workers (at least one).
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self, PoolError> {
        let name = name.into();
        let threads = threads.max(1);

        let thread_prefix = name.clone();
        let panic_pool = name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{thread_prefix}-{i}"))
            .panic_handler(move |_| {
                error!(pool = %panic_pool, "task panicked on worker thread");
            })
            .build()
            .map_err(|e| PoolError::Build {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        info!(pool = %name, threads, "worker pool started");
        Ok(Self {
            inner: Arc::new(Inner {
                name,
                threads,
                pool,
                shutdown: AtomicBool::new(false),
                in_flight: Arc::new(AtomicUsize::new(0)),
            }),
        })
    }

    pub fn threads(&self) -> usize {
        self.inner.threads
    }

    /// Tasks queued or running right now.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Acquire)
    }
}

impl Executor for WorkerPool {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, task: Task) -> Result<(), PoolError> {
        if self.is_shutdown() {
            return Err(PoolError::Shutdown(self.inner.name.clone()));
        }
        let in_flight = Arc::clone(&self.inner.in_flight);
        in_flight.fetch_add(1, Ordering::AcqRel);
        self.inner.pool.spawn_fifo(move || {
            task();
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
        Ok(())
    }

    fn shutdown(&self) {
        if !self.inner.shutdown.swap(true, Ordering::AcqRel) {
            info!(pool = %self.inner.name, in_flight = self.in_flight(), "worker pool shut down");
        }
    }

    fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("threads", &self.inner.threads)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
