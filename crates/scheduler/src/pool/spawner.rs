use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use super::{Executor, PoolError, Task};

/// On-demand threads: one fresh thread per task, nothing kept idle.
///
/// Serves two roles: the high-priority side pool, which must never queue behind a
/// saturated main pool, and lightweight dispatch for blocking or I/O-bound children,
/// where thousands may be in flight and a small stack keeps each thread cheap.
#[derive(Clone)]
pub struct ThreadSpawner {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    stack_size: Option<usize>,
    closed: AtomicBool,
    spawned: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl ThreadSpawner {
    /// Threads with the platform default stack size.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    /// Threads with a reduced stack of `stack_bytes`.
    pub fn lightweight(name: impl Into<String>, stack_bytes: usize) -> Self {
        Self::build(name.into(), Some(stack_bytes))
    }

    fn build(name: String, stack_size: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                stack_size,
                closed: AtomicBool::new(false),
                spawned: AtomicUsize::new(0),
                active: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Threads currently running a task.
    pub fn active_threads(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Threads started over the spawner's lifetime.
    pub fn spawned_total(&self) -> usize {
        self.inner.spawned.load(Ordering::Acquire)
    }
}

impl Executor for ThreadSpawner {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn execute(&self, task: Task) -> Result<(), PoolError> {
        if self.is_shutdown() {
            return Err(PoolError::Shutdown(self.inner.name.clone()));
        }
        let n = self.inner.spawned.fetch_add(1, Ordering::AcqRel);
        let mut builder = thread::Builder::new().name(format!("{}-{n}", self.inner.name));
        if let Some(size) = self.inner.stack_size {
            builder = builder.stack_size(size);
        }

        let active = Arc::clone(&self.inner.active);
        active.fetch_add(1, Ordering::AcqRel);
        let running = Arc::clone(&active);
        builder
            .spawn(move || {
                task();
                running.fetch_sub(1, Ordering::AcqRel);
            })
            .map(|_| ())
            .map_err(|source| {
                active.fetch_sub(1, Ordering::AcqRel);
                PoolError::Spawn {
                    name: self.inner.name.clone(),
                    source,
                }
            })
    }

    fn shutdown(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(
                pool = %self.inner.name,
                spawned = self.spawned_total(),
                active = self.active_threads(),
                "thread spawner closed"
            );
        }
    }

    fn is_shutdown(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ThreadSpawner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSpawner")
            .field("name", &self.inner.name)
            .field("stack_size", &self.inner.stack_size)
            .field("active", &self.active_threads())
            .field("closed", &self.is_shutdown())
            .finish()
    }
}
