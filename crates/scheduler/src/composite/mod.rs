//! Composite jobs: one trackable [`Job`] that runs a fixed batch of children.
//!
//! A [`PoolJob`] dispatches every child onto a pool chosen by its [`PoolSource`],
//! with HIGH children going to a per-run side pool, then waits for them in order.
//! The first child error fails the composite and cancels the siblings; cancelling
//! the composite cancels every child.

mod dispatch;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::job::{Job, JobError, JobPriority, JobState};
use crate::pool::WorkerPool;
use crate::progress::ItemProgress;
use crate::signal::Signal;
use crate::wrapped::WrappedJob;

/// Stack size for lightweight child threads when none is configured.
pub const DEFAULT_LIGHTWEIGHT_STACK: usize = 256 * 1024;

const DEFAULT_THREAD_PREFIX: &str = "taskcontrol-batch";

/// Where a [`PoolJob`] runs its NORMAL children.
#[derive(Debug, Clone)]
pub enum PoolSource {
    /// A dedicated pool of `threads` workers, created for the run and always shut down.
    Fixed { threads: usize },
    /// An existing pool, shut down after the run only if `auto_shutdown` is set.
    Provided { pool: WorkerPool, auto_shutdown: bool },
    /// One short-lived thread per child with a `stack_bytes` stack.
    Lightweight { stack_bytes: usize },
}

impl PoolSource {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fixed { .. } => "fixed",
            Self::Provided { .. } => "provided",
            Self::Lightweight { .. } => "lightweight",
        }
    }
}

/// State shared between the coordinator and the children's listeners.
pub(crate) struct BatchShared {
    pub(crate) state: JobState,
    pub(crate) children: Vec<Arc<WrappedJob>>,
    pub(crate) progress: ItemProgress,
    /// Per child: the batch's own listener has handled its terminal event.
    pub(crate) settled: Vec<AtomicBool>,
    pub(crate) signal: Signal,
}

impl BatchShared {
    /// Cancelled or already settled: the coordinator should stop waiting.
    pub(crate) fn is_stopped(&self) -> bool {
        self.state.is_canceled() || self.state.status().is_terminal()
    }

    pub(crate) fn is_settled(&self, index: usize) -> bool {
        self.settled[index].load(Ordering::Acquire)
    }

    pub(crate) fn mark_settled(&self, index: usize) {
        self.settled[index].store(true, Ordering::Release);
    }

    pub(crate) fn cancel_children(&self, except: Option<usize>) {
        for (index, child) in self.children.iter().enumerate() {
            if Some(index) != except {
                child.cancel();
            }
        }
    }
}

/// A job that runs a fixed batch of child jobs to completion.
///
/// Progress is the fraction of children that reached `Finished` (1.0 for an empty
/// batch). Priority is the first child's. A pool job runs at most once.
pub struct PoolJob {
    description: String,
    priority: JobPriority,
    thread_prefix: String,
    shared: Arc<BatchShared>,
    source: Mutex<Option<PoolSource>>,
}

impl PoolJob {
    pub fn new(description: impl Into<String>, jobs: Vec<Arc<dyn Job>>, source: PoolSource) -> Self {
        let children: Vec<Arc<WrappedJob>> = jobs.into_iter().map(WrappedJob::from_job).collect();
        let priority = children
            .first()
            .map(|child| child.priority())
            .unwrap_or_default();
        Self {
            description: description.into(),
            priority,
            thread_prefix: DEFAULT_THREAD_PREFIX.to_string(),
            shared: Arc::new(BatchShared {
                state: JobState::new(),
                progress: ItemProgress::with_total(children.len() as u64),
                settled: children.iter().map(|_| AtomicBool::new(false)).collect(),
                children,
                signal: Signal::new(),
            }),
            source: Mutex::new(Some(source)),
        }
    }

    /// Run children on a dedicated pool of `threads` workers.
    pub fn fixed(description: impl Into<String>, jobs: Vec<Arc<dyn Job>>, threads: usize) -> Self {
        Self::new(description, jobs, PoolSource::Fixed { threads })
    }

    /// Run children on `pool`, leaving it running afterwards.
    pub fn provided(description: impl Into<String>, jobs: Vec<Arc<dyn Job>>, pool: WorkerPool) -> Self {
        Self::new(
            description,
            jobs,
            PoolSource::Provided {
                pool,
                auto_shutdown: false,
            },
        )
    }

    /// Run each child on its own small-stack thread. For blocking or I/O-bound children.
    pub fn lightweight(description: impl Into<String>, jobs: Vec<Arc<dyn Job>>) -> Self {
        Self::new(
            description,
            jobs,
            PoolSource::Lightweight {
                stack_bytes: DEFAULT_LIGHTWEIGHT_STACK,
            },
        )
    }

    /// Shut a provided pool down once the batch is done. No effect on other sources.
    pub fn with_auto_shutdown(mut self, enabled: bool) -> Self {
        if let Some(PoolSource::Provided { auto_shutdown, .. }) = self.source.get_mut() {
            *auto_shutdown = enabled;
        }
        self
    }

    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        if let Some(PoolSource::Lightweight { stack_bytes }) = self.source.get_mut() {
            *stack_bytes = bytes;
        }
        self
    }

    /// Name prefix for threads this job creates.
    pub fn with_thread_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_prefix = prefix.into();
        self
    }

    pub fn children(&self) -> &[Arc<WrappedJob>] {
        &self.shared.children
    }

    pub fn total(&self) -> usize {
        self.shared.children.len()
    }

    /// Children that reached `Finished`.
    pub fn finished_count(&self) -> u64 {
        self.shared.progress.finished()
    }
}

impl Job for PoolJob {
    fn state(&self) -> &JobState {
        &self.shared.state
    }

    fn description(&self) -> String {
        self.description.clone()
    }

    fn run(&self) -> Result<(), JobError> {
        self.run_batch()
    }

    fn progress(&self) -> Option<f64> {
        Some(self.shared.progress.fraction().unwrap_or(1.0))
    }

    fn priority(&self) -> JobPriority {
        self.priority
    }

    fn is_coordinator(&self) -> bool {
        true
    }

    fn cancel(&self) {
        self.shared.state.request_cancel();
        self.shared.cancel_children(None);
        self.shared.signal.notify();
    }
}

impl std::fmt::Debug for PoolJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolJob")
            .field("description", &self.description)
            .field("children", &self.total())
            .field("finished", &self.finished_count())
            .field("state", &self.shared.state)
            .finish_non_exhaustive()
    }
}
