use std::sync::Arc;

use tracing::{debug, error, info};

use crate::job::{JobError, JobPriority, JobStatus};
use crate::listener::StatusEvent;
use crate::pool::{Executor, ThreadSpawner, WorkerPool};
use crate::signal::POLL_INTERVAL;

use super::{BatchShared, PoolJob, PoolSource};

/// Pools acquired for one run. Dropping it releases them: the main pool only when
/// this run owns it, the side pool always.
struct ActivePools {
    main: Box<dyn Executor>,
    owns_main: bool,
    side: ThreadSpawner,
}

impl ActivePools {
    fn open(source: PoolSource, prefix: &str) -> Result<Self, JobError> {
        let (main, owns_main): (Box<dyn Executor>, bool) = match source {
            PoolSource::Fixed { threads } => {
                let pool = WorkerPool::new(prefix, threads)
                    .map_err(|e| JobError::Internal(e.to_string()))?;
                (Box::new(pool) as Box<dyn Executor>, true)
            }
            PoolSource::Provided { pool, auto_shutdown } => {
                (Box::new(pool) as Box<dyn Executor>, auto_shutdown)
            }
            PoolSource::Lightweight { stack_bytes } => (
                Box::new(ThreadSpawner::lightweight(format!("{prefix}-light"), stack_bytes))
                    as Box<dyn Executor>,
                true,
            ),
        };
        Ok(Self {
            main,
            owns_main,
            side: ThreadSpawner::new(format!("{prefix}-high")),
        })
    }

    fn for_priority(&self, priority: JobPriority) -> &dyn Executor {
        match priority {
            JobPriority::High => &self.side,
            JobPriority::Normal => self.main.as_ref(),
        }
    }
}

impl Drop for ActivePools {
    fn drop(&mut self) {
        if self.owns_main {
            self.main.shutdown();
        }
        self.side.shutdown();
        debug!(pool = self.main.name(), owned = self.owns_main, "released batch pools");
    }
}

impl PoolJob {
    pub(super) fn run_batch(&self) -> Result<(), JobError> {
        let source = self
            .source
            .lock()
            .take()
            .ok_or_else(|| JobError::Internal(format!("pool job \"{}\" already ran", self.description)))?;

        let shared = &self.shared;
        let total = shared.children.len();
        info!(job = %self.description, children = total, source = source.label(), "pool job started");
        if total == 0 {
            return Ok(());
        }

        let pools = ActivePools::open(source, &self.thread_prefix)?;
        self.watch_children();
        self.dispatch_children(&pools)?;
        self.await_children();
        drop(pools);

        match shared.state.status() {
            JobStatus::Error => {
                let message = shared.state.error_message().unwrap_or_default();
                Err(JobError::Failed(message))
            }
            _ if shared.state.is_canceled() => {
                shared.cancel_children(None);
                info!(job = %self.description, finished = self.finished_count(), total, "pool job canceled");
                Err(JobError::Canceled)
            }
            _ => {
                info!(job = %self.description, total, "pool job finished");
                Ok(())
            }
        }
    }

    fn watch_children(&self) {
        for (index, child) in self.shared.children.iter().enumerate() {
            let batch = Arc::downgrade(&self.shared);
            child.add_status_listener(Arc::new(move |event: &StatusEvent| {
                let Some(batch) = batch.upgrade() else {
                    return;
                };
                match event.current {
                    JobStatus::Finished => {
                        batch.progress.increment();
                    }
                    JobStatus::Error => on_child_error(&batch, index, event),
                    JobStatus::Canceled => {}
                    JobStatus::Waiting | JobStatus::Processing => return,
                }
                batch.mark_settled(index);
                batch.signal.notify();
            }));
            // Settled before the batch ran (cancelled from outside): no event will come.
            if child.status().is_terminal() {
                self.shared.mark_settled(index);
            }
        }
    }

    fn dispatch_children(&self, pools: &ActivePools) -> Result<(), JobError> {
        let shared = &self.shared;
        for child in &shared.children {
            if shared.is_stopped() {
                break;
            }
            let executor = pools.for_priority(child.priority());
            debug!(
                job = %self.description,
                child = %child.description(),
                pool = executor.name(),
                "dispatching child"
            );
            if let Err(e) = child.dispatch(executor) {
                error!(job = %self.description, child = %child.description(), error = %e, "failed to dispatch child");
                shared.cancel_children(None);
                return Err(JobError::Internal(format!(
                    "failed to dispatch \"{}\": {e}",
                    child.description()
                )));
            }
        }
        Ok(())
    }

    /// Wait for each child in order. Returns early once the batch is cancelled or has
    /// failed, even if an earlier child is still running.
    ///
    /// A child counts as done once the batch's listener has handled its terminal event,
    /// not when its status flips: the progress count and the batch error are written
    /// by that listener.
    fn await_children(&self) {
        let shared = &self.shared;
        for index in 0..shared.children.len() {
            shared
                .signal
                .wait_until(POLL_INTERVAL, || shared.is_stopped() || shared.is_settled(index));
            if shared.is_stopped() {
                break;
            }
        }
    }
}

fn on_child_error(batch: &BatchShared, index: usize, event: &StatusEvent) {
    let child = &batch.children[index];
    let reason = event.message.as_deref().unwrap_or("unknown error");
    let message = format!("Sub job \"{}\" failed: {reason}", child.description());
    // Fail first so the siblings' cancellations cannot settle the batch as canceled.
    if batch.state.fail(message) {
        batch.cancel_children(Some(index));
    }
}
