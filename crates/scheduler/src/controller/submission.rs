use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};
use uuid::Uuid;

use crate::job::{Job, JobPriority, JobStatus};
use crate::listener::StatusEvent;
use crate::metrics::ControllerMetrics;
use crate::pool::PoolError;
use crate::wrapped::WrappedJob;

use super::core::JobController;

type Registry = RwLock<Vec<Arc<WrappedJob>>>;

impl JobController {
    /// Submit `job` at its own priority.
    pub fn submit(&self, job: Arc<dyn Job>) -> Result<Arc<WrappedJob>, PoolError> {
        let priority = job.priority();
        self.submit_with_priority(job, priority)
    }

    /// Submit `job`, overriding its priority.
    ///
    /// Coordinators go to a carrier thread whatever their priority; other jobs go to
    /// the high-priority pool when HIGH, the main pool otherwise. If the target pool
    /// rejects the job it is moved to `Error` and dropped from the
    /// registry before the error is returned.
    pub fn submit_with_priority(
        &self,
        job: Arc<dyn Job>,
        priority: JobPriority,
    ) -> Result<Arc<WrappedJob>, PoolError> {
        let wrapped = WrappedJob::new(job, priority);
        self.track(&wrapped);

        let dispatched = if wrapped.job().is_coordinator() {
            wrapped.dispatch(&self.carriers)
        } else {
            match priority {
                JobPriority::High => wrapped.dispatch(&self.high_priority),
                JobPriority::Normal => wrapped.dispatch(&self.main_pool()),
            }
        };
        if let Err(e) = dispatched {
            error!(job = %wrapped.description(), error = %e, "failed to submit job");
            wrapped.job().state().fail(format!("internal scheduler error: {e}"));
            return Err(e);
        }
        Ok(wrapped)
    }

    /// Submit every job at its own priority. Stops at the first rejection.
    pub fn submit_all<I>(&self, jobs: I) -> Result<Vec<Arc<WrappedJob>>, PoolError>
    where
        I: IntoIterator<Item = Arc<dyn Job>>,
    {
        jobs.into_iter().map(|job| self.submit(job)).collect()
    }

    /// Track `job` like a submitted one but run it on the calling thread, blocking
    /// until it is terminal.
    pub fn run_on_this_thread_blocking(&self, job: Arc<dyn Job>) -> Result<Arc<WrappedJob>, PoolError> {
        let priority = job.priority();
        let wrapped = WrappedJob::new(job, priority);
        self.track(&wrapped);
        wrapped.run_blocking()?;
        Ok(wrapped)
    }

    /// Add `job` to the registry and arrange for it to leave it, with its outcome
    /// recorded, once terminal.
    fn track(&self, job: &Arc<WrappedJob>) {
        self.jobs.write().push(Arc::clone(job));
        self.metrics.write().record_submitted(job.priority());

        let settle = Arc::new(Settle {
            done: AtomicBool::new(false),
            id: job.id(),
            description: job.description(),
            started: Mutex::new(None),
            registry: Arc::downgrade(&self.jobs),
            metrics: Arc::downgrade(&self.metrics),
        });
        let listener = Arc::clone(&settle);
        job.add_status_listener(Arc::new(move |event: &StatusEvent| match event.current {
            JobStatus::Processing => *listener.started.lock() = Some(Instant::now()),
            status if status.is_terminal() => listener.run(status),
            _ => {}
        }));

        // Already terminal (e.g. cancelled before submission): no event will come.
        let status = job.status();
        if status.is_terminal() {
            settle.run(status);
        }
        debug!(job = %settle.description, id = %settle.id, priority = ?job.priority(), "job registered");
    }
}

/// Removes a job from the registry and records its outcome, once.
struct Settle {
    done: AtomicBool,
    id: Uuid,
    description: String,
    started: Mutex<Option<Instant>>,
    registry: Weak<Registry>,
    metrics: Weak<RwLock<ControllerMetrics>>,
}

impl Settle {
    fn run(&self, status: JobStatus) {
        if self.done.swap(true, Ordering::AcqRel) {
            return;
        }
        let started = *self.started.lock();
        let elapsed: Option<Duration> = started.map(|at| at.elapsed());
        if let Some(registry) = self.registry.upgrade() {
            registry.write().retain(|job| job.id() != self.id);
        }
        if let Some(metrics) = self.metrics.upgrade() {
            metrics.write().record_outcome(&self.description, status, elapsed);
        }
        debug!(job = %self.description, ?status, ?elapsed, "job left the controller");
    }
}
