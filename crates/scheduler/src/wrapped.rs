use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::job::{run_job, Job, JobPriority, JobStatus};
use crate::listener::StatusListener;
use crate::pool::{ExecutionHandle, Executor, PoolError};

/// Administrative envelope around one submitted [`Job`].
///
/// Captures the priority at wrap time, carries the execution handle once the job is
/// dispatched, and forwards status queries and listeners to the job.
pub struct WrappedJob {
    id: Uuid,
    job: Arc<dyn Job>,
    priority: JobPriority,
    submitted_at: DateTime<Utc>,
    handle: OnceLock<ExecutionHandle>,
}

impl WrappedJob {
    pub fn new(job: Arc<dyn Job>, priority: JobPriority) -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            job,
            priority,
            submitted_at: Utc::now(),
            handle: OnceLock::new(),
        })
    }

    /// Wrap using the job's own priority.
    pub fn from_job(job: Arc<dyn Job>) -> Arc<Self> {
        let priority = job.priority();
        Self::new(job, priority)
    }

    /// Queue the job body on `executor`.
    ///
    /// Each envelope is dispatched at most once. If the executor rejects the task the
    /// handle is cancelled and the job is left untouched for the caller to settle.
    pub fn dispatch(self: &Arc<Self>, executor: &dyn Executor) -> Result<ExecutionHandle, PoolError> {
        let handle = ExecutionHandle::new();
        if self.handle.set(handle.clone()).is_err() {
            return Err(PoolError::AlreadyDispatched(self.description()));
        }

        debug!(job = %self.description(), pool = executor.name(), priority = ?self.priority, "dispatching job");
        let job = Arc::clone(&self.job);
        let task_handle = handle.clone();
        let queued = executor.execute(Box::new(move || {
            if task_handle.try_start() {
                run_job(job.as_ref());
                task_handle.complete();
            }
        }));
        if let Err(e) = queued {
            handle.cancel();
            return Err(e);
        }
        Ok(handle)
    }

    /// Run the job on the calling thread and return its terminal status.
    pub fn run_blocking(&self) -> Result<JobStatus, PoolError> {
        let handle = ExecutionHandle::new();
        if self.handle.set(handle.clone()).is_err() {
            return Err(PoolError::AlreadyDispatched(self.description()));
        }
        if !handle.try_start() {
            warn!(job = %self.description(), "blocking run was cancelled before it started");
            return Ok(self.status());
        }
        let status = run_job(self.job.as_ref());
        handle.complete();
        Ok(status)
    }

    /// Cancel the job, and the queued task if it has not started yet. Never blocks.
    pub fn cancel(&self) {
        self.job.cancel();
        if let Some(handle) = self.handle.get() {
            handle.cancel();
        }
    }

    pub fn add_status_listener(&self, listener: StatusListener) {
        self.job.add_status_listener(listener);
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    pub fn priority(&self) -> JobPriority {
        self.priority
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn handle(&self) -> Option<&ExecutionHandle> {
        self.handle.get()
    }

    pub fn status(&self) -> JobStatus {
        self.job.status()
    }

    pub fn description(&self) -> String {
        self.job.description()
    }

    pub fn progress(&self) -> Option<f64> {
        self.job.progress()
    }

    pub fn error_message(&self) -> Option<String> {
        self.job.error_message()
    }

    pub fn is_canceled(&self) -> bool {
        self.job.is_canceled()
    }
}

impl std::fmt::Debug for WrappedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedJob")
            .field("id", &self.id)
            .field("description", &self.description())
            .field("priority", &self.priority)
            .field("status", &self.status())
            .finish()
    }
}
