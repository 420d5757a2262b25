use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use taskcontrol_core::ControllerConfig;
use tracing::info;
use uuid::Uuid;

use crate::composite::{PoolJob, PoolSource};
use crate::job::{Job, JobPriority, JobStatus};
use crate::metrics::ControllerMetrics;
use crate::pool::{Executor, PoolError, ThreadSpawner, WorkerPool};
use crate::wrapped::WrappedJob;

/// Owns the worker pools and tracks every job submitted through it.
///
/// NORMAL jobs queue on the bounded main pool; HIGH jobs get a thread of their own
/// from the on-demand high-priority pool so they never wait behind a saturated main
/// pool. Coordinators (composite jobs) run on carrier threads so they never hold a
/// main-pool worker while their children queue behind it. A job leaves
/// [`jobs`](Self::jobs) as soon as it reaches a terminal status. Job failures never
/// affect the controller itself.
pub struct JobController {
    pub(super) config: ControllerConfig,
    /// Swapped out by [`set_worker_threads`](Self::set_worker_threads).
    pub(super) main_pool: RwLock<WorkerPool>,
    pub(super) high_priority: ThreadSpawner,
    pub(super) carriers: ThreadSpawner,
    /// Queued and running jobs, in submission order.
    pub(super) jobs: Arc<RwLock<Vec<Arc<WrappedJob>>>>,
    pub(super) metrics: Arc<RwLock<ControllerMetrics>>,
}

/// Serializable view of one tracked job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Uuid,
    pub description: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub progress: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub error_message: Option<String>,
}

impl JobSnapshot {
    pub fn of(job: &WrappedJob) -> Self {
        Self {
            id: job.id(),
            description: job.description(),
            status: job.status(),
            priority: job.priority(),
            progress: job.progress(),
            submitted_at: job.submitted_at(),
            error_message: job.error_message(),
        }
    }
}

impl JobController {
    /// Create a controller and start its main pool.
    pub fn new(config: ControllerConfig) -> Result<Self, PoolError> {
        let threads = config.resolved_worker_threads();
        let main_pool = WorkerPool::new(config.thread_name_prefix.clone(), threads)?;
        let high_priority = ThreadSpawner::new(config.high_priority_prefix.clone());
        let carriers = ThreadSpawner::new(format!("{}-carrier", config.thread_name_prefix));
        info!(threads, high_priority = %config.high_priority_prefix, "job controller started");
        Ok(Self {
            config,
            main_pool: RwLock::new(main_pool),
            high_priority,
            carriers,
            jobs: Arc::new(RwLock::new(Vec::new())),
            metrics: Arc::new(RwLock::new(ControllerMetrics::default())),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// The bounded main pool, for composites that should share it.
    pub fn main_pool(&self) -> WorkerPool {
        self.main_pool.read().clone()
    }

    pub fn high_priority_pool(&self) -> &ThreadSpawner {
        &self.high_priority
    }

    /// Carrier threads that run submitted coordinators.
    pub fn carrier_pool(&self) -> &ThreadSpawner {
        &self.carriers
    }

    pub fn worker_threads(&self) -> usize {
        self.main_pool.read().threads()
    }

    /// Replace the main pool with one of `threads` workers.
    ///
    /// Later submissions use the new pool. Jobs already queued on the old one, and
    /// composites built around it, still run there; its threads retire once the last
    /// of them lets go of it.
    pub fn set_worker_threads(&self, threads: usize) -> Result<(), PoolError> {
        let mut current = self.main_pool.write();
        if current.is_shutdown() {
            return Err(PoolError::Shutdown(current.name().to_string()));
        }
        if current.threads() == threads.max(1) {
            return Ok(());
        }
        let resized = WorkerPool::new(self.config.thread_name_prefix.clone(), threads)?;
        info!(from = current.threads(), to = resized.threads(), "resized main pool");
        *current = resized;
        Ok(())
    }

    /// Composite over `jobs` that runs on the main pool and leaves it running.
    pub fn pool_job(&self, description: impl Into<String>, jobs: Vec<Arc<dyn Job>>) -> PoolJob {
        PoolJob::provided(description, jobs, self.main_pool())
            .with_thread_prefix(self.config.thread_name_prefix.clone())
    }

    /// Composite over `jobs` with one small-stack thread per child.
    pub fn lightweight_pool_job(&self, description: impl Into<String>, jobs: Vec<Arc<dyn Job>>) -> PoolJob {
        PoolJob::new(
            description,
            jobs,
            PoolSource::Lightweight {
                stack_bytes: self.config.lightweight_stack_bytes(),
            },
        )
        .with_thread_prefix(self.config.thread_name_prefix.clone())
    }

    /// Queued and running jobs, in submission order.
    pub fn jobs(&self) -> Vec<Arc<WrappedJob>> {
        self.jobs.read().clone()
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        self.jobs.read().iter().map(|job| JobSnapshot::of(job)).collect()
    }

    pub fn metrics(&self) -> ControllerMetrics {
        self.metrics.read().clone()
    }

    /// Cancel every tracked job.
    pub fn cancel_all(&self) {
        let jobs = self.jobs();
        info!(count = jobs.len(), "cancelling all jobs");
        for job in jobs {
            job.cancel();
        }
    }

    /// Stop accepting jobs. Jobs already queued or running complete normally.
    pub fn shutdown(&self) {
        self.main_pool.read().shutdown();
        self.high_priority.shutdown();
        self.carriers.shutdown();
        info!(pending = self.jobs.read().len(), "job controller shut down");
    }

    pub fn is_shutdown(&self) -> bool {
        self.main_pool.read().is_shutdown()
    }
}

impl std::fmt::Debug for JobController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobController")
            .field("main_pool", &*self.main_pool.read())
            .field("high_priority", &self.high_priority)
            .field("jobs", &self.jobs.read().len())
            .finish_non_exhaustive()
    }
}
