pub mod composite;
pub mod controller;
pub mod job;
pub mod listener;
pub mod metrics;
pub mod pool;
pub mod progress;
pub mod wrapped;

mod signal;

pub use composite::{PoolJob, PoolSource};
pub use controller::{JobController, JobSnapshot};
pub use job::{run_job, FnJob, FnJobContext, Job, JobError, JobPriority, JobState, JobStatus};
pub use listener::{on_all_finished, wait_for_jobs, wait_for_jobs_fail_fast, StatusEvent, StatusListener};
pub use metrics::ControllerMetrics;
pub use pool::{ExecutionHandle, Executor, HandleState, PoolError, ThreadSpawner, WorkerPool};
pub use progress::ItemProgress;
pub use wrapped::WrappedJob;
