//! Thread pools jobs are dispatched onto.
//!
//! - [`WorkerPool`]: bounded rayon pool, used as the controller's main pool and for
//!   fixed-size composite pools.
//! - [`ThreadSpawner`]: on-demand threads with zero idle threads, used for the
//!   high-priority side pool and for lightweight one-thread-per-child dispatch.
//!
//! Both implement [`Executor`]; [`ExecutionHandle`] tracks one queued task.

mod handle;
mod spawner;
mod worker;

pub use handle::{ExecutionHandle, HandleState};
pub use spawner::ThreadSpawner;
pub use worker::WorkerPool;

/// A unit of work queued on an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised when building or submitting to a pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to build pool {name}: {reason}")]
    Build { name: String, reason: String },

    #[error("pool {0} is shut down")]
    Shutdown(String),

    #[error("failed to spawn thread for {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("job {0} was already dispatched")]
    AlreadyDispatched(String),
}

/// Something that runs tasks on other threads.
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    /// Queue `task`. Fails once the executor is shut down.
    fn execute(&self, task: Task) -> Result<(), PoolError>;

    /// Stop accepting tasks. Tasks already queued or running still complete.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}
