//! The job contract: the boundary between the scheduler and domain algorithms.
//!
//! A domain algorithm (file import, peak detection, alignment, export, ...) implements
//! [`Job`] and keeps a [`JobState`] for its status bookkeeping. The body in
//! [`Job::run`] should poll [`Job::is_canceled`] at least every few hundred
//! milliseconds of work and return [`JobError::Canceled`] (or just `Ok`) when set.

mod closure;
mod state;
mod types;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::listener::StatusListener;

pub use closure::{FnJob, FnJobContext};
pub use state::JobState;
pub use types::{JobError, JobPriority, JobStatus};

/// A cancellable, progress-reporting unit of work.
pub trait Job: Send + Sync {
    /// Status bookkeeping backing the default methods.
    fn state(&self) -> &JobState;

    /// Human-readable description. May change while running; must be cheap.
    fn description(&self) -> String;

    /// The body. Blocks until done. Status transitions around it are handled by
    /// [`run_job`]; the body only reports its outcome.
    fn run(&self) -> Result<(), JobError>;

    /// Fraction of work done in `[0, 1]`, or `None` if unknown.
    fn progress(&self) -> Option<f64> {
        None
    }

    fn priority(&self) -> JobPriority {
        JobPriority::Normal
    }

    /// True for jobs whose body only waits on other jobs it dispatched itself. The
    /// controller runs these on a carrier thread, never on a worker their children
    /// might need.
    fn is_coordinator(&self) -> bool {
        false
    }

    fn status(&self) -> JobStatus {
        self.state().status()
    }

    fn error_message(&self) -> Option<String> {
        self.state().error_message()
    }

    fn is_canceled(&self) -> bool {
        self.state().is_canceled()
    }

    /// Request cancellation. Never waits for the body.
    ///
    /// Cancelling a `Waiting` job settles it right away, so its status listeners run
    /// on the calling thread before this returns. Those listeners are expected to be
    /// short (the controller's only takes its registry lock briefly).
    fn cancel(&self) {
        self.state().request_cancel();
    }

    fn add_status_listener(&self, listener: StatusListener) {
        self.state().add_listener(listener);
    }
}

/// Drive `job` to a terminal status on the calling thread.
///
/// Enters `Processing` (or returns immediately if the job was cancelled while
/// waiting), runs the body, and maps its outcome: `Ok` → `Finished` (`Canceled` if a
/// cancel was requested meanwhile), `Err(Canceled)` → `Canceled`, any other error or
/// a panic → `Error` with a message.
pub fn run_job(job: &dyn Job) -> JobStatus {
    let state = job.state();
    if !state.begin() {
        debug!(job = %job.description(), status = ?job.status(), "job not started");
        return job.status();
    }

    let started = Instant::now();
    match panic::catch_unwind(AssertUnwindSafe(|| job.run())) {
        Ok(Ok(())) => {
            state.finish();
        }
        Ok(Err(JobError::Canceled)) => {
            state.mark_canceled();
        }
        Ok(Err(e @ JobError::Internal(_))) => {
            error!(job = %job.description(), error = %e, "scheduler fault while running job");
            state.fail(e.to_string());
        }
        Ok(Err(e)) => {
            warn!(job = %job.description(), error = %e, "job failed");
            state.fail(e.to_string());
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            error!(job = %job.description(), panic = %message, "job panicked");
            state.fail(format!("job panicked: {message}"));
        }
    }

    let status = job.status();
    debug!(job = %job.description(), ?status, elapsed = ?started.elapsed(), "job done");
    status
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::listener::StatusEvent;

    fn job(body: impl Fn(&FnJobContext<'_>) -> Result<(), JobError> + Send + Sync + 'static) -> FnJob {
        FnJob::new("test job", body)
    }

    #[test]
    fn ok_body_finishes() {
        let j = job(|_| Ok(()));
        assert_eq!(run_job(&j), JobStatus::Finished);
    }

    #[test]
    fn failed_body_sets_error_message() {
        let j = job(|_| Err(JobError::failed("bad header")));
        assert_eq!(run_job(&j), JobStatus::Error);
        assert_eq!(j.error_message().as_deref(), Some("bad header"));
    }

    #[test]
    fn internal_error_is_labelled() {
        let j = job(|_| Err(JobError::Internal("pool closed".into())));
        assert_eq!(run_job(&j), JobStatus::Error);
        assert_eq!(
            j.error_message().as_deref(),
            Some("internal scheduler error: pool closed")
        );
    }

    #[test]
    fn panic_becomes_error() {
        let j = job(|_| panic!("index out of bounds"));
        assert_eq!(run_job(&j), JobStatus::Error);
        assert!(j.error_message().unwrap().contains("index out of bounds"));
    }

    #[test]
    fn canceled_before_start_never_processes() {
        let j = job(|_| panic!("must not run"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        j.add_status_listener(Arc::new(move |e: &StatusEvent| sink.lock().push(e.current)));

        j.cancel();
        assert_eq!(run_job(&j), JobStatus::Canceled);
        assert_eq!(*seen.lock(), vec![JobStatus::Canceled]);
    }

    #[test]
    fn body_observing_cancel_ends_canceled() {
        let j = Arc::new(job(|ctx| {
            ctx.state().request_cancel();
            if ctx.is_canceled() {
                return Err(JobError::Canceled);
            }
            Ok(())
        }));
        assert_eq!(run_job(j.as_ref()), JobStatus::Canceled);
    }

    #[test]
    fn listener_sees_full_sequence() {
        let j = job(|_| Ok(()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        j.add_status_listener(Arc::new(move |e: &StatusEvent| sink.lock().push(e.current)));
        run_job(&j);
        assert_eq!(*seen.lock(), vec![JobStatus::Processing, JobStatus::Finished]);
    }
}
