//! Status observation: the event type, the listener alias, and helpers for
//! reacting to a group of jobs finishing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::job::{Job, JobStatus};
use crate::signal::{Signal, POLL_INTERVAL};
use crate::wrapped::WrappedJob;

/// One status transition of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub previous: JobStatus,
    pub current: JobStatus,
    /// Error message, set on transitions into `Error`.
    pub message: Option<String>,
}

/// Callback invoked synchronously on every transition of the job it is attached to.
///
/// Runs on whichever thread caused (or is delivering) the transition, usually a
/// worker. Keep it short.
pub type StatusListener = Arc<dyn Fn(&StatusEvent) + Send + Sync>;

struct Countdown {
    remaining: AtomicUsize,
    counted: Vec<AtomicBool>,
    worst: Mutex<JobStatus>,
    cancel_on_error: bool,
    jobs: Vec<Weak<WrappedJob>>,
    callback: Mutex<Option<Box<dyn FnOnce(JobStatus) + Send>>>,
}

impl Countdown {
    fn settle(&self, index: usize, status: JobStatus) {
        if self.counted[index].swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut worst = self.worst.lock();
            if status.severity() > worst.severity() {
                *worst = status;
            }
        }
        if status == JobStatus::Error && self.cancel_on_error {
            self.cancel_siblings(index);
        }
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.fire();
        }
    }

    fn cancel_siblings(&self, failed: usize) {
        let siblings: Vec<_> = self
            .jobs
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != failed)
            .filter_map(|(_, job)| job.upgrade())
            .collect();
        tracing::debug!(siblings = siblings.len(), "job failed, cancelling the rest of the group");
        for job in siblings {
            job.cancel();
        }
    }

    fn fire(&self) {
        let callback = self.callback.lock().take();
        if let Some(callback) = callback {
            let worst = *self.worst.lock();
            callback(worst);
        }
    }
}

/// Call `callback` once, after every job in `jobs` has reached a terminal status,
/// with the worst of those statuses (`Error` over `Canceled` over `Finished`).
///
/// With `cancel_on_error`, the first job to fail cancels the others. Fires
/// immediately on the calling thread if all jobs are already terminal (or the list
/// is empty); otherwise on the thread delivering the last terminal event.
pub fn on_all_finished<F>(jobs: &[Arc<WrappedJob>], cancel_on_error: bool, callback: F)
where
    F: FnOnce(JobStatus) + Send + 'static,
{
    let countdown = Arc::new(Countdown {
        remaining: AtomicUsize::new(jobs.len()),
        counted: jobs.iter().map(|_| AtomicBool::new(false)).collect(),
        worst: Mutex::new(JobStatus::Finished),
        cancel_on_error,
        jobs: jobs.iter().map(Arc::downgrade).collect(),
        callback: Mutex::new(Some(Box::new(callback))),
    });
    if jobs.is_empty() {
        countdown.fire();
        return;
    }

    for (index, job) in jobs.iter().enumerate() {
        let countdown = Arc::clone(&countdown);
        job.add_status_listener(Arc::new(move |event: &StatusEvent| {
            if event.current.is_terminal() {
                countdown.settle(index, event.current);
            }
        }));
    }
    // Jobs that were already terminal before their listener went in.
    for (index, job) in jobs.iter().enumerate() {
        let status = job.status();
        if status.is_terminal() {
            countdown.settle(index, status);
        }
    }
}

/// Attach a listener to each job that wakes `signal` on terminal events. Listeners
/// hold the signal weakly so they outlive the wait for free.
fn notify_on_terminal(jobs: &[Arc<WrappedJob>], signal: &Arc<Signal>) {
    for job in jobs {
        let signal: Weak<Signal> = Arc::downgrade(signal);
        job.add_status_listener(Arc::new(move |event: &StatusEvent| {
            if event.current.is_terminal() {
                if let Some(signal) = signal.upgrade() {
                    signal.notify();
                }
            }
        }));
    }
}

fn worst_status(jobs: &[Arc<WrappedJob>]) -> JobStatus {
    jobs.iter()
        .map(|job| job.status())
        .max_by_key(|status| status.severity())
        .unwrap_or(JobStatus::Finished)
}

/// Block until every job in `jobs` is terminal and return the worst outcome
/// (`Error` over `Canceled` over `Finished`).
///
/// If `parent` is given and gets cancelled while waiting, all jobs are cancelled and
/// the wait continues until they settle.
pub fn wait_for_jobs(parent: Option<&dyn Job>, jobs: &[Arc<WrappedJob>]) -> JobStatus {
    let signal = Arc::new(Signal::new());
    notify_on_terminal(jobs, &signal);

    let all_terminal = || jobs.iter().all(|job| job.status().is_terminal());
    let parent_canceled = || parent.is_some_and(|p| p.is_canceled());
    let mut propagated = false;
    loop {
        signal.wait_until(POLL_INTERVAL, || all_terminal() || (!propagated && parent_canceled()));
        if all_terminal() {
            break;
        }
        // Cancelling outside the wait: listeners fired by it notify the same signal.
        propagated = true;
        tracing::debug!(jobs = jobs.len(), "parent cancelled, cancelling awaited jobs");
        for job in jobs {
            job.cancel();
        }
    }

    worst_status(jobs)
}

/// Like [`wait_for_jobs`], but stop at the first job that errors or is cancelled.
///
/// The remaining jobs are asked to cancel and the call returns without waiting for
/// them to settle. Returns `Finished` only when every job finished. A cancelled
/// `parent` counts as a cancelled job.
pub fn wait_for_jobs_fail_fast(parent: Option<&dyn Job>, jobs: &[Arc<WrappedJob>]) -> JobStatus {
    let signal = Arc::new(Signal::new());
    notify_on_terminal(jobs, &signal);

    let failed = || {
        jobs.iter()
            .map(|job| job.status())
            .filter(|status| matches!(status, JobStatus::Error | JobStatus::Canceled))
            .max_by_key(|status| status.severity())
    };
    let all_terminal = || jobs.iter().all(|job| job.status().is_terminal());
    let parent_canceled = || parent.is_some_and(|p| p.is_canceled());

    signal.wait_until(POLL_INTERVAL, || {
        failed().is_some() || all_terminal() || parent_canceled()
    });

    let outcome = match failed() {
        Some(status) => status,
        None if parent_canceled() => JobStatus::Canceled,
        None => return JobStatus::Finished,
    };
    let pending: Vec<_> = jobs.iter().filter(|job| !job.status().is_terminal()).collect();
    tracing::debug!(?outcome, pending = pending.len(), "group failed fast, cancelling the rest");
    for job in pending {
        job.cancel();
    }
    outcome
}
