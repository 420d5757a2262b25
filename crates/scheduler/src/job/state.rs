use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::{Mutex, MutexGuard};
use tracing::error;

use crate::listener::{StatusEvent, StatusListener};

use super::types::JobStatus;

/// Status bookkeeping shared by every [`Job`](super::Job) implementation.
///
/// Holds the status, the cancel flag, the error message and the listener list.
/// Status and cancel flag are atomics so schedulers and listeners can poll them
/// without locking; transitions are serialized by an internal mutex.
///
/// Listener delivery is ordered per job: each transition is queued and delivered by
/// whichever thread is already delivering for this job, or by the transitioning
/// thread itself if nobody is. Listeners never run with the internal lock held, so
/// they may query or cancel this or any other job.
#[derive(Default)]
pub struct JobState {
    status: AtomicU8,
    cancel_requested: AtomicBool,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    error_message: Option<String>,
    listeners: Vec<StatusListener>,
    pending: VecDeque<StatusEvent>,
    dispatching: bool,
}

impl JobState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().error_message.clone()
    }

    /// True once cancellation was requested. Job bodies poll this.
    pub fn is_canceled(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Request cancellation. A `Waiting` job becomes `Canceled` right away; a
    /// `Processing` job only gets its flag set and is settled when its body returns.
    /// In the `Waiting` case the `Canceled` event is delivered on the calling thread,
    /// unless another thread is already delivering for this job.
    ///
    /// Returns true if this call set the flag.
    pub fn request_cancel(&self) -> bool {
        let first = !self.cancel_requested.swap(true, Ordering::AcqRel);
        let inner = self.inner.lock();
        if self.status() == JobStatus::Waiting {
            self.apply(inner, JobStatus::Canceled, None);
        }
        first
    }

    /// Enter `Processing`. Returns false if the job was cancelled or already left `Waiting`.
    pub fn begin(&self) -> bool {
        let inner = self.inner.lock();
        if self.is_canceled() {
            if self.status() == JobStatus::Waiting {
                self.apply(inner, JobStatus::Canceled, None);
            }
            return false;
        }
        self.apply(inner, JobStatus::Processing, None)
    }

    /// Settle a normally completed body: `Finished`, or `Canceled` if cancellation was
    /// requested meanwhile.
    pub fn finish(&self) -> bool {
        let next = if self.is_canceled() {
            JobStatus::Canceled
        } else {
            JobStatus::Finished
        };
        self.transition(next, None)
    }

    pub fn mark_canceled(&self) -> bool {
        self.transition(JobStatus::Canceled, None)
    }

    /// Move to `Error` with `message`. Ignored if the job is already terminal.
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.transition(JobStatus::Error, Some(message.into()))
    }

    /// Subscribe to future transitions. Listeners run synchronously, in subscription
    /// order, on the thread that delivers the event.
    pub fn add_listener(&self, listener: StatusListener) {
        self.inner.lock().listeners.push(listener);
    }

    fn transition(&self, next: JobStatus, message: Option<String>) -> bool {
        let inner = self.inner.lock();
        self.apply(inner, next, message)
    }

    fn apply(&self, mut inner: MutexGuard<'_, Inner>, next: JobStatus, message: Option<String>) -> bool {
        let previous = self.status();
        if !previous.can_transition_to(next) {
            return false;
        }
        if message.is_some() {
            inner.error_message = message;
        }
        self.status.store(next as u8, Ordering::Release);

        let message = match next {
            JobStatus::Error => inner.error_message.clone(),
            _ => None,
        };
        inner.pending.push_back(StatusEvent {
            previous,
            current: next,
            message,
        });
        if !inner.dispatching {
            Self::deliver(inner);
        }
        true
    }

    fn deliver(mut inner: MutexGuard<'_, Inner>) {
        inner.dispatching = true;
        while let Some(event) = inner.pending.pop_front() {
            let listeners = inner.listeners.clone();
            MutexGuard::unlocked(&mut inner, || {
                for listener in &listeners {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener(&event)));
                    if outcome.is_err() {
                        error!(status = ?event.current, "status listener panicked");
                    }
                }
            });
        }
        inner.dispatching = false;
    }
}

impl std::fmt::Debug for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobState")
            .field("status", &self.status())
            .field("cancel_requested", &self.is_canceled())
            .finish_non_exhaustive()
    }
}
