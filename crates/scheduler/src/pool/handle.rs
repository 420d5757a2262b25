use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Where a dispatched task is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandleState {
    Queued = 0,
    Running = 1,
    Done = 2,
    Canceled = 3,
}

impl HandleState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Queued,
            1 => Self::Running,
            2 => Self::Done,
            _ => Self::Canceled,
        }
    }
}

/// Cancellable handle to one task queued on an executor.
///
/// `Queued → Running → Done`, or `Queued → Canceled`. Cancelling only wins while the
/// task is still queued; after that the task runs to completion and cancellation is
/// the job's business.
#[derive(Clone)]
pub struct ExecutionHandle {
    inner: Arc<Inner>,
}

struct Inner {
    state: AtomicU8,
    settled: Mutex<bool>,
    cond: Condvar,
}

impl Default for ExecutionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(HandleState::Queued as u8),
                settled: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Claim the task for running. False if it was cancelled first.
    pub fn try_start(&self) -> bool {
        self.swap_state(HandleState::Queued, HandleState::Running)
    }

    /// Mark a running task done and wake waiters.
    pub fn complete(&self) {
        if self.swap_state(HandleState::Running, HandleState::Done) {
            self.settle();
        }
    }

    /// Prevent a queued task from starting. Returns true if this call cancelled it.
    pub fn cancel(&self) -> bool {
        let won = self.swap_state(HandleState::Queued, HandleState::Canceled);
        if won {
            self.settle();
        }
        won
    }

    /// Done or cancelled.
    pub fn is_done(&self) -> bool {
        matches!(self.state(), HandleState::Done | HandleState::Canceled)
    }

    pub fn wait(&self) {
        let mut settled = self.inner.settled.lock();
        while !*settled {
            self.inner.cond.wait(&mut settled);
        }
    }

    /// Wait at most `timeout`. Returns whether the task settled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut settled = self.inner.settled.lock();
        while !*settled {
            if self.inner.cond.wait_until(&mut settled, deadline).timed_out() {
                break;
            }
        }
        *settled
    }

    fn swap_state(&self, from: HandleState, to: HandleState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn settle(&self) {
        let mut settled = self.inner.settled.lock();
        *settled = true;
        self.inner.cond.notify_all();
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ExecutionHandle").field(&self.state()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn run_to_done() {
        let h = ExecutionHandle::new();
        assert_eq!(h.state(), HandleState::Queued);
        assert!(h.try_start());
        assert!(!h.cancel(), "running task cannot be cancelled through the handle");
        h.complete();
        assert_eq!(h.state(), HandleState::Done);
        assert!(h.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn cancel_while_queued_blocks_start() {
        let h = ExecutionHandle::new();
        assert!(h.cancel());
        assert!(!h.cancel());
        assert!(!h.try_start());
        assert!(h.is_done());
        h.wait();
    }

    #[test]
    fn wait_times_out_while_queued() {
        let h = ExecutionHandle::new();
        assert!(!h.wait_timeout(Duration::from_millis(20)));
    }

    #[test]
    fn waiter_wakes_on_completion() {
        let h = ExecutionHandle::new();
        let worker = h.clone();
        let t = thread::spawn(move || {
            assert!(worker.try_start());
            thread::sleep(Duration::from_millis(20));
            worker.complete();
        });
        assert!(h.wait_timeout(Duration::from_secs(5)));
        assert_eq!(h.state(), HandleState::Done);
        t.join().unwrap();
    }
}
