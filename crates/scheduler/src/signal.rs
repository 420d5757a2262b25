use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Wakeup channel for threads waiting on conditions held in atomics.
///
/// Waiters evaluate their condition under the gate and notifiers take the gate
/// before signalling, so a state change made before `notify` is never missed.
/// The poll interval covers conditions that change without a notify (e.g. a parent
/// job's cancel flag).
#[derive(Debug, Default)]
pub(crate) struct Signal {
    gate: Mutex<()>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn notify(&self) {
        let _gate = self.gate.lock();
        self.cond.notify_all();
    }

    pub(crate) fn wait_until(&self, poll: Duration, mut done: impl FnMut() -> bool) {
        let mut gate = self.gate.lock();
        while !done() {
            self.cond.wait_for(&mut gate, poll);
        }
    }
}

/// How often blocked coordinators re-check conditions nobody notifies about.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);
