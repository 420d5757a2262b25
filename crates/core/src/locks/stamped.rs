use std::hint;
use std::sync::atomic::{fence, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::error::LockError;

// State layout: bits 0..31 reader count, bit 31 writer, bits 32..64 version.
const READER_MASK: u64 = (1 << 31) - 1;
const WRITER: u64 = 1 << 31;
const VERSION_UNIT: u64 = 1 << 32;
const STATE_BITS: u64 = !READER_MASK;
const ORIGIN: u64 = VERSION_UNIT;

const SPINS: u32 = 64;

/// Token returned by [`StampedLock`] acquisitions.
///
/// The mode is encoded in the stamp itself: a write stamp carries the writer bit, a
/// read stamp a non-zero reader count, an optimistic stamp neither.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stamp(u64);

impl Stamp {
    pub fn is_write(self) -> bool {
        self.0 & WRITER != 0
    }

    pub fn is_read(self) -> bool {
        !self.is_write() && self.0 & READER_MASK != 0
    }

    pub fn is_optimistic(self) -> bool {
        self.0 & (WRITER | READER_MASK) == 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Stamp-based reader/writer lock with optimistic reads and in-place upgrades.
///
/// Every write acquisition and release changes the version bits, so an optimistic or
/// read stamp taken before a write no longer validates afterwards. Waiting is a short
/// spin followed by parking on a condition variable that every release signals.
/// The lock is not reentrant and does not track owners: unlocking with someone
/// else's stamp is the caller's bug.
#[derive(Debug)]
pub struct StampedLock {
    state: AtomicU64,
    gate: Mutex<()>,
    released: Condvar,
}

impl Default for StampedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl StampedLock {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(ORIGIN),
            gate: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    /// Non-exclusive read stamp, or `None` if a writer holds the lock.
    pub fn try_read_lock(&self) -> Option<Stamp> {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & WRITER != 0 || s & READER_MASK == READER_MASK {
                return None;
            }
            match self
                .state
                .compare_exchange_weak(s, s + 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Some(Stamp(s + 1)),
                Err(actual) => s = actual,
            }
        }
    }

    /// Exclusive write stamp, or `None` if any reader or writer holds the lock.
    pub fn try_write_lock(&self) -> Option<Stamp> {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & (WRITER | READER_MASK) != 0 {
                return None;
            }
            let next = s | WRITER;
            match self
                .state
                .compare_exchange_weak(s, next, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Some(Stamp(next)),
                Err(actual) => s = actual,
            }
        }
    }

    /// Block until a read stamp is available.
    pub fn read_lock(&self) -> Stamp {
        self.acquire(Self::try_read_lock)
    }

    /// Block until a write stamp is available.
    pub fn write_lock(&self) -> Stamp {
        self.acquire(Self::try_write_lock)
    }

    fn acquire(&self, attempt: fn(&Self) -> Option<Stamp>) -> Stamp {
        for _ in 0..SPINS {
            if let Some(stamp) = attempt(self) {
                return stamp;
            }
            hint::spin_loop();
        }
        let mut gate = self.gate.lock();
        loop {
            // Releases signal under the gate, so checking here cannot miss a wakeup.
            if let Some(stamp) = attempt(self) {
                return stamp;
            }
            self.released.wait(&mut gate);
        }
    }

    /// Optimistic stamp for a lock-free read, or `None` while write-locked.
    /// Confirm with [`validate`](Self::validate) after reading.
    pub fn try_optimistic_read(&self) -> Option<Stamp> {
        let s = self.state.load(Ordering::Acquire);
        if s & WRITER != 0 {
            None
        } else {
            Some(Stamp(s & STATE_BITS))
        }
    }

    /// True if no write has been acquired since `stamp` was issued.
    /// Always true for a write stamp that is still held.
    pub fn validate(&self, stamp: Stamp) -> bool {
        fence(Ordering::Acquire);
        stamp.0 & STATE_BITS == self.state.load(Ordering::Acquire) & STATE_BITS
    }

    /// Attempt to convert `stamp` into a write stamp without blocking.
    ///
    /// - write stamp: returned unchanged;
    /// - read stamp: succeeds only if the caller is the sole reader, consuming the read hold;
    /// - optimistic stamp: succeeds only if still valid and the lock is free.
    ///
    /// `None` means the conversion is impossible right now; the caller still holds
    /// whatever `stamp` represented.
    pub fn try_convert_to_write(&self, stamp: Stamp) -> Option<Stamp> {
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & STATE_BITS != stamp.0 & STATE_BITS {
                return None;
            }
            if stamp.is_write() {
                return Some(stamp);
            }
            let readers = s & READER_MASK;
            let next = if stamp.is_read() {
                if readers != 1 {
                    return None;
                }
                (s - 1) | WRITER
            } else {
                if readers != 0 {
                    return None;
                }
                s | WRITER
            };
            match self
                .state
                .compare_exchange_weak(s, next, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Some(Stamp(next)),
                Err(actual) => s = actual,
            }
        }
    }

    pub fn unlock_read(&self, stamp: Stamp) -> Result<(), LockError> {
        if !stamp.is_read() {
            return Err(LockError::InvalidStamp(stamp.0));
        }
        let mut s = self.state.load(Ordering::Acquire);
        loop {
            if s & STATE_BITS != stamp.0 & STATE_BITS || s & READER_MASK == 0 {
                return Err(LockError::InvalidStamp(stamp.0));
            }
            match self
                .state
                .compare_exchange_weak(s, s - 1, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => {
                    if (s - 1) & READER_MASK == 0 {
                        self.wake();
                    }
                    return Ok(());
                }
                Err(actual) => s = actual,
            }
        }
    }

    pub fn unlock_write(&self, stamp: Stamp) -> Result<(), LockError> {
        if !stamp.is_write() {
            return Err(LockError::InvalidStamp(stamp.0));
        }
        let mut next = (stamp.0 & !WRITER).wrapping_add(VERSION_UNIT);
        if next & STATE_BITS == 0 {
            next = ORIGIN;
        }
        self.state
            .compare_exchange(stamp.0, next, Ordering::Release, Ordering::Relaxed)
            .map_err(|_| LockError::InvalidStamp(stamp.0))?;
        self.wake();
        Ok(())
    }

    /// Release a read or write stamp. Optimistic stamps hold nothing and are rejected.
    pub fn unlock(&self, stamp: Stamp) -> Result<(), LockError> {
        if stamp.is_write() {
            self.unlock_write(stamp)
        } else {
            self.unlock_read(stamp)
        }
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITER != 0
    }

    pub fn is_read_locked(&self) -> bool {
        self.read_lock_count() > 0
    }

    pub fn read_lock_count(&self) -> u64 {
        self.state.load(Ordering::Acquire) & READER_MASK
    }

    fn wake(&self) {
        let _gate = self.gate.lock();
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn stamp_modes() {
        let lock = StampedLock::new();
        let optimistic = lock.try_optimistic_read().unwrap();
        assert!(optimistic.is_optimistic());

        let read = lock.read_lock();
        assert!(read.is_read());
        lock.unlock(read).unwrap();

        let write = lock.write_lock();
        assert!(write.is_write());
        assert!(lock.try_optimistic_read().is_none());
        lock.unlock(write).unwrap();
    }

    #[test]
    fn write_invalidates_optimistic_stamp() {
        let lock = StampedLock::new();
        let stamp = lock.try_optimistic_read().unwrap();
        assert!(lock.validate(stamp));

        let write = lock.write_lock();
        assert!(!lock.validate(stamp));
        lock.unlock_write(write).unwrap();
        assert!(!lock.validate(stamp), "version must differ after the write is released");
    }

    #[test]
    fn readers_share() {
        let lock = StampedLock::new();
        let a = lock.read_lock();
        let b = lock.try_read_lock().unwrap();
        assert_eq!(lock.read_lock_count(), 2);
        assert!(lock.try_write_lock().is_none());
        lock.unlock_read(a).unwrap();
        lock.unlock_read(b).unwrap();
        assert!(!lock.is_read_locked());
        assert!(lock.try_write_lock().is_some());
    }

    #[test]
    fn sole_reader_converts_in_place() {
        let lock = StampedLock::new();
        let read = lock.read_lock();
        let write = lock.try_convert_to_write(read).unwrap();
        assert!(write.is_write());
        assert_eq!(lock.read_lock_count(), 0);

        lock.unlock_write(write).unwrap();
        assert!(!lock.is_write_locked());
        assert!(!lock.is_read_locked());
    }

    #[test]
    fn conversion_fails_with_other_reader() {
        let lock = StampedLock::new();
        let mine = lock.read_lock();
        let theirs = lock.read_lock();

        assert!(lock.try_convert_to_write(mine).is_none());
        // The failed attempt leaves both read holds in place.
        assert_eq!(lock.read_lock_count(), 2);

        lock.unlock_read(theirs).unwrap();
        lock.unlock_read(mine).unwrap();
    }

    #[test]
    fn optimistic_conversion_fails_after_intervening_write() {
        let lock = StampedLock::new();
        let optimistic = lock.try_optimistic_read().unwrap();
        let write = lock.write_lock();
        lock.unlock_write(write).unwrap();

        assert!(lock.try_convert_to_write(optimistic).is_none());

        let fresh = lock.try_optimistic_read().unwrap();
        let converted = lock.try_convert_to_write(fresh).unwrap();
        lock.unlock_write(converted).unwrap();
    }

    #[test]
    fn write_stamp_converts_to_itself() {
        let lock = StampedLock::new();
        let write = lock.write_lock();
        assert_eq!(lock.try_convert_to_write(write), Some(write));
        lock.unlock_write(write).unwrap();
    }

    #[test]
    fn mismatched_unlock_is_rejected() {
        let lock = StampedLock::new();
        let optimistic = lock.try_optimistic_read().unwrap();
        assert_eq!(
            lock.unlock(optimistic),
            Err(LockError::InvalidStamp(optimistic.raw()))
        );

        let write = lock.write_lock();
        lock.unlock_write(write).unwrap();
        assert!(lock.unlock_write(write).is_err(), "double release must fail");
    }

    #[test]
    fn writer_blocks_until_reader_releases() {
        let lock = Arc::new(StampedLock::new());
        let read = lock.read_lock();

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&lock);
        let writer = thread::spawn(move || {
            let stamp = other.write_lock();
            tx.send(()).unwrap();
            other.unlock_write(stamp).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        lock.unlock_read(read).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
    }

    #[test]
    fn contended_counter_stays_consistent() {
        let lock = Arc::new(StampedLock::new());
        let value = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let value = Arc::clone(&value);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let stamp = lock.write_lock();
                        let v = value.load(Ordering::Relaxed);
                        value.store(v + 1, Ordering::Relaxed);
                        lock.unlock_write(stamp).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(value.load(Ordering::Relaxed), 2000);
    }
}
