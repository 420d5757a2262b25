use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared hold on a [`ScopedRwLock`]. Dropping it is the only way to release.
pub type ReadHandle<'a, T> = RwLockReadGuard<'a, T>;

/// Exclusive hold on a [`ScopedRwLock`]. Dropping it is the only way to release.
pub type WriteHandle<'a, T> = RwLockWriteGuard<'a, T>;

/// Reader/writer lock around `T` with scope-bound handles.
///
/// Any number of readers may hold the lock at once; a writer excludes readers and
/// other writers. Handles are released when dropped, so early returns, `?` and
/// panics all unlock. The lock does not poison: a panic inside a write scope leaves
/// whatever partial mutation happened visible to the next holder.
#[derive(Debug, Default)]
pub struct ScopedRwLock<T> {
    inner: RwLock<T>,
}

impl<T> ScopedRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Block until a shared hold is available.
    pub fn lock_read(&self) -> ReadHandle<'_, T> {
        self.inner.read()
    }

    /// Block until an exclusive hold is available.
    pub fn lock_write(&self) -> WriteHandle<'_, T> {
        self.inner.write()
    }

    pub fn try_lock_read(&self) -> Option<ReadHandle<'_, T>> {
        self.inner.try_read()
    }

    pub fn try_lock_write(&self) -> Option<WriteHandle<'_, T>> {
        self.inner.try_write()
    }

    /// Run a single mutation under the write lock.
    pub fn with_write_lock<R>(&self, op: impl FnOnce(&mut T) -> R) -> R {
        let mut handle = self.lock_write();
        op(&mut handle)
    }

    /// Run a read-only operation under a shared hold.
    pub fn with_read_lock<R>(&self, op: impl FnOnce(&T) -> R) -> R {
        let handle = self.lock_read();
        op(&handle)
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn is_write_locked(&self) -> bool {
        self.inner.is_locked_exclusive()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn readers_do_not_block_each_other() {
        let lock = Arc::new(ScopedRwLock::new(vec![1, 2, 3]));
        let first = lock.lock_read();

        let other = Arc::clone(&lock);
        let sum = thread::spawn(move || {
            let second = other.lock_read();
            second.iter().sum::<i32>()
        })
        .join()
        .unwrap();

        assert_eq!(sum, 6);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn writer_waits_for_reader_release() {
        let lock = Arc::new(ScopedRwLock::new(0_u32));
        let reader = lock.lock_read();

        let (tx, rx) = mpsc::channel();
        let writer_lock = Arc::clone(&lock);
        let writer = thread::spawn(move || {
            writer_lock.with_write_lock(|v| *v = 7);
            tx.send(()).unwrap();
        });

        assert!(
            rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "writer must block while a reader holds the lock"
        );
        drop(reader);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        writer.join().unwrap();
        assert_eq!(*lock.lock_read(), 7);
    }

    #[test]
    fn write_excludes_try_read() {
        let lock = ScopedRwLock::new(String::from("a"));
        let mut w = lock.lock_write();
        w.push('b');
        assert!(lock.try_lock_read().is_none());
        assert!(lock.is_write_locked());
        drop(w);
        assert_eq!(lock.try_lock_read().unwrap().as_str(), "ab");
    }

    #[test]
    fn with_write_lock_releases_on_panic() {
        let lock = ScopedRwLock::new(1_i64);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            lock.with_write_lock(|v| {
                *v = 2;
                panic!("mutation failed");
            })
        }));
        assert!(result.is_err());
        assert!(!lock.is_locked());
        assert_eq!(lock.with_read_lock(|v| *v), 2);
    }

    #[test]
    fn into_inner_returns_value() {
        let mut lock = ScopedRwLock::new(vec![0_u8; 2]);
        lock.get_mut().push(1);
        assert_eq!(lock.into_inner(), vec![0, 0, 1]);
    }
}
