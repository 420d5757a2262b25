use std::cell::UnsafeCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use crate::error::LockError;

use super::stamped::{Stamp, StampedLock};

/// Reader/writer lock around `T` whose read handles can be upgraded in place.
///
/// Built on [`StampedLock`], so readers run concurrently. An upgrade succeeds only when
/// the caller is the sole reader; otherwise [`UpgradableLock::upgrade_to_write`]
/// releases the read handle and returns [`LockError::UpgradeConflict`]. A reader racing
/// another reader to upgrade fails fast instead of waiting on it.
pub struct UpgradableLock<T> {
    lock: StampedLock,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is mediated by `lock`: shared references only while a read
// stamp is held, the unique mutable reference only while the write stamp is held.
unsafe impl<T: Send> Send for UpgradableLock<T> {}
unsafe impl<T: Send + Sync> Sync for UpgradableLock<T> {}

impl<T> UpgradableLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            lock: StampedLock::new(),
            data: UnsafeCell::new(value),
        }
    }

    /// Block until a shared hold is available.
    pub fn lock_read(&self) -> UpgradableReadHandle<'_, T> {
        UpgradableReadHandle {
            owner: self,
            stamp: self.lock.read_lock(),
        }
    }

    /// Block until an exclusive hold is available.
    pub fn lock_write(&self) -> UpgradableWriteHandle<'_, T> {
        UpgradableWriteHandle {
            owner: self,
            stamp: self.lock.write_lock(),
        }
    }

    pub fn try_lock_write(&self) -> Option<UpgradableWriteHandle<'_, T>> {
        self.lock.try_write_lock().map(|stamp| UpgradableWriteHandle { owner: self, stamp })
    }

    /// Convert a read handle into a write handle without blocking.
    ///
    /// On conflict the read handle is released before returning the error; the caller
    /// must acquire a fresh write handle with [`lock_write`](Self::lock_write) and
    /// re-check whatever it read, since another writer may have run in between.
    pub fn upgrade_to_write(
        handle: UpgradableReadHandle<'_, T>,
    ) -> Result<UpgradableWriteHandle<'_, T>, LockError> {
        let owner = handle.owner;
        match owner.lock.try_convert_to_write(handle.stamp) {
            Some(stamp) => {
                // The read hold was consumed by the conversion.
                let _ = ManuallyDrop::new(handle);
                Ok(UpgradableWriteHandle { owner, stamp })
            }
            None => {
                drop(handle);
                Err(LockError::UpgradeConflict)
            }
        }
    }

    /// Run a single mutation under the write lock.
    pub fn with_write_lock<R>(&self, op: impl FnOnce(&mut T) -> R) -> R {
        let mut handle = self.lock_write();
        op(&mut handle)
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_write_locked() || self.lock.is_read_locked()
    }

    pub fn is_write_locked(&self) -> bool {
        self.lock.is_write_locked()
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: Default> Default for UpgradableLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for UpgradableLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradableLock")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

/// Shared hold on an [`UpgradableLock`].
pub struct UpgradableReadHandle<'a, T> {
    owner: &'a UpgradableLock<T>,
    stamp: Stamp,
}

impl<T> Deref for UpgradableReadHandle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: a read stamp is held, so no write handle exists.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T> Drop for UpgradableReadHandle<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.owner.lock.unlock_read(self.stamp) {
            tracing::error!(error = %e, "failed to release upgradable read handle");
        }
    }
}

/// Exclusive hold on an [`UpgradableLock`]. Releasing it leaves the lock fully
/// unlocked, also when it was obtained through an upgrade.
#[derive(Debug)]
pub struct UpgradableWriteHandle<'a, T> {
    owner: &'a UpgradableLock<T>,
    stamp: Stamp,
}

impl<T> Deref for UpgradableWriteHandle<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the write stamp is held exclusively.
        unsafe { &*self.owner.data.get() }
    }
}

impl<T> DerefMut for UpgradableWriteHandle<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the write stamp is held exclusively and `&mut self` is unique.
        unsafe { &mut *self.owner.data.get() }
    }
}

impl<T> Drop for UpgradableWriteHandle<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.owner.lock.unlock_write(self.stamp) {
            tracing::error!(error = %e, "failed to release upgradable write handle");
        }
    }
}
