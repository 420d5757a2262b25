//! Scoped locking primitives for state shared between concurrently running job bodies.
//!
//! - [`ScopedRwLock`]: classic reader/writer lock whose handles release on scope exit,
//!   including unwinding.
//! - [`StampedLock`]: stamp-based lock with read, write and optimistic stamps and a
//!   non-blocking read-to-write conversion.
//! - [`UpgradableLock`]: data-carrying wrapper over [`StampedLock`] whose read handles
//!   can be upgraded in place, failing with [`crate::LockError::UpgradeConflict`]
//!   instead of deadlocking.
//!
//! Job bodies that read a structure another job may mutate must hold one of these.
//! The scheduler itself never takes them.

pub mod scoped;
pub mod stamped;
pub mod upgradable;

pub use scoped::{ReadHandle, ScopedRwLock, WriteHandle};
pub use stamped::{Stamp, StampedLock};
pub use upgradable::{UpgradableLock, UpgradableReadHandle, UpgradableWriteHandle};
