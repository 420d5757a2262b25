use std::sync::atomic::{AtomicU64, Ordering};

/// Finished-items / total-items counter.
///
/// Lock-free; `increment` may be called from many worker threads. Progress is item
/// granularity, not runtime-weighted: split work into equal-cost items if the bar
/// should move evenly.
#[derive(Debug, Default)]
pub struct ItemProgress {
    total: AtomicU64,
    finished: AtomicU64,
}

impl ItemProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_total(total: u64) -> Self {
        Self {
            total: AtomicU64::new(total),
            finished: AtomicU64::new(0),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Release);
    }

    pub fn add_total(&self, items: u64) {
        self.total.fetch_add(items, Ordering::AcqRel);
    }

    /// Mark one item done. Returns the new finished count.
    pub fn increment(&self) -> u64 {
        self.finished.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn finished(&self) -> u64 {
        self.finished.load(Ordering::Acquire)
    }

    /// `finished / total` clamped to `[0, 1]`, or `None` while no total is known.
    pub fn fraction(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        Some((self.finished() as f64 / total as f64).min(1.0))
    }
}
