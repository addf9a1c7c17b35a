// src/fetcher/locks.rs

//! Per-distfile locks
//!
//! Two atoms may reference the same distfile; holding the lock for its
//! name guarantees at most one download of it at a time in the process.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct DownloadLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Acquisitions that found the lock already held
    contended: AtomicU64,
}

impl DownloadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `name`
    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let lock = self
            .locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = match lock.try_lock() {
                Some(guard) => guard,
                None => {
                    self.contended.fetch_add(1, Ordering::Relaxed);
                    lock.lock()
                }
            };
            f()
        };

        // Entries nobody else holds or waits on are dropped
        drop(lock);
        self.locks.remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Names with a live lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn contended_count(&self) -> u64 {
        self.contended.load(Ordering::Relaxed)
    }
}
