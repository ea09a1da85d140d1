//! Per-key mutual exclusion for schedule writes.
//!
//! Reservation is check-then-insert: two requests for the same resource and
//! date could both see the slot free before either commits. [`SlotLocks`]
//! serializes writers on a `(resource, date)` key inside this process, so the
//! availability check and the commit happen as one critical section. Waiting
//! is bounded; a caller that cannot get the lock in time is told the slot is
//! busy instead of blocking indefinitely.
//!
//! The store's own constraint (advisory lock + unique slot index) remains the
//! backstop across processes.

use chrono::NaiveDate;
use fieldbook_core::types::ResourceId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Key identifying one resource's schedule on one day
pub type SlotKey = (ResourceId, NaiveDate);

/// Lock acquisition failed
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("timed out after {waited:?} waiting for schedule lock")]
pub struct LockTimeout {
    /// How long the caller waited
    pub waited: Duration,
}

/// Held lock; releases on drop
#[derive(Debug)]
pub struct SlotGuard {
    key: SlotKey,
    _guard: OwnedMutexGuard<()>,
}

impl SlotGuard {
    /// Key this guard protects
    #[must_use]
    pub const fn key(&self) -> SlotKey {
        self.key
    }
}

/// Registry of per-key async mutexes
#[derive(Debug, Default, Clone)]
pub struct SlotLocks {
    inner: Arc<Mutex<HashMap<SlotKey, Arc<AsyncMutex<()>>>>>,
}

impl SlotLocks {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`LockTimeout`] if the lock is still held when `timeout` elapses.
    pub async fn acquire(&self, key: SlotKey, timeout: Duration) -> Result<SlotGuard, LockTimeout> {
        let mutex = self.entry(key);
        let started = Instant::now();

        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                crate::metrics::BookingMetrics::record_lock_wait(started.elapsed());
                Ok(SlotGuard { key, _guard: guard })
            },
            Err(_) => {
                let waited = started.elapsed();
                tracing::warn!(
                    resource_id = %key.0,
                    date = %key.1,
                    waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                    "Schedule lock acquisition timed out"
                );
                Err(LockTimeout { waited })
            },
        }
    }

    /// Number of keys currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.map().len()
    }

    /// Whether no keys are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<SlotKey, Arc<AsyncMutex<()>>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, key: SlotKey) -> Arc<AsyncMutex<()>> {
        let mut map = self.map();
        // Drop idle entries; a strong count of 1 means only the map holds it.
        map.retain(|k, m| *k == key || Arc::strong_count(m) > 1);
        Arc::clone(map.entry(key).or_default())
    }
}
