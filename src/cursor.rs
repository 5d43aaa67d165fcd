//! Page boundary cache for key-ordered listings.
//!
//! Deep pages of an ordered query are expensive to reach with an offset skip.
//! When page `n` has just been served, the key of its last record is remembered
//! at its absolute offset; a request for page `n + 1` can then ask the store for
//! `key > boundary` instead of skipping `n * page_size` records.
//!
//! Boundaries are single use and short lived. A miss always falls back to an
//! offset skip, so the cache never affects which records are returned.

use crate::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Identifies one ordered query: a dataset plus the signature of its filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorScope {
    dataset: String,
    filter: String,
}

impl CursorScope {
    pub fn new(dataset: impl Into<String>, filter_signature: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            filter: filter_signature.into(),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }
}

#[derive(Debug)]
struct Boundary {
    key: String,
    expires_at: Instant,
}

pub struct KeyOrderedCursorCache {
    entries: Mutex<HashMap<(CursorScope, u64), Boundary>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl KeyOrderedCursorCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Absolute offset of the record preceding `page`, if there is one.
    fn preceding_offset(page: u64, page_size: u64) -> Option<u64> {
        page.checked_mul(page_size)?.checked_sub(1)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(CursorScope, u64), Boundary>> {
        // Poisoning can only cost boundaries.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the key to resume `page` after, consuming the boundary.
    pub fn resolve_start(&self, scope: &CursorScope, page: u64, page_size: u64) -> Option<String> {
        let offset = Self::preceding_offset(page, page_size)?;
        let now = self.clock.now();
        let boundary = self.lock().remove(&(scope.clone(), offset))?;
        if boundary.expires_at <= now {
            tracing::debug!(
                "stale page boundary for {} at offset {}",
                scope.dataset(),
                offset
            );
            return None;
        }
        Some(boundary.key)
    }

    /// Records the last key emitted at `absolute_offset`.
    pub fn remember(&self, scope: &CursorScope, absolute_offset: u64, key: impl Into<String>) {
        let boundary = Boundary {
            key: key.into(),
            expires_at: self.clock.now() + self.ttl,
        };
        self.lock().insert((scope.clone(), absolute_offset), boundary);
    }

    pub fn expire(&self, scope: &CursorScope, absolute_offset: u64) {
        self.lock().remove(&(scope.clone(), absolute_offset));
    }

    /// Drops every boundary past its deadline, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, boundary| boundary.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the periodic sweep task. The task stops when the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.sweep_expired();
                if removed > 0 {
                    tracing::debug!("swept {} expired page boundaries", removed);
                }
            }
        })
    }
}
