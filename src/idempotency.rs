//! Idempotency store for settled payments.
//!
//! Maps a client-supplied idempotency key to the response body that was
//! returned when the payment was first verified. A replay within the TTL
//! returns the cached body verbatim and never re-runs verification, so a
//! client retrying a lost response cannot double-count or observe a
//! different outcome.
//!
//! Entries expire by time only: lazily on lookup, plus an opportunistic
//! sweep on insert once the store grows past a threshold. Backed by a
//! concurrent map keyed with monotonic timestamps; a multi-instance
//! deployment would swap this for an external store with native TTL.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// How long a settled payment result is replayed for.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Insert triggers a full sweep once the store exceeds this many entries.
const SWEEP_THRESHOLD: usize = 1000;

#[derive(Debug, Clone)]
struct StoredResult {
    stored_at: Instant,
    result: serde_json::Value,
}

#[derive(Debug)]
pub struct IdempotencyStore {
    entries: DashMap<String, StoredResult>,
    ttl: Duration,
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(IDEMPOTENCY_TTL)
    }
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns the cached result for `key` if present and fresh.
    ///
    /// An expired entry is evicted on the spot and treated as absent.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let fresh = match self.entries.get(key) {
            Some(entry) => {
                if entry.stored_at.elapsed() < self.ttl {
                    return Some(entry.result.clone());
                }
                false
            }
            None => return None,
        };
        debug_assert!(!fresh);
        self.entries.remove(key);
        None
    }

    /// Records the result for `key`, sweeping expired entries when the store
    /// has grown past the threshold.
    pub fn insert(&self, key: impl Into<String>, result: serde_json::Value) {
        self.entries.insert(
            key.into(),
            StoredResult {
                stored_at: Instant::now(),
                result,
            },
        );
        if self.entries.len() > SWEEP_THRESHOLD {
            self.sweep();
        }
    }

    /// Drops every expired entry.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, stored| stored.stored_at.elapsed() < ttl);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}
