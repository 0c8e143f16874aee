//! Expiring in-memory maps.
//!
//! Every runtime-learned fact (discovered server keys, credentials, access
//! tokens) lives in one of these. Entries self-expire; a lookup at or past
//! the deadline is a guaranteed miss, so callers must always be prepared to
//! re-derive the value. The cache is an optimization, never a source of
//! truth.

use moka::sync::Cache;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Entry<V> {
    value: V,
    /// Entry-level deadline, tighter than the cache-wide TTL when set.
    deadline: Option<Instant>,
}

/// A bounded map whose entries expire after a fixed time-to-live, with an
/// optional per-entry deadline for values that carry their own expiry claim.
#[derive(Clone)]
pub struct TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    inner: Cache<K, Entry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration, max_entries: u64) -> Self {
        Self {
            inner: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_entries)
                .build(),
        }
    }

    /// Look up a live entry. Entries past their own deadline are dropped and
    /// reported as misses even if the cache-wide TTL has not elapsed.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.inner.get(key)?;
        if let Some(deadline) = entry.deadline {
            if Instant::now() >= deadline {
                self.inner.invalidate(key);
                return None;
            }
        }
        Some(entry.value)
    }

    pub fn insert(&self, key: K, value: V) {
        self.inner.insert(
            key,
            Entry {
                value,
                deadline: None,
            },
        );
    }

    /// Insert with a deadline tighter than the cache-wide TTL. Used for
    /// credentials whose own expiry claim may be shorter than our TTL.
    pub fn insert_until(&self, key: K, value: V, deadline: Instant) {
        self.inner.insert(
            key,
            Entry {
                value,
                deadline: Some(deadline),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.invalidate(key);
    }
}
