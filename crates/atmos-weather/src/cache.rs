//! In-memory key/value cache with per-entry time-to-live.
//!
//! Ages are measured on tokio's monotonic clock, so wall-clock changes never
//! revive or expire entries and tests can drive expiry with `time::advance`.
//! Expired entries are dropped lazily by the lookup that finds them; there is
//! no background sweep. Reads do not extend an entry's lifetime.
//!
//! An entry misses once its age exceeds its TTL; an entry exactly TTL old
//! still hits. A zero TTL is never stored, which turns caching off.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) > self.ttl
    }
}

/// Thread-safe TTL cache. Values are cloned out on hit.
#[derive(Debug)]
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    /// Fresh value for `key`, or `None` when absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    /// Store `value` for `ttl`, replacing any previous entry.
    pub fn put(&self, key: K, value: V, ttl: Duration) {
        if ttl.is_zero() {
            self.entries.lock().remove(&key);
            return;
        }
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Store `value` with the cache's default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.put(key, value, self.default_ttl);
    }

    /// Remove `key`. Returns whether an entry (fresh or stale) was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Stored entries, including expired ones nobody has looked up yet.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
