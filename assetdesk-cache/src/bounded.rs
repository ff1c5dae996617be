//! Single bounded cache instance: LRU capacity plus a TTL.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use assetdesk_core::CacheSettings;
use lru::LruCache;

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (including expired entries).
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Key→value store with least-recently-used eviction and a per-instance
/// TTL. A zero TTL turns every operation into a no-op miss.
///
/// Each operation takes the internal lock once, so concurrent readers and
/// writers never observe a half-applied update. Values are cloned out; wrap
/// large values in `Arc`.
pub struct BoundedCache<K, V> {
    name: &'static str,
    ttl: Duration,
    capacity: NonZeroUsize,
    entries: Mutex<LruCache<K, CacheEntry<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// Create a cache instance.
    ///
    /// # Arguments
    /// * `name` - Label used in logs and stats
    /// * `settings` - Capacity and TTL; a zero capacity is raised to one
    pub fn new(name: &'static str, settings: CacheSettings) -> Self {
        let capacity = NonZeroUsize::new(settings.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            ttl: settings.ttl,
            capacity,
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Look up a value. Expired entries read as absent and are dropped.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Insert or replace a value.
    pub fn set(&self, key: K, value: V) {
        self.set_at(key, value, Instant::now())
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.lock() {
            let dropped = entries.len();
            entries.clear();
            tracing::debug!(cache = self.name, dropped, "Cache cleared");
        }
    }

    /// Number of entries currently held (expired ones included until read).
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        if !self.is_enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let Ok(mut entries) = self.entries.lock() else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let expired = match entries.peek(key) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(entry) => now.saturating_duration_since(entry.inserted_at) >= self.ttl,
        };

        if expired {
            entries.pop(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub(crate) fn set_at(&self, key: K, value: V, now: Instant) {
        if !self.is_enabled() {
            return;
        }
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };

        let replacing = entries.contains(&key);
        let displaced = entries.push(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
        if displaced.is_some() && !replacing {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<K, V> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .finish()
    }
}


// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A get at any age below the TTL returns the value; at or past the
        /// TTL it is absent, without anyone calling clear().
        #[test]
        fn prop_ttl_boundary(ttl_ms in 1u64..100_000, age_ms in 0u64..200_000) {
            let cache: BoundedCache<u8, u8> = BoundedCache::new(
                "prop",
                CacheSettings::new(Duration::from_millis(ttl_ms), 4),
            );
            let t0 = Instant::now();
            cache.set_at(1, 7, t0);
            let read = cache.get_at(&1, t0 + Duration::from_millis(age_ms));
            if age_ms < ttl_ms {
                prop_assert_eq!(read, Some(7));
            } else {
                prop_assert_eq!(read, None);
            }
        }

        /// The cache never holds more than its capacity.
        #[test]
        fn prop_len_bounded_by_capacity(
            capacity in 1usize..16,
            keys in prop::collection::vec(0u16..64, 0..200)
        ) {
            let cache: BoundedCache<u16, u16> = BoundedCache::new(
                "prop",
                CacheSettings::new(Duration::from_secs(60), capacity),
            );
            for key in keys {
                cache.set(key, key);
                prop_assert!(cache.len() <= capacity);
            }
        }
    }
}
