//! Bounded, TTL-expiring in-memory caches
//!
//! One generic primitive parameterized by value type, owned by a manager.
//! External code never sees the map itself: reads return clones, bulk
//! refreshes build a new map off-line and swap it atomically, and cache
//! updates happen only after the driving transaction has committed.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Hit/miss/eviction counters, cheap to copy out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
    last_access: Instant,
}

struct CacheInner<K, V> {
    entries: HashMap<K, Entry<V>>,
    stats: CacheStats,
}

type InvalidationHook = Box<dyn Fn(&str, &str) + Send + Sync>;

/// A bounded TTL/LRU map of domain entities
pub struct BoundedCache<K, V> {
    name: String,
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<CacheInner<K, V>>,
    /// Called with `(cache_name, reason)` after `invalidate_all`; the
    /// owning manager wires this to a `cache:invalidated` emission
    on_invalidate: Mutex<Option<InvalidationHook>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new(name: impl Into<String>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            on_invalidate: Mutex::new(None),
        }
    }

    pub fn set_invalidation_hook(&self, hook: impl Fn(&str, &str) + Send + Sync + 'static) {
        *self.on_invalidate.lock() = Some(Box::new(hook));
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch a clone of the cached value, expiring it when past TTL
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = match inner.entries.get(key) {
            Some(entry) => now.duration_since(entry.inserted) >= self.ttl,
            None => {
                inner.stats.misses += 1;
                return None;
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.stats.expirations += 1;
            inner.stats.misses += 1;
            return None;
        }

        let value = match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.last_access = now;
                entry.value.clone()
            }
            None => return None,
        };
        inner.stats.hits += 1;
        Some(value)
    }

    /// Insert or replace; evicts the least-recently-used entry when full
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.max_entries {
            if let Some(lru_key) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&lru_key);
                inner.stats.evictions += 1;
            }
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                last_access: now,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().entries.remove(key).map(|e| e.value)
    }

    /// Replace the whole map atomically; no partial state is observable
    pub fn swap_all(&self, values: HashMap<K, V>) {
        let now = Instant::now();
        let entries = values
            .into_iter()
            .map(|(k, v)| {
                (
                    k,
                    Entry {
                        value: v,
                        inserted: now,
                        last_access: now,
                    },
                )
            })
            .collect();
        self.inner.lock().entries = entries;
    }

    /// Drop everything and broadcast the reason through the hook
    pub fn invalidate_all(&self, reason: &str) {
        self.inner.lock().entries.clear();
        tracing::debug!("Cache '{}' invalidated: {reason}", self.name);
        if let Some(hook) = self.on_invalidate.lock().as_ref() {
            hook(&self.name, reason);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl<K, V> std::fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(ttl: Duration, max: usize) -> BoundedCache<String, u32> {
        BoundedCache::new("test", ttl, max)
    }

    #[test]
    fn test_get_hit_and_miss_counting() {
        let c = cache(Duration::from_secs(60), 10);
        c.insert("a".into(), 1);

        assert_eq!(c.get(&"a".into()), Some(1));
        assert_eq!(c.get(&"missing".into()), None);

        let stats = c.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let c = cache(Duration::from_millis(10), 10);
        c.insert("a".into(), 1);
        std::thread::sleep(Duration::from_millis(20));

        assert_eq!(c.get(&"a".into()), None);
        assert_eq!(c.stats().expirations, 1);
        assert!(c.is_empty());
    }

    #[test]
    fn test_lru_eviction_when_full() {
        let c = cache(Duration::from_secs(60), 2);
        c.insert("a".into(), 1);
        std::thread::sleep(Duration::from_millis(2));
        c.insert("b".into(), 2);
        std::thread::sleep(Duration::from_millis(2));

        // Touch "a" so "b" becomes the LRU entry
        assert_eq!(c.get(&"a".into()), Some(1));
        std::thread::sleep(Duration::from_millis(2));
        c.insert("c".into(), 3);

        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&"b".into()), None);
        assert_eq!(c.get(&"a".into()), Some(1));
        assert_eq!(c.get(&"c".into()), Some(3));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let c = cache(Duration::from_secs(60), 2);
        c.insert("a".into(), 1);
        c.insert("b".into(), 2);
        c.insert("a".into(), 10);

        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&"a".into()), Some(10));
        assert_eq!(c.stats().evictions, 0);
    }

    #[test]
    fn test_swap_all_replaces_wholesale() {
        let c = cache(Duration::from_secs(60), 10);
        c.insert("old".into(), 1);

        let mut fresh = HashMap::new();
        fresh.insert("new1".to_string(), 10);
        fresh.insert("new2".to_string(), 20);
        c.swap_all(fresh);

        assert_eq!(c.get(&"old".into()), None);
        assert_eq!(c.get(&"new1".into()), Some(10));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_invalidate_all_fires_hook() {
        let c = cache(Duration::from_secs(60), 10);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        c.set_invalidation_hook(move |name, reason| {
            assert_eq!(name, "test");
            assert_eq!(reason, "bulk-refresh");
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        c.insert("a".into(), 1);
        c.invalidate_all("bulk-refresh");

        assert!(c.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
