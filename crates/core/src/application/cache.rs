//! TTL Cache
//!
//! Bounded key/value store with per-entry expiry. Eviction is by insertion
//! order (oldest inserted entry first), not LRU. Expired entries are evicted
//! lazily on read, or in bulk by `clean()`.
//!
//! The cache is an optimization, never a source of truth: contents are lost
//! on restart and callers must tolerate a cold cache.

use crate::port::TimeProvider;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
    /// Maximum number of entries
    pub max_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300), // 5 minutes
            max_size: 1000,
        }
    }
}

impl CacheConfig {
    /// Lead data / qualification results (10 minutes)
    pub fn leads() -> Self {
        Self {
            default_ttl: Duration::from_secs(600),
            ..Self::default()
        }
    }

    /// Upstream API responses (1 minute)
    pub fn api() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            ..Self::default()
        }
    }
}

/// Cache statistics (keys in insertion order)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats<K> {
    pub size: usize,
    pub max_size: usize,
    pub keys: Vec<K>,
}

struct CacheEntry<V> {
    value: V,
    expires_at: i64,
    seq: u64,
}

struct CacheInner<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    order: BTreeMap<u64, K>,
    next_seq: u64,
}

impl<K: Eq + Hash + Clone, V> CacheInner<K, V> {
    fn remove(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.seq);
                true
            }
            None => false,
        }
    }

    fn evict_oldest(&mut self) -> Option<K> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Insertion-ordered TTL cache, safe to share behind `Arc`
pub struct TtlCache<K, V> {
    inner: Mutex<CacheInner<K, V>>,
    config: CacheConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(config: CacheConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            config,
            time_provider,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<K, V>> {
        // A poisoned cache is still structurally valid
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `value` under `key` for `ttl` (or the default TTL)
    ///
    /// When inserting a new key into a full cache, the oldest inserted entry
    /// is evicted first. Overwriting an existing key keeps its position.
    pub fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let expires_at = self.time_provider.now_millis() + ttl.as_millis() as i64;
        let mut inner = self.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }

        while inner.entries.len() >= self.config.max_size.max(1) {
            if inner.evict_oldest().is_none() {
                break;
            }
            debug!(max_size = self.config.max_size, "Cache full, evicted oldest entry");
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                expires_at,
                seq,
            },
        );
    }

    /// Get a live value; an expired entry is evicted and reported absent
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.time_provider.now_millis();
        let mut inner = self.lock();

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) if now >= entry.expires_at => true,
            Some(entry) => return Some(entry.value.clone()),
        };
        if expired {
            inner.remove(key);
        }
        None
    }

    /// Consistent with `get(key).is_some()`
    pub fn has(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove an entry; true if it existed
    pub fn delete(&self, key: &K) -> bool {
        self.lock().remove(key)
    }

    /// Remove everything
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Purge expired entries, returning how many were removed
    pub fn clean(&self) -> usize {
        let now = self.time_provider.now_millis();
        let mut inner = self.lock();

        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Live entries after purging expired ones
    pub fn stats(&self) -> CacheStats<K> {
        self.clean();
        let inner = self.lock();
        CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_size,
            keys: inner.order.values().cloned().collect(),
        }
    }

    /// Return the cached value, computing and storing it on a miss
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = f();
        self.set(key, value.clone(), None);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    fn cache(max_size: usize) -> (Arc<ManualTimeProvider>, TtlCache<String, i32>) {
        let clock = Arc::new(ManualTimeProvider::new(1_000));
        let cache = TtlCache::new(
            CacheConfig {
                default_ttl: Duration::from_secs(10),
                max_size,
            },
            clock.clone(),
        );
        (clock, cache)
    }

    #[test]
    fn test_get_after_set_returns_value() {
        let (_, cache) = cache(10);
        cache.set("a".to_string(), 1, None);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert!(cache.has(&"a".to_string()));
    }

    #[test]
    fn test_expired_entry_is_absent_and_evicted() {
        let (clock, cache) = cache(10);
        cache.set("a".to_string(), 1, Some(Duration::from_secs(5)));

        clock.advance(Duration::from_millis(4_999));
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get(&"a".to_string()), None);
        assert!(!cache.has(&"a".to_string()));
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_full_cache_evicts_oldest_inserted() {
        let (_, cache) = cache(3);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            cache.set(key.to_string(), i as i32, None);
        }
        // Reading "a" does not refresh its position (not LRU)
        assert_eq!(cache.get(&"a".to_string()), Some(0));

        cache.set("d".to_string(), 3, None);

        let stats = cache.stats();
        assert_eq!(stats.size, 3);
        assert_eq!(stats.keys, vec!["b", "c", "d"]);
        assert!(!cache.has(&"a".to_string()));
    }

    #[test]
    fn test_overwrite_in_full_cache_evicts_nothing() {
        let (_, cache) = cache(2);
        cache.set("a".to_string(), 1, None);
        cache.set("b".to_string(), 2, None);
        cache.set("a".to_string(), 10, None);

        let stats = cache.stats();
        assert_eq!(stats.keys, vec!["a", "b"]);
        assert_eq!(cache.get(&"a".to_string()), Some(10));
    }

    #[test]
    fn test_delete_clear_and_stats_skip_expired() {
        let (clock, cache) = cache(10);
        cache.set("short".to_string(), 1, Some(Duration::from_secs(1)));
        cache.set("long".to_string(), 2, Some(Duration::from_secs(60)));

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.stats().keys, vec!["long"]);

        assert!(cache.delete(&"long".to_string()));
        assert!(!cache.delete(&"long".to_string()));

        cache.set("x".to_string(), 3, None);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let (_, cache) = cache(10);
        let mut calls = 0;
        let first = cache.get_or_insert_with("k".to_string(), || {
            calls += 1;
            42
        });
        let second = cache.get_or_insert_with("k".to_string(), || {
            calls += 1;
            0
        });
        assert_eq!((first, second, calls), (42, 42, 1));
    }
}
