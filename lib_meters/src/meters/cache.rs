//! Last good reading per key, with a freshness window.
//!
//! Entries are replaced whole and cloned out on read, so a reader can never observe
//! a half-written entry. There is no eviction: keys come from the device directory,
//! which is small and fixed.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub value: V,
    pub fetched_at: Instant,
}

impl<V> CacheEntry<V> {
    /// Fresh strictly before `fetched_at + ttl`; at the boundary it is already stale.
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now < self.fetched_at + ttl
    }
}

pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The entry for `key`, fresh or not.
    pub fn get(&self, key: &K) -> Option<CacheEntry<V>> {
        self.entries
            .read()
            .expect("cache lock poisoned")
            .get(key)
            .cloned()
    }

    /// The cached value for `key` if it is still within the TTL. A stale entry is
    /// reported exactly like a missing one.
    pub fn get_fresh(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.get(key)
            .filter(|entry| entry.is_fresh(self.ttl, now))
            .map(|entry| entry.value)
    }

    /// Stores `value` as fetched now. Last write wins.
    pub fn put(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            fetched_at: Instant::now(),
        };
        self.entries
            .write()
            .expect("cache lock poisoned")
            .insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fresh_until_ttl_then_stale() {
        let cache: TtlCache<String, f64> = TtlCache::new(Duration::from_secs(10));
        let key = "10.0.0.5".to_string();
        assert_eq!(cache.get_fresh(&key), None);

        cache.put(key.clone(), 42.5);
        assert_eq!(cache.get_fresh(&key), Some(42.5));

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(cache.get_fresh(&key), Some(42.5));

        // Exactly at fetched_at + ttl the entry is stale, but still present.
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get_fresh(&key), None);
        assert_eq!(cache.get(&key).map(|e| e.value), Some(42.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_restarts_window() {
        let cache: TtlCache<&'static str, f64> = TtlCache::new(Duration::from_secs(10));
        cache.put("a", 1.0);
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put("a", 2.0);
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get_fresh(&"a"), Some(2.0));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_boundary_predicate() {
        let fetched_at = Instant::now();
        let entry = CacheEntry { value: (), fetched_at };
        let ttl = Duration::from_secs(10);
        assert!(entry.is_fresh(ttl, fetched_at));
        assert!(entry.is_fresh(ttl, fetched_at + Duration::from_millis(9_999)));
        assert!(!entry.is_fresh(ttl, fetched_at + ttl));
    }

    #[test]
    fn test_zero_ttl_never_serves() {
        let cache: TtlCache<&'static str, f64> = TtlCache::new(Duration::ZERO);
        cache.put("a", 1.0);
        assert_eq!(cache.get_fresh(&"a"), None);
        assert!(!cache.is_empty());
    }
}
