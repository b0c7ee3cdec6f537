//! Process-wide response cache keyed by [`RequestKey`]
//!
//! Entries live for the duration of a session. When `max_entries` is set
//! the oldest insertion is evicted first (FIFO) to bound memory on long
//! runs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::domain::RequestKey;

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<RequestKey, V>,
    insertion_order: VecDeque<RequestKey>,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served from the cache, 0.0 when nothing was looked up
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
    max_entries: Option<usize>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone> ResponseCache<V> {
    /// Unbounded cache
    pub fn new() -> Self {
        Self::with_max_entries(None)
    }

    /// `Some(0)` is treated as unbounded
    pub fn with_max_entries(max_entries: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
            max_entries: max_entries.filter(|&n| n > 0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get(&self, key: &RequestKey) -> Option<V> {
        let found = self.lock().entries.get(key).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn put(&self, key: RequestKey, value: V) {
        let mut inner = self.lock();
        if inner.entries.insert(key.clone(), value).is_some() {
            return;
        }
        inner.insertion_order.push_back(key);

        if let Some(max) = self.max_entries {
            while inner.entries.len() > max {
                let Some(oldest) = inner.insertion_order.pop_front() else {
                    break;
                };
                inner.entries.remove(&oldest);
                debug!("Evicted cache entry {}", oldest);
            }
        }
    }

    pub fn contains(&self, key: &RequestKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<V>> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> RequestKey {
        RequestKey::for_url(&format!("https://shop.example/p/{n}"))
    }

    #[test]
    fn get_after_put_hits() {
        let cache = ResponseCache::new();
        assert_eq!(cache.get(&key(1)), None);
        cache.put(key(1), "page one".to_string());
        assert_eq!(cache.get(&key(1)).as_deref(), Some("page one"));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn bounded_cache_evicts_oldest_first() {
        let cache = ResponseCache::with_max_entries(Some(2));
        cache.put(key(1), 1);
        cache.put(key(2), 2);
        cache.put(key(3), 3);

        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
        assert!(cache.contains(&key(3)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overwriting_does_not_grow_or_reorder() {
        let cache = ResponseCache::with_max_entries(Some(2));
        cache.put(key(1), 1);
        cache.put(key(2), 2);
        cache.put(key(1), 10);
        cache.put(key(3), 3);

        assert!(!cache.contains(&key(1)));
        assert_eq!(cache.get(&key(2)), Some(2));
        assert_eq!(cache.get(&key(3)), Some(3));
    }

    #[test]
    fn zero_limit_means_unbounded() {
        let cache = ResponseCache::with_max_entries(Some(0));
        for n in 0..50 {
            cache.put(key(n), n);
        }
        assert_eq!(cache.len(), 50);
    }

    #[test]
    fn empty_stats_have_zero_hit_rate() {
        let cache: ResponseCache<u8> = ResponseCache::default();
        assert!(cache.is_empty());
        assert!(cache.stats().hit_rate().abs() < f64::EPSILON);
    }
}
