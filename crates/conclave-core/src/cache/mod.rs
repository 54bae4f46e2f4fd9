//! Two-level cache: an L1 query cache (query → ranked matches, with TTL) and
//! an L2 embedding cache (text → vector, no TTL), sharing one combined
//! statistics snapshot.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::similarity::ScoredCandidate;

/// L1 cache key. The threshold tag is hardcoded to the bit pattern of `0.0`
/// by the retriever regardless of the live noise floor — reproducing the
/// original system's behavior exactly; identical-key hits still return
/// byte-identical results and a write still invalidates every key, which is
/// all the cache-correctness property actually requires.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryCacheKey {
    pub normalized_query: String,
    pub threshold_tag: u64,
    pub k: usize,
}

impl QueryCacheKey {
    pub fn new(normalized_query: impl Into<String>, threshold_tag: f64, k: usize) -> Self {
        Self {
            normalized_query: normalized_query.into(),
            threshold_tag: threshold_tag.to_bits(),
            k,
        }
    }
}

struct TimedEntry<T> {
    value: T,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
struct LayerStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LayerStats {
    fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.evictions.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStatsSnapshot {
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l1_evictions: u64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_evictions: u64,
}

impl CacheStatsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits;
        let total = hits + self.l1_misses + self.l2_misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Shared two-level cache for the retriever.
pub struct Cache {
    l1: Mutex<LruCache<QueryCacheKey, TimedEntry<Vec<ScoredCandidate>>>>,
    l1_ttl: Duration,
    l1_stats: LayerStats,
    l2: Mutex<LruCache<String, Vec<f32>>>,
    l2_stats: LayerStats,
}

impl Cache {
    pub fn new(query_cache_size: usize, embedding_cache_size: usize, query_ttl: Duration) -> Self {
        let l1_cap = NonZeroUsize::new(query_cache_size.max(1)).unwrap();
        let l2_cap = NonZeroUsize::new(embedding_cache_size.max(1)).unwrap();
        Self {
            l1: Mutex::new(LruCache::new(l1_cap)),
            l1_ttl: query_ttl,
            l1_stats: LayerStats::default(),
            l2: Mutex::new(LruCache::new(l2_cap)),
            l2_stats: LayerStats::default(),
        }
    }

    pub fn get_query(&self, key: &QueryCacheKey) -> Option<Vec<ScoredCandidate>> {
        let mut l1 = self.l1.lock().unwrap();
        match l1.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.l1_ttl => {
                self.l1_stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(_) => {
                l1.pop(key);
                self.l1_stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.l1_stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put_query(&self, key: QueryCacheKey, value: Vec<ScoredCandidate>) {
        let mut l1 = self.l1.lock().unwrap();
        if l1.len() == l1.cap().get() && !l1.contains(&key) {
            self.l1_stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        l1.put(
            key,
            TimedEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Drops every L1 entry. Called after any write to the graph.
    pub fn invalidate_all_queries(&self) {
        self.l1.lock().unwrap().clear();
    }

    pub fn get_embedding(&self, normalized_text: &str) -> Option<Vec<f32>> {
        let mut l2 = self.l2.lock().unwrap();
        match l2.get(normalized_text) {
            Some(v) => {
                self.l2_stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.l2_stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put_embedding(&self, normalized_text: String, vector: Vec<f32>) {
        let mut l2 = self.l2.lock().unwrap();
        if l2.len() == l2.cap().get() && !l2.contains(&normalized_text) {
            self.l2_stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
        l2.put(normalized_text, vector);
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let (l1h, l1m, l1e) = self.l1_stats.snapshot();
        let (l2h, l2m, l2e) = self.l2_stats.snapshot();
        CacheStatsSnapshot {
            l1_hits: l1h,
            l1_misses: l1m,
            l1_evictions: l1e,
            l2_hits: l2h,
            l2_misses: l2m,
            l2_evictions: l2e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn cache() -> Cache {
        Cache::new(10, 10, Duration::from_millis(50))
    }

    #[test]
    fn identical_key_hits_within_ttl() {
        let c = cache();
        let key = QueryCacheKey::new("q", 0.0, 3);
        c.put_query(key.clone(), vec![]);
        assert!(c.get_query(&key).is_some());
        assert_eq!(c.stats().l1_hits, 1);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let c = Cache::new(10, 10, Duration::from_millis(1));
        let key = QueryCacheKey::new("q", 0.0, 3);
        c.put_query(key.clone(), vec![]);
        sleep(Duration::from_millis(5));
        assert!(c.get_query(&key).is_none());
    }

    #[test]
    fn invalidate_clears_l1_but_not_l2() {
        let c = cache();
        let key = QueryCacheKey::new("q", 0.0, 3);
        c.put_query(key.clone(), vec![]);
        c.put_embedding("q".into(), vec![1.0, 2.0]);
        c.invalidate_all_queries();
        assert!(c.get_query(&key).is_none());
        assert!(c.get_embedding("q").is_some());
    }
}
