//! In-memory cost-bounded LRU cache of decoded bitmaps.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use image::DynamicImage;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::domain::entities::CacheKey;
use crate::domain::ports::ImageCachePort;

/// Default budget of estimated decoded-bitmap bytes (30 MiB).
pub const DEFAULT_COST_LIMIT: usize = 30 * 1024 * 1024;

struct MemoryCacheEntry {
    image: Arc<DynamicImage>,
    cost: usize,
}

struct CostLru {
    entries: LruCache<CacheKey, MemoryCacheEntry>,
    total_cost: usize,
}

impl CostLru {
    fn remove(&mut self, key: &CacheKey) -> Option<MemoryCacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_cost -= entry.cost;
        Some(entry)
    }
}

/// Memory tier: decoded bitmaps bounded by total cost, evicted least recently
/// used first.
///
/// Lookups and inserts are O(1). Every operation takes one short lock, since
/// even a read moves the entry to the front of the recency list.
pub struct MemoryImageCache {
    inner: Mutex<CostLru>,
    cost_limit: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a cache bounded by `cost_limit` bytes.
    #[must_use]
    pub fn new(cost_limit: usize) -> Self {
        Self {
            inner: Mutex::new(CostLru {
                entries: LruCache::unbounded(),
                total_cost: 0,
            }),
            cost_limit: cost_limit.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Returns the configured budget.
    #[must_use]
    pub const fn cost_limit(&self) -> usize {
        self.cost_limit
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let (entries, total_cost) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.total_cost)
        };
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            entries,
            total_cost,
            cost_limit: self.cost_limit,
        }
    }
}

impl Default for MemoryImageCache {
    fn default() -> Self {
        Self::new(DEFAULT_COST_LIMIT)
    }
}

/// Statistics about memory tier performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Entries dropped to stay under budget.
    pub evictions: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached bitmaps.
    pub entries: usize,
    /// Summed cost of resident bitmaps.
    pub total_cost: usize,
    /// Configured budget.
    pub cost_limit: usize,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Memory: {} bitmaps, {} / {} bytes, {:.1}% hit rate ({} hits, {} misses, {} evicted)",
            self.entries,
            self.total_cost,
            self.cost_limit,
            self.hit_rate,
            self.hits,
            self.misses,
            self.evictions
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }

    fn insert(&self, key: CacheKey, image: Arc<DynamicImage>, cost: usize) {
        if cost > self.cost_limit {
            debug!(
                key = %key,
                cost,
                limit = self.cost_limit,
                "Bitmap exceeds memory budget, not caching"
            );
            return;
        }

        let mut inner = self.inner.lock();
        let entry = MemoryCacheEntry { image, cost };
        if let Some((_, replaced)) = inner.entries.push(key.clone(), entry) {
            inner.total_cost -= replaced.cost;
        }
        inner.total_cost += cost;

        let mut evicted = 0u64;
        while inner.total_cost > self.cost_limit {
            let Some((old_key, old)) = inner.entries.pop_lru() else {
                break;
            };
            inner.total_cost -= old.cost;
            evicted += 1;
            trace!(key = %old_key, cost = old.cost, "Evicted bitmap from memory cache");
        }
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
        }

        debug!(
            key = %key,
            cost,
            total_cost = inner.total_cost,
            evicted,
            "Stored bitmap in memory cache"
        );
    }

    fn evict(&self, key: &CacheKey) {
        if self.inner.lock().remove(key).is_some() {
            debug!(key = %key, "Evicted bitmap from memory cache");
        }
    }

    fn remove_all(&self) {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.total_cost = 0;
        debug!(count, "Cleared memory image cache");
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn total_cost(&self) -> usize {
        self.inner.lock().total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{PixelSize, decoded_cost};

    fn key(name: &str) -> CacheKey {
        CacheKey::new(format!("https://example.com/{name}.jpg"), PixelSize::new(10, 10))
    }

    fn bitmap() -> Arc<DynamicImage> {
        Arc::new(DynamicImage::new_rgba8(10, 10))
    }

    #[test]
    fn test_insert_and_get() {
        let cache = MemoryImageCache::new(1024);
        let img = bitmap();
        cache.insert(key("a"), img.clone(), decoded_cost(&img));

        let retrieved = cache.get(&key("a"));
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap().width(), 10);
        assert_eq!(cache.total_cost(), 400);
    }

    #[test]
    fn test_miss() {
        let cache = MemoryImageCache::new(1024);
        assert!(cache.get(&key("missing")).is_none());
    }

    #[test]
    fn test_cost_bound_evicts_least_recently_used() {
        let cache = MemoryImageCache::new(1000);
        cache.insert(key("a"), bitmap(), 400);
        cache.insert(key("b"), bitmap(), 400);

        // Touch "a" so "b" becomes the eviction candidate.
        assert!(cache.get(&key("a")).is_some());
        cache.insert(key("c"), bitmap(), 400);

        assert!(cache.contains(&key("a")));
        assert!(!cache.contains(&key("b")));
        assert!(cache.contains(&key("c")));
        assert_eq!(cache.total_cost(), 800);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_total_cost_never_exceeds_budget() {
        let cache = MemoryImageCache::new(10_000);
        for i in 0..100 {
            cache.insert(key(&i.to_string()), bitmap(), 300 + i * 7);
            assert!(cache.total_cost() <= 10_000);
        }
        // The most recent insert always survives.
        assert!(cache.contains(&key("99")));
        assert!(!cache.contains(&key("0")));
    }

    #[test]
    fn test_replace_adjusts_cost() {
        let cache = MemoryImageCache::new(1000);
        cache.insert(key("a"), bitmap(), 400);
        cache.insert(key("a"), bitmap(), 100);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_cost(), 100);
    }

    #[test]
    fn test_oversized_entry_is_skipped() {
        let cache = MemoryImageCache::new(100);
        cache.insert(key("small"), bitmap(), 50);
        cache.insert(key("huge"), bitmap(), 101);

        assert!(!cache.contains(&key("huge")));
        assert!(cache.contains(&key("small")));
    }

    #[test]
    fn test_contains_does_not_promote() {
        let cache = MemoryImageCache::new(800);
        cache.insert(key("a"), bitmap(), 400);
        cache.insert(key("b"), bitmap(), 400);

        assert!(cache.contains(&key("a")));
        cache.insert(key("c"), bitmap(), 400);

        assert!(!cache.contains(&key("a")));
    }

    #[test]
    fn test_remove_all_and_evict() {
        let cache = MemoryImageCache::new(1000);
        cache.insert(key("a"), bitmap(), 100);
        cache.insert(key("b"), bitmap(), 100);

        cache.evict(&key("a"));
        assert_eq!(cache.total_cost(), 100);

        cache.remove_all();
        assert!(cache.is_empty());
        assert_eq!(cache.total_cost(), 0);
    }

    #[test]
    fn test_stats() {
        let cache = MemoryImageCache::new(1000);
        cache.insert(key("a"), bitmap(), 100);

        let _ = cache.get(&key("a"));
        let _ = cache.get(&key("missing"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_cost, 100);
    }
}
