//! Port definition for the decoded-bitmap memory tier.

use std::sync::Arc;

use image::DynamicImage;

use crate::domain::entities::CacheKey;

/// Port for the in-process decoded-bitmap cache.
///
/// Implementations must be thread-safe and bounded. Entries are immutable
/// once inserted; inserting an existing key replaces it.
pub trait ImageCachePort: Send + Sync {
    /// Returns the bitmap for `key`, marking it as recently used.
    fn get(&self, key: &CacheKey) -> Option<Arc<DynamicImage>>;

    /// Returns true if `key` is resident, without touching recency.
    fn contains(&self, key: &CacheKey) -> bool;

    /// Stores a bitmap with its approximate decoded cost in bytes.
    fn insert(&self, key: CacheKey, image: Arc<DynamicImage>, cost: usize);

    /// Removes a single entry.
    fn evict(&self, key: &CacheKey);

    /// Drops every entry.
    fn remove_all(&self);

    /// Returns the current number of entries.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the summed cost of resident entries.
    fn total_cost(&self) -> usize;
}
