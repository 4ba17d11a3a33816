//! Background cache warming for images that are about to scroll into view.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Semaphore, watch};
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CacheMode, LogicalSize};

use super::pipeline::ImagePipeline;

/// Default number of candidates accepted per call.
pub const DEFAULT_BATCH_LIMIT: usize = 20;
/// Default number of prefetch loads running at once.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// One image worth warming.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefetchCandidate {
    /// Source URL.
    pub url: String,
    /// Target size in points.
    pub size: LogicalSize,
}

impl PrefetchCandidate {
    /// Creates a candidate.
    #[must_use]
    pub fn new(url: impl Into<String>, size: LogicalSize) -> Self {
        Self {
            url: url.into(),
            size,
        }
    }
}

type QueuedKeys = watch::Sender<HashSet<CacheKey>>;

/// Unqueues its key when the warm task ends, however it ends.
struct QueuedGuard {
    queued: Arc<QueuedKeys>,
    key: CacheKey,
}

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.queued.send_modify(|keys| {
            keys.remove(&self.key);
        });
    }
}

/// Warms the memory and disk tiers ahead of display.
///
/// Warm tasks are detached: they outlive the call and the screen that asked
/// for them. They share the pipeline's in-flight table, so a prefetch never
/// duplicates a fetch already started by a slot, and vice versa.
pub struct Prefetcher {
    pipeline: Arc<ImagePipeline>,
    permits: Arc<Semaphore>,
    queued: Arc<QueuedKeys>,
    batch_limit: usize,
}

impl std::fmt::Debug for Prefetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prefetcher")
            .field("batch_limit", &self.batch_limit)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Prefetcher {
    /// Creates a prefetcher accepting `batch_limit` candidates per call and
    /// running at most `max_concurrent` loads at once.
    #[must_use]
    pub fn new(pipeline: Arc<ImagePipeline>, batch_limit: usize, max_concurrent: usize) -> Self {
        let (queued, _) = watch::channel(HashSet::new());
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            queued: Arc::new(queued),
            batch_limit: batch_limit.max(1),
        }
    }

    /// Creates a prefetcher with default limits.
    #[must_use]
    pub fn with_defaults(pipeline: Arc<ImagePipeline>) -> Self {
        Self::new(pipeline, DEFAULT_BATCH_LIMIT, DEFAULT_MAX_CONCURRENT)
    }

    /// Queues background loads for `candidates` and returns how many were
    /// queued.
    ///
    /// Only the first `batch_limit` candidates are considered. Candidates that
    /// are resident in memory, already loading, already queued, or repeated
    /// within the batch are skipped. Must be called within a Tokio runtime.
    pub fn prefetch(&self, candidates: impl IntoIterator<Item = PrefetchCandidate>) -> usize {
        let mut queued = 0;
        let mut skipped = 0;

        for candidate in candidates.into_iter().take(self.batch_limit) {
            let key = self
                .pipeline
                .resolve_cache_key(&candidate.url, candidate.size);

            if self.pipeline.contains(&key)
                || self.pipeline.is_in_flight(&key, CacheMode::Persistent)
                || !self.queued.send_if_modified(|keys| keys.insert(key.clone()))
            {
                trace!(key = %key, "Skipping prefetch candidate");
                skipped += 1;
                continue;
            }

            self.spawn_warm(key, candidate.url);
            queued += 1;
        }

        debug!(queued, skipped, "Prefetch batch submitted");
        queued
    }

    fn spawn_warm(&self, key: CacheKey, url: String) {
        let guard = QueuedGuard {
            queued: self.queued.clone(),
            key,
        };
        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();

        tokio::spawn(async move {
            let guard = guard;
            tokio::task::yield_now().await;
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };

            match pipeline.load(&guard.key, &url, CacheMode::Persistent).await {
                Ok(loaded) => trace!(key = %guard.key, source = %loaded.source, "Prefetched image"),
                Err(e) => debug!(key = %guard.key, error = %e, "Prefetch failed"),
            }
        });
    }

    /// Number of queued or running warm tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queued.borrow().len()
    }

    /// Waits until every queued warm task has finished.
    pub async fn wait_idle(&self) {
        let mut rx = self.queued.subscribe();
        let _ = rx.wait_for(HashSet::is_empty).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::mocks::ScriptedFetcher;
    use crate::infrastructure::image::MemoryImageCache;
    use crate::infrastructure::image::pipeline::test_support::jpeg;

    fn setup(
        batch_limit: usize,
        max_concurrent: usize,
    ) -> (Prefetcher, Arc<ImagePipeline>, Arc<ScriptedFetcher>) {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let pipeline = Arc::new(ImagePipeline::new(
            Arc::new(MemoryImageCache::new(8 * 1024 * 1024)),
            fetcher.clone(),
            2.0,
        ));
        let prefetcher = Prefetcher::new(pipeline.clone(), batch_limit, max_concurrent);
        (prefetcher, pipeline, fetcher)
    }

    fn candidate(i: usize) -> PrefetchCandidate {
        PrefetchCandidate::new(format!("https://example.com/{i}.jpg"), LogicalSize::square(24.0))
    }

    #[tokio::test]
    async fn test_prefetch_warms_memory_tier() {
        let (prefetcher, pipeline, fetcher) = setup(20, 4);
        let c = candidate(1);
        fetcher.respond(&c.url, jpeg(200, 150));

        assert_eq!(prefetcher.prefetch([c.clone()]), 1);
        prefetcher.wait_idle().await;

        let key = pipeline.resolve_cache_key(&c.url, c.size);
        assert!(pipeline.contains(&key));
        assert_eq!(prefetcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_resident_candidate_is_not_fetched() {
        let (prefetcher, pipeline, fetcher) = setup(20, 4);
        let c = candidate(1);
        fetcher.respond(&c.url, jpeg(200, 150));
        let key = pipeline.resolve_cache_key(&c.url, c.size);
        pipeline.load(&key, &c.url, CacheMode::Persistent).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        assert_eq!(prefetcher.prefetch([c]), 0);
        prefetcher.wait_idle().await;
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_batch_is_capped() {
        let (prefetcher, _pipeline, fetcher) = setup(20, 4);

        assert_eq!(prefetcher.prefetch((0..25).map(candidate)), 20);
        prefetcher.wait_idle().await;

        assert_eq!(fetcher.calls(), 20);
        assert_eq!(fetcher.calls_for("https://example.com/24.jpg"), 0);
    }

    #[tokio::test]
    async fn test_duplicates_share_one_fetch() {
        let (prefetcher, _pipeline, fetcher) = setup(20, 4);
        let c = candidate(7);
        fetcher.respond(&c.url, jpeg(200, 150));
        let gate = fetcher.hold(&c.url);

        assert_eq!(prefetcher.prefetch([c.clone(), c.clone()]), 1);
        // A second call while the first is still queued or running.
        assert_eq!(prefetcher.prefetch([c.clone()]), 0);

        gate.notify_one();
        prefetcher.wait_idle().await;
        assert_eq!(fetcher.calls_for(&c.url), 1);
    }

    #[tokio::test]
    async fn test_skips_key_loading_in_a_slot() {
        let (prefetcher, pipeline, fetcher) = setup(20, 4);
        let c = candidate(3);
        fetcher.respond(&c.url, jpeg(200, 150));
        let gate = fetcher.hold(&c.url);
        let key = pipeline.resolve_cache_key(&c.url, c.size);

        let foreground = tokio::spawn({
            let (pipeline, key, url) = (pipeline.clone(), key.clone(), c.url.clone());
            async move { pipeline.load(&key, &url, CacheMode::Persistent).await }
        });
        while !pipeline.is_in_flight(&key, CacheMode::Persistent) {
            tokio::task::yield_now().await;
        }

        assert_eq!(prefetcher.prefetch([c.clone()]), 0);

        gate.notify_one();
        foreground.await.unwrap().unwrap();
        assert_eq!(fetcher.calls_for(&c.url), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let (prefetcher, _pipeline, fetcher) = setup(20, 2);
        let gates: Vec<_> = (0..5)
            .map(|i| fetcher.hold(&candidate(i).url))
            .collect();

        assert_eq!(prefetcher.prefetch((0..5).map(candidate)), 5);
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(fetcher.calls(), 2);

        for gate in &gates {
            gate.notify_one();
        }
        prefetcher.wait_idle().await;
        assert_eq!(fetcher.calls(), 5);
    }
}
