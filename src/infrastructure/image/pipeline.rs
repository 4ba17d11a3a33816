//! Shared image pipeline: Memory -> Disk -> Network -> Downsample.
//!
//! One `ImagePipeline` is built at startup and handed to every slot and
//! prefetcher by `Arc`. Concurrent requests for the same key share a single
//! fetch and decode; whoever arrives first leads the flight and the rest wait
//! for its result.

use std::collections::HashMap;
use std::sync::Arc;

use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::domain::entities::{
    CacheKey, CacheMode, ImageSource, LoadedImage, LogicalSize, decoded_cost,
};
use crate::domain::errors::{DecodeError, ImageError, ImageResult};
use crate::domain::ports::{ImageCachePort, ImageFetchPort};
use crate::infrastructure::config::AppConfig;

use super::cache_key::resolve_cache_key;
use super::disk_cache::DiskImageCache;
use super::downsampler::downsample;
use super::fetch_client::{FetchClient, FetchClientConfig};
use super::memory_cache::MemoryImageCache;
use super::photo_url::sized_photo_url;

type FlightKey = (CacheKey, CacheMode);
type FlightResult = ImageResult<LoadedImage>;
type FlightMap = Mutex<HashMap<FlightKey, broadcast::Sender<FlightResult>>>;

enum Flight<'a> {
    Lead(FlightGuard<'a>),
    Follow(broadcast::Receiver<FlightResult>),
}

/// Registration of a led flight. Dropping it without completing (the leader
/// was cancelled) unregisters the flight so waiters can take over.
struct FlightGuard<'a> {
    flights: &'a FlightMap,
    key: FlightKey,
    tx: broadcast::Sender<FlightResult>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn complete(mut self, result: &FlightResult) {
        self.flights.lock().remove(&self.key);
        self.finished = true;
        let _ = self.tx.send(result.clone());
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.flights.lock().remove(&self.key);
        }
    }
}

/// The shared load service behind every slot and prefetcher.
pub struct ImagePipeline {
    memory: Arc<dyn ImageCachePort>,
    fetcher: Arc<dyn ImageFetchPort>,
    flights: FlightMap,
    display_scale: f32,
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("display_scale", &self.display_scale)
            .field("memory_entries", &self.memory.len())
            .field("in_flight", &self.flights.lock().len())
            .finish_non_exhaustive()
    }
}

impl ImagePipeline {
    /// Creates a pipeline over the given tiers.
    #[must_use]
    pub fn new(
        memory: Arc<dyn ImageCachePort>,
        fetcher: Arc<dyn ImageFetchPort>,
        display_scale: f32,
    ) -> Self {
        Self {
            memory,
            fetcher,
            flights: Mutex::new(HashMap::new()),
            display_scale,
        }
    }

    /// Builds the production pipeline from configuration: a cost-bounded
    /// memory tier and an HTTP fetch client over a disk tier.
    ///
    /// # Errors
    /// Returns error if the disk tier or HTTP client cannot be created.
    pub async fn open(config: &AppConfig) -> ImageResult<Self> {
        let disk = Arc::new(
            DiskImageCache::open(config.cache.effective_disk_dir(), config.cache.disk_byte_limit)
                .await?,
        );
        let fetcher = FetchClient::new(
            disk,
            &FetchClientConfig {
                timeout: config.network.timeout(),
            },
        )?;
        let memory = MemoryImageCache::new(config.cache.memory_cost_limit);

        info!(
            memory_cost_limit = config.cache.memory_cost_limit,
            disk_byte_limit = config.cache.disk_byte_limit,
            scale = config.display.scale,
            "Image pipeline ready"
        );

        Ok(Self::new(
            Arc::new(memory),
            Arc::new(fetcher),
            config.display.scale,
        ))
    }

    /// Returns the display scale used to turn points into pixels.
    #[must_use]
    pub const fn display_scale(&self) -> f32 {
        self.display_scale
    }

    /// Returns the memory tier.
    #[must_use]
    pub fn memory(&self) -> &Arc<dyn ImageCachePort> {
        &self.memory
    }

    /// Derives the cache key for `url` at `size` points on this display.
    #[must_use]
    pub fn resolve_cache_key(&self, url: &str, size: LogicalSize) -> CacheKey {
        resolve_cache_key(url, size, self.display_scale)
    }

    /// Memory tier lookup. No I/O.
    #[must_use]
    pub fn cached(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        self.memory.get(key)
    }

    /// Returns true if `key` is resident in the memory tier.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.memory.contains(key)
    }

    /// Returns true if a fetch for `key` in `mode` is running.
    #[must_use]
    pub fn is_in_flight(&self, key: &CacheKey, mode: CacheMode) -> bool {
        self.flights.lock().contains_key(&(key.clone(), mode))
    }

    /// Number of running flights.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.flights.lock().len()
    }

    /// Loads `key`, fetching `url` if the memory tier misses.
    ///
    /// Joins an identical running flight instead of starting a second fetch.
    /// If the leader of that flight is cancelled, a waiter takes over.
    ///
    /// # Errors
    /// Returns the fetch, status or decode failure.
    pub async fn load(&self, key: &CacheKey, url: &str, mode: CacheMode) -> FlightResult {
        loop {
            if let Some(image) = self.memory.get(key) {
                return Ok(LoadedImage::new(key.clone(), image, ImageSource::MemoryCache));
            }

            match self.join_flight(key, mode) {
                Flight::Follow(mut rx) => match rx.recv().await {
                    Ok(result) => {
                        trace!(key = %key, "Joined in-flight image load");
                        return result;
                    }
                    Err(_) => {
                        trace!(key = %key, "In-flight leader went away, retrying");
                    }
                },
                Flight::Lead(guard) => {
                    let result = match self.memory.get(key) {
                        Some(image) => Ok(LoadedImage::new(
                            key.clone(),
                            image,
                            ImageSource::MemoryCache,
                        )),
                        None => self.fetch_and_decode(key, url, mode).await,
                    };
                    guard.complete(&result);
                    return result;
                }
            }
        }
    }

    fn join_flight(&self, key: &CacheKey, mode: CacheMode) -> Flight<'_> {
        let flight_key = (key.clone(), mode);
        let mut flights = self.flights.lock();
        if let Some(tx) = flights.get(&flight_key) {
            return Flight::Follow(tx.subscribe());
        }
        let (tx, _) = broadcast::channel(1);
        flights.insert(flight_key.clone(), tx.clone());
        Flight::Lead(FlightGuard {
            flights: &self.flights,
            key: flight_key,
            tx,
            finished: false,
        })
    }

    async fn fetch_and_decode(&self, key: &CacheKey, url: &str, mode: CacheMode) -> FlightResult {
        let fetch_url = sized_photo_url(url, key.max_dimension());
        debug!(key = %key, url = %fetch_url, mode = %mode, "Fetching image");

        let response = self.fetcher.fetch(&fetch_url, mode).await.inspect_err(|e| {
            debug!(key = %key, error = %e, "Image fetch failed");
        })?;

        if !response.is_success() {
            debug!(key = %key, status = response.status, "Image fetch returned non-success status");
            return Err(ImageError::HttpStatus(response.status));
        }

        let source = if response.from_disk {
            ImageSource::DiskCache
        } else {
            ImageSource::Network
        };
        let target = key.max_dimension();
        let bytes = response.bytes;
        let decoded = tokio::task::spawn_blocking(move || downsample(&bytes, target))
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    ImageError::Cancelled
                } else {
                    DecodeError::Decode(format!("Decode task panicked: {e}")).into()
                }
            })?;

        let image = match decoded {
            Ok(image) => Arc::new(image),
            Err(e) => {
                warn!(key = %key, source = %source, error = %e, "Rejected image payload");
                if source == ImageSource::DiskCache {
                    self.fetcher.invalidate(&fetch_url).await;
                }
                return Err(e.into());
            }
        };

        if mode.is_persistent() {
            self.memory
                .insert(key.clone(), image.clone(), decoded_cost(&image));
        }

        debug!(
            key = %key,
            source = %source,
            width = image.width(),
            height = image.height(),
            "Image loaded"
        );

        Ok(LoadedImage::new(key.clone(), image, source))
    }

    /// Drops every memory tier entry, e.g. on OS memory pressure.
    pub fn handle_memory_pressure(&self) {
        let count = self.memory.len();
        self.memory.remove_all();
        info!(count, "Released memory image cache under memory pressure");
    }

    /// Drops memory tier entries and disk tier contents.
    pub async fn clear_caches(&self) {
        self.memory.remove_all();
        if let Err(e) = self.fetcher.clear_disk().await {
            warn!(error = %e, "Failed to clear disk cache");
        }
        info!("Cleared all image caches");
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use image::{ImageFormat, RgbImage};

    /// Encodes a `width` x `height` JPEG with a busy pattern.
    pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let image = image::DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 251) as u8, (y % 241) as u8, ((x * 7 + y * 3) % 256) as u8])
        }));
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }
}
