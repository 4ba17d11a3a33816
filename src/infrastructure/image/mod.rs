//! Image handling infrastructure.
//!
//! This module provides:
//! - Cache key derivation and place photo URL sizing
//! - Memory caching with cost-bounded LRU eviction
//! - Disk caching for persistence across launches
//! - Decode-to-thumbnail downsampling
//! - The shared load pipeline and background prefetching

pub mod cache_key;
pub mod disk_cache;
pub mod downsampler;
pub mod fetch_client;
pub mod memory_cache;
pub mod photo_url;
pub mod pipeline;
pub mod prefetcher;

pub use cache_key::{normalize_url, resolve_cache_key};
pub use disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache};
pub use downsampler::{downsample, sniff};
pub use fetch_client::{FetchClient, FetchClientConfig};
pub use memory_cache::{CacheStats, DEFAULT_COST_LIMIT, MemoryImageCache};
pub use photo_url::{is_place_photo_url, sized_photo_url};
pub use pipeline::ImagePipeline;
pub use prefetcher::{PrefetchCandidate, Prefetcher};
