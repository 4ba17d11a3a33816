//! Infrastructure layer with external service adapters.

/// Application configuration.
pub mod config;
/// Image handling (cache tiers, fetching, downsampling, prefetch).
pub mod image;

pub use config::{AppConfig, CliArgs, ConfigError, LogLevel, StorageManager};
pub use image::{
    CacheStats, DiskImageCache, FetchClient, ImagePipeline, MemoryImageCache, PrefetchCandidate,
    Prefetcher, resolve_cache_key,
};
