//! Domain layer with core image entities and port definitions.

/// Entity definitions.
pub mod entities;
/// Error types.
pub mod errors;
/// Port definitions.
pub mod ports;

pub use entities::{CacheKey, CacheMode, LoadState, LoadedImage, LogicalSize, PixelSize};
pub use errors::{DecodeError, ImageError, ImageResult};
pub use ports::{FetchResponse, ImageCachePort, ImageFetchPort};
