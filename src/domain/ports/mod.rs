mod image_cache_port;
mod image_fetch_port;

pub use image_cache_port::ImageCachePort;
pub use image_fetch_port::{FetchResponse, ImageFetchPort};

#[cfg(test)]
pub mod mocks {
    pub use super::image_fetch_port::MockImageFetchPort;
    pub use super::image_fetch_port::mock::ScriptedFetcher;
}
