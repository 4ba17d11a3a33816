//! Port definition for fetching raw image bytes.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::CacheMode;
use crate::domain::errors::ImageResult;

/// Raw response for an image request.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Response body. Empty for non-success statuses.
    pub bytes: Bytes,
    /// HTTP status code.
    pub status: u16,
    /// True when served from the disk tier without touching the network.
    pub from_disk: bool,
}

impl FetchResponse {
    /// Creates a response that came from the network.
    #[must_use]
    pub const fn network(bytes: Bytes, status: u16) -> Self {
        Self {
            bytes,
            status,
            from_disk: false,
        }
    }

    /// Creates a response served from the disk tier.
    #[must_use]
    pub const fn cached(bytes: Bytes) -> Self {
        Self {
            bytes,
            status: 200,
            from_disk: true,
        }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Port for fetching image bytes, consulting the disk tier per `CacheMode`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageFetchPort: Send + Sync {
    /// Fetches the bytes behind `url`.
    ///
    /// Non-success statuses are returned as a response, not an error; transport
    /// failures are errors.
    async fn fetch(&self, url: &str, mode: CacheMode) -> ImageResult<FetchResponse>;

    /// Drops any disk-tier entry for `url`.
    async fn invalidate(&self, url: &str);

    /// Drops the whole disk tier.
    async fn clear_disk(&self) -> ImageResult<()>;
}
