//! Image pipeline error types.

use thiserror::Error;

/// Result type for image pipeline operations.
pub type ImageResult<T> = std::result::Result<T, ImageError>;

/// Reasons a payload was rejected by the downsampler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
pub enum DecodeError {
    #[error("payload too small to be an image ({len} bytes)")]
    TooSmall { len: usize },

    #[error("payload is text, not image data")]
    TextPayload,

    #[error("no complete image frame in payload")]
    NoFrame,

    #[error("{width}x{height} frame needs {bytes} bytes to decode")]
    TooLarge { width: u32, height: u32, bytes: u64 },

    #[error("unsupported image format: {0}")]
    Unsupported(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Errors that can occur while loading an image.
///
/// Every variant collapses to `LoadState::Failed` at the slot boundary; the
/// distinction only matters for diagnostics.
#[derive(Debug, Clone, Error)]
#[allow(missing_docs)]
pub enum ImageError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),

    #[error("rejected payload: {0}")]
    Decode(#[from] DecodeError),

    #[error("IO error: {0}")]
    Io(String),

    #[error("load cancelled")]
    Cancelled,
}

impl ImageError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    /// Creates an IO error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Returns whether the failure happened before any bytes were accepted.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::Network(_) | Self::HttpStatus(_))
    }

    /// Returns whether the payload itself was bad.
    #[must_use]
    pub const fn is_decode_error(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}
