//! Domain types for remote image identity and sizing.

use std::sync::Arc;

use image::DynamicImage;

/// Size in logical points, as laid out on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogicalSize {
    /// Width in points.
    pub width: f32,
    /// Height in points.
    pub height: f32,
}

impl LogicalSize {
    /// Creates a new logical size.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Creates a square logical size, the common case for avatars and pins.
    #[must_use]
    pub const fn square(side: f32) -> Self {
        Self::new(side, side)
    }

    /// Converts to device pixels for the given display scale.
    ///
    /// Each dimension is rounded to the nearest pixel and never drops below one,
    /// so degenerate layouts still produce a usable key.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn to_pixels(self, scale: f32) -> PixelSize {
        let scale = if scale.is_finite() && scale > 0.0 {
            scale
        } else {
            1.0
        };
        let px = |points: f32| (points * scale).round().max(1.0).min(u32::MAX as f32) as u32;
        PixelSize::new(px(self.width), px(self.height))
    }
}

/// Size in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelSize {
    /// Creates a new pixel size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns the larger of the two dimensions.
    #[must_use]
    pub const fn max_dimension(self) -> u32 {
        if self.width > self.height {
            self.width
        } else {
            self.height
        }
    }
}

impl std::fmt::Display for PixelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Identity of one decoded thumbnail: normalized source URL plus target pixel size.
///
/// The same photo requested at two on-screen sizes yields two keys, so an
/// oversized or blurry bitmap is never served in place of a correctly sized one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    url: String,
    pixels: PixelSize,
}

impl CacheKey {
    /// Creates a key from an already normalized URL.
    #[must_use]
    pub fn new(normalized_url: impl Into<String>, pixels: PixelSize) -> Self {
        Self {
            url: normalized_url.into(),
            pixels,
        }
    }

    /// Returns the normalized source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the target size in device pixels.
    #[must_use]
    pub const fn pixel_size(&self) -> PixelSize {
        self.pixels
    }

    /// Returns the larger target dimension, the bound handed to the downsampler.
    #[must_use]
    pub const fn max_dimension(&self) -> u32 {
        self.pixels.max_dimension()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.url, self.pixels)
    }
}

/// Which cache configuration a load goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CacheMode {
    /// Read-through disk tier and memory tier population.
    #[default]
    Persistent,
    /// Always reload from network; populate neither tier.
    Transient,
}

impl CacheMode {
    /// Returns true for the persistent configuration.
    #[must_use]
    pub const fn is_persistent(self) -> bool {
        matches!(self, Self::Persistent)
    }
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistent => write!(f, "persistent"),
            Self::Transient => write!(f, "transient"),
        }
    }
}

/// Where an image was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Decoded bitmap found in the memory tier.
    MemoryCache,
    /// Raw bytes found in the disk tier, decoded fresh.
    DiskCache,
    /// Downloaded from network.
    Network,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemoryCache => write!(f, "memory"),
            Self::DiskCache => write!(f, "disk"),
            Self::Network => write!(f, "network"),
        }
    }
}

/// A decoded, downsampled image ready for display.
#[derive(Clone)]
pub struct LoadedImage {
    /// Key the image was resolved for.
    pub key: CacheKey,
    /// Shared decoded bitmap.
    pub image: Arc<DynamicImage>,
    /// Tier that satisfied the load.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Creates a new loaded image.
    #[must_use]
    pub const fn new(key: CacheKey, image: Arc<DynamicImage>, source: ImageSource) -> Self {
        Self { key, image, source }
    }
}

impl std::fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedImage")
            .field("key", &self.key)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .field("source", &self.source)
            .finish()
    }
}

/// Approximate resident footprint of a decoded bitmap in bytes.
///
/// Uses the backing buffer length (`bytes_per_row * height`), falling back to
/// four bytes per pixel when the buffer reports nothing.
#[must_use]
pub fn decoded_cost(image: &DynamicImage) -> usize {
    let bytes = image.as_bytes().len();
    if bytes > 0 {
        return bytes;
    }
    let width = usize::try_from(image.width()).unwrap_or(usize::MAX);
    let height = usize::try_from(image.height()).unwrap_or(usize::MAX);
    width.saturating_mul(height).saturating_mul(4)
}
