//! Stable identity for (source URL, target pixel size) requests.

use crate::domain::entities::{CacheKey, LogicalSize};

/// Normalizes a source URL so equivalent spellings share one key.
///
/// Scheme and host are lowercased, default ports and fragments are dropped.
/// Path and query are kept verbatim. Unparsable input is only trimmed.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    match reqwest::Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// Derives the cache key for `url` shown at `size` points on a display with
/// the given pixel `scale`.
#[must_use]
pub fn resolve_cache_key(url: &str, size: LogicalSize, scale: f32) -> CacheKey {
    CacheKey::new(normalize_url(url), size.to_pixels(scale))
}
