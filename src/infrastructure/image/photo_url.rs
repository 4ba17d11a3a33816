//! Server-side sizing for place photo URLs.
//!
//! Place photo endpoints accept a maximum width, so asking for roughly the
//! target pixel width keeps both bandwidth and decode work small.

const LEGACY_PHOTO_HOST: &str = "maps.googleapis.com";
const LEGACY_PHOTO_PATH: &str = "/maps/api/place/photo";
const LEGACY_WIDTH_PARAM: &str = "maxwidth";

const MEDIA_HOST: &str = "places.googleapis.com";
const MEDIA_PATH_SUFFIX: &str = "/media";
const MEDIA_WIDTH_PARAM: &str = "maxWidthPx";

/// Upper bound accepted by the photo endpoints.
pub const MAX_PHOTO_WIDTH: u32 = 4800;

/// Returns true if `url` points at a place photo endpoint.
#[must_use]
pub fn is_place_photo_url(url: &str) -> bool {
    width_param(url).is_some()
}

/// Rewrites a place photo URL to request at most `width` pixels.
///
/// Any existing width or height bound is replaced; other parameters are kept
/// in order. URLs that are not place photos are returned unchanged.
#[must_use]
pub fn sized_photo_url(url: &str, width: u32) -> String {
    let Some(param) = width_param(url) else {
        return url.to_string();
    };

    let (base_url, existing_params) = match url.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (url, None),
    };

    let width = width.clamp(1, MAX_PHOTO_WIDTH);
    let mut params = vec![format!("{param}={width}")];

    if let Some(existing) = existing_params {
        for pair in existing.split('&').filter(|p| !p.is_empty()) {
            let key = pair.split('=').next().unwrap_or("");
            if !key.eq_ignore_ascii_case(LEGACY_WIDTH_PARAM)
                && !key.eq_ignore_ascii_case("maxheight")
                && key != MEDIA_WIDTH_PARAM
                && key != "maxHeightPx"
            {
                params.push(pair.to_string());
            }
        }
    }

    format!("{}?{}", base_url, params.join("&"))
}

fn width_param(url: &str) -> Option<&'static str> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host == LEGACY_PHOTO_HOST && parsed.path() == LEGACY_PHOTO_PATH {
        Some(LEGACY_WIDTH_PARAM)
    } else if host == MEDIA_HOST && parsed.path().ends_with(MEDIA_PATH_SUFFIX) {
        Some(MEDIA_WIDTH_PARAM)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = "https://maps.googleapis.com/maps/api/place/photo";
    const MEDIA: &str = "https://places.googleapis.com/v1/places/xyz/photos/abc/media";

    #[test]
    fn test_legacy_photo_url_gets_width() {
        let url = format!("{LEGACY}?maxwidth=1600&photo_reference=abc&key=k");
        let sized = sized_photo_url(&url, 96);

        assert_eq!(sized, format!("{LEGACY}?maxwidth=96&photo_reference=abc&key=k"));
    }

    #[test]
    fn test_media_url_gets_width() {
        let url = format!("{MEDIA}?key=k&maxHeightPx=800");
        let sized = sized_photo_url(&url, 270);

        assert!(sized.contains("maxWidthPx=270"));
        assert!(sized.contains("key=k"));
        assert!(!sized.contains("maxHeightPx"));
    }

    #[test]
    fn test_other_urls_unchanged() {
        let url = "https://example.com/photo.jpg?maxwidth=10";
        assert_eq!(sized_photo_url(url, 96), url);
        assert!(!is_place_photo_url(url));
    }

    #[test]
    fn test_width_is_clamped() {
        let url = &format!("{LEGACY}?photo_reference=abc");
        assert!(sized_photo_url(url, 100_000).contains("maxwidth=4800"));
        assert!(sized_photo_url(url, 0).contains("maxwidth=1"));
    }
}
