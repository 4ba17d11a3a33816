//! Decode compressed image bytes straight to a thumbnail.
//!
//! JPEG sources are decoded with DCT scaling, so the decoder itself produces
//! a buffer at 1/2, 1/4 or 1/8 of the source resolution and a full-size bitmap
//! never exists. Non-interlaced PNG is decoded one scanline at a time into a
//! box filter sized to the target. Anything else is decoded whole only if the
//! frame fits under `MAX_DECODE_ALLOC`, and is rejected otherwise.
//!
//! Everything here is CPU-bound and free of shared state; callers run it on a
//! blocking worker.

use std::io::Cursor;

use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageBuffer, ImageDecoder, ImageFormat, Luma,
    RgbImage, RgbaImage,
};
use jpeg_decoder::PixelFormat;
use tracing::trace;

use crate::domain::errors::DecodeError;

/// Payloads shorter than this cannot be a real image.
pub const MIN_PAYLOAD_BYTES: usize = 100;

/// Largest full frame decoded for formats that cannot be decoded scaled.
pub const MAX_DECODE_ALLOC: u64 = 64 * 1024 * 1024;

/// Decodes `bytes` into a bitmap whose larger side is at most `max_pixel`.
///
/// # Errors
/// Returns a `DecodeError` for payloads that are too small, look like text,
/// carry no complete frame, would need a full frame over `MAX_DECODE_ALLOC`,
/// or fail to decode.
pub fn downsample(bytes: &[u8], max_pixel: u32) -> Result<DynamicImage, DecodeError> {
    downsample_within(bytes, max_pixel, MAX_DECODE_ALLOC)
}

fn downsample_within(
    bytes: &[u8],
    max_pixel: u32,
    max_alloc: u64,
) -> Result<DynamicImage, DecodeError> {
    sniff(bytes)?;

    let target = max_pixel.max(1);
    let format = image::guess_format(bytes)
        .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

    let scaled = match format {
        ImageFormat::Jpeg => decode_scaled_jpeg(bytes, target),
        ImageFormat::Png => decode_streamed_png(bytes, target),
        _ => Err(DecodeError::Unsupported(format!("{format:?}"))),
    };
    let decoded = match scaled {
        Err(DecodeError::Unsupported(reason)) => {
            trace!(reason = %reason, "Scaled decode unavailable, decoding whole frame");
            decode_bounded(bytes, format, max_alloc)?
        }
        other => other?,
    };

    Ok(fit(decoded, target))
}

/// Cheap checks that run before any decoder is constructed.
///
/// # Errors
/// Returns `TooSmall` or `TextPayload`.
pub fn sniff(bytes: &[u8]) -> Result<(), DecodeError> {
    if bytes.len() < MIN_PAYLOAD_BYTES {
        return Err(DecodeError::TooSmall { len: bytes.len() });
    }
    // Error pages, JSON bodies and XML documents start with one of these.
    if matches!(bytes.first(), Some(b'<' | b'{' | b'[')) {
        return Err(DecodeError::TextPayload);
    }
    Ok(())
}

fn decode_scaled_jpeg(bytes: &[u8], target: u32) -> Result<DynamicImage, DecodeError> {
    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
    decoder
        .read_info()
        .map_err(|e| DecodeError::Decode(e.to_string()))?;

    let info = decoder.info().ok_or(DecodeError::NoFrame)?;
    if info.width == 0 || info.height == 0 {
        return Err(DecodeError::NoFrame);
    }
    if matches!(info.pixel_format, PixelFormat::CMYK32) {
        return Err(DecodeError::Unsupported("CMYK JPEG".to_string()));
    }

    let (request_w, request_h) =
        scaled_request(u32::from(info.width), u32::from(info.height), target);
    let (out_w, out_h) = decoder
        .scale(request_w, request_h)
        .map_err(|e| DecodeError::Decode(e.to_string()))?;
    let pixels = decoder
        .decode()
        .map_err(|e| DecodeError::Decode(e.to_string()))?;

    trace!(
        source_width = info.width,
        source_height = info.height,
        width = out_w,
        height = out_h,
        "Decoded scaled JPEG"
    );

    let (width, height) = (u32::from(out_w), u32::from(out_h));
    let image = match info.pixel_format {
        PixelFormat::RGB24 => {
            RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8)
        }
        PixelFormat::L8 => {
            GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8)
        }
        PixelFormat::L16 => {
            ImageBuffer::<Luma<u16>, _>::from_raw(width, height, l16_samples(&pixels))
                .map(DynamicImage::ImageLuma16)
        }
        PixelFormat::CMYK32 => None,
    };

    image.ok_or_else(|| DecodeError::Decode("pixel buffer does not match frame size".to_string()))
}

/// jpeg-decoder emits 16-bit samples in native byte order.
fn l16_samples(pixels: &[u8]) -> Vec<u16> {
    pixels
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect()
}

fn decode_streamed_png(bytes: &[u8], target: u32) -> Result<DynamicImage, DecodeError> {
    let mut decoder = png::Decoder::new(Cursor::new(bytes));
    decoder.set_transformations(png::Transformations::normalize_to_color8());
    let mut reader = decoder
        .read_info()
        .map_err(|e| DecodeError::Decode(e.to_string()))?;

    let info = reader.info();
    let (width, height) = (info.width, info.height);
    if width == 0 || height == 0 {
        return Err(DecodeError::NoFrame);
    }
    if info.interlaced {
        return Err(DecodeError::Unsupported("interlaced PNG".to_string()));
    }
    let (color, depth) = reader.output_color_type();
    if depth != png::BitDepth::Eight || color == png::ColorType::Indexed {
        return Err(DecodeError::Unsupported(format!("PNG output {color:?}/{depth:?}")));
    }

    let (out_w, out_h) = fitted_size(width, height, target);
    let mut shrinker = BoxShrinker::new((width, height), (out_w, out_h), color.samples());
    while let Some(row) = reader
        .next_row()
        .map_err(|e| DecodeError::Decode(e.to_string()))?
    {
        shrinker.push_row(row.data());
    }
    let pixels = shrinker.finish().ok_or(DecodeError::NoFrame)?;

    trace!(
        source_width = width,
        source_height = height,
        width = out_w,
        height = out_h,
        "Decoded PNG by scanline"
    );

    let image = match color {
        png::ColorType::Grayscale => {
            GrayImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageLuma8)
        }
        png::ColorType::GrayscaleAlpha => {
            GrayAlphaImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageLumaA8)
        }
        png::ColorType::Rgb => {
            RgbImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageRgb8)
        }
        png::ColorType::Rgba => {
            RgbaImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageRgba8)
        }
        png::ColorType::Indexed => None,
    };
    image.ok_or_else(|| DecodeError::Decode("pixel buffer does not match frame size".to_string()))
}

/// Area-averages 8-bit scanlines into a smaller frame while they stream in.
///
/// Holds one output row of running sums, never a source frame.
struct BoxShrinker {
    source: (u32, u32),
    output: (u32, u32),
    channels: usize,
    sums: Vec<u64>,
    counts: Vec<u64>,
    row: u32,
    rows_seen: u32,
    pixels: Vec<u8>,
}

impl BoxShrinker {
    fn new(source: (u32, u32), output: (u32, u32), channels: usize) -> Self {
        let out_w = output.0 as usize;
        Self {
            source,
            output,
            channels,
            sums: vec![0; out_w * channels],
            counts: vec![0; out_w],
            row: 0,
            rows_seen: 0,
            pixels: Vec::with_capacity(out_w * output.1 as usize * channels),
        }
    }

    fn push_row(&mut self, data: &[u8]) {
        let (src_w, src_h) = self.source;
        let (out_w, out_h) = self.output;
        let row = scale_index(self.rows_seen, src_h, out_h);
        if row != self.row {
            self.flush();
            self.row = row;
        }
        self.rows_seen += 1;

        for (x, pixel) in (0..src_w).zip(data.chunks_exact(self.channels)) {
            let column = scale_index(x, src_w, out_w) as usize;
            self.counts[column] += 1;
            let sums = &mut self.sums[column * self.channels..(column + 1) * self.channels];
            for (sum, &sample) in sums.iter_mut().zip(pixel) {
                *sum += u64::from(sample);
            }
        }
    }

    fn flush(&mut self) {
        for (column, &count) in self.counts.iter().enumerate() {
            let count = count.max(1);
            let sums = &self.sums[column * self.channels..(column + 1) * self.channels];
            self.pixels.extend(
                sums.iter()
                    .map(|&sum| u8::try_from((sum + count / 2) / count).unwrap_or(u8::MAX)),
            );
        }
        self.sums.fill(0);
        self.counts.fill(0);
    }

    /// Returns the output pixels, or `None` if the frame ended early.
    fn finish(mut self) -> Option<Vec<u8>> {
        if self.rows_seen != self.source.1 {
            return None;
        }
        self.flush();
        Some(self.pixels)
    }
}

/// Maps `index` in `0..from` onto `0..to`, with `to <= from`.
fn scale_index(index: u32, from: u32, to: u32) -> u32 {
    u32::try_from(u64::from(index) * u64::from(to) / u64::from(from.max(1))).unwrap_or(to - 1)
}

fn decode_bounded(
    bytes: &[u8],
    format: ImageFormat,
    max_alloc: u64,
) -> Result<DynamicImage, DecodeError> {
    let mut reader = image::ImageReader::with_format(Cursor::new(bytes), format);
    let mut limits = image::Limits::default();
    limits.max_alloc = Some(max_alloc);
    reader.limits(limits);

    let decoder = reader
        .into_decoder()
        .map_err(|e| DecodeError::Decode(e.to_string()))?;
    let (width, height) = decoder.dimensions();
    if width == 0 || height == 0 {
        return Err(DecodeError::NoFrame);
    }
    let frame_bytes = decoder.total_bytes();
    if frame_bytes > max_alloc {
        return Err(DecodeError::TooLarge {
            width,
            height,
            bytes: frame_bytes,
        });
    }

    DynamicImage::from_decoder(decoder).map_err(|e| DecodeError::Decode(e.to_string()))
}

/// Fits `width` x `height` into a `target` square keeping the aspect ratio.
/// Never upscales and never returns a zero side.
fn fitted_size(width: u32, height: u32, target: u32) -> (u32, u32) {
    let (long, short) = if width >= height {
        (width, height)
    } else {
        (height, width)
    };
    let long_target = target.min(long);
    let short_target = (u64::from(short) * u64::from(long_target))
        .div_ceil(u64::from(long.max(1)))
        .max(1);
    let short_target = u32::try_from(short_target).unwrap_or(short).min(short);
    if width >= height {
        (long_target, short_target)
    } else {
        (short_target, long_target)
    }
}

/// Picks the size to ask the JPEG decoder for, clamped to its `u16` range.
fn scaled_request(width: u32, height: u32, target: u32) -> (u16, u16) {
    let (w, h) = fitted_size(width, height, target);
    let clamp = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
    (clamp(w), clamp(h))
}

fn fit(image: DynamicImage, target: u32) -> DynamicImage {
    if image.width() > target || image.height() > target {
        image.thumbnail(target, target)
    } else {
        image
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    fn pattern(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 251) as u8, (y % 241) as u8, ((x ^ y) % 256) as u8])
        }))
    }

    #[test]
    fn test_rejects_html_error_page() {
        let result = downsample(b"<html>error</html>", 48);
        assert!(matches!(result, Err(DecodeError::TooSmall { len: 18 })));
    }

    #[test]
    fn test_rejects_large_html_payload() {
        let mut body = b"<!DOCTYPE html><html><body>".to_vec();
        body.extend(std::iter::repeat_n(b'x', 500));
        assert_eq!(downsample(&body, 48).unwrap_err(), DecodeError::TextPayload);
    }

    #[test_case(b"" ; "empty")]
    #[test_case(&[0xFF, 0xD8, 0xFF] ; "truncated_jpeg_marker")]
    fn test_rejects_tiny_payloads(bytes: &[u8]) {
        assert!(matches!(
            downsample(bytes, 48),
            Err(DecodeError::TooSmall { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_binary() {
        let bytes = vec![0x42; 512];
        assert!(matches!(
            downsample(&bytes, 48),
            Err(DecodeError::Unsupported(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_jpeg() {
        let full = encode(&pattern(400, 300), ImageFormat::Jpeg);
        let truncated = &full[..MIN_PAYLOAD_BYTES * 2];
        assert!(downsample(truncated, 48).is_err());
    }

    #[test]
    fn test_jpeg_is_fitted_to_target() {
        let bytes = encode(&pattern(1000, 800), ImageFormat::Jpeg);
        let thumb = downsample(&bytes, 48).unwrap();

        assert_eq!(thumb.width(), 48);
        assert!(thumb.height() <= 48);
        assert!(thumb.height() >= 37);
    }

    #[test]
    fn test_portrait_png_is_fitted_to_target() {
        let bytes = encode(&pattern(300, 600), ImageFormat::Png);
        let thumb = downsample(&bytes, 100).unwrap();

        assert_eq!(thumb.height(), 100);
        assert_eq!(thumb.width(), 50);
    }

    #[test]
    fn test_small_source_is_not_upscaled() {
        let bytes = encode(&pattern(40, 30), ImageFormat::Jpeg);
        let thumb = downsample(&bytes, 180).unwrap();

        assert_eq!((thumb.width(), thumb.height()), (40, 30));
    }

    #[test]
    fn test_png_over_frame_cap_is_decoded_by_scanline() {
        let bytes = encode(&pattern(600, 400), ImageFormat::Png);
        let thumb = downsample_within(&bytes, 48, 64 * 1024).unwrap();

        assert_eq!((thumb.width(), thumb.height()), (48, 32));
    }

    #[test]
    fn test_whole_frame_over_cap_is_rejected() {
        let bytes = encode(&pattern(300, 300), ImageFormat::WebP);
        let result = downsample_within(&bytes, 48, 64 * 1024);

        assert!(matches!(
            result,
            Err(DecodeError::TooLarge {
                width: 300,
                height: 300,
                ..
            })
        ));
    }

    #[test]
    fn test_webp_under_cap_is_fitted() {
        let bytes = encode(&pattern(300, 150), ImageFormat::WebP);
        let thumb = downsample(&bytes, 60).unwrap();

        assert_eq!((thumb.width(), thumb.height()), (60, 30));
    }

    #[test]
    fn test_scanline_shrink_averages_each_box() {
        // Dark left half, bright right half, with a little texture.
        let split = GrayImage::from_fn(200, 100, |x, y| {
            let grain = ((x * 31 + y * 17) % 5) as u8;
            Luma([if x < 100 { grain } else { 250 + grain }])
        });
        let bytes = encode(&DynamicImage::ImageLuma8(split), ImageFormat::Png);
        let thumb = downsample(&bytes, 2).unwrap().into_luma8();

        assert_eq!(thumb.dimensions(), (2, 1));
        assert!(thumb.get_pixel(0, 0).0[0] <= 4);
        assert!(thumb.get_pixel(1, 0).0[0] >= 250);
    }

    #[test_case(DynamicImage::ImageLuma8(pattern(120, 80).into_luma8()) ; "gray")]
    #[test_case(DynamicImage::ImageLumaA8(pattern(120, 80).into_luma_alpha8()) ; "gray_alpha")]
    #[test_case(DynamicImage::ImageRgba8(pattern(120, 80).into_rgba8()) ; "rgba")]
    fn test_png_keeps_color_layout(source: DynamicImage) {
        let bytes = encode(&source, ImageFormat::Png);
        let thumb = downsample(&bytes, 30).unwrap();

        assert_eq!((thumb.width(), thumb.height()), (30, 20));
        assert_eq!(thumb.color(), source.color());
    }

    #[test]
    fn test_l16_samples_keep_native_order() {
        let samples = [0x1234u16, 0xFF00, 0x0001];
        let bytes: Vec<u8> = samples.iter().flat_map(|v| v.to_ne_bytes()).collect();

        assert_eq!(l16_samples(&bytes), samples);
    }

    #[test_case(1000, 800, 48, (48, 39) ; "landscape")]
    #[test_case(800, 1000, 48, (39, 48) ; "portrait")]
    #[test_case(30, 20, 48, (30, 20) ; "smaller_than_target")]
    #[test_case(100_000, 10, 48, (48, 1) ; "extreme_aspect")]
    fn test_scaled_request(width: u32, height: u32, target: u32, expected: (u16, u16)) {
        assert_eq!(scaled_request(width, height, target), expected);
    }
}
