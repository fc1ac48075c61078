//! HEIC/HEIF to JPEG transcoding.
//!
//! Payloads are first sniffed by content: phones and export tools regularly
//! label plain JPEGs as `.heic`, and those decode through `image` directly.
//! Genuine HEVC-coded payloads need the `libheif` feature.

use image::DynamicImage;

use crate::decode::{decode_oriented, encode_jpeg};
use crate::error::MediaError;

/// Transcode a HEIC/HEIF payload to an upright JPEG.
pub fn transcode_heif_to_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, MediaError> {
    let img = decode_heif(bytes)?;
    encode_jpeg(&img, quality)
}

fn decode_heif(bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }

    if let Ok(format) = image::guess_format(bytes) {
        if format.reading_enabled() {
            match decode_oriented(bytes) {
                Ok(img) => return Ok(img),
                Err(e) => tracing::debug!(?format, error = %e, "sniffed decode failed"),
            }
        }
    }

    decode_native(bytes)
}

#[cfg(feature = "libheif")]
fn decode_native(bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

    let lib = LibHeif::new();
    let ctx = HeifContext::read_from_bytes(bytes).map_err(|e| MediaError::Heif(e.to_string()))?;
    let handle = ctx
        .primary_image_handle()
        .map_err(|e| MediaError::Heif(e.to_string()))?;
    // libheif applies the container's rotation/mirror transforms while decoding.
    let decoded = lib
        .decode(&handle, ColorSpace::Rgb(RgbChroma::Rgb), None)
        .map_err(|e| MediaError::Heif(e.to_string()))?;

    let planes = decoded.planes();
    let plane = planes
        .interleaved
        .ok_or_else(|| MediaError::Heif("missing interleaved RGB plane".to_string()))?;

    let width = plane.width;
    let height = plane.height;
    let row_len = width as usize * 3;
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let start = row * plane.stride;
        pixels.extend_from_slice(&plane.data[start..start + row_len]);
    }

    image::RgbImage::from_raw(width, height, pixels)
        .map(DynamicImage::ImageRgb8)
        .ok_or_else(|| MediaError::Heif("pixel buffer size mismatch".to_string()))
}

#[cfg(not(feature = "libheif"))]
fn decode_native(_bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    Err(MediaError::Heif(
        "HEVC-coded HEIF requires the `libheif` feature".to_string(),
    ))
}
