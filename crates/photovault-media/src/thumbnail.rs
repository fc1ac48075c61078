//! Thumbnail derivation.
//!
//! A thumbnail is a derived artifact: its name is a pure function of the
//! stored asset's filename, so whether it exists can always be answered with
//! a filesystem check and no metadata lookup.

use image::imageops::FilterType;
use image::DynamicImage;

use photovault_shared::constants::{
    THUMBNAIL_EXT, THUMBNAIL_MAX_DIM, THUMBNAIL_PREFIX, THUMBNAIL_QUALITY,
};

use crate::decode::{decode_oriented, encode_jpeg};
use crate::error::MediaError;

/// `1700000000000-1a2b3c4d.png` -> `thumb-1700000000000-1a2b3c4d.jpg`
pub fn thumbnail_name(stored_filename: &str) -> String {
    let stem = match stored_filename.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => stored_filename,
    };
    format!("{THUMBNAIL_PREFIX}{stem}.{THUMBNAIL_EXT}")
}

/// Shrink to fit within `max` x `max`, preserving aspect ratio.  Images that
/// already fit are returned unchanged; nothing is ever upscaled.
pub fn fit_within(img: DynamicImage, max: u32) -> DynamicImage {
    if img.width() <= max && img.height() <= max {
        return img;
    }
    img.resize(max, max, FilterType::Triangle)
}

/// Decode, orient, bound and re-encode an asset as a JPEG thumbnail.
pub fn make_thumbnail(asset_bytes: &[u8]) -> Result<Vec<u8>, MediaError> {
    let img = decode_oriented(asset_bytes)?;
    let thumb = fit_within(img, THUMBNAIL_MAX_DIM);
    encode_jpeg(&thumb, THUMBNAIL_QUALITY)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::png_bytes;

    #[test]
    fn test_thumbnail_name_is_deterministic() {
        assert_eq!(thumbnail_name("1700-abcd.png"), "thumb-1700-abcd.jpg");
        assert_eq!(thumbnail_name("1700-abcd.heic"), "thumb-1700-abcd.jpg");
        assert_eq!(thumbnail_name("noext"), "thumb-noext.jpg");
    }

    #[test]
    fn test_large_image_fits_bounds() {
        let thumb = make_thumbnail(&png_bytes(1200, 600)).unwrap();
        let img = image::load_from_memory(&thumb).unwrap();
        assert_eq!((img.width(), img.height()), (480, 240));
    }

    #[test]
    fn test_portrait_image_fits_bounds() {
        let thumb = make_thumbnail(&png_bytes(500, 1000)).unwrap();
        let img = image::load_from_memory(&thumb).unwrap();
        assert_eq!((img.width(), img.height()), (240, 480));
    }

    #[test]
    fn test_small_image_is_not_upscaled() {
        let thumb = make_thumbnail(&png_bytes(64, 40)).unwrap();
        let img = image::load_from_memory(&thumb).unwrap();
        assert_eq!((img.width(), img.height()), (64, 40));
    }

    #[test]
    fn test_undecodable_asset_fails() {
        assert!(make_thumbnail(b"<svg xmlns='http://www.w3.org/2000/svg'/>").is_err());
    }
}
