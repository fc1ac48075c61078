use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};

use crate::error::MediaError;

/// Decode an image from memory, sniffing the format from its content, and
/// rotate/flip it upright according to the embedded orientation tag.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()?;
    // A broken EXIF block should not make the pixels undecodable.
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);

    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);
    Ok(img)
}

/// Encode as baseline JPEG.  Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, MediaError> {
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
    Ok(buf)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Rgb, Rgba};

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img: ImageBuffer<Rgb<u8>, Vec<u8>> =
            ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn test_decode_png() {
        let img = decode_oriented(&png_bytes(12, 7)).unwrap();
        assert_eq!((img.width(), img.height()), (12, 7));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_oriented(b"definitely not an image").is_err());
        assert!(matches!(decode_oriented(&[]), Err(MediaError::Empty)));
    }

    #[test]
    fn test_encode_jpeg_drops_alpha() {
        let rgba: ImageBuffer<Rgba<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(4, 4, Rgba([10, 20, 30, 128]));
        let jpeg = encode_jpeg(&DynamicImage::ImageRgba8(rgba), 80).unwrap();
        assert_eq!(image::guess_format(&jpeg).unwrap(), ImageFormat::Jpeg);
    }
}
