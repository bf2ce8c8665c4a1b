use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::engine::BgrImage;

/// JPEG quality used for every published frame.
pub const JPEG_QUALITY: u8 = 90;

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("image has zero width or height")]
    EmptyImage,
    #[error("pixel buffer has {got} bytes, expected {expected}")]
    BufferSize { expected: usize, got: usize },
    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Encode a BGR pixel buffer to JPEG at the given quality (1-100).
pub fn encode_jpeg(image: &BgrImage, quality: u8) -> Result<Vec<u8>, EncodeError> {
    if image.width == 0 || image.height == 0 {
        return Err(EncodeError::EmptyImage);
    }
    let expected = image.expected_len();
    if image.data.len() != expected {
        return Err(EncodeError::BufferSize {
            expected,
            got: image.data.len(),
        });
    }

    // The encoder only understands RGB; swap blue and red.
    let mut rgb = Vec::with_capacity(expected);
    for px in image.data.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode(&rgb, image.width, image.height, ExtendedColorType::Rgb8)?;
    Ok(buf)
}
