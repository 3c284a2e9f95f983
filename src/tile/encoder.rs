//! Tile image encoder.
//!
//! Turns rendered RGBA buffers into PNG or JPEG bytes.
//!
//! # Design Decisions
//!
//! - **Deterministic output**: the same pixels always encode to the same
//!   bytes. No timestamps or other time-varying chunks are written, so a
//!   tile's fingerprint determines its bytes.
//!
//! - **PNG keeps alpha**: out-of-extent and nodata pixels stay transparent.
//!
//! - **JPEG drops alpha**: transparent pixels are composited onto black.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

use crate::error::TileError;
use crate::render::{ImageFormat, RgbaImage};

/// Default JPEG quality (1-100).
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

/// Minimum allowed JPEG quality.
pub const MIN_JPEG_QUALITY: u8 = 1;

/// Maximum allowed JPEG quality.
pub const MAX_JPEG_QUALITY: u8 = 100;

// =============================================================================
// Tile Encoder
// =============================================================================

/// Encoder for rendered tiles.
///
/// # Example
///
/// ```
/// use raster_tileserver::render::{ImageFormat, RgbaImage};
/// use raster_tileserver::tile::TileEncoder;
///
/// let encoder = TileEncoder::new(85);
/// let png = encoder.encode(&RgbaImage::transparent(256, 256), ImageFormat::Png).unwrap();
/// assert!(png.starts_with(b"\x89PNG"));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TileEncoder {
    jpeg_quality: u8,
}

impl Default for TileEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl TileEncoder {
    /// Create an encoder; `jpeg_quality` is clamped to 1-100.
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            jpeg_quality: clamp_quality(jpeg_quality),
        }
    }

    pub fn jpeg_quality(&self) -> u8 {
        self.jpeg_quality
    }

    /// Encode a rendered image.
    pub fn encode(&self, image: &RgbaImage, format: ImageFormat) -> Result<Bytes, TileError> {
        self.encode_rgba(&image.data, image.width, image.height, format)
    }

    /// Encode on the blocking thread pool, keeping large images off the
    /// async workers.
    ///
    /// # Errors
    /// As [`TileEncoder::encode`], plus `TileError::Internal` if the
    /// encoding task panics.
    pub async fn encode_blocking(self, image: RgbaImage, format: ImageFormat) -> Result<Bytes, TileError> {
        tokio::task::spawn_blocking(move || self.encode(&image, format))
            .await
            .map_err(|e| TileError::Internal {
                message: format!("encode task failed: {}", e),
            })?
    }

    /// Encode a raw RGBA buffer.
    ///
    /// # Arguments
    ///
    /// * `rgba` - `width * height * 4` bytes, row-major
    /// * `format` - Output format
    ///
    /// # Errors
    ///
    /// Returns `TileError::Encode` if the buffer length does not match the
    /// dimensions or the codec fails.
    pub fn encode_rgba(
        &self,
        rgba: &[u8],
        width: u32,
        height: u32,
        format: ImageFormat,
    ) -> Result<Bytes, TileError> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || rgba.len() != expected {
            return Err(TileError::Encode {
                message: format!(
                    "buffer of {} bytes does not match {}x{} RGBA ({} bytes)",
                    rgba.len(),
                    width,
                    height,
                    expected
                ),
            });
        }

        let mut output = Cursor::new(Vec::new());
        let result = match format {
            ImageFormat::Png => PngEncoder::new_with_quality(
                &mut output,
                CompressionType::Default,
                FilterType::Adaptive,
            )
            .write_image(rgba, width, height, ExtendedColorType::Rgba8),
            ImageFormat::Jpeg => {
                let rgb = composite_on_black(rgba);
                JpegEncoder::new_with_quality(&mut output, self.jpeg_quality).encode(
                    &rgb,
                    width,
                    height,
                    ExtendedColorType::Rgb8,
                )
            }
        };
        result.map_err(|e| TileError::Encode {
            message: e.to_string(),
        })?;

        Ok(Bytes::from(output.into_inner()))
    }
}

/// Premultiply by alpha against a black background.
fn composite_on_black(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        let a = px[3] as u16;
        for &c in &px[..3] {
            rgb.push(((c as u16 * a + 127) / 255) as u8);
        }
    }
    rgb
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Validate JPEG quality parameter.
pub fn is_valid_quality(quality: u8) -> bool {
    (MIN_JPEG_QUALITY..=MAX_JPEG_QUALITY).contains(&quality)
}

/// Clamp JPEG quality to the valid range.
pub fn clamp_quality(quality: u8) -> u8 {
    quality.clamp(MIN_JPEG_QUALITY, MAX_JPEG_QUALITY)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        let mut image = RgbaImage::transparent(width, height);
        for (i, px) in image.data.chunks_exact_mut(4).enumerate() {
            let v = (i % 256) as u8;
            px.copy_from_slice(&[v, 255 - v, v / 2, if i % 3 == 0 { 0 } else { 255 }]);
        }
        image
    }

    #[test]
    fn test_png_round_trip_keeps_alpha() {
        let image = gradient(16, 8);
        let png = TileEncoder::default().encode(&image, ImageFormat::Png).unwrap();
        assert!(png.starts_with(&[0x89, b'P', b'N', b'G']));

        let decoded = image::load_from_memory(&png).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(decoded.into_raw(), image.data);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let image = gradient(64, 64);
        let encoder = TileEncoder::new(90);
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let a = encoder.encode(&image, format).unwrap();
            let b = encoder.encode(&image, format).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_jpeg_composites_transparency_on_black() {
        let image = RgbaImage::transparent(8, 8);
        let jpeg = TileEncoder::default().encode(&image, ImageFormat::Jpeg).unwrap();
        assert_eq!(&jpeg[..3], &[0xFF, 0xD8, 0xFF]);

        let decoded = image::load_from_memory(&jpeg).unwrap().to_rgb8();
        assert!(decoded.pixels().all(|p| p.0.iter().all(|&c| c < 8)));
    }

    #[tokio::test]
    async fn test_blocking_encode_matches_inline() {
        let image = gradient(512, 512);
        let encoder = TileEncoder::default();
        for format in [ImageFormat::Png, ImageFormat::Jpeg] {
            let inline = encoder.encode(&image, format).unwrap();
            let pooled = encoder.encode_blocking(image.clone(), format).await.unwrap();
            assert_eq!(inline, pooled);
        }

        let err = encoder
            .encode_blocking(RgbaImage::transparent(0, 4), ImageFormat::Png)
            .await
            .unwrap_err();
        assert!(matches!(err, TileError::Encode { .. }));
    }

    #[test]
    fn test_buffer_length_mismatch() {
        let err = TileEncoder::default()
            .encode_rgba(&[0; 15], 2, 2, ImageFormat::Png)
            .unwrap_err();
        assert!(matches!(err, TileError::Encode { .. }));
    }

    #[test]
    fn test_quality_clamping() {
        assert_eq!(TileEncoder::new(0).jpeg_quality(), MIN_JPEG_QUALITY);
        assert_eq!(TileEncoder::new(255).jpeg_quality(), MAX_JPEG_QUALITY);
        assert!(is_valid_quality(80));
        assert!(!is_valid_quality(0));
        assert_eq!(clamp_quality(101), 100);
    }

    #[test]
    fn test_lower_quality_is_smaller() {
        let image = gradient(128, 128);
        let low = TileEncoder::new(10).encode(&image, ImageFormat::Jpeg).unwrap();
        let high = TileEncoder::new(95).encode(&image, ImageFormat::Jpeg).unwrap();
        assert!(low.len() < high.len());
    }
}
