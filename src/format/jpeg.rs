//! JPEG-compressed raster blocks.
//!
//! GeoTIFFs written with `COMPRESS=JPEG` usually store each block as an
//! abbreviated JPEG stream: the quantization and Huffman tables live once in
//! the `JPEGTables` tag and every block holds only SOI, frame, scan and EOI.
//!
//! ```text
//!   tables: SOI DQT DHT EOI        block: SOI SOF SOS <scan> EOI
//!                 │                              │
//!                 └──────── SOI DQT DHT SOF SOS <scan> EOI
//! ```
//!
//! After merging, the stream decodes with the `image` crate into 8-bit
//! gray or RGB samples.

use bytes::{Bytes, BytesMut};
use image::ImageFormat;

use crate::error::TiffError;

// =============================================================================
// Markers
// =============================================================================

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];
pub const DHT: [u8; 2] = [0xFF, 0xC4];
pub const DQT: [u8; 2] = [0xFF, 0xDB];
pub const SOS: [u8; 2] = [0xFF, 0xDA];

// =============================================================================
// Stream inspection
// =============================================================================

/// True when the stream reaches its scan before defining any tables.
pub fn is_abbreviated_stream(data: &[u8]) -> bool {
    if data.len() < 4 || data[0..2] != SOI {
        return false;
    }

    let mut pos = 2;
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }

        let marker = [data[pos], data[pos + 1]];
        if marker == DQT || marker == DHT {
            return false;
        }
        if marker == SOS {
            return true;
        }

        // Standalone markers carry no length field
        let standalone = matches!(marker[1], 0x00 | 0x01 | 0xD0..=0xD9 | 0xFF);
        if !standalone && pos + 3 < data.len() {
            let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
            pos += 2 + length;
        } else {
            pos += 2;
        }
    }

    false
}

/// True when a DQT marker appears anywhere after SOI.
pub fn has_quantization_tables(data: &[u8]) -> bool {
    data.len() >= 4 && data[0..2] == SOI && data[2..].windows(2).any(|w| w == DQT)
}

/// Splice `JPEGTables` into an abbreviated block.
///
/// The trailing EOI of the tables and the leading SOI of the block are
/// dropped so the result holds exactly one SOI and one EOI.
pub fn merge_jpeg_tables(tables: &[u8], block: &[u8]) -> Bytes {
    if tables.is_empty() {
        return Bytes::copy_from_slice(block);
    }
    if block.is_empty() {
        return Bytes::new();
    }

    let tables = tables.strip_suffix(&EOI[..]).unwrap_or(tables);
    let block = block.strip_prefix(&SOI[..]).unwrap_or(block);

    let mut merged = BytesMut::with_capacity(tables.len() + block.len());
    merged.extend_from_slice(tables);
    merged.extend_from_slice(block);
    merged.freeze()
}

/// Return a self-contained stream for `block`, merging tables when needed.
pub fn prepare_block_jpeg(tables: Option<&[u8]>, block: &[u8]) -> Bytes {
    match tables {
        Some(tables) if !has_quantization_tables(block) && is_abbreviated_stream(block) => {
            merge_jpeg_tables(tables, block)
        }
        _ => Bytes::copy_from_slice(block),
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode a JPEG block into interleaved 8-bit samples.
///
/// # Arguments
/// * `tables` - Contents of the `JPEGTables` tag, if any
/// * `block` - Compressed block bytes
/// * `samples_per_pixel` - 1 for gray, 3 for RGB/YCbCr
///
/// # Errors
/// Returns `TiffError::Decompress` when the stream is invalid and
/// `TiffError::UnsupportedSampleFormat` for other sample counts.
pub fn decode_jpeg_block(
    tables: Option<&[u8]>,
    block: &[u8],
    samples_per_pixel: usize,
) -> Result<Vec<u8>, TiffError> {
    let stream = prepare_block_jpeg(tables, block);
    let image = image::load_from_memory_with_format(&stream, ImageFormat::Jpeg)
        .map_err(|e| TiffError::Decompress(format!("JPEG: {}", e)))?;

    match samples_per_pixel {
        1 => Ok(image.into_luma8().into_raw()),
        3 => Ok(image.into_rgb8().into_raw()),
        n => Err(TiffError::UnsupportedSampleFormat(format!(
            "JPEG blocks with {} samples per pixel",
            n
        ))),
    }
}
