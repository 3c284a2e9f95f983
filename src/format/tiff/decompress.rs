//! Block decoding: decompression, predictor reversal and sample conversion.
//!
//! A block is one tile or one strip as stored in the file. Decoding turns
//! its compressed bytes into a row-major `Vec<f64>` of
//! `width * rows * samples` values:
//!
//! ```text
//!  compressed ──▶ decompress ──▶ undo predictor ──▶ samples as f64
//!   (LZW, Deflate,   (raw bytes,     (file byte order   (u8..f64 → f64)
//!    ZSTD, JPEG...)   file order)     preserved)
//! ```
//!
//! Every intermediate stays in the file's byte order so the final
//! conversion has a single place where endianness is applied.

use std::io::Read;

use crate::error::TiffError;
use crate::format::jpeg::decode_jpeg_block;

use super::parser::ByteOrder;
use super::tags::{Compression, Predictor, SampleFormat};

/// Everything needed to decode one block of an image level.
#[derive(Debug, Clone)]
pub struct BlockLayout {
    pub compression: Compression,
    pub predictor: Predictor,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    pub byte_order: ByteOrder,
    /// Block width in pixels (tile width, or image width for strips)
    pub width: usize,
    /// Samples interleaved per pixel within this block (1 for planar data)
    pub samples: usize,
    pub jpeg_tables: Option<Vec<u8>>,
}

impl BlockLayout {
    fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample as usize) / 8
    }

    fn row_bytes(&self) -> usize {
        self.width * self.samples * self.bytes_per_sample()
    }

    /// Decode a block holding `rows` rows.
    ///
    /// # Errors
    /// Returns an error for unsupported compression or sample layouts and
    /// for streams that decompress to fewer bytes than the block needs.
    pub fn decode(&self, data: &[u8], rows: usize) -> Result<Vec<f64>, TiffError> {
        check_sample_layout(self.bits_per_sample, self.sample_format)?;

        if self.compression == Compression::Jpeg {
            let samples = decode_jpeg_block(self.jpeg_tables.as_deref(), data, self.samples)?;
            let expected = self.width * rows * self.samples;
            if samples.len() < expected {
                return Err(TiffError::Decompress(format!(
                    "JPEG block decoded to {} samples, expected {}",
                    samples.len(),
                    expected
                )));
            }
            return Ok(samples[..expected].iter().map(|&v| v as f64).collect());
        }

        let expected = self.row_bytes() * rows;
        let mut raw = decompress(self.compression, data, expected)?;
        if raw.len() < expected {
            return Err(TiffError::Decompress(format!(
                "block decoded to {} bytes, expected {}",
                raw.len(),
                expected
            )));
        }
        raw.truncate(expected);

        match self.predictor {
            Predictor::None => {}
            Predictor::Horizontal => undo_horizontal_predictor(
                &mut raw,
                self.row_bytes(),
                self.samples,
                self.bytes_per_sample(),
                self.byte_order,
            ),
            Predictor::FloatingPoint => undo_floating_point_predictor(
                &mut raw,
                self.row_bytes(),
                self.samples,
                self.bytes_per_sample(),
                self.byte_order,
            ),
        }

        Ok(samples_to_f64(
            &raw,
            self.bits_per_sample,
            self.sample_format,
            self.byte_order,
        ))
    }
}

/// Reject bit depths and formats that cannot be read as numeric samples.
pub fn check_sample_layout(bits: u16, format: SampleFormat) -> Result<(), TiffError> {
    let ok = match format {
        SampleFormat::Unsigned | SampleFormat::Signed => matches!(bits, 8 | 16 | 32),
        SampleFormat::Float => matches!(bits, 32 | 64),
    };
    if ok {
        Ok(())
    } else {
        Err(TiffError::UnsupportedSampleFormat(format!(
            "{}-bit {:?}",
            bits, format
        )))
    }
}

// =============================================================================
// Decompression
// =============================================================================

/// Decompress a block into raw sample bytes.
///
/// `expected` sizes the output buffer; the result may be longer or shorter.
pub fn decompress(
    compression: Compression,
    data: &[u8],
    expected: usize,
) -> Result<Vec<u8>, TiffError> {
    match compression {
        Compression::None => Ok(data.to_vec()),
        Compression::Lzw => {
            let mut decoder =
                weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
            decoder
                .decode(data)
                .map_err(|e| TiffError::Decompress(format!("LZW: {}", e)))
        }
        Compression::Deflate | Compression::PkzipDeflate => {
            let mut out = Vec::with_capacity(expected);
            if flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .is_ok()
            {
                return Ok(out);
            }
            // Some writers omit the zlib header
            out.clear();
            flate2::read::DeflateDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| TiffError::Decompress(format!("Deflate: {}", e)))?;
            Ok(out)
        }
        Compression::Zstd => zstd::stream::decode_all(data)
            .map_err(|e| TiffError::Decompress(format!("ZSTD: {}", e))),
        Compression::PackBits => unpack_bits(data, expected),
        other => Err(TiffError::UnsupportedCompression(other.name().to_string())),
    }
}

/// Decode a PackBits run-length stream.
fn unpack_bits(data: &[u8], expected: usize) -> Result<Vec<u8>, TiffError> {
    let mut out = Vec::with_capacity(expected);
    let mut pos = 0;

    while pos < data.len() && out.len() < expected {
        let header = data[pos] as i8;
        pos += 1;
        match header {
            0..=127 => {
                let len = header as usize + 1;
                let literal = data.get(pos..pos + len).ok_or_else(|| {
                    TiffError::Decompress("PackBits literal runs past end of block".into())
                })?;
                out.extend_from_slice(literal);
                pos += len;
            }
            -127..=-1 => {
                let value = *data.get(pos).ok_or_else(|| {
                    TiffError::Decompress("PackBits repeat runs past end of block".into())
                })?;
                let len = (1 - header as isize) as usize;
                out.resize(out.len() + len, value);
                pos += 1;
            }
            // -128 is a no-op
            _ => {}
        }
    }

    Ok(out)
}

// =============================================================================
// Predictors
// =============================================================================

/// Reverse horizontal differencing (predictor 2) in place.
///
/// Each sample is the wrapping sum of itself and the sample `stride`
/// positions to its left on the same row.
pub fn undo_horizontal_predictor(
    raw: &mut [u8],
    row_bytes: usize,
    stride: usize,
    bytes_per_sample: usize,
    byte_order: ByteOrder,
) {
    if row_bytes == 0 {
        return;
    }
    for row in raw.chunks_exact_mut(row_bytes) {
        match bytes_per_sample {
            1 => {
                for i in stride..row.len() {
                    row[i] = row[i].wrapping_add(row[i - stride]);
                }
            }
            2 => accumulate(row, stride, 2, |b| byte_order.read_u16(b) as u64, |v, b| {
                write_uint(b, v as u16 as u64, 2, byte_order)
            }),
            4 => accumulate(row, stride, 4, |b| byte_order.read_u32(b) as u64, |v, b| {
                write_uint(b, v as u32 as u64, 4, byte_order)
            }),
            8 => accumulate(row, stride, 8, |b| byte_order.read_u64(b), |v, b| {
                write_uint(b, v, 8, byte_order)
            }),
            _ => {}
        }
    }
}

fn accumulate(
    row: &mut [u8],
    stride: usize,
    size: usize,
    read: impl Fn(&[u8]) -> u64,
    write: impl Fn(u64, &mut [u8]),
) {
    let count = row.len() / size;
    for i in stride..count {
        let prev = read(&row[(i - stride) * size..]);
        let cur = read(&row[i * size..]);
        write(cur.wrapping_add(prev), &mut row[i * size..(i + 1) * size]);
    }
}

fn write_uint(out: &mut [u8], value: u64, size: usize, byte_order: ByteOrder) {
    let be = value.to_be_bytes();
    let be = &be[8 - size..];
    match byte_order {
        ByteOrder::BigEndian => out[..size].copy_from_slice(be),
        ByteOrder::LittleEndian => {
            for (dst, src) in out[..size].iter_mut().zip(be.iter().rev()) {
                *dst = *src;
            }
        }
    }
}

/// Reverse floating point differencing (predictor 3) in place.
///
/// Rows are stored as byte planes, most significant byte plane first, each
/// plane byte-differenced with stride `samples`. After accumulation the
/// planes are re-interleaved into samples in the file's byte order.
pub fn undo_floating_point_predictor(
    raw: &mut [u8],
    row_bytes: usize,
    samples: usize,
    bytes_per_sample: usize,
    byte_order: ByteOrder,
) {
    if row_bytes == 0 || bytes_per_sample == 0 {
        return;
    }
    let values = row_bytes / bytes_per_sample;
    let mut planes = vec![0u8; row_bytes];

    for row in raw.chunks_exact_mut(row_bytes) {
        for i in samples..row.len() {
            row[i] = row[i].wrapping_add(row[i - samples]);
        }

        planes.copy_from_slice(row);
        for value in 0..values {
            for byte in 0..bytes_per_sample {
                // byte 0 is the most significant
                let src = planes[byte * values + value];
                let dst = match byte_order {
                    ByteOrder::BigEndian => byte,
                    ByteOrder::LittleEndian => bytes_per_sample - 1 - byte,
                };
                row[value * bytes_per_sample + dst] = src;
            }
        }
    }
}

// =============================================================================
// Sample conversion
// =============================================================================

/// Convert raw sample bytes into `f64` values.
///
/// The layout must already have passed [`check_sample_layout`]; trailing
/// bytes that do not form a whole sample are ignored.
pub fn samples_to_f64(
    raw: &[u8],
    bits: u16,
    format: SampleFormat,
    byte_order: ByteOrder,
) -> Vec<f64> {
    let bo = byte_order;
    match (bits, format) {
        (8, SampleFormat::Signed) => raw.iter().map(|&b| b as i8 as f64).collect(),
        (8, _) => raw.iter().map(|&b| b as f64).collect(),
        (16, SampleFormat::Signed) => raw.chunks_exact(2).map(|c| bo.read_i16(c) as f64).collect(),
        (16, _) => raw.chunks_exact(2).map(|c| bo.read_u16(c) as f64).collect(),
        (32, SampleFormat::Float) => raw.chunks_exact(4).map(|c| bo.read_f32(c) as f64).collect(),
        (32, SampleFormat::Signed) => raw.chunks_exact(4).map(|c| bo.read_i32(c) as f64).collect(),
        (32, _) => raw.chunks_exact(4).map(|c| bo.read_u32(c) as f64).collect(),
        (64, SampleFormat::Float) => raw.chunks_exact(8).map(|c| bo.read_f64(c)).collect(),
        _ => Vec::new(),
    }
}
