//! TIFF tag value reading.
//!
//! Values are stored either inline in the IFD entry (small values) or at an
//! offset in the file (arrays, strings, GeoTIFF doubles). Offset values are
//! fetched with a single range request per tag, which matters for
//! TileOffsets/TileByteCounts arrays on remote storage.

use bytes::Bytes;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{ByteOrder, IfdEntry, TiffHeader};
use super::tags::FieldType;

/// Upper bound on a single tag value; anything larger is treated as corrupt.
const MAX_VALUE_BYTES: u64 = 256 * 1024 * 1024;

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values from a TIFF file, respecting its byte order and layout.
pub struct ValueReader<'a, R: RangeReader + ?Sized> {
    reader: &'a R,
    header: &'a TiffHeader,
}

impl<'a, R: RangeReader + ?Sized> ValueReader<'a, R> {
    pub fn new(reader: &'a R, header: &'a TiffHeader) -> Self {
        Self { reader, header }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Read raw bytes for an IFD entry's value.
    ///
    /// Inline values come from the entry itself, offset values from the file.
    pub async fn read_bytes(&self, entry: &IfdEntry) -> Result<Bytes, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if size > MAX_VALUE_BYTES {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("value of {} bytes exceeds limit", size),
            });
        }

        if entry.is_inline {
            Ok(Bytes::copy_from_slice(
                &entry.value_offset_bytes[..size as usize],
            ))
        } else {
            let offset = entry.value_offset(self.header.byte_order);
            Ok(self.reader.read_exact_at(offset, size as usize).await?)
        }
    }

    /// Read a single unsigned value, widened to u64.
    pub async fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        if let Some(value) = entry.inline_u64(self.header.byte_order) {
            return Ok(value);
        }
        self.read_u64_array(entry)
            .await?
            .first()
            .copied()
            .ok_or(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "empty value".to_string(),
            })
    }

    /// Read an array of unsigned integers, widened to u64.
    ///
    /// This is the primary method for TileOffsets, TileByteCounts and their
    /// strip equivalents.
    pub async fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if !field_type.is_unsigned_integer() {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected an unsigned integer type, got {:?}", field_type),
            });
        }
        if entry.count == 0 {
            return Ok(Vec::new());
        }

        let bytes = self.read_bytes(entry).await?;
        Ok(parse_u64_array(
            &bytes,
            entry.count as usize,
            field_type,
            self.header.byte_order,
        ))
    }

    /// Read an array of u16 values (BitsPerSample, SampleFormat, ColorMap, GeoKeys).
    pub async fn read_u16_array(&self, entry: &IfdEntry) -> Result<Vec<u16>, TiffError> {
        let values = self.read_u64_array(entry).await?;
        values
            .into_iter()
            .map(|v| {
                u16::try_from(v).map_err(|_| TiffError::InvalidTagValue {
                    tag: tag_name(entry),
                    message: format!("value {} does not fit in 16 bits", v),
                })
            })
            .collect()
    }

    /// Read an array of floating point values.
    ///
    /// Accepts DOUBLE, FLOAT and RATIONAL encodings as found in GeoTIFF writers.
    pub async fn read_f64_array(&self, entry: &IfdEntry) -> Result<Vec<f64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let bytes = self.read_bytes(entry).await?;
        parse_f64_array(&bytes, entry.count as usize, field_type, self.header.byte_order)
            .ok_or(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected a numeric type, got {:?}", field_type),
            })
    }

    /// Read a string value from an ASCII entry, stopping at the first NUL.
    pub async fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;

        if !matches!(
            field_type,
            FieldType::Ascii | FieldType::Byte | FieldType::Undefined
        ) {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected Ascii type for string, got {:?}", field_type),
            });
        }

        let bytes = self.read_bytes(entry).await?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

pub(crate) fn tag_name(entry: &IfdEntry) -> &'static str {
    match entry.tag() {
        Some(super::TiffTag::TileOffsets) => "TileOffsets",
        Some(super::TiffTag::TileByteCounts) => "TileByteCounts",
        Some(super::TiffTag::StripOffsets) => "StripOffsets",
        Some(super::TiffTag::StripByteCounts) => "StripByteCounts",
        Some(super::TiffTag::ModelPixelScale) => "ModelPixelScale",
        Some(super::TiffTag::ModelTiepoint) => "ModelTiepoint",
        Some(super::TiffTag::ModelTransformation) => "ModelTransformation",
        Some(super::TiffTag::GeoKeyDirectory) => "GeoKeyDirectory",
        Some(super::TiffTag::ColorMap) => "ColorMap",
        Some(_) | None => "unknown",
    }
}

// =============================================================================
// Parsing from bytes
// =============================================================================

/// Parse an array of unsigned integers from raw bytes.
///
/// Elements that would run past the end of `bytes` are dropped.
pub fn parse_u64_array(
    bytes: &[u8],
    count: usize,
    field_type: FieldType,
    byte_order: ByteOrder,
) -> Vec<u64> {
    let width = field_type.size_in_bytes();
    let count = count.min(bytes.len() / width.max(1));
    let mut values = Vec::with_capacity(count);

    for chunk in bytes.chunks_exact(width).take(count) {
        let value = match field_type {
            FieldType::Byte => chunk[0] as u64,
            FieldType::Short => byte_order.read_u16(chunk) as u64,
            FieldType::Long | FieldType::Ifd => byte_order.read_u32(chunk) as u64,
            FieldType::Long8 | FieldType::Ifd8 => byte_order.read_u64(chunk),
            _ => return Vec::new(),
        };
        values.push(value);
    }

    values
}

/// Parse an array of numeric values as f64.
///
/// Returns `None` for non-numeric field types.
pub fn parse_f64_array(
    bytes: &[u8],
    count: usize,
    field_type: FieldType,
    byte_order: ByteOrder,
) -> Option<Vec<f64>> {
    let width = field_type.size_in_bytes();
    let count = count.min(bytes.len() / width.max(1));
    let mut values = Vec::with_capacity(count);

    for chunk in bytes.chunks_exact(width).take(count) {
        let value = match field_type {
            FieldType::Double => byte_order.read_f64(chunk),
            FieldType::Float => byte_order.read_f32(chunk) as f64,
            FieldType::Rational => {
                let num = byte_order.read_u32(chunk) as f64;
                let den = byte_order.read_u32(&chunk[4..]) as f64;
                if den == 0.0 {
                    0.0
                } else {
                    num / den
                }
            }
            FieldType::SRational => {
                let num = byte_order.read_i32(chunk) as f64;
                let den = byte_order.read_i32(&chunk[4..]) as f64;
                if den == 0.0 {
                    0.0
                } else {
                    num / den
                }
            }
            FieldType::Byte => chunk[0] as f64,
            FieldType::SByte => chunk[0] as i8 as f64,
            FieldType::Short => byte_order.read_u16(chunk) as f64,
            FieldType::SShort => byte_order.read_i16(chunk) as f64,
            FieldType::Long => byte_order.read_u32(chunk) as f64,
            FieldType::SLong => byte_order.read_i32(chunk) as f64,
            FieldType::Long8 => byte_order.read_u64(chunk) as f64,
            FieldType::SLong8 => byte_order.read_i64(chunk) as f64,
            FieldType::Ascii | FieldType::Undefined | FieldType::Ifd | FieldType::Ifd8 => {
                return None
            }
        };
        values.push(value);
    }

    Some(values)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;

    fn le_header() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset: 8,
        }
    }

    fn entry(tag_id: u16, field_type: FieldType, count: u64, value: [u8; 4], inline: bool) -> IfdEntry {
        IfdEntry {
            tag_id,
            field_type: Some(field_type),
            field_type_raw: field_type as u16,
            count,
            value_offset_bytes: value.to_vec(),
            is_inline: inline,
        }
    }

    #[test]
    fn test_parse_u64_array_widths() {
        let shorts = [0x64, 0x00, 0xC8, 0x00];
        assert_eq!(
            parse_u64_array(&shorts, 2, FieldType::Short, ByteOrder::LittleEndian),
            vec![100, 200]
        );

        let longs = [0x00, 0x00, 0x03, 0xE8, 0x00, 0x00, 0x07, 0xD0];
        assert_eq!(
            parse_u64_array(&longs, 2, FieldType::Long, ByteOrder::BigEndian),
            vec![1000, 2000]
        );

        // Count larger than the buffer is clamped.
        assert_eq!(
            parse_u64_array(&shorts, 5, FieldType::Short, ByteOrder::LittleEndian).len(),
            2
        );
    }

    #[test]
    fn test_parse_f64_array_types() {
        let mut doubles = Vec::new();
        doubles.extend_from_slice(&30.0f64.to_le_bytes());
        doubles.extend_from_slice(&(-30.0f64).to_le_bytes());
        assert_eq!(
            parse_f64_array(&doubles, 2, FieldType::Double, ByteOrder::LittleEndian),
            Some(vec![30.0, -30.0])
        );

        let mut rational = Vec::new();
        rational.extend_from_slice(&3u32.to_le_bytes());
        rational.extend_from_slice(&2u32.to_le_bytes());
        assert_eq!(
            parse_f64_array(&rational, 1, FieldType::Rational, ByteOrder::LittleEndian),
            Some(vec![1.5])
        );

        assert_eq!(
            parse_f64_array(b"abc", 3, FieldType::Ascii, ByteOrder::LittleEndian),
            None
        );
    }

    #[tokio::test]
    async fn test_read_inline_and_offset_values() {
        let mut data = vec![0u8; 128];
        for (i, v) in [1000u32, 2000, 3000].iter().enumerate() {
            data[64 + i * 4..68 + i * 4].copy_from_slice(&v.to_le_bytes());
        }
        let reader = MemoryReader::new(data, "mem://values");
        let header = le_header();
        let values = ValueReader::new(&reader, &header);

        let inline = entry(256, FieldType::Short, 1, [0x00, 0x04, 0, 0], true);
        assert_eq!(values.read_u64(&inline).await.unwrap(), 1024);

        let offsets = entry(324, FieldType::Long, 3, [64, 0, 0, 0], false);
        assert_eq!(
            values.read_u64_array(&offsets).await.unwrap(),
            vec![1000, 2000, 3000]
        );
    }

    #[tokio::test]
    async fn test_read_doubles_and_strings() {
        let mut data = vec![0u8; 128];
        data[16..24].copy_from_slice(&0.25f64.to_le_bytes());
        data[24..32].copy_from_slice(&0.5f64.to_le_bytes());
        data[40..47].copy_from_slice(b"-9999\0\0");
        let reader = MemoryReader::new(data, "mem://values");
        let header = le_header();
        let values = ValueReader::new(&reader, &header);

        let scale = entry(33550, FieldType::Double, 2, [16, 0, 0, 0], false);
        assert_eq!(values.read_f64_array(&scale).await.unwrap(), vec![0.25, 0.5]);

        let nodata = entry(42113, FieldType::Ascii, 7, [40, 0, 0, 0], false);
        assert_eq!(values.read_string(&nodata).await.unwrap(), "-9999");
    }

    #[tokio::test]
    async fn test_rejects_wrong_types() {
        let reader = MemoryReader::new(vec![0u8; 16], "mem://values");
        let header = le_header();
        let values = ValueReader::new(&reader, &header);

        let double = entry(324, FieldType::Double, 1, [0, 0, 0, 0], false);
        assert!(matches!(
            values.read_u64_array(&double).await,
            Err(TiffError::InvalidTagValue {
                tag: "TileOffsets",
                ..
            })
        ));

        let unknown = IfdEntry {
            field_type: None,
            field_type_raw: 99,
            ..entry(256, FieldType::Short, 1, [0; 4], true)
        };
        assert!(matches!(
            values.read_bytes(&unknown).await,
            Err(TiffError::UnknownFieldType(99))
        ));
    }
}
