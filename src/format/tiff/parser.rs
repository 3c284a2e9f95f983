//! TIFF header and IFD structure parsing.
//!
//! # TIFF Header Structure
//!
//! ## Classic TIFF (8 bytes)
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42 = 0x002A)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```
//!
//! ## BigTIFF (16 bytes)
//! ```text
//! Bytes 0-1: Byte order
//! Bytes 2-3: Version (43 = 0x002B)
//! Bytes 4-5: Offset byte size (must be 8)
//! Bytes 6-7: Reserved
//! Bytes 8-15: Offset to first IFD (8 bytes)
//! ```
//!
//! # IFD Structure
//! ```text
//! count (2 | 8 bytes)
//! count × entry (12 | 20 bytes): tag u16, type u16, count u32|u64, value/offset 4|8 bytes
//! next IFD offset (4 | 8 bytes), 0 terminates the chain
//! ```

use std::collections::HashMap;

use crate::error::TiffError;

use super::tags::{FieldType, TiffTag};

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

macro_rules! read_primitive {
    ($name:ident, $ty:ty, $len:expr) => {
        /// Read a value from the start of `bytes` using this byte order.
        ///
        /// # Panics
        /// Panics if the slice is shorter than the value.
        #[inline]
        pub fn $name(self, bytes: &[u8]) -> $ty {
            let mut raw = [0u8; $len];
            raw.copy_from_slice(&bytes[..$len]);
            match self {
                ByteOrder::LittleEndian => <$ty>::from_le_bytes(raw),
                ByteOrder::BigEndian => <$ty>::from_be_bytes(raw),
            }
        }
    };
}

impl ByteOrder {
    read_primitive!(read_u16, u16, 2);
    read_primitive!(read_i16, i16, 2);
    read_primitive!(read_u32, u32, 4);
    read_primitive!(read_i32, i32, 4);
    read_primitive!(read_u64, u64, 8);
    read_primitive!(read_i64, i64, 8);
    read_primitive!(read_f32, f32, 4);
    read_primitive!(read_f64, f64, 8);

    /// Whether this order matches the host, so samples can be used without swapping.
    #[inline]
    pub fn is_native(self) -> bool {
        match self {
            ByteOrder::LittleEndian => cfg!(target_endian = "little"),
            ByteOrder::BigEndian => cfg!(target_endian = "big"),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Whether this is a BigTIFF file (64-bit offsets)
    pub is_bigtiff: bool,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (8 for classic TIFF, 16 for BigTIFF)
    /// * `file_size` - Total file size (used to validate the first IFD offset)
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let (is_bigtiff, first_ifd_offset) = match byte_order.read_u16(&bytes[2..4]) {
            VERSION_TIFF => (false, byte_order.read_u32(&bytes[4..8]) as u64),
            VERSION_BIGTIFF => {
                if bytes.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: bytes.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&bytes[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&bytes[8..16]))
            }
            version => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset == 0 || first_ifd_offset >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// Size of an IFD entry: 12 bytes classic, 20 bytes BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    /// Size of the entry count field at the start of an IFD.
    #[inline]
    pub const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    /// Size of the next IFD offset field at the end of an IFD.
    #[inline]
    pub const fn ifd_next_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Size of the value/offset field in an IFD entry (the inline threshold).
    #[inline]
    pub const fn value_offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    /// Read an entry count from the start of an IFD.
    pub fn read_entry_count(&self, bytes: &[u8]) -> Result<u64, TiffError> {
        if bytes.len() < self.ifd_count_size() {
            return Err(TiffError::FileTooSmall {
                required: self.ifd_count_size() as u64,
                actual: bytes.len() as u64,
            });
        }
        Ok(if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u16(bytes) as u64
        })
    }
}

// =============================================================================
// IfdEntry
// =============================================================================

/// A single directory entry.
///
/// Values that fit in the value/offset field are kept inline; larger values
/// are fetched later through [`super::ValueReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag_id: u16,
    /// `None` when the type code is unknown
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    /// Raw value/offset field (4 or 8 bytes)
    pub value_offset_bytes: Vec<u8>,
    pub is_inline: bool,
}

impl IfdEntry {
    /// The known tag for this entry, if any.
    pub fn tag(&self) -> Option<TiffTag> {
        TiffTag::from_u16(self.tag_id)
    }

    /// Total size of the value in bytes.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .and_then(|ft| (ft.size_in_bytes() as u64).checked_mul(self.count))
    }

    /// Interpret the value/offset field as a file offset.
    pub fn value_offset(&self, byte_order: ByteOrder) -> u64 {
        if self.value_offset_bytes.len() >= 8 {
            byte_order.read_u64(&self.value_offset_bytes)
        } else {
            byte_order.read_u32(&self.value_offset_bytes) as u64
        }
    }

    /// A single inline unsigned value, widened to u64.
    pub fn inline_u64(&self, byte_order: ByteOrder) -> Option<u64> {
        if !self.is_inline || self.count != 1 {
            return None;
        }
        let bytes = &self.value_offset_bytes;
        match self.field_type? {
            FieldType::Byte => Some(bytes[0] as u64),
            FieldType::Short => Some(byte_order.read_u16(bytes) as u64),
            FieldType::Long | FieldType::Ifd => Some(byte_order.read_u32(bytes) as u64),
            FieldType::Long8 | FieldType::Ifd8 if bytes.len() >= 8 => {
                Some(byte_order.read_u64(bytes))
            }
            _ => None,
        }
    }

    /// A single inline unsigned value that fits in u32.
    pub fn inline_u32(&self, byte_order: ByteOrder) -> Option<u32> {
        self.inline_u64(byte_order)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// A single inline u16 value.
    pub fn inline_u16(&self, byte_order: ByteOrder) -> Option<u16> {
        self.inline_u64(byte_order)
            .and_then(|v| u16::try_from(v).ok())
    }

    /// Raw inline value bytes, trimmed to the value size.
    pub fn inline_bytes(&self) -> Option<&[u8]> {
        if !self.is_inline {
            return None;
        }
        let size = self.value_byte_size()? as usize;
        self.value_offset_bytes.get(..size)
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed Image File Directory.
#[derive(Debug, Clone)]
pub struct Ifd {
    /// File offset of this IFD
    pub offset: u64,
    pub entries: Vec<IfdEntry>,
    entries_by_tag: HashMap<u16, usize>,
    /// Offset of the next IFD (0 terminates the chain)
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Total byte size of an IFD with `entry_count` entries.
    pub fn calculate_size(entry_count: u64, header: &TiffHeader) -> usize {
        header.ifd_count_size()
            + entry_count as usize * header.ifd_entry_size()
            + header.ifd_next_offset_size()
    }

    /// Parse an IFD from bytes starting at its entry count.
    ///
    /// # Errors
    /// `FileTooSmall` if the buffer does not hold all announced entries.
    pub fn parse(bytes: &[u8], offset: u64, header: &TiffHeader) -> Result<Self, TiffError> {
        let byte_order = header.byte_order;
        let entry_count = header.read_entry_count(bytes)?;

        let required = Self::calculate_size(entry_count, header);
        if bytes.len() < required {
            return Err(TiffError::FileTooSmall {
                required: required as u64,
                actual: bytes.len() as u64,
            });
        }

        let entry_size = header.ifd_entry_size();
        let value_size = header.value_offset_size();
        let mut entries = Vec::with_capacity(entry_count as usize);
        let mut entries_by_tag = HashMap::with_capacity(entry_count as usize);

        for i in 0..entry_count as usize {
            let start = header.ifd_count_size() + i * entry_size;
            let raw = &bytes[start..start + entry_size];

            let tag_id = byte_order.read_u16(&raw[0..2]);
            let field_type_raw = byte_order.read_u16(&raw[2..4]);
            let field_type = FieldType::from_u16(field_type_raw);
            let (count, value_start) = if header.is_bigtiff {
                (byte_order.read_u64(&raw[4..12]), 12)
            } else {
                (byte_order.read_u32(&raw[4..8]) as u64, 8)
            };
            let value_offset_bytes = raw[value_start..value_start + value_size].to_vec();
            let is_inline = field_type
                .map(|ft| ft.fits_inline(count, header.is_bigtiff))
                .unwrap_or(false);

            // First occurrence wins when a writer repeats a tag.
            entries_by_tag.entry(tag_id).or_insert(entries.len());
            entries.push(IfdEntry {
                tag_id,
                field_type,
                field_type_raw,
                count,
                value_offset_bytes,
                is_inline,
            });
        }

        let next_start = required - header.ifd_next_offset_size();
        let next_ifd_offset = if header.is_bigtiff {
            byte_order.read_u64(&bytes[next_start..])
        } else {
            byte_order.read_u32(&bytes[next_start..]) as u64
        };

        Ok(Ifd {
            offset,
            entries,
            entries_by_tag,
            next_ifd_offset,
        })
    }

    /// Look up an entry by numeric tag id.
    pub fn get_entry(&self, tag_id: u16) -> Option<&IfdEntry> {
        self.entries_by_tag.get(&tag_id).map(|&i| &self.entries[i])
    }

    pub fn get_entry_by_tag(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.get_entry(tag.as_u16())
    }

    pub fn has_tag(&self, tag: TiffTag) -> bool {
        self.entries_by_tag.contains_key(&tag.as_u16())
    }

    /// A single inline unsigned value for a tag.
    pub fn get_u32(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u32> {
        self.get_entry_by_tag(tag)?.inline_u32(byte_order)
    }

    pub fn get_u16(&self, tag: TiffTag, byte_order: ByteOrder) -> Option<u16> {
        self.get_entry_by_tag(tag)?.inline_u16(byte_order)
    }

    pub fn image_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageWidth, byte_order)
    }

    pub fn image_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::ImageLength, byte_order)
    }

    pub fn tile_width(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileWidth, byte_order)
    }

    pub fn tile_height(&self, byte_order: ByteOrder) -> Option<u32> {
        self.get_u32(TiffTag::TileLength, byte_order)
    }

    pub fn compression(&self, byte_order: ByteOrder) -> Option<u16> {
        self.get_u16(TiffTag::Compression, byte_order)
    }

    /// NewSubfileType bits (0 when absent).
    pub fn subfile_type(&self, byte_order: ByteOrder) -> u32 {
        self.get_u32(TiffTag::NewSubfileType, byte_order)
            .unwrap_or(0)
    }

    /// Whether this IFD is organized in tiles rather than strips.
    pub fn is_tiled(&self) -> bool {
        self.has_tag(TiffTag::TileWidth) && self.has_tag(TiffTag::TileOffsets)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn le_header() -> TiffHeader {
        TiffHeader {
            byte_order: ByteOrder::LittleEndian,
            is_bigtiff: false,
            first_ifd_offset: 8,
        }
    }

    /// Classic little-endian IFD bytes from (tag, type, count, value) tuples.
    fn build_ifd(entries: &[(u16, u16, u32, [u8; 4])], next: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, ty, count, value) in entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&ty.to_le_bytes());
            out.extend_from_slice(&count.to_le_bytes());
            out.extend_from_slice(value);
        }
        out.extend_from_slice(&next.to_le_bytes());
        out
    }

    #[test]
    fn test_byte_order_reads() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(ByteOrder::LittleEndian.read_u16(&bytes), 0x0201);
        assert_eq!(ByteOrder::BigEndian.read_u32(&bytes), 0x01020304);
        assert_eq!(ByteOrder::BigEndian.read_u64(&bytes), 0x0102030405060708);

        let float = (-9999.0f32).to_be_bytes();
        assert_eq!(ByteOrder::BigEndian.read_f32(&float), -9999.0);
        let double = 0.5f64.to_le_bytes();
        assert_eq!(ByteOrder::LittleEndian.read_f64(&double), 0.5);
        assert_eq!(ByteOrder::LittleEndian.read_i16(&[0xFF, 0xFF]), -1);
    }

    #[test]
    fn test_parse_classic_header() {
        let header = [0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        let parsed = TiffHeader::parse(&header, 1000).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::LittleEndian);
        assert!(!parsed.is_bigtiff);
        assert_eq!(parsed.first_ifd_offset, 8);

        let header = [0x4D, 0x4D, 0x00, 0x2A, 0x00, 0x00, 0x00, 0x08];
        let parsed = TiffHeader::parse(&header, 1000).unwrap();
        assert_eq!(parsed.byte_order, ByteOrder::BigEndian);
    }

    #[test]
    fn test_parse_bigtiff_header() {
        let header = [
            0x49, 0x49, 0x2B, 0x00, 0x08, 0x00, 0x00, 0x00, //
            0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00,
        ];
        let parsed = TiffHeader::parse(&header, 10_000_000_000).unwrap();
        assert!(parsed.is_bigtiff);
        assert_eq!(parsed.first_ifd_offset, 0x1_0000_0000);
        assert_eq!(parsed.ifd_entry_size(), 20);
        assert_eq!(parsed.value_offset_size(), 8);
    }

    #[test]
    fn test_header_errors() {
        let bad_magic = [0x00, 0x00, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&bad_magic, 100),
            Err(TiffError::InvalidMagic(0))
        ));

        let bad_version = [0x49, 0x49, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&bad_version, 100),
            Err(TiffError::InvalidVersion(0))
        ));

        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2A, 0x00], 100),
            Err(TiffError::FileTooSmall {
                required: 8,
                actual: 4
            })
        ));

        let past_end = [0x49, 0x49, 0x2A, 0x00, 0xE8, 0x03, 0x00, 0x00];
        assert!(matches!(
            TiffHeader::parse(&past_end, 500),
            Err(TiffError::InvalidIfdOffset(1000))
        ));

        let bad_bigtiff = [
            0x49, 0x49, 0x2B, 0x00, 0x04, 0x00, 0x00, 0x00, //
            0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];
        assert!(matches!(
            TiffHeader::parse(&bad_bigtiff, 100),
            Err(TiffError::InvalidBigTiffOffsetSize(4))
        ));
    }

    #[test]
    fn test_parse_ifd_entries() {
        let header = le_header();
        let bytes = build_ifd(
            &[
                (256, 3, 1, [0x00, 0x01, 0, 0]),       // ImageWidth = 256 (SHORT)
                (257, 4, 1, [0x00, 0x02, 0, 0]),       // ImageLength = 512 (LONG)
                (322, 3, 1, [0x00, 0x01, 0, 0]),       // TileWidth = 256
                (324, 4, 4, [0x00, 0x10, 0, 0]),       // TileOffsets at 4096
                (33550, 12, 3, [0x00, 0x20, 0, 0]),    // ModelPixelScale at 8192
            ],
            0,
        );

        let ifd = Ifd::parse(&bytes, 8, &header).unwrap();
        let bo = header.byte_order;

        assert_eq!(ifd.offset, 8);
        assert_eq!(ifd.entries.len(), 5);
        assert_eq!(ifd.image_width(bo), Some(256));
        assert_eq!(ifd.image_height(bo), Some(512));
        assert_eq!(ifd.tile_width(bo), Some(256));
        assert!(ifd.is_tiled());
        assert_eq!(ifd.next_ifd_offset, 0);

        let offsets = ifd.get_entry_by_tag(TiffTag::TileOffsets).unwrap();
        assert!(!offsets.is_inline);
        assert_eq!(offsets.value_offset(bo), 4096);
        assert_eq!(offsets.value_byte_size(), Some(16));

        let scale = ifd.get_entry_by_tag(TiffTag::ModelPixelScale).unwrap();
        assert!(!scale.is_inline);
        assert_eq!(scale.value_byte_size(), Some(24));
    }

    #[test]
    fn test_parse_ifd_truncated() {
        let header = le_header();
        let mut bytes = build_ifd(&[(256, 3, 1, [1, 0, 0, 0])], 0);
        bytes.truncate(10);
        assert!(matches!(
            Ifd::parse(&bytes, 8, &header),
            Err(TiffError::FileTooSmall { .. })
        ));
    }

    #[test]
    fn test_inline_values() {
        let bo = ByteOrder::LittleEndian;
        let entry = IfdEntry {
            tag_id: 254,
            field_type: Some(FieldType::Long),
            field_type_raw: 4,
            count: 1,
            value_offset_bytes: vec![1, 0, 0, 0],
            is_inline: true,
        };
        assert_eq!(entry.inline_u32(bo), Some(1));
        assert_eq!(entry.tag(), Some(TiffTag::NewSubfileType));

        let pair = IfdEntry {
            count: 2,
            field_type: Some(FieldType::Short),
            field_type_raw: 3,
            value_offset_bytes: vec![8, 0, 16, 0],
            ..entry.clone()
        };
        assert_eq!(pair.inline_u32(bo), None);
        assert_eq!(pair.inline_bytes(), Some(&[8u8, 0, 16, 0][..]));
    }
}
