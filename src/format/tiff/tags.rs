//! TIFF tag, field type and enumerated value definitions.
//!
//! This module defines the vocabulary for GeoTIFF parsing:
//! - Field types that determine how values are encoded
//! - Baseline, tiling and GeoTIFF tag IDs
//! - Compression, predictor, sample format and photometric values

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
///
/// Each field type has a fixed size in bytes, which decides whether a value
/// fits inline in an IFD entry and how arrays are strided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    Byte = 1,
    Ascii = 2,
    Short = 3,
    Long = 4,
    Rational = 5,
    SByte = 6,
    Undefined = 7,
    SShort = 8,
    SLong = 9,
    SRational = 10,
    Float = 11,
    Double = 12,
    Ifd = 13,
    /// BigTIFF only
    Long8 = 16,
    /// BigTIFF only
    SLong8 = 17,
    /// BigTIFF only
    Ifd8 = 18,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational
            | FieldType::SRational
            | FieldType::Double
            | FieldType::Long8
            | FieldType::SLong8
            | FieldType::Ifd8 => 8,
        }
    }

    /// Create a FieldType from its numeric value.
    ///
    /// Returns `None` for unknown type values.
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => FieldType::Byte,
            2 => FieldType::Ascii,
            3 => FieldType::Short,
            4 => FieldType::Long,
            5 => FieldType::Rational,
            6 => FieldType::SByte,
            7 => FieldType::Undefined,
            8 => FieldType::SShort,
            9 => FieldType::SLong,
            10 => FieldType::SRational,
            11 => FieldType::Float,
            12 => FieldType::Double,
            13 => FieldType::Ifd,
            16 => FieldType::Long8,
            17 => FieldType::SLong8,
            18 => FieldType::Ifd8,
            _ => return None,
        })
    }

    /// Maximum bytes that can be stored inline in a classic TIFF IFD entry.
    pub const INLINE_THRESHOLD_TIFF: usize = 4;

    /// Maximum bytes that can be stored inline in a BigTIFF IFD entry.
    pub const INLINE_THRESHOLD_BIGTIFF: usize = 8;

    /// Check if a value with this type and count fits inline in an IFD entry.
    #[inline]
    pub fn fits_inline(self, count: u64, is_bigtiff: bool) -> bool {
        let total_size = (self.size_in_bytes() as u64).saturating_mul(count);
        let threshold = if is_bigtiff {
            Self::INLINE_THRESHOLD_BIGTIFF as u64
        } else {
            Self::INLINE_THRESHOLD_TIFF as u64
        };
        total_size <= threshold
    }

    /// Whether values of this type are unsigned integers usable as offsets or sizes.
    #[inline]
    pub const fn is_unsigned_integer(self) -> bool {
        matches!(
            self,
            FieldType::Byte
                | FieldType::Short
                | FieldType::Long
                | FieldType::Long8
                | FieldType::Ifd
                | FieldType::Ifd8
        )
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// TIFF tag IDs used by the GeoTIFF reader.
///
/// Tags not listed here are kept in the IFD by numeric id but otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    // -------------------------------------------------------------------------
    // Basic Image Structure
    // -------------------------------------------------------------------------
    /// Bit 0 marks a reduced-resolution image (overview), bit 2 a transparency mask
    NewSubfileType = 254,
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    ImageDescription = 270,
    SamplesPerPixel = 277,
    /// 1 = chunky (pixel interleaved), 2 = planar (band separated)
    PlanarConfiguration = 284,
    Predictor = 317,
    /// Palette for photometric interpretation 3
    ColorMap = 320,
    /// Meaning of samples beyond the color channels (2 = unassociated alpha)
    ExtraSamples = 338,
    /// 1 = unsigned int, 2 = signed int, 3 = IEEE float
    SampleFormat = 339,

    // -------------------------------------------------------------------------
    // Strip Organization
    // -------------------------------------------------------------------------
    StripOffsets = 273,
    RowsPerStrip = 278,
    StripByteCounts = 279,

    // -------------------------------------------------------------------------
    // Tile Organization
    // -------------------------------------------------------------------------
    TileWidth = 322,
    TileLength = 323,
    TileOffsets = 324,
    TileByteCounts = 325,

    // -------------------------------------------------------------------------
    // JPEG Handling
    // -------------------------------------------------------------------------
    /// Quantization and Huffman tables shared by abbreviated tile streams
    JpegTables = 347,

    // -------------------------------------------------------------------------
    // GeoTIFF
    // -------------------------------------------------------------------------
    ModelPixelScale = 33550,
    ModelTiepoint = 33922,
    ModelTransformation = 34264,
    GeoKeyDirectory = 34735,
    GeoDoubleParams = 34736,
    GeoAsciiParams = 34737,

    // -------------------------------------------------------------------------
    // GDAL private tags
    // -------------------------------------------------------------------------
    /// XML band metadata (statistics, descriptions)
    GdalMetadata = 42112,
    /// Nodata value as ASCII text
    GdalNodata = 42113,
}

impl TiffTag {
    /// Create a TiffTag from its numeric value.
    ///
    /// Returns `None` for unrecognized tags. Unknown tags are not an error.
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            254 => TiffTag::NewSubfileType,
            256 => TiffTag::ImageWidth,
            257 => TiffTag::ImageLength,
            258 => TiffTag::BitsPerSample,
            259 => TiffTag::Compression,
            262 => TiffTag::PhotometricInterpretation,
            270 => TiffTag::ImageDescription,
            273 => TiffTag::StripOffsets,
            277 => TiffTag::SamplesPerPixel,
            278 => TiffTag::RowsPerStrip,
            279 => TiffTag::StripByteCounts,
            284 => TiffTag::PlanarConfiguration,
            317 => TiffTag::Predictor,
            320 => TiffTag::ColorMap,
            322 => TiffTag::TileWidth,
            323 => TiffTag::TileLength,
            324 => TiffTag::TileOffsets,
            325 => TiffTag::TileByteCounts,
            338 => TiffTag::ExtraSamples,
            339 => TiffTag::SampleFormat,
            347 => TiffTag::JpegTables,
            33550 => TiffTag::ModelPixelScale,
            33922 => TiffTag::ModelTiepoint,
            34264 => TiffTag::ModelTransformation,
            34735 => TiffTag::GeoKeyDirectory,
            34736 => TiffTag::GeoDoubleParams,
            34737 => TiffTag::GeoAsciiParams,
            42112 => TiffTag::GdalMetadata,
            42113 => TiffTag::GdalNodata,
            _ => return None,
        })
    }

    /// Get the numeric tag ID.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

// =============================================================================
// Compression Values
// =============================================================================

/// TIFF compression scheme identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Compression {
    None = 1,
    Lzw = 5,
    /// "Old-style" JPEG, rarely used and not decoded
    OldJpeg = 6,
    Jpeg = 7,
    /// Adobe-style Deflate (zlib)
    Deflate = 8,
    PackBits = 32773,
    /// Legacy Deflate code, same stream as 8
    PkzipDeflate = 32946,
    Jpeg2000 = 33003,
    Lerc = 34887,
    Zstd = 50000,
    Webp = 50001,
}

impl Compression {
    /// Create a Compression from its numeric value.
    pub fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            1 => Compression::None,
            5 => Compression::Lzw,
            6 => Compression::OldJpeg,
            7 => Compression::Jpeg,
            8 => Compression::Deflate,
            32773 => Compression::PackBits,
            32946 => Compression::PkzipDeflate,
            33003 => Compression::Jpeg2000,
            34887 => Compression::Lerc,
            50000 => Compression::Zstd,
            50001 => Compression::Webp,
            _ => return None,
        })
    }

    /// Check if this compression scheme can be decoded.
    #[inline]
    pub const fn is_supported(self) -> bool {
        matches!(
            self,
            Compression::None
                | Compression::Lzw
                | Compression::Jpeg
                | Compression::Deflate
                | Compression::PkzipDeflate
                | Compression::PackBits
                | Compression::Zstd
        )
    }

    /// Get a human-readable name for the compression scheme.
    pub const fn name(self) -> &'static str {
        match self {
            Compression::None => "None",
            Compression::Lzw => "LZW",
            Compression::OldJpeg => "Old JPEG",
            Compression::Jpeg => "JPEG",
            Compression::Deflate | Compression::PkzipDeflate => "Deflate",
            Compression::PackBits => "PackBits",
            Compression::Jpeg2000 => "JPEG 2000",
            Compression::Lerc => "LERC",
            Compression::Zstd => "ZSTD",
            Compression::Webp => "WebP",
        }
    }
}

// =============================================================================
// Sample Layout Values
// =============================================================================

/// Horizontal differencing applied before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predictor {
    None,
    /// Integer differencing per sample along each row
    Horizontal,
    /// Byte-shuffled differencing for IEEE floats
    FloatingPoint,
}

impl Predictor {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Predictor::None),
            2 => Some(Predictor::Horizontal),
            3 => Some(Predictor::FloatingPoint),
            _ => None,
        }
    }
}

/// Interpretation of the sample bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Unsigned,
    Signed,
    Float,
}

impl SampleFormat {
    /// Unknown codes (4 = void) are read as unsigned, as libtiff does.
    pub fn from_u16(value: u16) -> Self {
        match value {
            2 => SampleFormat::Signed,
            3 => SampleFormat::Float,
            _ => SampleFormat::Unsigned,
        }
    }

    pub fn code(self) -> u16 {
        match self {
            SampleFormat::Unsigned => 1,
            SampleFormat::Signed => 2,
            SampleFormat::Float => 3,
        }
    }
}

/// Photometric interpretation values relevant to rendering.
pub mod photometric {
    pub const MIN_IS_WHITE: u16 = 0;
    pub const MIN_IS_BLACK: u16 = 1;
    pub const RGB: u16 = 2;
    pub const PALETTE: u16 = 3;
    pub const MASK: u16 = 4;
    pub const YCBCR: u16 = 6;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_type_sizes() {
        assert_eq!(FieldType::Byte.size_in_bytes(), 1);
        assert_eq!(FieldType::Short.size_in_bytes(), 2);
        assert_eq!(FieldType::Float.size_in_bytes(), 4);
        assert_eq!(FieldType::Double.size_in_bytes(), 8);
        assert_eq!(FieldType::Rational.size_in_bytes(), 8);
        assert_eq!(FieldType::Long8.size_in_bytes(), 8);
    }

    #[test]
    fn test_field_type_from_u16() {
        assert_eq!(FieldType::from_u16(12), Some(FieldType::Double));
        assert_eq!(FieldType::from_u16(16), Some(FieldType::Long8));
        assert_eq!(FieldType::from_u16(0), None);
        assert_eq!(FieldType::from_u16(14), None);
    }

    #[test]
    fn test_fits_inline() {
        assert!(FieldType::Short.fits_inline(2, false));
        assert!(!FieldType::Short.fits_inline(3, false));
        assert!(!FieldType::Double.fits_inline(1, false));
        assert!(FieldType::Double.fits_inline(1, true));
        assert!(!FieldType::Long.fits_inline(u64::MAX, true));
    }

    #[test]
    fn test_geotiff_tags_round_trip() {
        for id in [33550u16, 33922, 34264, 34735, 34736, 34737, 42112, 42113] {
            let tag = TiffTag::from_u16(id).unwrap();
            assert_eq!(tag.as_u16(), id);
        }
        assert_eq!(TiffTag::from_u16(9999), None);
    }

    #[test]
    fn test_compression_support() {
        assert!(Compression::from_u16(5).unwrap().is_supported());
        assert!(Compression::from_u16(50000).unwrap().is_supported());
        assert!(Compression::from_u16(32946).unwrap().is_supported());
        assert!(!Compression::Jpeg2000.is_supported());
        assert!(!Compression::Lerc.is_supported());
        assert_eq!(Compression::PkzipDeflate.name(), "Deflate");
        assert_eq!(Compression::from_u16(2), None);
    }

    #[test]
    fn test_predictor_and_sample_format() {
        assert_eq!(Predictor::from_u16(3), Some(Predictor::FloatingPoint));
        assert_eq!(Predictor::from_u16(9), None);
        assert_eq!(SampleFormat::from_u16(3), SampleFormat::Float);
        assert_eq!(SampleFormat::from_u16(4), SampleFormat::Unsigned);
    }
}
