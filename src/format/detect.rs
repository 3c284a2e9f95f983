//! Raster format detection from magic bytes.
//!
//! Only TIFF and BigTIFF are decoded. Other common raster containers are
//! recognized so the caller gets a precise error instead of a parse failure.

use crate::error::RasterError;
use crate::io::RangeReader;

use super::tiff::BIGTIFF_HEADER_SIZE;

/// A container format the server can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Tiff,
    BigTiff,
}

impl RasterFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            RasterFormat::Tiff => "GeoTIFF",
            RasterFormat::BigTiff => "BigTIFF",
        }
    }
}

/// Signatures of formats that are recognized but not served.
const FOREIGN_SIGNATURES: &[(&[u8], &str)] = &[
    (b"\x89PNG\r\n\x1a\n", "PNG"),
    (b"\xFF\xD8\xFF", "JPEG"),
    (b"\x89HDF\r\n\x1a\n", "HDF5"),
    (b"CDF\x01", "NetCDF"),
    (b"CDF\x02", "NetCDF"),
    (b"\x00\x00\x00\x0CjP  ", "JPEG 2000"),
    (b"GIF8", "GIF"),
    (b"PK\x03\x04", "ZIP archive"),
];

/// Classify the first bytes of a file.
///
/// # Errors
/// Returns a description of the problem when the bytes are not TIFF.
pub fn sniff_format(bytes: &[u8]) -> Result<RasterFormat, String> {
    if bytes.len() >= 4 {
        let version = match &bytes[0..2] {
            b"II" => Some(u16::from_le_bytes([bytes[2], bytes[3]])),
            b"MM" => Some(u16::from_be_bytes([bytes[2], bytes[3]])),
            _ => None,
        };
        match version {
            Some(42) => return Ok(RasterFormat::Tiff),
            Some(43) => return Ok(RasterFormat::BigTiff),
            Some(other) => return Err(format!("TIFF byte order marker with unknown version {}", other)),
            None => {}
        }
    }

    for (signature, name) in FOREIGN_SIGNATURES {
        if bytes.starts_with(signature) {
            return Err(format!("{} files are not supported; convert to GeoTIFF", name));
        }
    }

    if bytes.len() < 4 {
        return Err("file is too small to be a raster".to_string());
    }
    Err("unrecognized raster format".to_string())
}

/// Read the header of `reader` and classify it.
///
/// # Errors
/// `RasterError::Source` for non-TIFF content, or the read failure.
pub async fn detect_format<R: RangeReader + ?Sized>(reader: &R) -> Result<RasterFormat, RasterError> {
    let len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
    let bytes = reader.read_exact_at(0, len).await?;
    sniff_format(&bytes).map_err(|reason| {
        RasterError::Source(format!("{}: {}", reader.identifier(), reason))
    })
}
