//! TIFF and GeoTIFF parsing.
//!
//! Handles classic TIFF and BigTIFF in either byte order, tiled or stripped,
//! chunky or planar, with the compressions and predictors GDAL writes.
//!
//! # Key Concepts
//!
//! - **IFD (Image File Directory)**: one per image. A COG has the
//!   full-resolution image first, then overviews and optional masks.
//!
//! - **Inline vs offset values**: small values live in the IFD entry itself,
//!   larger ones (offset arrays, GeoTIFF doubles) are fetched by range read.
//!
//! - **Blocks**: tiles or strips, each compressed independently, so a window
//!   read only touches the blocks it intersects.

mod decompress;
mod geokeys;
mod parser;
mod pyramid;
mod tags;
mod validation;
mod values;

#[cfg(test)]
pub(crate) mod testing;

pub use decompress::{check_sample_layout, decompress, samples_to_f64, BlockLayout};
pub use geokeys::{gdal_statistic, parse_nodata, GeoKeys, GeoTiffTags};
pub use parser::{ByteOrder, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE};
pub use pyramid::{ImageLevel, TiffPyramid};
pub use tags::{photometric, Compression, FieldType, Predictor, SampleFormat, TiffTag};
pub use validation::{validate_cog, ValidationResult};
pub use values::{parse_f64_array, parse_u64_array, ValueReader};
