//! Raster container formats.
//!
//! TIFF/BigTIFF (including Cloud Optimized GeoTIFF) is the only decoded
//! container. [`detect::detect_format`] turns anything else into a clear
//! source error.

pub mod detect;
pub mod jpeg;
pub mod tiff;

pub use detect::{detect_format, sniff_format, RasterFormat};
