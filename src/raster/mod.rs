//! Raster datasets: opening, metadata and window reads.
//!
//! ```text
//! ┌──────────────────┐  identifier   ┌──────────────┐  RangeReader  ┌───────────────┐
//! │ DatasetRegistry  │ ────────────▶ │ RasterSource │ ────────────▶ │ RasterDataset │
//! │ (LRU+singleflight│               │ (local/http/ │   BlockCache  │ (levels, CRS, │
//! │  + failure TTL)  │ ◀──────────── │  s3/memory)  │               │  read_window) │
//! └──────────────────┘  Arc<Dataset> └──────────────┘               └───────────────┘
//! ```

mod dataset;
mod failures;
mod registry;
mod source;

use serde::Serialize;

use crate::format::tiff::{ImageLevel, SampleFormat};
use crate::geo::{Bounds, Crs, GeoTransform, PixelWindow};

pub use dataset::{BandStatistics, RasterDataset, DEFAULT_DECODED_BLOCKS};
pub(crate) use dataset::is_valid_sample;
pub use failures::FailureMemo;
pub use registry::{Dataset, DatasetRegistry, RegistryOptions};
pub use source::{MemorySource, RasterSource, SourceLocation, UriSource};

// =============================================================================
// DataType
// =============================================================================

/// Numeric type of the raster samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    pub fn from_sample(bits: u16, format: SampleFormat) -> Option<Self> {
        Some(match (format, bits) {
            (SampleFormat::Unsigned, 8) => DataType::Uint8,
            (SampleFormat::Unsigned, 16) => DataType::Uint16,
            (SampleFormat::Unsigned, 32) => DataType::Uint32,
            (SampleFormat::Signed, 8) => DataType::Int8,
            (SampleFormat::Signed, 16) => DataType::Int16,
            (SampleFormat::Signed, 32) => DataType::Int32,
            (SampleFormat::Float, 32) => DataType::Float32,
            (SampleFormat::Float, 64) => DataType::Float64,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Uint8 => "uint8",
            DataType::Int8 => "int8",
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Uint32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn bits(self) -> u16 {
        match self {
            DataType::Uint8 | DataType::Int8 => 8,
            DataType::Uint16 | DataType::Int16 => 16,
            DataType::Uint32 | DataType::Int32 | DataType::Float32 => 32,
            DataType::Float64 => 64,
        }
    }

    pub fn sample_format(self) -> SampleFormat {
        match self {
            DataType::Uint8 | DataType::Uint16 | DataType::Uint32 => SampleFormat::Unsigned,
            DataType::Int8 | DataType::Int16 | DataType::Int32 => SampleFormat::Signed,
            DataType::Float32 | DataType::Float64 => SampleFormat::Float,
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Geometry of one resolution level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LevelInfo {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub downsample_x: f64,
    pub downsample_y: f64,
    pub block_width: u32,
    pub block_height: u32,
    pub tiled: bool,
}

impl From<&ImageLevel> for LevelInfo {
    fn from(level: &ImageLevel) -> Self {
        Self {
            index: level.level_index,
            width: level.width,
            height: level.height,
            downsample_x: level.downsample_x,
            downsample_y: level.downsample_y,
            block_width: level.block_width,
            block_height: level.block_height,
            tiled: level.tiled,
        }
    }
}

/// Immutable description of an opened raster.
#[derive(Debug, Clone, Serialize)]
pub struct RasterInfo {
    pub identifier: String,
    /// Container format name
    pub driver: String,
    pub width: u32,
    pub height: u32,
    pub band_count: usize,
    pub dtype: DataType,
    pub nodata: Option<f64>,
    pub transform: GeoTransform,
    /// `None` when the file carries no usable CRS
    pub crs: Option<Crs>,
    /// Extent in the native CRS (pixel space without a CRS)
    pub bounds: Bounds,
    /// Resolution levels, finest first
    pub levels: Vec<LevelInfo>,
    /// 1-based index of an alpha band
    pub alpha_band: Option<usize>,
    pub color_interpretation: Vec<&'static str>,
    pub compression: String,
}

impl RasterInfo {
    pub fn has_palette(&self) -> bool {
        self.color_interpretation.first() == Some(&"palette")
    }

    /// Bands holding data, i.e. every band but the alpha band.
    pub fn data_bands(&self) -> Vec<usize> {
        (1..=self.band_count)
            .filter(|b| Some(*b) != self.alpha_band)
            .collect()
    }

    /// Bands rendered when the caller does not choose: `[1]` for palette and
    /// single-band rasters, `[1, 2, 3]` otherwise.
    pub fn default_bands(&self) -> Vec<usize> {
        let data = self.data_bands();
        if self.has_palette() || data.len() < 3 {
            vec![data.first().copied().unwrap_or(1)]
        } else {
            data[..3].to_vec()
        }
    }
}

#[cfg(test)]
impl RasterInfo {
    /// Single-band u8 raster with one level, for geometry tests.
    pub(crate) fn synthetic(
        identifier: &str,
        width: u32,
        height: u32,
        transform: GeoTransform,
        crs: Option<Crs>,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            driver: "GTiff".to_string(),
            width,
            height,
            band_count: 1,
            dtype: DataType::Uint8,
            nodata: None,
            transform,
            crs,
            bounds: transform.bounds(width, height),
            levels: vec![LevelInfo {
                index: 0,
                width,
                height,
                downsample_x: 1.0,
                downsample_y: 1.0,
                block_width: 256,
                block_height: 256,
                tiled: true,
            }],
            alpha_band: None,
            color_interpretation: vec!["gray"],
            compression: "None".to_string(),
        }
    }
}

// =============================================================================
// BandBuffer
// =============================================================================

/// Samples read from a window, band by band.
///
/// Pixels outside the raster are NaN. When the read was decimated the buffer
/// is smaller than the window; [`BandBuffer::buffer_position`] maps level
/// pixel coordinates into it.
#[derive(Debug, Clone)]
pub struct BandBuffer {
    pub window: PixelWindow,
    pub width: u32,
    pub height: u32,
    /// 1-based band indices, in buffer order
    pub bands: Vec<usize>,
    data: Vec<f64>,
}

impl BandBuffer {
    pub(crate) fn filled(window: PixelWindow, width: u32, height: u32, bands: Vec<usize>) -> Self {
        let len = width as usize * height as usize * bands.len();
        Self {
            window,
            width,
            height,
            bands,
            data: vec![f64::NAN; len],
        }
    }

    fn plane_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Samples of the `i`-th buffered band, row-major.
    pub fn band(&self, i: usize) -> &[f64] {
        let n = self.plane_len();
        &self.data[i * n..(i + 1) * n]
    }

    pub(crate) fn band_mut(&mut self, i: usize) -> &mut [f64] {
        let n = self.plane_len();
        &mut self.data[i * n..(i + 1) * n]
    }

    pub fn get(&self, band: usize, col: u32, row: u32) -> f64 {
        self.band(band)[row as usize * self.width as usize + col as usize]
    }

    /// Fractional buffer coordinates of a fractional level pixel position.
    pub fn buffer_position(&self, col: f64, row: f64) -> (f64, f64) {
        let sx = self.width as f64 / self.window.width.max(1) as f64;
        let sy = self.height as f64 / self.window.height.max(1) as f64;
        (
            (col - self.window.col_off as f64) * sx,
            (row - self.window.row_off as f64) * sy,
        )
    }
}
