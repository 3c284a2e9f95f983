//! Region extraction in pixel or world coordinates.
//!
//! ```text
//!   world box (units CRS) ──reproject──▶ native box ──affine──▶ pixel box
//!                                                                  │
//!                        pixel box (pixel units) ─────────────────▶│
//!                                                                  ▼
//!                              clip, pick level, cap output pixels
//!                                                                  │
//!                                   ┌──────────────────────────────┴─────┐
//!                                   ▼                                    ▼
//!                      GeoTIFF (raw samples, deflate,            PNG / JPEG (styled)
//!                       geokeys, GDAL_NODATA)
//! ```

use std::io::{Cursor, Write};

use bytes::Bytes;
use flate2::write::ZlibEncoder;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tracing::debug;

use crate::error::TileError;
use crate::geo::window::select_level;
use crate::geo::{Bounds, Crs, GeoTransform, OverviewPolicy, PixelWindow, Reprojector};
use crate::io::RangeReader;
use crate::raster::{BandBuffer, DataType, RasterDataset, RasterInfo};

use super::params::{ImageFormat, RenderParams};
use super::renderer::{render_pixels, RgbaImage};

/// Default cap on output pixels of one region.
pub const DEFAULT_MAX_REGION_PIXELS: u64 = 4096 * 4096;

const ROWS_PER_STRIP: u32 = 16;

// GeoTIFF tag and key numbers
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;
const TAG_COLOR_MAP: u16 = 320;
const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_TYPE: u16 = 3072;

/// Output encoding of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionFormat {
    GeoTiff,
    Image(ImageFormat),
}

impl RegionFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "tif" | "tiff" => Some(RegionFormat::GeoTiff),
            other => ImageFormat::from_extension(other).map(RegionFormat::Image),
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            RegionFormat::GeoTiff => "image/tiff",
            RegionFormat::Image(format) => format.content_type(),
        }
    }
}

/// A planned region read.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionWindow {
    /// Source pixels in the grid of the selected level
    pub window: PixelWindow,
    /// Output width and height
    pub shape: (u32, u32),
    /// Geo-transform of the output grid
    pub transform: GeoTransform,
}

/// Plan a region from full-resolution pixel coordinates.
///
/// `(left, top)` and `(right, bottom)` are opposite corners; the box is
/// clipped to the raster and decimated to at most `max_pixels` pixels.
///
/// # Errors
/// `TileError::Parameter` for empty boxes and boxes outside the raster.
pub fn pixel_region(
    dataset_info: &RasterInfo,
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
    max_pixels: u64,
) -> Result<RegionWindow, TileError> {
    if ![left, top, right, bottom].iter().all(|v| v.is_finite()) {
        return Err(TileError::parameter("region bounds must be finite"));
    }
    let (w, h) = (dataset_info.width as f64, dataset_info.height as f64);
    let c0 = left.min(right).floor().max(0.0);
    let c1 = left.max(right).ceil().min(w);
    let r0 = top.min(bottom).floor().max(0.0);
    let r1 = top.max(bottom).ceil().min(h);
    if c1 <= c0 || r1 <= r0 {
        return Err(TileError::parameter(format!(
            "region ({}, {}, {}, {}) does not intersect the {}x{} raster",
            left, top, right, bottom, dataset_info.width, dataset_info.height
        )));
    }

    let (span_c, span_r) = (c1 - c0, r1 - r0);
    let scale = ((span_c * span_r) / max_pixels.max(1) as f64).sqrt().max(1.0);
    let level_index = select_level(&dataset_info.levels, scale, OverviewPolicy::Finer);
    let level = &dataset_info.levels[level_index];
    let (dx, dy) = (level.downsample_x, level.downsample_y);

    let lc0 = (c0 / dx).floor() as i64;
    let lr0 = (r0 / dy).floor() as i64;
    let lc1 = ((c1 / dx).ceil() as i64).min(level.width as i64).max(lc0 + 1);
    let lr1 = ((r1 / dy).ceil() as i64).min(level.height as i64).max(lr0 + 1);
    let window = PixelWindow::new(lc0, lr0, (lc1 - lc0) as u32, (lr1 - lr0) as u32, level_index);

    let out_w = ((span_c / scale).ceil() as u32).clamp(1, window.width);
    let out_h = ((span_r / scale).ceil() as u32).clamp(1, window.height);

    let base = dataset_info.transform;
    let (ox, oy) = base.pixel_to_geo(lc0 as f64 * dx, lr0 as f64 * dy);
    let mut transform = base.scaled(
        window.width as f64 * dx / out_w as f64,
        window.height as f64 * dy / out_h as f64,
    );
    transform.origin_x = ox;
    transform.origin_y = oy;

    Ok(RegionWindow {
        window,
        shape: (out_w, out_h),
        transform,
    })
}

/// Plan a region from a box in `units`.
///
/// # Errors
/// Source errors for rasters without a CRS, parameter errors for boxes
/// outside the raster.
pub fn world_region<R: RangeReader>(
    dataset: &RasterDataset<R>,
    bounds: &Bounds,
    units: &Crs,
    max_pixels: u64,
) -> Result<RegionWindow, TileError> {
    let georef = dataset.require_georeference()?;
    if !bounds.is_valid() {
        return Err(TileError::parameter(format!("invalid region bounds {:?}", bounds)));
    }
    let native = Reprojector::new(units, &georef.crs)?
        .transform_bounds(bounds)
        .map_err(|e| TileError::parameter(e.to_string()))?;
    let info = dataset.info();
    let pixels = Bounds::from_points(
        [
            (native.left, native.top),
            (native.right, native.top),
            (native.left, native.bottom),
            (native.right, native.bottom),
        ]
        .into_iter()
        .map(|(x, y)| info.transform.geo_to_pixel(x, y)),
    )
    .ok_or_else(|| TileError::parameter("empty region"))?;
    // In pixel space `bottom` is the smallest row.
    pixel_region(info, pixels.left, pixels.bottom, pixels.right, pixels.top, max_pixels)
}

/// Raw samples of every band of `region` as a deflate-compressed GeoTIFF.
///
/// # Errors
/// Read failures and encoder failures.
pub async fn extract_geotiff<R: RangeReader>(
    dataset: &RasterDataset<R>,
    region: &RegionWindow,
) -> Result<Bytes, TileError> {
    let info = dataset.info();
    let bands: Vec<usize> = (1..=info.band_count).collect();
    let buffer = dataset
        .read_window(&region.window, &bands, Some(region.shape))
        .await?;

    let layout = GeoTiffLayout {
        dtype: info.dtype,
        transform: region.transform,
        crs: info.crs.clone(),
        nodata: info.nodata,
        alpha_band: info.alpha_band,
        rgb: info.color_interpretation.first() == Some(&"red"),
        palette: dataset.palette().map(<[_]>::to_vec),
    };
    debug!(
        identifier = dataset.identifier(),
        level = region.window.level,
        shape = ?region.shape,
        "Extracting GeoTIFF region"
    );

    let bytes = tokio::task::spawn_blocking(move || write_geotiff(&buffer, &layout))
        .await
        .map_err(|e| TileError::Internal {
            message: format!("GeoTIFF task failed: {}", e),
        })??;
    Ok(Bytes::from(bytes))
}

/// Styled rendering of `region`.
pub async fn render_region<R: RangeReader>(
    dataset: &RasterDataset<R>,
    region: &RegionWindow,
    params: &RenderParams,
) -> Result<RgbaImage, TileError> {
    render_pixels(dataset, &region.window, region.shape, params).await
}

// =============================================================================
// GeoTIFF writer
// =============================================================================

/// Everything besides the samples that goes into the file.
#[derive(Debug, Clone)]
pub struct GeoTiffLayout {
    pub dtype: DataType,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
    pub nodata: Option<f64>,
    /// 1-based
    pub alpha_band: Option<usize>,
    pub rgb: bool,
    pub palette: Option<Vec<[u8; 4]>>,
}

fn encode_error(e: impl std::fmt::Display) -> TileError {
    TileError::Encode {
        message: format!("GeoTIFF: {}", e),
    }
}

fn push_sample(out: &mut Vec<u8>, dtype: DataType, v: f64) {
    match dtype {
        DataType::Uint8 => out.push(v as u8),
        DataType::Int8 => out.extend_from_slice(&(v as i8).to_ne_bytes()),
        DataType::Uint16 => out.extend_from_slice(&(v as u16).to_ne_bytes()),
        DataType::Int16 => out.extend_from_slice(&(v as i16).to_ne_bytes()),
        DataType::Uint32 => out.extend_from_slice(&(v as u32).to_ne_bytes()),
        DataType::Int32 => out.extend_from_slice(&(v as i32).to_ne_bytes()),
        DataType::Float32 => out.extend_from_slice(&(v as f32).to_ne_bytes()),
        DataType::Float64 => out.extend_from_slice(&v.to_ne_bytes()),
    }
}

/// Encode `buffer` as a chunky, strip-organized GeoTIFF.
///
/// Pixels outside the raster (NaN) are written as the nodata value when the
/// data type cannot hold NaN.
pub fn write_geotiff(buffer: &BandBuffer, layout: &GeoTiffLayout) -> Result<Vec<u8>, TileError> {
    let (width, height) = (buffer.width, buffer.height);
    let bands = buffer.bands.len();
    let fill = if layout.dtype.is_float() {
        f64::NAN
    } else {
        layout.nodata.unwrap_or(0.0)
    };

    let mut strips = Vec::new();
    let mut row = 0;
    while row < height {
        let rows = ROWS_PER_STRIP.min(height - row);
        let mut raw = Vec::with_capacity(rows as usize * width as usize * bands * 8);
        for r in row..row + rows {
            for c in 0..width {
                for band in 0..bands {
                    let v = buffer.get(band, c, r);
                    push_sample(&mut raw, layout.dtype, if v.is_nan() { fill } else { v });
                }
            }
        }
        let mut z = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        z.write_all(&raw).map_err(encode_error)?;
        strips.push(z.finish().map_err(encode_error)?);
        row += rows;
    }

    let mut cursor = Cursor::new(Vec::new());
    let mut encoder = TiffEncoder::new(&mut cursor).map_err(encode_error)?;
    let mut dir = encoder.new_directory().map_err(encode_error)?;

    let photometric: u16 = if layout.palette.is_some() && bands == 1 {
        3
    } else if layout.rgb && bands >= 3 {
        2
    } else {
        1
    };
    let color_samples = if photometric == 2 { 3 } else { 1 };
    let extra: Vec<u16> = (color_samples + 1..=bands)
        .map(|b| if Some(b) == layout.alpha_band { 2 } else { 0 })
        .collect();

    dir.write_tag(Tag::ImageWidth, width).map_err(encode_error)?;
    dir.write_tag(Tag::ImageLength, height).map_err(encode_error)?;
    dir.write_tag(Tag::BitsPerSample, &vec![layout.dtype.bits(); bands][..])
        .map_err(encode_error)?;
    dir.write_tag(Tag::Compression, 8u16).map_err(encode_error)?;
    dir.write_tag(Tag::PhotometricInterpretation, photometric)
        .map_err(encode_error)?;
    dir.write_tag(Tag::SamplesPerPixel, bands as u16).map_err(encode_error)?;
    dir.write_tag(Tag::SampleFormat, &vec![layout.dtype.sample_format().code(); bands][..])
        .map_err(encode_error)?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16).map_err(encode_error)?;
    if !extra.is_empty() {
        dir.write_tag(Tag::ExtraSamples, &extra[..]).map_err(encode_error)?;
    }
    if let (Some(palette), 3) = (&layout.palette, photometric) {
        let n = 1usize << layout.dtype.bits().min(16);
        let mut map = vec![0u16; 3 * n];
        for (i, entry) in palette.iter().take(n).enumerate() {
            for channel in 0..3 {
                map[channel * n + i] = entry[channel] as u16 * 257;
            }
        }
        dir.write_tag(Tag::Unknown(TAG_COLOR_MAP), &map[..]).map_err(encode_error)?;
    }

    let mut offsets = Vec::with_capacity(strips.len());
    let mut counts = Vec::with_capacity(strips.len());
    for strip in &strips {
        offsets.push(dir.write_data(&strip[..]).map_err(encode_error)? as u32);
        counts.push(strip.len() as u32);
    }
    dir.write_tag(Tag::RowsPerStrip, ROWS_PER_STRIP.min(height.max(1)))
        .map_err(encode_error)?;
    dir.write_tag(Tag::StripOffsets, &offsets[..]).map_err(encode_error)?;
    dir.write_tag(Tag::StripByteCounts, &counts[..]).map_err(encode_error)?;

    let t = layout.transform;
    if t.is_rectilinear() && t.pixel_height < 0.0 {
        dir.write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &[t.pixel_width, -t.pixel_height, 0.0][..])
            .map_err(encode_error)?;
        dir.write_tag(
            Tag::Unknown(TAG_MODEL_TIEPOINT),
            &[0.0, 0.0, 0.0, t.origin_x, t.origin_y, 0.0][..],
        )
        .map_err(encode_error)?;
    } else {
        let matrix = [
            t.pixel_width, t.row_rotation, 0.0, t.origin_x, //
            t.col_rotation, t.pixel_height, 0.0, t.origin_y, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::Unknown(TAG_MODEL_TRANSFORMATION), &matrix[..])
            .map_err(encode_error)?;
    }
    if let Some(crs) = &layout.crs {
        let (model, key) = if crs.geographic {
            (2u16, KEY_GEOGRAPHIC_TYPE)
        } else {
            (1u16, KEY_PROJECTED_TYPE)
        };
        let keys: [u16; 16] = [
            1, 1, 0, 3, //
            KEY_MODEL_TYPE, 0, 1, model, //
            KEY_RASTER_TYPE, 0, 1, 1, //
            key, 0, 1, crs.epsg,
        ];
        dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &keys[..])
            .map_err(encode_error)?;
    }
    if let Some(nodata) = layout.nodata {
        dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), format!("{}", nodata).as_str())
            .map_err(encode_error)?;
    }
    dir.finish().map_err(encode_error)?;
    drop(encoder);
    Ok(cursor.into_inner())
}
