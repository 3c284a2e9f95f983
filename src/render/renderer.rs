//! Turning a planned window into RGBA pixels.
//!
//! ```text
//!   output pixel center ──▶ target CRS ──▶ native CRS ──▶ level pixel ──▶ buffer
//!        (i + .5, j + .5)      bounds      Reprojector    level affine    read_window
//! ```
//!
//! Reprojection runs only on a coarse grid of nodes every [`GRID_STEP`]
//! output pixels; positions in between are interpolated. Sampling, stretch
//! and color lookup then run on a blocking thread.

use tracing::debug;

use crate::error::TileError;
use crate::geo::{PixelWindow, Reprojector, WindowPlan};
use crate::io::RangeReader;
use crate::raster::{is_valid_sample, BandBuffer, DataType, RasterDataset};

use super::colormap::Colormap;
use super::params::{ColorScheme, RenderParams, Resampling};
use super::resample::{sample, Plane};

/// Output pixels between exactly reprojected grid nodes.
pub const GRID_STEP: u32 = 16;

/// Reads are decimated to at most this many source pixels per output pixel.
const MAX_READ_OVERSAMPLE: u32 = 2;

// =============================================================================
// RgbaImage
// =============================================================================

/// An 8-bit RGBA raster, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaImage {
    /// A fully transparent image.
    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    fn set(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    pub fn is_transparent(&self) -> bool {
        self.data.chunks_exact(4).all(|p| p[3] == 0)
    }
}

// =============================================================================
// Style
// =============================================================================

/// How samples become colors, resolved once per request.
#[derive(Debug, Clone)]
pub struct Style {
    /// Bands shown, 1-based
    pub bands: Vec<usize>,
    alpha_band: Option<usize>,
    /// Per-band stretch range; `None` shows values as bytes
    ranges: Option<Vec<(f64, f64)>>,
    colormap: Option<Colormap>,
    /// Raw values index the dataset's own color map
    palette_lookup: bool,
    nodata: Option<f64>,
    resampling: Resampling,
    alpha_dtype: DataType,
}

impl Style {
    /// Resolve bands, stretch and colors for `params` against `dataset`.
    ///
    /// # Errors
    /// `TileError::Parameter` for unknown bands, a band count other than 1
    /// or 3, a colormap on 3 bands, and stretch lists of the wrong length.
    pub async fn resolve<R: RangeReader>(
        dataset: &RasterDataset<R>,
        params: &RenderParams,
    ) -> Result<Self, TileError> {
        let info = dataset.info();
        let bands = params.bands.clone().unwrap_or_else(|| info.default_bands());
        if let Some(bad) = bands.iter().find(|&&b| b == 0 || b > info.band_count) {
            return Err(TileError::parameter(format!(
                "band {} does not exist, raster has {} band(s)",
                bad, info.band_count
            )));
        }
        if bands.len() != 1 && bands.len() != 3 {
            return Err(TileError::parameter(format!(
                "expected 1 or 3 bands, got {}",
                bands.len()
            )));
        }
        if bands.len() == 3 && params.colormap.is_some() {
            return Err(TileError::parameter("a colormap applies to single-band output only"));
        }

        let palette_lookup = params.colormap.is_none() && bands == [1] && dataset.palette().is_some();
        let colormap = if bands.len() == 3 {
            None
        } else if palette_lookup {
            dataset.palette().map(Colormap::from_palette)
        } else {
            let base = match &params.colormap {
                Some(spec) => Colormap::parse(spec)?,
                None => Colormap::gray(),
            };
            Some(match params.scheme {
                ColorScheme::Linear => base,
                ColorScheme::Discrete => base.discrete(params.n_colors),
            })
        };

        let ranges = if palette_lookup {
            None
        } else {
            stretch_ranges(dataset, &bands, params).await?
        };

        Ok(Self {
            alpha_band: info.alpha_band.filter(|a| !bands.contains(a)),
            bands,
            ranges,
            colormap,
            palette_lookup,
            nodata: params.nodata.or(info.nodata),
            resampling: params.resampling,
            alpha_dtype: info.dtype,
        })
    }

    /// Bands to read: the shown bands then the alpha band.
    pub fn read_bands(&self) -> Vec<usize> {
        let mut bands = self.bands.clone();
        bands.extend(self.alpha_band);
        bands
    }

    fn to_byte(&self, slot: usize, v: f64) -> u8 {
        match self.ranges.as_ref().and_then(|r| r.get(slot)) {
            None => v.round().clamp(0.0, 255.0) as u8,
            Some(&(lo, hi)) if hi > lo => ((v - lo) / (hi - lo) * 255.0).round().clamp(0.0, 255.0) as u8,
            Some(&(_, hi)) => {
                if v >= hi {
                    255
                } else {
                    0
                }
            }
        }
    }

    fn alpha(&self, v: f64) -> u8 {
        if v.is_nan() {
            return 0;
        }
        let scaled = match self.alpha_dtype {
            DataType::Uint16 => v / 257.0,
            _ => v,
        };
        scaled.round().clamp(0.0, 255.0) as u8
    }

    /// Color of one pixel from its band values, alpha value last if read.
    fn color(&self, values: &[f64]) -> [u8; 4] {
        let shown = &values[..self.bands.len()];
        if shown.iter().any(|v| v.is_nan())
            || shown.iter().all(|&v| !is_valid_sample(v, self.nodata))
        {
            return [0, 0, 0, 0];
        }

        let mut rgba = if self.palette_lookup {
            let v = shown[0].round();
            if !(0.0..=255.0).contains(&v) {
                return [0, 0, 0, 0];
            }
            self.colormap
                .as_ref()
                .map(|c| c.get(v as u8))
                .unwrap_or([0, 0, 0, 0])
        } else if let Some(colormap) = &self.colormap {
            colormap.get(self.to_byte(0, shown[0]))
        } else {
            [
                self.to_byte(0, shown[0]),
                self.to_byte(1, shown[1]),
                self.to_byte(2, shown[2]),
                255,
            ]
        };

        if self.alpha_band.is_some() {
            if let Some(&a) = values.get(self.bands.len()) {
                rgba[3] = rgba[3].min(self.alpha(a));
            }
        }
        rgba
    }
}

/// Stretch range per shown band, `None` to show values as bytes.
///
/// Byte data without explicit bounds is shown as-is; everything else falls
/// back to dataset statistics for missing bounds.
async fn stretch_ranges<R: RangeReader>(
    dataset: &RasterDataset<R>,
    bands: &[usize],
    params: &RenderParams,
) -> Result<Option<Vec<(f64, f64)>>, TileError> {
    let explicit = !params.vmin.is_empty() || !params.vmax.is_empty();
    if !explicit && dataset.info().dtype == DataType::Uint8 {
        return Ok(None);
    }

    let pick = |values: &[f64], name: &str, i: usize| -> Result<Option<f64>, TileError> {
        match values.len() {
            0 => Ok(None),
            1 => Ok(Some(values[0])),
            n if n == bands.len() => Ok(Some(values[i])),
            n => Err(TileError::parameter(format!(
                "{} has {} values for {} band(s)",
                name,
                n,
                bands.len()
            ))),
        }
    };

    let needs_stats = params.vmin.is_empty() || params.vmax.is_empty();
    let stats = if needs_stats {
        Some(dataset.statistics().await?)
    } else {
        None
    };

    let mut ranges = Vec::with_capacity(bands.len());
    for (i, &band) in bands.iter().enumerate() {
        let stat = stats.and_then(|s| s.get(band - 1));
        let lo = match pick(&params.vmin, "vmin", i)? {
            Some(v) => v,
            None => stat.map(|s| s.min).unwrap_or(0.0),
        };
        let hi = match pick(&params.vmax, "vmax", i)? {
            Some(v) => v,
            None => stat.map(|s| s.max).unwrap_or(255.0),
        };
        if lo > hi {
            return Err(TileError::parameter(format!(
                "vmin {} is greater than vmax {} for band {}",
                lo, hi, band
            )));
        }
        ranges.push((lo, hi));
    }
    Ok(Some(ranges))
}

// =============================================================================
// Coordinate grid
// =============================================================================

/// Level pixel positions of output pixels, exact on nodes and interpolated
/// in between.
struct CoordinateGrid {
    width: u32,
    height: u32,
    columns: usize,
    rows: usize,
    nodes: Vec<(f64, f64)>,
}

impl CoordinateGrid {
    fn build(plan: &WindowPlan, to_native: &Reprojector, width: u32, height: u32) -> Self {
        let columns = width.div_ceil(GRID_STEP) as usize + 1;
        let rows = height.div_ceil(GRID_STEP) as usize + 1;
        let bounds = plan.target_bounds;
        let mut nodes = Vec::with_capacity(columns * rows);
        for kv in 0..rows {
            let v = node(kv, height);
            let y = bounds.top - v / height as f64 * bounds.height();
            for ku in 0..columns {
                let u = node(ku, width);
                let x = bounds.left + u / width as f64 * bounds.width();
                nodes.push(match to_native.transform(x, y) {
                    Ok((nx, ny)) => plan.level_transform.geo_to_pixel(nx, ny),
                    Err(_) => (f64::NAN, f64::NAN),
                });
            }
        }
        Self {
            width,
            height,
            columns,
            rows,
            nodes,
        }
    }

    /// Level pixel position of the center of output pixel `(i, j)`.
    fn position(&self, i: u32, j: u32) -> (f64, f64) {
        let (ku, tu) = locate(i as f64 + 0.5, self.width, self.columns);
        let (kv, tv) = locate(j as f64 + 0.5, self.height, self.rows);
        let at = |ku: usize, kv: usize| self.nodes[kv * self.columns + ku];
        let (a, b, c, d) = (at(ku, kv), at(ku + 1, kv), at(ku, kv + 1), at(ku + 1, kv + 1));
        let lerp = |p: f64, q: f64, t: f64| p + (q - p) * t;
        (
            lerp(lerp(a.0, b.0, tu), lerp(c.0, d.0, tu), tv),
            lerp(lerp(a.1, b.1, tu), lerp(c.1, d.1, tu), tv),
        )
    }
}

fn node(k: usize, size: u32) -> f64 {
    (k as u32 * GRID_STEP).min(size) as f64
}

/// Cell index and fraction of output coordinate `u`.
fn locate(u: f64, size: u32, count: usize) -> (usize, f64) {
    let k = ((u / GRID_STEP as f64) as usize).min(count.saturating_sub(2));
    let (u0, u1) = (node(k, size), node(k + 1, size));
    let t = if u1 > u0 { (u - u0) / (u1 - u0) } else { 0.0 };
    (k, t)
}

// =============================================================================
// Rendering
// =============================================================================

fn paint(
    style: &Style,
    buffer: &BandBuffer,
    width: u32,
    height: u32,
    position: impl Fn(u32, u32) -> (f64, f64),
) -> RgbaImage {
    let mut image = RgbaImage::transparent(width, height);
    let planes: Vec<Plane<'_>> = (0..buffer.bands.len())
        .map(|i| Plane {
            data: buffer.band(i),
            width: buffer.width as usize,
            height: buffer.height as usize,
        })
        .collect();
    let shown = style.bands.len();
    let mut values = vec![0.0; planes.len()];

    for j in 0..height {
        for i in 0..width {
            let (x, y) = position(i, j);
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            for (slot, plane) in planes.iter().enumerate() {
                let resampling = if slot < shown {
                    style.resampling
                } else {
                    Resampling::Nearest
                };
                values[slot] = sample(*plane, x, y, resampling, style.nodata);
            }
            image.set(i, j, style.color(&values));
        }
    }
    image
}

/// Render `plan` into a `width` x `height` image.
///
/// `to_native` maps the plan's target CRS into the raster CRS.
///
/// # Errors
/// Style resolution failures and read failures of the touched blocks.
pub async fn render_window<R: RangeReader>(
    dataset: &RasterDataset<R>,
    plan: &WindowPlan,
    to_native: &Reprojector,
    width: u32,
    height: u32,
    params: &RenderParams,
) -> Result<RgbaImage, TileError> {
    let style = Style::resolve(dataset, params).await?;
    let window = plan.window;
    let shape = (
        window.width.min(width.saturating_mul(MAX_READ_OVERSAMPLE)).max(1),
        window.height.min(height.saturating_mul(MAX_READ_OVERSAMPLE)).max(1),
    );
    let buffer = dataset
        .read_window(&window, &style.read_bands(), Some(shape))
        .await?;
    let grid = CoordinateGrid::build(plan, to_native, width, height);

    debug!(
        identifier = dataset.identifier(),
        level = window.level,
        window = ?(window.col_off, window.row_off, window.width, window.height),
        shape = ?shape,
        "Rendering window"
    );

    tokio::task::spawn_blocking(move || {
        paint(&style, &buffer, width, height, |i, j| {
            let (col, row) = grid.position(i, j);
            buffer.buffer_position(col, row)
        })
    })
    .await
    .map_err(|e| TileError::Internal {
        message: format!("render task failed: {}", e),
    })
}

/// Render `window` read straight into a `width` x `height` image.
///
/// # Errors
/// Style resolution failures and read failures.
pub async fn render_pixels<R: RangeReader>(
    dataset: &RasterDataset<R>,
    window: &PixelWindow,
    (width, height): (u32, u32),
    params: &RenderParams,
) -> Result<RgbaImage, TileError> {
    let style = Style::resolve(dataset, params).await?;
    let buffer = dataset
        .read_window(window, &style.read_bands(), Some((width, height)))
        .await?;

    tokio::task::spawn_blocking(move || {
        paint(&style, &buffer, width, height, |i, j| {
            (i as f64 + 0.5, j as f64 + 0.5)
        })
    })
    .await
    .map_err(|e| TileError::Internal {
        message: format!("render task failed: {}", e),
    })
}

/// Render the whole raster at most `max_size` pixels on the long side.
pub async fn render_preview<R: RangeReader>(
    dataset: &RasterDataset<R>,
    max_size: u32,
    params: &RenderParams,
) -> Result<RgbaImage, TileError> {
    let (window, shape) = dataset.preview_window(max_size);
    render_pixels(dataset, &window, shape, params).await
}
