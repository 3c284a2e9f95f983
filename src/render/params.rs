//! Rendering parameters and their query-string form.
//!
//! ```text
//!   ?band=1&colormap=viridis&vmin=0&vmax=3000&resampling=bilinear
//!   ?band=4,3,2&vmin=0,0,0&vmax=2000,1800,1500&nodata=0
//!   ?colormap=%23000000,%23ff0000&scheme=discrete&n_colors=5
//! ```
//!
//! Every field takes part in the tile fingerprint through
//! [`RenderParams::canonical`], so two requests that differ in any field
//! never share a cache entry.

use std::str::FromStr;

use serde::Serialize;

use crate::error::TileError;

/// Default output edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Largest tile edge accepted from a query.
pub const MAX_TILE_SIZE: u32 = 2048;

/// Default number of classes of the discrete scheme.
pub const DEFAULT_N_COLORS: u32 = 255;

// =============================================================================
// Enumerations
// =============================================================================

/// How source pixels are interpolated onto output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    /// Weighted over valid neighbours only
    Bilinear,
}

impl Resampling {
    pub fn name(self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
        }
    }
}

impl FromStr for Resampling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Resampling::Nearest),
            "bilinear" | "linear" => Ok(Resampling::Bilinear),
            other => Err(format!("unknown resampling '{}'", other)),
        }
    }
}

/// Output image encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    /// Parse a path extension such as `png`, `jpg` or `jpeg`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }
}

/// Continuous ramp or `n_colors` flat classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Linear,
    Discrete,
}

impl FromStr for ColorScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(ColorScheme::Linear),
            "discrete" => Ok(ColorScheme::Discrete),
            other => Err(format!("unknown scheme '{}'", other)),
        }
    }
}

// =============================================================================
// RenderParams
// =============================================================================

/// Everything that decides how a window becomes pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderParams {
    /// 1-based bands; `None` picks the raster's defaults
    pub bands: Option<Vec<usize>>,
    /// Palette name or comma-separated hex colors
    pub colormap: Option<String>,
    /// Lower stretch bound, one value for all bands or one per band
    pub vmin: Vec<f64>,
    /// Upper stretch bound, one value for all bands or one per band
    pub vmax: Vec<f64>,
    pub resampling: Resampling,
    /// Overrides the raster's own nodata value
    pub nodata: Option<f64>,
    pub tile_size: u32,
    pub format: ImageFormat,
    pub scheme: ColorScheme,
    pub n_colors: u32,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            bands: None,
            colormap: None,
            vmin: Vec::new(),
            vmax: Vec::new(),
            resampling: Resampling::default(),
            nodata: None,
            tile_size: DEFAULT_TILE_SIZE,
            format: ImageFormat::default(),
            scheme: ColorScheme::default(),
            n_colors: DEFAULT_N_COLORS,
        }
    }
}

fn bad(key: &str, value: &str, reason: impl std::fmt::Display) -> TileError {
    TileError::parameter(format!("{}={}: {}", key, value, reason))
}

fn parse_list<T: FromStr>(key: &str, value: &str) -> Result<Vec<T>, TileError>
where
    T::Err: std::fmt::Display,
{
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|e| bad(key, value, e)))
        .collect()
}

fn parse_float(key: &str, value: &str) -> Result<f64, TileError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(bad(key, value, "must be finite")),
        Err(e) => Err(bad(key, value, e)),
    }
}

impl RenderParams {
    /// Apply query pairs on top of `defaults`.
    ///
    /// Repeated `band` keys accumulate, so `band=1&band=2&band=3` equals
    /// `band=1,2,3`. Keys that are not rendering parameters are ignored.
    ///
    /// # Errors
    /// `TileError::Parameter` for values that do not parse or are out of range.
    pub fn from_query(pairs: &[(String, String)], defaults: &RenderParams) -> Result<Self, TileError> {
        let mut params = defaults.clone();
        let mut bands: Vec<usize> = Vec::new();

        for (key, value) in pairs {
            let value = value.trim();
            match key.as_str() {
                "band" | "bands" | "indexes" => bands.extend(parse_list::<usize>(key, value)?),
                "colormap" | "palette" | "cmap" => {
                    params.colormap = (!value.is_empty()).then(|| value.to_ascii_lowercase());
                }
                "vmin" | "min" => params.vmin = parse_float_list(key, value)?,
                "vmax" | "max" => params.vmax = parse_float_list(key, value)?,
                "resampling" => params.resampling = value.parse().map_err(|e| bad(key, value, e))?,
                "nodata" => {
                    params.nodata = match value.to_ascii_lowercase().as_str() {
                        "" | "none" => None,
                        "nan" => Some(f64::NAN),
                        _ => Some(parse_float(key, value)?),
                    };
                }
                "tile_size" | "tilesize" => {
                    let size: u32 = value.parse().map_err(|e| bad(key, value, e))?;
                    if size == 0 || size > MAX_TILE_SIZE {
                        return Err(bad(key, value, format!("must be in 1..={}", MAX_TILE_SIZE)));
                    }
                    params.tile_size = size;
                }
                "scheme" => params.scheme = value.parse().map_err(|e| bad(key, value, e))?,
                "n_colors" => {
                    let n: u32 = value.parse().map_err(|e| bad(key, value, e))?;
                    if !(2..=256).contains(&n) {
                        return Err(bad(key, value, "must be in 2..=256"));
                    }
                    params.n_colors = n;
                }
                _ => {}
            }
        }

        if !bands.is_empty() {
            if bands.contains(&0) {
                return Err(TileError::parameter("band indices are 1-based"));
            }
            params.bands = Some(bands);
        }
        Ok(params)
    }

    /// Stable text form of every field, used for fingerprints.
    pub fn canonical(&self) -> String {
        let join = |values: &[f64]| {
            values
                .iter()
                .map(|v| format!("{:?}", v))
                .collect::<Vec<_>>()
                .join(",")
        };
        let bands = self
            .bands
            .as_ref()
            .map(|b| b.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
            .unwrap_or_default();
        format!(
            "bands={};colormap={};vmin={};vmax={};resampling={};nodata={};tile_size={};format={};scheme={};n_colors={}",
            bands,
            self.colormap.as_deref().unwrap_or(""),
            join(&self.vmin),
            join(&self.vmax),
            self.resampling.name(),
            self.nodata.map(|v| format!("{:?}", v)).unwrap_or_default(),
            self.tile_size,
            self.format.extension(),
            match self.scheme {
                ColorScheme::Linear => "linear",
                ColorScheme::Discrete => "discrete",
            },
            self.n_colors,
        )
    }
}

fn parse_float_list(key: &str, value: &str) -> Result<Vec<f64>, TileError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| parse_float(key, s))
        .collect()
}
