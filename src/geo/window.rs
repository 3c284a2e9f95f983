//! Mapping tiles and boxes onto source pixels.
//!
//! ```text
//!   target box ──densify──▶ native box ──inverse affine──▶ pixel box
//!                                                             │
//!                          pick level (decimation <= needed) ◀┘
//!                                                             │
//!                          clip to [0, w) x [0, h) + 1px margin
//! ```
//!
//! A box that misses the raster yields [`TileWindow::Empty`] rather than an
//! error, so out-of-extent tiles render transparent.

use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::error::TileError;
use crate::raster::{LevelInfo, RasterInfo};

use super::mercator::{self, zoom_for_pixel_size, HALF_EARTH};
use super::{Bounds, GeoTransform, Georeference, Reprojector};

/// Slack when comparing a level's decimation with the needed one, so an
/// overview that is a hair coarser than needed still counts.
const LEVEL_TOLERANCE: f64 = 1.01;

/// Deepest zoom the zoom range search considers.
const MAX_NATIVE_ZOOM: u32 = 24;

// =============================================================================
// PixelWindow
// =============================================================================

/// A rectangle of source pixels in the grid of one resolution level.
///
/// Offsets may be negative or exceed the level: reads clip them and fill
/// the outside with nodata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelWindow {
    pub col_off: i64,
    pub row_off: i64,
    pub width: u32,
    pub height: u32,
    /// Index into the raster's levels, 0 = full resolution
    pub level: usize,
}

impl PixelWindow {
    pub fn new(col_off: i64, row_off: i64, width: u32, height: u32, level: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
            level,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Part of the window inside a `width` x `height` level.
    pub fn clip(&self, width: u32, height: u32) -> Option<PixelWindow> {
        let c0 = self.col_off.max(0);
        let r0 = self.row_off.max(0);
        let c1 = (self.col_off + self.width as i64).min(width as i64);
        let r1 = (self.row_off + self.height as i64).min(height as i64);
        if c1 <= c0 || r1 <= r0 {
            return None;
        }
        Some(PixelWindow::new(c0, r0, (c1 - c0) as u32, (r1 - r0) as u32, self.level))
    }

    /// Fractional pixel coordinates of the window center.
    pub fn center(&self) -> (f64, f64) {
        (
            self.col_off as f64 + self.width as f64 / 2.0,
            self.row_off as f64 + self.height as f64 / 2.0,
        )
    }
}

// =============================================================================
// Level selection
// =============================================================================

/// How a resolution level is chosen for a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverviewPolicy {
    /// Coarsest level that is still at least as fine as the output
    #[default]
    Finer,
    /// Level closest to the output resolution, finer or coarser
    Nearest,
    /// Always full resolution
    Full,
}

impl FromStr for OverviewPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "finer" | "auto" => Ok(OverviewPolicy::Finer),
            "nearest" => Ok(OverviewPolicy::Nearest),
            "full" | "none" => Ok(OverviewPolicy::Full),
            other => Err(format!("unknown overview policy '{}'", other)),
        }
    }
}

fn decimation(level: &LevelInfo) -> f64 {
    level.downsample_x.max(level.downsample_y)
}

/// Pick the level to read when each output pixel covers `needed` base pixels.
///
/// Levels are ordered finest first.
pub fn select_level(levels: &[LevelInfo], needed: f64, policy: OverviewPolicy) -> usize {
    if levels.is_empty() || !needed.is_finite() {
        return 0;
    }
    match policy {
        OverviewPolicy::Full => 0,
        OverviewPolicy::Finer => levels
            .iter()
            .enumerate()
            .filter(|(_, level)| decimation(level) <= needed * LEVEL_TOLERANCE)
            .map(|(i, _)| i)
            .last()
            .unwrap_or(0),
        OverviewPolicy::Nearest => {
            let target = needed.max(1.0).ln();
            levels
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    let da = (decimation(a).ln() - target).abs();
                    let db = (decimation(b).ln() - target).abs();
                    da.total_cmp(&db)
                })
                .map(|(i, _)| i)
                .unwrap_or(0)
        }
    }
}

// =============================================================================
// Window planning
// =============================================================================

/// A planned read: which pixels to fetch and how they map back to the CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowPlan {
    pub window: PixelWindow,
    /// Geo-transform of the selected level
    pub level_transform: GeoTransform,
    /// The box being rendered, in the target CRS
    pub target_bounds: Bounds,
}

/// Outcome of mapping a tile onto the raster.
#[derive(Debug, Clone, PartialEq)]
pub enum TileWindow {
    /// The tile does not touch the raster
    Empty,
    Window(WindowPlan),
}

/// Plan the read for `target_bounds` rendered at `out_width` x `out_height`.
///
/// `to_native` maps target coordinates into the raster CRS.
pub fn plan_window(
    info: &RasterInfo,
    to_native: &Reprojector,
    target_bounds: &Bounds,
    out_width: u32,
    out_height: u32,
    policy: OverviewPolicy,
) -> TileWindow {
    if out_width == 0 || out_height == 0 || !target_bounds.is_valid() {
        return TileWindow::Empty;
    }

    let native = match to_native.transform_bounds(target_bounds) {
        Ok(native) => native,
        Err(e) => {
            debug!(identifier = %info.identifier, error = %e, "Box has no image in raster CRS");
            return TileWindow::Empty;
        }
    };

    let corners = [
        (native.left, native.top),
        (native.right, native.top),
        (native.left, native.bottom),
        (native.right, native.bottom),
    ];
    let pixel = match Bounds::from_points(
        corners
            .into_iter()
            .map(|(x, y)| info.transform.geo_to_pixel(x, y)),
    ) {
        Some(p) if p.is_valid() => p,
        _ => return TileWindow::Empty,
    };
    // In pixel space `bottom` is the smallest row.
    let (c0, r0, c1, r1) = (pixel.left, pixel.bottom, pixel.right, pixel.top);
    let (w, h) = (info.width as f64, info.height as f64);
    if c1 <= 0.0 || r1 <= 0.0 || c0 >= w || r0 >= h {
        return TileWindow::Empty;
    }

    let needed = ((c1 - c0) / out_width as f64).min((r1 - r0) / out_height as f64);
    let level_index = select_level(&info.levels, needed, policy);
    let level = match info.levels.get(level_index) {
        Some(level) => level,
        None => return TileWindow::Empty,
    };

    let (dx, dy) = (level.downsample_x, level.downsample_y);
    let lw = level.width as i64;
    let lh = level.height as i64;
    // One extra pixel on each side feeds bilinear sampling at the edges.
    let lc0 = ((c0.max(0.0) / dx).floor() as i64 - 1).max(0);
    let lr0 = ((r0.max(0.0) / dy).floor() as i64 - 1).max(0);
    let lc1 = ((c1.min(w) / dx).ceil() as i64 + 1).min(lw);
    let lr1 = ((r1.min(h) / dy).ceil() as i64 + 1).min(lh);
    if lc1 <= lc0 || lr1 <= lr0 {
        return TileWindow::Empty;
    }

    TileWindow::Window(WindowPlan {
        window: PixelWindow::new(lc0, lr0, (lc1 - lc0) as u32, (lr1 - lr0) as u32, level_index),
        level_transform: info.transform.scaled(dx, dy),
        target_bounds: *target_bounds,
    })
}

/// Map web-mercator tile `(z, x, y)` onto the raster.
///
/// # Errors
/// `TileError::TileOutOfRange` for indices outside the pyramid and a
/// parameter error for a zero tile size.
pub fn tile_to_window(
    info: &RasterInfo,
    georef: &Georeference,
    z: u32,
    x: u32,
    y: u32,
    tile_size: u32,
    policy: OverviewPolicy,
) -> Result<TileWindow, TileError> {
    if !mercator::is_valid_tile(z, x, y) {
        return Err(TileError::TileOutOfRange { z, x, y });
    }
    if tile_size == 0 {
        return Err(TileError::parameter("tile size must be positive"));
    }
    let bounds = mercator::tile_bounds(z, x, y);
    Ok(plan_window(
        info,
        &georef.from_mercator,
        &bounds,
        tile_size,
        tile_size,
        policy,
    ))
}

// =============================================================================
// Zoom range
// =============================================================================

/// Zoom levels at which the raster is worth displaying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ZoomRange {
    pub min_zoom: u32,
    pub max_zoom: u32,
    pub default_zoom: u32,
}

/// Zoom range for web-mercator tiles of `tile_size` pixels.
///
/// `max_zoom` is the finest zoom not finer than the native resolution,
/// `min_zoom` the zoom at which the whole raster fits one tile.
pub fn zoom_range(info: &RasterInfo, georef: &Georeference, tile_size: u32) -> ZoomRange {
    let merc = match georef.to_mercator.transform_bounds(&info.bounds) {
        Ok(b) => Bounds::new(
            b.left.max(-HALF_EARTH),
            b.bottom.max(-HALF_EARTH),
            b.right.min(HALF_EARTH),
            b.top.min(HALF_EARTH),
        ),
        Err(_) => {
            return ZoomRange {
                min_zoom: 0,
                max_zoom: 0,
                default_zoom: 0,
            }
        }
    };

    let resolution = (merc.width() / info.width.max(1) as f64)
        .max(merc.height() / info.height.max(1) as f64);
    let max_zoom = zoom_for_pixel_size(resolution, tile_size, MAX_NATIVE_ZOOM);
    let overview_resolution =
        resolution * info.width.max(info.height) as f64 / tile_size.max(1) as f64;
    let min_zoom = zoom_for_pixel_size(overview_resolution, tile_size, MAX_NATIVE_ZOOM).min(max_zoom);

    ZoomRange {
        min_zoom,
        max_zoom,
        default_zoom: min_zoom,
    }
}
