//! Coordinate and tile math.
//!
//! ```text
//!   tile (z, x, y) ──▶ mercator bounds ──▶ native CRS bounds ──▶ pixel window
//!        mercator          crs::Reprojector       transform::GeoTransform
//! ```

pub mod crs;
pub mod mercator;
pub mod transform;
pub mod window;

use serde::Serialize;

use crate::error::RasterError;

pub use crs::{Crs, Reprojector, WEB_MERCATOR, WGS84};
pub use transform::GeoTransform;
pub use window::{
    plan_window, tile_to_window, OverviewPolicy, PixelWindow, TileWindow, WindowPlan, ZoomRange,
};

/// An axis-aligned box in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Bounds {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self { left, bottom, right, top }
    }

    /// Smallest box containing every point, or `None` for no points.
    pub fn from_points(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        points.into_iter().fold(None, |acc: Option<Bounds>, (x, y)| {
            Some(match acc {
                None => Bounds::new(x, y, x, y),
                Some(b) => Bounds::new(b.left.min(x), b.bottom.min(y), b.right.max(x), b.top.max(y)),
            })
        })
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.left + self.right) / 2.0, (self.bottom + self.top) / 2.0)
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.left < other.right
            && other.left < self.right
            && self.bottom < other.top
            && other.bottom < self.top
    }

    /// Whether the box has positive finite area.
    pub fn is_valid(&self) -> bool {
        [self.left, self.bottom, self.right, self.top].iter().all(|v| v.is_finite())
            && self.right > self.left
            && self.top > self.bottom
    }
}

/// CRS of a raster plus the reprojections every request needs.
#[derive(Debug)]
pub struct Georeference {
    pub crs: Crs,
    pub to_mercator: Reprojector,
    pub from_mercator: Reprojector,
    pub to_wgs84: Reprojector,
}

impl Georeference {
    /// # Errors
    /// `RasterError::Projection` when the CRS cannot be paired with web mercator.
    pub fn new(crs: Crs) -> Result<Self, RasterError> {
        let mercator = Crs::web_mercator();
        let wgs84 = Crs::wgs84();
        Ok(Self {
            to_mercator: Reprojector::new(&crs, &mercator)?,
            from_mercator: Reprojector::new(&mercator, &crs)?,
            to_wgs84: Reprojector::new(&crs, &wgs84)?,
            crs,
        })
    }

    /// Reproject native `bounds` into `target`.
    pub fn bounds_in(&self, bounds: &Bounds, target: &Crs) -> Result<Bounds, RasterError> {
        match target.epsg {
            e if e == self.crs.epsg => Ok(*bounds),
            WEB_MERCATOR => self.to_mercator.transform_bounds(bounds),
            WGS84 => self.to_wgs84.transform_bounds(bounds),
            _ => Reprojector::new(&self.crs, target)?.transform_bounds(bounds),
        }
    }
}
