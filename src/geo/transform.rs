//! Affine mapping between pixel and CRS coordinates.
//!
//! Uses the GDAL six-coefficient convention:
//!
//! ```text
//!   x = origin_x + col * pixel_width + row * row_rotation
//!   y = origin_y + col * col_rotation + row * pixel_height
//! ```
//!
//! `pixel_height` is negative for north-up rasters. Pixel `(0, 0)` is the
//! top-left corner of the top-left pixel; its center is `(0.5, 0.5)`.

use serde::Serialize;

use crate::format::tiff::GeoTiffTags;

use super::Bounds;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub col_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            col_rotation: 0.0,
            pixel_height,
        }
    }

    /// Pixel space itself, rows growing downwards.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 1.0, 1.0)
    }

    /// Build from GeoTIFF tags.
    ///
    /// ModelTransformation wins over tiepoint and scale. PixelIsPoint rasters
    /// are shifted half a pixel so the result describes pixel corners.
    /// Returns `None` when the file carries no usable georeferencing.
    pub fn from_tags(tags: &GeoTiffTags) -> Option<Self> {
        let mut transform = if let Some(t) = tags.transformation.as_deref().filter(|t| t.len() >= 8) {
            Self {
                origin_x: t[3],
                pixel_width: t[0],
                row_rotation: t[1],
                origin_y: t[7],
                col_rotation: t[4],
                pixel_height: t[5],
            }
        } else {
            let tp = tags.tiepoints.as_deref().filter(|t| t.len() >= 6)?;
            let scale = tags.pixel_scale.as_deref().filter(|s| s.len() >= 2)?;
            Self::new(
                tp[3] - tp[0] * scale[0],
                tp[4] + tp[1] * scale[1],
                scale[0],
                -scale[1],
            )
        };

        if !transform.is_invertible() {
            return None;
        }
        if tags.geokeys.is_pixel_is_point() {
            let (x, y) = transform.pixel_to_geo(-0.5, -0.5);
            transform.origin_x = x;
            transform.origin_y = y;
        }
        Some(transform)
    }

    fn determinant(&self) -> f64 {
        self.pixel_width * self.pixel_height - self.row_rotation * self.col_rotation
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > f64::EPSILON * f64::EPSILON
    }

    /// Whether the raster is axis aligned.
    pub fn is_rectilinear(&self) -> bool {
        self.row_rotation == 0.0 && self.col_rotation == 0.0
    }

    /// CRS coordinates of a fractional pixel position.
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.col_rotation + row * self.pixel_height,
        )
    }

    /// Fractional pixel position of CRS coordinates.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        let det = self.determinant();
        let dx = x - self.origin_x;
        let dy = y - self.origin_y;
        let col = (dx * self.pixel_height - dy * self.row_rotation) / det;
        let row = (dy * self.pixel_width - dx * self.col_rotation) / det;
        (col, row)
    }

    /// Transform of an overview decimated by `(sx, sy)`.
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            origin_x: self.origin_x,
            pixel_width: self.pixel_width * sx,
            row_rotation: self.row_rotation * sy,
            origin_y: self.origin_y,
            col_rotation: self.col_rotation * sx,
            pixel_height: self.pixel_height * sy,
        }
    }

    /// Extent of a `width` x `height` raster in CRS coordinates.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        let (w, h) = (width as f64, height as f64);
        Bounds::from_points(
            [(0.0, 0.0), (w, 0.0), (0.0, h), (w, h)]
                .iter()
                .map(|&(c, r)| self.pixel_to_geo(c, r)),
        )
        .unwrap_or_else(|| Bounds::new(0.0, 0.0, 0.0, 0.0))
    }

    /// GDAL ordering: `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.col_rotation,
            self.pixel_height,
        ]
    }
}
