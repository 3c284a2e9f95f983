//! Sampling a band buffer at fractional positions.
//!
//! Positions are in buffer pixel units where pixel `i` covers `[i, i + 1)`,
//! so `(i + 0.5)` is its center. Anything outside the buffer is NaN.

use crate::raster::is_valid_sample;

use super::params::Resampling;

/// One band of samples with its geometry.
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [f64],
    pub width: usize,
    pub height: usize,
}

impl Plane<'_> {
    fn at(&self, col: usize, row: usize) -> f64 {
        self.data[row * self.width + col]
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }
}

/// Sample `plane` at `(x, y)`.
///
/// Bilinear sampling weights only valid neighbours and returns NaN when
/// the pixel under the position is itself invalid, so nodata areas keep
/// sharp edges.
pub fn sample(plane: Plane<'_>, x: f64, y: f64, resampling: Resampling, nodata: Option<f64>) -> f64 {
    if !plane.contains(x, y) {
        return f64::NAN;
    }
    let nearest = plane.at(x as usize, y as usize);
    match resampling {
        Resampling::Nearest => nearest,
        Resampling::Bilinear if !is_valid_sample(nearest, nodata) => f64::NAN,
        Resampling::Bilinear => bilinear(plane, x, y, nodata),
    }
}

fn bilinear(plane: Plane<'_>, x: f64, y: f64, nodata: Option<f64>) -> f64 {
    let fx = x - 0.5;
    let fy = y - 0.5;
    let x0 = fx.floor();
    let y0 = fy.floor();
    let dx = fx - x0;
    let dy = fy - y0;

    let max_col = plane.width as i64 - 1;
    let max_row = plane.height as i64 - 1;
    let clamp_col = |c: f64| (c as i64).clamp(0, max_col) as usize;
    let clamp_row = |r: f64| (r as i64).clamp(0, max_row) as usize;

    let taps = [
        (clamp_col(x0), clamp_row(y0), (1.0 - dx) * (1.0 - dy)),
        (clamp_col(x0 + 1.0), clamp_row(y0), dx * (1.0 - dy)),
        (clamp_col(x0), clamp_row(y0 + 1.0), (1.0 - dx) * dy),
        (clamp_col(x0 + 1.0), clamp_row(y0 + 1.0), dx * dy),
    ];

    let mut sum = 0.0;
    let mut weight = 0.0;
    for (col, row, w) in taps {
        let v = plane.at(col, row);
        if w > 0.0 && is_valid_sample(v, nodata) {
            sum += v * w;
            weight += w;
        }
    }
    if weight > 0.0 {
        sum / weight
    } else {
        plane.at(x as usize, y as usize)
    }
}
