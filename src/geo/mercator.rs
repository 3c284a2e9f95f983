//! Web-mercator (EPSG:3857) slippy-map tile grid.
//!
//! ```text
//!   z = 0           z = 1
//!  ┌───────┐      ┌───┬───┐
//!  │ 0/0/0 │      │0,0│1,0│   x grows east, y grows south
//!  └───────┘      ├───┼───┤   tile span = circumference / 2^z
//!                 │0,1│1,1│
//!                 └───┴───┘
//! ```

use std::f64::consts::PI;

use super::Bounds;

/// Sphere radius used by web mercator, in meters
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the projected width of the world, in meters
pub const HALF_EARTH: f64 = 20_037_508.342_789_244;

/// Full projected width of the world, in meters
pub const EARTH_CIRCUMFERENCE: f64 = 2.0 * HALF_EARTH;

/// Latitude where the square mercator world ends
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// Deepest zoom level accepted for tile requests
pub const MAX_ZOOM: u32 = 30;

/// Whether `(z, x, y)` addresses a tile of the pyramid.
pub fn is_valid_tile(z: u32, x: u32, y: u32) -> bool {
    if z > MAX_ZOOM {
        return false;
    }
    let n = 1u64 << z;
    (x as u64) < n && (y as u64) < n
}

/// Projected extent of a tile.
pub fn tile_bounds(z: u32, x: u32, y: u32) -> Bounds {
    let span = tile_span(z);
    let left = -HALF_EARTH + x as f64 * span;
    let top = HALF_EARTH - y as f64 * span;
    Bounds::new(left, top - span, left + span, top)
}

/// Width of one tile at zoom `z`, in meters.
pub fn tile_span(z: u32) -> f64 {
    EARTH_CIRCUMFERENCE / (1u64 << z.min(MAX_ZOOM)) as f64
}

/// Ground resolution of one output pixel at zoom `z`.
pub fn resolution(z: u32, tile_size: u32) -> f64 {
    tile_span(z) / tile_size.max(1) as f64
}

/// Coarsest zoom whose resolution is at least as fine as `pixel_size`.
///
/// Returns the zoom just before the first level that is finer than needed.
pub fn zoom_for_pixel_size(pixel_size: f64, tile_size: u32, max_zoom: u32) -> u32 {
    for z in 0..=max_zoom {
        if pixel_size > resolution(z, tile_size) {
            return z.saturating_sub(1);
        }
    }
    max_zoom
}

pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    (x, y)
}

pub fn mercator_to_lon_lat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}

/// Tile containing a longitude/latitude at zoom `z`.
pub fn lon_lat_to_tile(lon: f64, lat: f64, z: u32) -> (u32, u32) {
    let (x, y) = lon_lat_to_mercator(lon, lat);
    let span = tile_span(z);
    let max = ((1u64 << z.min(MAX_ZOOM)) - 1) as f64;
    let tx = ((x + HALF_EARTH) / span).floor().clamp(0.0, max);
    let ty = ((HALF_EARTH - y) / span).floor().clamp(0.0, max);
    (tx as u32, ty as u32)
}
