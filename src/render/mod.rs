//! Turning raster windows into images.
//!
//! ```text
//!   query ──▶ RenderParams ──▶ Style::resolve (bands, stretch, colormap)
//!                                   │
//!   WindowPlan / PixelWindow ──▶ read_window ──▶ CoordinateGrid ──▶ resample
//!                                                                     │
//!                                                   RgbaImage ◀── paint
//! ```
//!
//! Region extraction and histograms share the same window reads.

mod colormap;
mod histogram;
mod params;
mod region;
mod renderer;
mod resample;

pub use colormap::{palette_names, Colormap};
pub use histogram::{compute_histogram, histogram, Histogram, HistogramOptions, MAX_BINS};
pub use params::{
    ColorScheme, ImageFormat, RenderParams, Resampling, DEFAULT_N_COLORS, DEFAULT_TILE_SIZE,
    MAX_TILE_SIZE,
};
pub use region::{
    extract_geotiff, pixel_region, render_region, world_region, write_geotiff, GeoTiffLayout,
    RegionFormat, RegionWindow, DEFAULT_MAX_REGION_PIXELS,
};
pub use renderer::{render_pixels, render_preview, render_window, RgbaImage, Style, GRID_STEP};
