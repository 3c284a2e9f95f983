//! Integration tests for raster-tileserver.
//!
//! These tests verify end-to-end functionality including:
//! - Tile rendering with nodata, stretching, band selection and formats
//! - Dataset queries (metadata, bounds, center, histogram, pixel values)
//! - Region export as GeoTIFF and images, thumbnails, COG validation
//! - Error mapping (missing raster, tile outside the pyramid, bad parameters)
//! - Tile cache effectiveness and singleflight rendering
//! - The WebSocket control channel's request/reply multiplexing

mod integration {
    pub mod test_utils;

    pub mod api_tests;
    pub mod cache_tests;
    pub mod channel_tests;
}
