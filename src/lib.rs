//! # raster-tileserver
//!
//! A dynamic tile server for GeoTIFF and Cloud Optimized GeoTIFF rasters.
//!
//! Tiles are rendered on demand from local files, HTTP(S) URLs or S3 objects.
//! Only the byte ranges a tile needs are fetched, so multi-gigabyte remote
//! rasters can be browsed without downloading them.
//!
//! ## Features
//!
//! - **Range-based streaming**: Header, IFDs and blocks are fetched with range requests
//! - **Overview aware**: Each tile reads from the coarsest adequate resolution level
//! - **Styling**: Band selection, linear stretch, named and custom colormaps, embedded palettes
//! - **Multi-level caching**: Open datasets, byte blocks, decoded blocks and encoded tiles
//! - **Singleflight**: Concurrent requests for one tile share a single render
//! - **Extras**: Histograms, point queries, region export as GeoTIFF, thumbnails, COG validation
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`io`] - Range readers for local files, HTTP and S3, block cache and retries
//! - [`mod@format`] - TIFF/BigTIFF parsing, GeoTIFF tags and block decompression
//! - [`geo`] - CRS handling, web-mercator tile math and window planning
//! - [`raster`] - Dataset abstraction, identifier resolution and registry
//! - [`render`] - Resampling, styling, histograms and region extraction
//! - [`tile`] - Tile service, fingerprints, cache and encoding
//! - [`server`] - Axum-based HTTP server, routes and WebSocket channel
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use raster_tileserver::{create_router, DatasetRegistry, RouterConfig, TileService, UriSource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http = raster_tileserver::io::create_http_client(std::time::Duration::from_secs(30))
//!         .expect("HTTP client");
//!     let source = UriSource::new(http).with_data_root("/data");
//!     let service = TileService::new(DatasetRegistry::new(source));
//!     let router = create_router(service, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod geo;
pub mod io;
pub mod raster;
pub mod render;
pub mod server;
pub mod tile;

// Re-export commonly used types
pub use config::Config;
pub use error::{IoError, RasterError, TiffError, TileError};
pub use format::tiff::{validate_cog, TiffPyramid, ValidationResult};
pub use format::{detect_format, RasterFormat};
pub use geo::{Bounds, Crs, GeoTransform, OverviewPolicy, Reprojector};
pub use io::{create_s3_client, BlockCache, RangeReader, RetryPolicy};
pub use raster::{
    DatasetRegistry, MemorySource, RasterDataset, RasterInfo, RasterSource, RegistryOptions,
    UriSource,
};
pub use render::{Colormap, ImageFormat, RenderParams, Resampling};
pub use server::{create_router, AppState, ErrorResponse, RouterConfig};
pub use tile::{
    DebugGridLayer, RasterLayer, RenderedTile, TileCache, TileEncoder, TileLayer, TileRequest,
    TileService,
};
