//! Tile service layer.
//!
//! This module turns tile requests into encoded, cached tiles.
//!
//! # Architecture
//!
//! The tile service sits between the HTTP layer and the raster datasets:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       HTTP Handlers / WS channel        │
//! └────────────────────┬────────────────────┘
//!                      │  TileLayer
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │  TileEncoder    │  │
//! │  │ (fingerprint │  │  (RGBA →        │  │
//! │  │  keyed LRU)  │  │   PNG / JPEG)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │    DatasetRegistry → render module      │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TileService`]: Main entry point for tile requests
//! - [`TileCache`]: Singleflight LRU bounded by bytes and entries
//! - [`TileEncoder`]: Deterministic PNG/JPEG encoding
//! - [`TileLayer`]: Common interface of [`RasterLayer`] and [`DebugGridLayer`]
//! - [`tile_fingerprint`]: Content hash used as cache key and ETag
//!
//! # Example
//!
//! ```
//! use raster_tileserver::tile::{RenderedTile, TileCache};
//! use bytes::Bytes;
//!
//! let cache = TileCache::with_capacity(50 * 1024 * 1024);
//! cache.insert(RenderedTile::new(Bytes::from_static(b"png"), "image/png", "abc"));
//! assert_eq!(cache.get("abc").unwrap().map(|t| t.len()), Some(3));
//! ```

mod cache;
mod encoder;
mod fingerprint;
mod layer;
mod service;

pub use cache::{
    CacheStats, RenderedTile, TileCache, TileCacheOptions, DEFAULT_FAILURE_COOLDOWN,
    DEFAULT_MAX_ENTRIES, DEFAULT_TILE_CACHE_CAPACITY,
};
pub use encoder::{
    clamp_quality, is_valid_quality, TileEncoder, DEFAULT_JPEG_QUALITY, MAX_JPEG_QUALITY,
    MIN_JPEG_QUALITY,
};
pub use fingerprint::tile_fingerprint;
pub use layer::{draw_debug_tile, DebugGridLayer, RasterLayer, TileLayer, DEBUG_LAYER};
pub use service::{render_tile, TileRequest, TileService, TileServiceOptions, RASTER_LAYER};
