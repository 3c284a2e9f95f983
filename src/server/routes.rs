//! Router configuration for the raster tile server.
//!
//! This module defines the HTTP routes and applies CORS and tracing
//! middleware.
//!
//! # Route Structure
//!
//! ```text
//! /health                                  - Health check
//! /api/tiles/{z}/{x}/{y}.{png,jpg}         - Raster tile
//! /api/tiles/debug/{z}/{x}/{y}.png         - Debug grid tile
//! /api/metadata | bounds | center          - Dataset description
//! /api/histogram | pixel | validate        - Dataset queries
//! /api/region.{tif,png,jpg}                - Region, world coordinates
//! /api/pixel/region.{tif,png,jpg}          - Region, pixel coordinates
//! /api/thumbnail.{png,jpg}                 - Preview image
//! /api/palettes | basemaps                 - Static registries
//! /api/ws                                  - Control channel (WebSocket)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use raster_tileserver::raster::{DatasetRegistry, UriSource};
//! use raster_tileserver::server::{create_router, RouterConfig};
//! use raster_tileserver::tile::TileService;
//!
//! let registry = DatasetRegistry::new(source);
//! let tile_service = TileService::new(registry);
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(tile_service, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8000").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{routing::get, Router};
use http::header::{CONTENT_TYPE, IF_NONE_MATCH};
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::channel::{ws_handler, DEFAULT_CHANNEL_TIMEOUT};
use super::handlers::{
    basemaps_handler, bounds_handler, center_handler, debug_tile_handler, health_handler,
    histogram_handler, metadata_handler, palettes_handler, pixel_handler, pixel_region_handler,
    region_handler, thumbnail_handler, tile_handler, validate_handler, AppState,
    DEFAULT_THUMBNAIL_SIZE,
};
use crate::raster::RasterSource;
use crate::render::{RenderParams, DEFAULT_MAX_REGION_PIXELS};
use crate::tile::TileService;

/// Output extensions accepted by the region endpoints.
const REGION_EXTENSIONS: [&str; 5] = ["tif", "tiff", "png", "jpg", "jpeg"];

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Rendering defaults for requests that omit parameters
    pub defaults: RenderParams,

    /// Largest region output, in pixels
    pub max_region_pixels: u64,

    /// Default longest side of thumbnails
    pub thumbnail_size: u32,

    /// How long a control channel request may take
    pub channel_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Cache max-age is 1 hour (3600 seconds)
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            cors_origins: None, // Allow any origin by default
            cache_max_age: 3600,
            enable_tracing: true,
            defaults: RenderParams::default(),
            max_region_pixels: DEFAULT_MAX_REGION_PIXELS,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    /// Pass None (or don't call this method) to allow any origin.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    pub fn with_defaults(mut self, defaults: RenderParams) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_max_region_pixels(mut self, pixels: u64) -> Self {
        self.max_region_pixels = pixels;
        self
    }

    pub fn with_thumbnail_size(mut self, size: u32) -> Self {
        self.thumbnail_size = size;
        self
    }

    pub fn with_channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// # Arguments
///
/// * `tile_service` - The tile service for handling tile requests
/// * `config` - Router configuration
///
/// # Returns
///
/// A configured Axum router ready to be served.
pub fn create_router<S>(tile_service: TileService<S>, config: RouterConfig) -> Router
where
    S: RasterSource + 'static,
{
    let app_state = AppState::new(tile_service)
        .with_defaults(config.defaults.clone())
        .with_cache_max_age(config.cache_max_age)
        .with_max_region_pixels(config.max_region_pixels)
        .with_thumbnail_size(config.thumbnail_size)
        .with_channel_timeout(config.channel_timeout);
    create_router_with_state(app_state, &config)
}

/// Create the router around an existing [`AppState`].
pub fn create_router_with_state<S>(app_state: AppState<S>, config: &RouterConfig) -> Router
where
    S: RasterSource + 'static,
{
    let cors = build_cors_layer(config);
    let router = build_api_router(app_state).layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_api_router<S>(app_state: AppState<S>) -> Router
where
    S: RasterSource + 'static,
{
    // {filename} captures "{y}", "{y}.png" and "{y}.jpg"
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/api/tiles/{z}/{x}/{filename}", get(tile_handler::<S>))
        .route(
            "/api/tiles/debug/{z}/{x}/{filename}",
            get(debug_tile_handler::<S>),
        )
        .route("/api/metadata", get(metadata_handler::<S>))
        .route("/api/bounds", get(bounds_handler::<S>))
        .route("/api/center", get(center_handler::<S>))
        .route("/api/histogram", get(histogram_handler::<S>))
        .route("/api/pixel", get(pixel_handler::<S>))
        .route("/api/thumbnail.png", get(thumbnail_handler::<S>))
        .route("/api/thumbnail.jpg", get(thumbnail_handler::<S>))
        .route("/api/validate", get(validate_handler::<S>))
        .route("/api/palettes", get(palettes_handler))
        .route("/api/basemaps", get(basemaps_handler))
        .route("/api/ws", get(ws_handler::<S>));

    // The handlers pick the output format from the path extension.
    for ext in REGION_EXTENSIONS {
        router = router
            .route(&format!("/api/region.{}", ext), get(region_handler::<S>))
            .route(
                &format!("/api/pixel/region.{}", ext),
                get(pixel_region_handler::<S>),
            );
    }

    router.with_state(app_state)
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, IF_NONE_MATCH])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => {
            // No origins allowed - this effectively disables CORS
            cors
        }
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
