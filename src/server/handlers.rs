//! HTTP request handlers for the raster tile API.
//!
//! # Endpoints
//!
//! - `GET /api/tiles/{z}/{x}/{y}.{png,jpg}?filename=` - Render a tile
//! - `GET /api/tiles/debug/{z}/{x}/{y}.png` - Debug grid tile
//! - `GET /api/metadata?filename=` - Dataset description
//! - `GET /api/bounds?filename=&units=` - Extent in a CRS
//! - `GET /api/center?filename=&units=` - Extent center in a CRS
//! - `GET /api/histogram?filename=&band=&bins=&density=` - Band histogram
//! - `GET /api/pixel?filename=&x=&y=&units=` - Values at a point
//! - `GET /api/region.{tif,png,jpg}` - Region in world coordinates
//! - `GET /api/pixel/region.{tif,png,jpg}` - Region in pixel coordinates
//! - `GET /api/thumbnail.{png,jpg}?filename=` - Whole-raster preview
//! - `GET /api/validate?filename=` - COG layout report
//! - `GET /api/palettes`, `GET /api/basemaps` - Static registries
//! - `GET /health` - Health check endpoint

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::TileError;
use crate::format::tiff::{validate_cog, ValidationResult};
use crate::geo::{Bounds, Crs, Reprojector, ZoomRange};
use crate::raster::{is_valid_sample, BandStatistics, Dataset, RasterInfo, RasterSource};
use crate::render::{
    extract_geotiff, histogram, palette_names, pixel_region, render_preview, render_region,
    world_region, Histogram, HistogramOptions, ImageFormat, RegionFormat, RegionWindow,
    RenderParams, DEFAULT_MAX_REGION_PIXELS, MAX_TILE_SIZE,
};
use crate::tile::{DebugGridLayer, TileLayer, TileRequest, TileService};

use super::basemaps::{basemaps, Basemap};
use super::channel::DEFAULT_CHANNEL_TIMEOUT;

/// Default longest side of a thumbnail.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 512;

// =============================================================================
// Application State
// =============================================================================

/// Shared application state containing the tile service.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState<S: RasterSource> {
    /// The tile service for processing tile requests
    pub tile_service: Arc<TileService<S>>,

    /// Debug grid layer, sharing the tile service's cache
    pub debug_layer: Arc<DebugGridLayer>,

    /// Rendering defaults that query parameters override
    pub defaults: RenderParams,

    /// Default cache control max-age in seconds (defaults to 1 hour)
    pub cache_max_age: u32,

    /// Largest region output, in pixels
    pub max_region_pixels: u64,

    /// Default longest side of thumbnails
    pub thumbnail_size: u32,

    /// How long a control channel request may take
    pub channel_timeout: Duration,
}

impl<S: RasterSource + 'static> AppState<S> {
    /// Create a new application state with the given tile service.
    pub fn new(tile_service: TileService<S>) -> Self {
        Self::with_shared_service(Arc::new(tile_service))
    }

    pub fn with_shared_service(tile_service: Arc<TileService<S>>) -> Self {
        let defaults = RenderParams::default();
        Self {
            debug_layer: Arc::new(debug_layer(&tile_service, &defaults)),
            tile_service,
            defaults,
            cache_max_age: 3600, // 1 hour default
            max_region_pixels: DEFAULT_MAX_REGION_PIXELS,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT,
        }
    }

    /// Set the rendering defaults; the debug layer follows their tile size.
    pub fn with_defaults(mut self, defaults: RenderParams) -> Self {
        self.debug_layer = Arc::new(debug_layer(&self.tile_service, &defaults));
        self.defaults = defaults;
        self
    }

    pub fn with_cache_max_age(mut self, cache_max_age: u32) -> Self {
        self.cache_max_age = cache_max_age;
        self
    }

    pub fn with_max_region_pixels(mut self, max_region_pixels: u64) -> Self {
        self.max_region_pixels = max_region_pixels;
        self
    }

    pub fn with_thumbnail_size(mut self, thumbnail_size: u32) -> Self {
        self.thumbnail_size = thumbnail_size;
        self
    }

    pub fn with_channel_timeout(mut self, channel_timeout: Duration) -> Self {
        self.channel_timeout = channel_timeout;
        self
    }

    async fn dataset(&self, identifier: &str) -> Result<Arc<Dataset<S>>, TileError> {
        Ok(self.tile_service.registry().get(identifier).await?)
    }

    fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_max_age)
    }
}

fn debug_layer<S: RasterSource + 'static>(
    service: &TileService<S>,
    defaults: &RenderParams,
) -> DebugGridLayer {
    DebugGridLayer::new(defaults.tile_size).with_cache(Arc::clone(service.cache()))
}

impl<S: RasterSource> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            tile_service: Arc::clone(&self.tile_service),
            debug_layer: Arc::clone(&self.debug_layer),
            defaults: self.defaults.clone(),
            cache_max_age: self.cache_max_age,
            max_region_pixels: self.max_region_pixels,
            thumbnail_size: self.thumbnail_size,
            channel_timeout: self.channel_timeout,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Raw query pairs, for endpoints that accept rendering parameters.
type QueryPairs = Query<Vec<(String, String)>>;

/// Path parameters for tile requests.
///
/// Extracted from: `/api/tiles/{z}/{x}/{filename}`
/// where filename is `{y}`, `{y}.png` or `{y}.jpg`
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub z: u32,
    pub x: u32,
    /// Tile Y coordinate with optional extension (e.g., "5" or "5.png")
    pub filename: String,
}

impl TilePathParams {
    /// Y coordinate and output format; no extension means PNG.
    pub fn y_and_format(&self) -> Result<(u32, ImageFormat), TileError> {
        let (y, format) = match self.filename.rsplit_once('.') {
            Some((y, ext)) => {
                let format = ImageFormat::from_extension(ext).ok_or_else(|| {
                    TileError::parameter(format!("unsupported tile format '{}'", ext))
                })?;
                (y, format)
            }
            None => (self.filename.as_str(), ImageFormat::Png),
        };
        let y = y
            .parse()
            .map_err(|_| TileError::parameter(format!("invalid tile row '{}'", y)))?;
        Ok((y, format))
    }
}

/// Query parameters naming a dataset and a CRS.
#[derive(Debug, Deserialize)]
pub struct DatasetQueryParams {
    pub filename: Option<String>,
    /// CRS of the answer, e.g. `EPSG:4326`
    pub units: Option<String>,
}

/// Query parameters for the histogram endpoint.
#[derive(Debug, Deserialize)]
pub struct HistogramQueryParams {
    pub filename: Option<String>,
    #[serde(default = "default_band")]
    pub band: usize,
    #[serde(default = "default_bins")]
    pub bins: usize,
    #[serde(default)]
    pub density: bool,
    /// Explicit `min,max`
    pub range: Option<String>,
}

fn default_band() -> usize {
    1
}

fn default_bins() -> usize {
    256
}

/// Query parameters for point lookups.
#[derive(Debug, Deserialize)]
pub struct PixelQueryParams {
    pub filename: Option<String>,
    pub x: f64,
    pub y: f64,
    /// `pixels` (default) or a CRS
    pub units: Option<String>,
}

/// Query parameters for the validation endpoint.
#[derive(Debug, Deserialize)]
pub struct ValidateQueryParams {
    pub filename: Option<String>,
    /// Treat warnings as errors
    #[serde(default)]
    pub strict: bool,
}

fn require_filename(filename: Option<&str>) -> Result<&str, TileError> {
    match filename.map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(TileError::parameter("missing 'filename' query parameter")),
    }
}

fn param<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn float_param(pairs: &[(String, String)], key: &str) -> Result<f64, TileError> {
    let value = param(pairs, key)
        .ok_or_else(|| TileError::parameter(format!("missing '{}' query parameter", key)))?;
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(TileError::parameter(format!("{}={}: not a finite number", key, value))),
    }
}

/// Parse a user-supplied CRS; every failure is the caller's.
fn parse_units(text: &str) -> Result<Crs, TileError> {
    Crs::parse(text).map_err(|e| TileError::parameter(e.to_string()))
}

/// Extension of the request path, lowercased.
fn path_extension(uri: &Uri) -> Option<String> {
    let last = uri.path().rsplit('/').next()?;
    last.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Response from the metadata endpoint.
#[derive(Debug, Serialize)]
pub struct MetadataResponse {
    #[serde(flatten)]
    pub info: RasterInfo,

    /// Extent in EPSG:4326, absent without a CRS
    pub bounds_wgs84: Option<Bounds>,

    /// `[lon, lat]` of the extent center
    pub center: Option<[f64; 2]>,

    #[serde(flatten)]
    pub zoom: ZoomRange,

    /// Per-band statistics, absent when they could not be computed
    pub statistics: Option<Vec<BandStatistics>>,

    /// Whether band 1 carries its own color map
    pub has_palette: bool,
}

/// Extent in a requested CRS.
#[derive(Debug, Serialize)]
pub struct BoundsResponse {
    /// `[left, bottom, right, top]`
    pub bounds: [f64; 4],
    pub crs: String,
}

/// Extent center in a requested CRS.
#[derive(Debug, Serialize)]
pub struct CenterResponse {
    /// `[x, y]`, `[lon, lat]` for geographic CRSs
    pub center: [f64; 2],
    pub crs: String,
    /// Zoom at which the raster fills the view
    pub zoom: u32,
}

/// Values of all bands at one pixel.
#[derive(Debug, Serialize)]
pub struct PixelResponse {
    pub col: u32,
    pub row: u32,
    /// One entry per band, `null` for nodata
    pub values: Vec<Option<f64>>,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub identifier: String,
    #[serde(flatten)]
    pub result: ValidationResult,
}

#[derive(Debug, Serialize)]
pub struct PalettesResponse {
    pub palettes: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct BasemapsResponse {
    pub basemaps: &'static [Basemap],
}

fn image_response(bytes: Bytes, content_type: &str, cache_control: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, cache_control),
        ],
        Body::from(bytes),
    )
        .into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /api/tiles/{z}/{x}/{y}.{png,jpg}`
///
/// # Query Parameters
///
/// - `filename`: Raster identifier (path, URL or `s3://` URI), required
/// - `band`, `colormap`, `vmin`, `vmax`, `resampling`, `nodata`,
///   `tile_size`, `scheme`, `n_colors`: rendering options
///
/// # Response
///
/// - `200 OK`: Encoded tile, transparent outside the raster extent
/// - `304 Not Modified`: `If-None-Match` matches the tile fingerprint
/// - `400 Bad Request`: Invalid parameters
/// - `404 Not Found`: Unknown raster, or tile index outside the pyramid
/// - `503 Service Unavailable`: Retryable upstream failure
///
/// # Headers
///
/// - `ETag`: Tile fingerprint
/// - `Cache-Control: public, max-age={cache_max_age}`
pub async fn tile_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Path(path): Path<TilePathParams>,
    Query(pairs): QueryPairs,
    headers: HeaderMap,
) -> Result<Response, TileError> {
    let (y, format) = path.y_and_format()?;
    let identifier = require_filename(param(&pairs, "filename"))?;
    let mut params = RenderParams::from_query(&pairs, &state.defaults)?;
    params.format = format;

    let request = TileRequest::new(identifier, path.z, path.x, y).with_params(params);
    let etag = format!("\"{}\"", request.fingerprint());
    let cache_control = state.cache_control();

    let not_modified = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.split(',').any(|tag| tag.trim() == etag));
    if not_modified {
        debug!(etag = %etag, "Tile not modified");
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(header::ETAG, etag), (header::CACHE_CONTROL, cache_control)],
        )
            .into_response());
    }

    let tile = state.tile_service.get_tile(request).await?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, tile.content_type.to_string()),
            (header::CACHE_CONTROL, cache_control),
            (header::ETAG, etag),
        ],
        Body::from(tile.bytes),
    )
        .into_response())
}

/// Handle `GET /api/tiles/debug/{z}/{x}/{y}.png`.
pub async fn debug_tile_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Path(path): Path<TilePathParams>,
) -> Result<Response, TileError> {
    let (y, format) = path.y_and_format()?;
    if format != ImageFormat::Png {
        return Err(TileError::parameter("debug tiles are PNG only"));
    }
    let tile = state.debug_layer.tile(path.z, path.x, y).await?;
    Ok(image_response(tile.bytes, tile.content_type, state.cache_control()))
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Handle `GET /api/metadata`.
///
/// Rasters without a CRS still answer, with the geographic fields absent.
pub async fn metadata_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<DatasetQueryParams>,
) -> Result<Json<MetadataResponse>, TileError> {
    let identifier = require_filename(query.filename.as_deref())?;
    let dataset = state.dataset(identifier).await?;

    let bounds_wgs84 = match dataset.georeference() {
        Some(_) => Some(dataset.bounds_in(&Crs::wgs84())?),
        None => None,
    };
    let statistics = match dataset.statistics().await {
        Ok(stats) => Some(stats.to_vec()),
        Err(e) => {
            warn!(identifier, error = %e, "Statistics unavailable");
            None
        }
    };

    Ok(Json(MetadataResponse {
        info: dataset.info().clone(),
        center: bounds_wgs84.map(|b| {
            let (lon, lat) = b.center();
            [lon, lat]
        }),
        bounds_wgs84,
        zoom: dataset.zoom_range(state.defaults.tile_size),
        statistics,
        has_palette: dataset.palette().is_some(),
    }))
}

/// Handle `GET /api/bounds?units=EPSG:4326`.
pub async fn bounds_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<DatasetQueryParams>,
) -> Result<Json<BoundsResponse>, TileError> {
    let identifier = require_filename(query.filename.as_deref())?;
    let crs = parse_units(query.units.as_deref().unwrap_or("EPSG:4326"))?;
    let dataset = state.dataset(identifier).await?;
    let b = dataset.bounds_in(&crs)?;
    Ok(Json(BoundsResponse {
        bounds: [b.left, b.bottom, b.right, b.top],
        crs: crs.name(),
    }))
}

/// Handle `GET /api/center?units=EPSG:4326`.
pub async fn center_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<DatasetQueryParams>,
) -> Result<Json<CenterResponse>, TileError> {
    let identifier = require_filename(query.filename.as_deref())?;
    let crs = parse_units(query.units.as_deref().unwrap_or("EPSG:4326"))?;
    let dataset = state.dataset(identifier).await?;

    let (lon, lat) = dataset.center()?;
    let (x, y) = Reprojector::new(&Crs::wgs84(), &crs)?.transform(lon, lat)?;
    Ok(Json(CenterResponse {
        center: [x, y],
        crs: crs.name(),
        zoom: dataset.zoom_range(state.defaults.tile_size).default_zoom,
    }))
}

/// Handle `GET /api/histogram?band=1&bins=256&density=false`.
pub async fn histogram_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<HistogramQueryParams>,
) -> Result<Json<Histogram>, TileError> {
    let identifier = require_filename(query.filename.as_deref())?;
    let range = match query.range.as_deref() {
        None => None,
        Some(text) => {
            let parse = |s: &str| s.trim().parse::<f64>().ok();
            match text.split_once(',') {
                Some((lo, hi)) => Some(parse(lo).zip(parse(hi)).ok_or_else(|| {
                    TileError::parameter(format!("range={}: expected 'min,max'", text))
                })?),
                None => {
                    return Err(TileError::parameter(format!(
                        "range={}: expected 'min,max'",
                        text
                    )))
                }
            }
        }
    };

    let dataset = state.dataset(identifier).await?;
    let options = HistogramOptions {
        bins: query.bins,
        range,
        density: query.density,
        nodata: None,
    };
    Ok(Json(histogram(&dataset, query.band, &options).await?))
}

/// Handle `GET /api/pixel?x=&y=&units=pixels`.
///
/// With `units` other than `pixels`, `x`/`y` are coordinates in that CRS.
pub async fn pixel_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<PixelQueryParams>,
) -> Result<Json<PixelResponse>, TileError> {
    let identifier = require_filename(query.filename.as_deref())?;
    let dataset = state.dataset(identifier).await?;

    let (col, row) = match query.units.as_deref().map(str::trim) {
        None | Some("") | Some("pixels") => (query.x, query.y),
        Some(units) => {
            let crs = parse_units(units)?;
            let georef = dataset.require_georeference()?;
            let (x, y) = Reprojector::new(&crs, &georef.crs)?
                .transform(query.x, query.y)
                .map_err(|e| TileError::parameter(e.to_string()))?;
            dataset.geo_to_pixel(x, y)
        }
    };

    let values = dataset.pixel_values(col, row).await?.ok_or_else(|| {
        TileError::parameter(format!(
            "point ({}, {}) is outside the raster",
            query.x, query.y
        ))
    })?;
    let nodata = dataset.info().nodata;
    Ok(Json(PixelResponse {
        col: col.floor() as u32,
        row: row.floor() as u32,
        values: values
            .into_iter()
            .map(|v| is_valid_sample(v, nodata).then_some(v))
            .collect(),
    }))
}

/// Handle `GET /api/region.{tif,png,jpg}` with `left`, `bottom`, `right`,
/// `top` in `units` (default EPSG:4326).
pub async fn region_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    uri: Uri,
    Query(pairs): QueryPairs,
) -> Result<Response, TileError> {
    let identifier = require_filename(param(&pairs, "filename"))?;
    let bounds = Bounds::new(
        float_param(&pairs, "left")?,
        float_param(&pairs, "bottom")?,
        float_param(&pairs, "right")?,
        float_param(&pairs, "top")?,
    );
    let units = parse_units(param(&pairs, "units").unwrap_or("EPSG:4326"))?;
    let dataset = state.dataset(identifier).await?;
    let region = world_region(&dataset, &bounds, &units, state.max_region_pixels)?;
    region_response(&state, &dataset, &region, &uri, &pairs).await
}

/// Handle `GET /api/pixel/region.{tif,png,jpg}` with `left`, `top`,
/// `right`, `bottom` in full-resolution pixels.
pub async fn pixel_region_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    uri: Uri,
    Query(pairs): QueryPairs,
) -> Result<Response, TileError> {
    let identifier = require_filename(param(&pairs, "filename"))?;
    let (left, top) = (float_param(&pairs, "left")?, float_param(&pairs, "top")?);
    let (right, bottom) = (float_param(&pairs, "right")?, float_param(&pairs, "bottom")?);
    let dataset = state.dataset(identifier).await?;
    let region = pixel_region(dataset.info(), left, top, right, bottom, state.max_region_pixels)?;
    region_response(&state, &dataset, &region, &uri, &pairs).await
}

async fn region_response<S: RasterSource + 'static>(
    state: &AppState<S>,
    dataset: &Dataset<S>,
    region: &RegionWindow,
    uri: &Uri,
    pairs: &[(String, String)],
) -> Result<Response, TileError> {
    let format = path_extension(uri)
        .as_deref()
        .and_then(RegionFormat::from_extension)
        .ok_or_else(|| TileError::parameter("region output must be .tif, .png or .jpg"))?;

    match format {
        RegionFormat::GeoTiff => {
            let bytes = extract_geotiff(dataset, region).await?;
            let stem = dataset
                .identifier()
                .rsplit(['/', '\\'])
                .next()
                .and_then(|name| name.split('.').next())
                .filter(|stem| !stem.is_empty())
                .unwrap_or("raster");
            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, format.content_type().to_string()),
                    (header::CACHE_CONTROL, state.cache_control()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}_region.tif\"", stem),
                    ),
                ],
                Body::from(bytes),
            )
                .into_response())
        }
        RegionFormat::Image(image_format) => {
            let mut params = RenderParams::from_query(pairs, &state.defaults)?;
            params.format = image_format;
            let image = render_region(dataset, region, &params).await?;
            let bytes = state.tile_service.encoder().encode_blocking(image, image_format).await?;
            Ok(image_response(bytes, image_format.content_type(), state.cache_control()))
        }
    }
}

/// Handle `GET /api/thumbnail.{png,jpg}?max_size=512`.
pub async fn thumbnail_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    uri: Uri,
    Query(pairs): QueryPairs,
) -> Result<Response, TileError> {
    let identifier = require_filename(param(&pairs, "filename"))?;
    let format = path_extension(&uri)
        .as_deref()
        .and_then(ImageFormat::from_extension)
        .unwrap_or_default();
    let max_size = match param(&pairs, "max_size") {
        None => state.thumbnail_size,
        Some(text) => match text.trim().parse::<u32>() {
            Ok(size) if (1..=MAX_TILE_SIZE).contains(&size) => size,
            _ => {
                return Err(TileError::parameter(format!(
                    "max_size={}: must be in 1..={}",
                    text, MAX_TILE_SIZE
                )))
            }
        },
    };
    let mut params = RenderParams::from_query(&pairs, &state.defaults)?;
    params.format = format;

    let dataset = state.dataset(identifier).await?;
    let image = render_preview(&dataset, max_size, &params).await?;
    let bytes = state.tile_service.encoder().encode_blocking(image, format).await?;
    Ok(image_response(bytes, format.content_type(), state.cache_control()))
}

/// Handle `GET /api/validate?strict=false`.
pub async fn validate_handler<S: RasterSource + 'static>(
    State(state): State<AppState<S>>,
    Query(query): Query<ValidateQueryParams>,
) -> Result<Json<ValidateResponse>, TileError> {
    let identifier = require_filename(query.filename.as_deref())?;
    let dataset = state.dataset(identifier).await?;
    Ok(Json(ValidateResponse {
        identifier: identifier.to_string(),
        result: validate_cog(dataset.pyramid(), query.strict),
    }))
}

/// Handle `GET /api/palettes`.
pub async fn palettes_handler() -> Json<PalettesResponse> {
    Json(PalettesResponse {
        palettes: palette_names(),
    })
}

/// Handle `GET /api/basemaps`.
pub async fn basemaps_handler() -> Json<BasemapsResponse> {
    Json(BasemapsResponse {
        basemaps: basemaps(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tile_path(filename: &str) -> TilePathParams {
        TilePathParams {
            z: 3,
            x: 1,
            filename: filename.to_string(),
        }
    }

    #[test]
    fn test_tile_filename_parsing() {
        assert_eq!(tile_path("5.png").y_and_format().unwrap(), (5, ImageFormat::Png));
        assert_eq!(tile_path("5.jpg").y_and_format().unwrap(), (5, ImageFormat::Jpeg));
        assert_eq!(tile_path("5").y_and_format().unwrap(), (5, ImageFormat::Png));
        assert!(tile_path("5.gif").y_and_format().unwrap_err().is_parameter());
        assert!(tile_path("-1.png").y_and_format().unwrap_err().is_parameter());
    }

    #[test]
    fn test_query_helpers() {
        let pairs = vec![
            ("left".to_string(), "1.5".to_string()),
            ("top".to_string(), "nan".to_string()),
            ("left".to_string(), "2".to_string()),
        ];
        assert_eq!(float_param(&pairs, "left").unwrap(), 2.0);
        assert!(float_param(&pairs, "top").is_err());
        assert!(float_param(&pairs, "right").is_err());
        assert!(require_filename(Some("  ")).is_err());
        assert_eq!(require_filename(Some("a.tif")).unwrap(), "a.tif");
    }

    #[test]
    fn test_path_extension() {
        let uri: Uri = "/api/pixel/region.TIF?filename=a.tif".parse().unwrap();
        assert_eq!(path_extension(&uri).as_deref(), Some("tif"));
        let uri: Uri = "/api/thumbnail".parse().unwrap();
        assert_eq!(path_extension(&uri), None);
    }

    #[test]
    fn test_unknown_units_are_client_errors() {
        assert!(parse_units("EPSG:1").unwrap_err().is_parameter());
        assert!(parse_units("mercator").unwrap_err().is_parameter());
        assert_eq!(parse_units("EPSG:3857").unwrap().epsg, 3857);
    }
}
