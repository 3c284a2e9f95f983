//! Tile Service for orchestrating tile generation.
//!
//! The TileService is the main entry point for tile requests. It orchestrates:
//! - Request validation
//! - Cache lookups by fingerprint (singleflight on miss)
//! - Dataset access via registry
//! - Window planning, rendering and encoding
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TileService                             │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    get_tile()                           │    │
//! │  │  1. Validate z/x/y    4. Plan window (tile_to_window)   │    │
//! │  │  2. Fingerprint       5. Render + encode                │    │
//! │  │  3. Cache or compute  6. Store & return                 │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │           │
//! │           ▼                    ▼                    ▼           │
//! │    ┌───────────┐     ┌─────────────────┐    ┌──────────────┐    │
//! │    │ TileCache │     │ DatasetRegistry │    │ TileEncoder  │    │
//! │    └───────────┘     └─────────────────┘    └──────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::error::TileError;
use crate::geo::mercator::is_valid_tile;
use crate::geo::{tile_to_window, OverviewPolicy, TileWindow};
use crate::io::RangeReader;
use crate::raster::{DatasetRegistry, RasterDataset, RasterSource};
use crate::render::{render_window, RenderParams, RgbaImage, Style};

use super::cache::{RenderedTile, TileCache, TileCacheOptions};
use super::encoder::{TileEncoder, DEFAULT_JPEG_QUALITY};
use super::fingerprint::tile_fingerprint;

/// Layer name mixed into raster tile fingerprints.
pub const RASTER_LAYER: &str = "raster";

// =============================================================================
// Tile Request
// =============================================================================

/// A request for a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    /// Raster identifier (path, URL or s3:// URI)
    pub identifier: String,

    pub z: u32,
    pub x: u32,
    pub y: u32,

    /// Styling and output options
    pub params: RenderParams,
}

impl TileRequest {
    /// Create a new tile request with default rendering.
    pub fn new(identifier: impl Into<String>, z: u32, x: u32, y: u32) -> Self {
        Self {
            identifier: identifier.into(),
            z,
            x,
            y,
            params: RenderParams::default(),
        }
    }

    pub fn with_params(mut self, params: RenderParams) -> Self {
        self.params = params;
        self
    }

    /// Fingerprint of the tile this request produces.
    pub fn fingerprint(&self) -> String {
        tile_fingerprint(
            RASTER_LAYER,
            &self.identifier,
            self.z,
            self.x,
            self.y,
            &self.params,
        )
    }
}

// =============================================================================
// Tile Service
// =============================================================================

/// Rendering options of a [`TileService`].
#[derive(Debug, Clone, Copy)]
pub struct TileServiceOptions {
    /// How overview levels are chosen for a tile
    pub policy: OverviewPolicy,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for TileServiceOptions {
    fn default() -> Self {
        Self {
            policy: OverviewPolicy::default(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Service for generating and caching tiles.
///
/// # Type Parameters
///
/// * `S` - The raster source type (local, HTTP/S3 or in-memory)
///
/// # Example
///
/// ```ignore
/// use raster_tileserver::raster::DatasetRegistry;
/// use raster_tileserver::tile::{TileRequest, TileService};
///
/// let service = TileService::new(DatasetRegistry::new(source));
/// let tile = service.get_tile(TileRequest::new("dem.tif", 8, 136, 91)).await?;
/// println!("{} bytes of {}", tile.len(), tile.content_type);
/// ```
pub struct TileService<S: RasterSource> {
    registry: Arc<DatasetRegistry<S>>,
    cache: Arc<TileCache>,
    encoder: TileEncoder,
    policy: OverviewPolicy,
}

impl<S: RasterSource + 'static> TileService<S> {
    /// Create a new tile service with default cache settings.
    pub fn new(registry: DatasetRegistry<S>) -> Self {
        Self::with_shared_registry(Arc::new(registry))
    }

    /// Create a new tile service with a shared registry.
    pub fn with_shared_registry(registry: Arc<DatasetRegistry<S>>) -> Self {
        Self::with_options(
            registry,
            TileCacheOptions::default(),
            TileServiceOptions::default(),
        )
    }

    pub fn with_options(
        registry: Arc<DatasetRegistry<S>>,
        cache: TileCacheOptions,
        options: TileServiceOptions,
    ) -> Self {
        Self {
            registry,
            cache: Arc::new(TileCache::with_options(cache)),
            encoder: TileEncoder::new(options.jpeg_quality),
            policy: options.policy,
        }
    }

    pub fn registry(&self) -> &Arc<DatasetRegistry<S>> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<TileCache> {
        &self.cache
    }

    pub fn encoder(&self) -> TileEncoder {
        self.encoder
    }

    pub fn policy(&self) -> OverviewPolicy {
        self.policy
    }

    /// Get a tile, using cache when available.
    ///
    /// Concurrent requests for the same fingerprint share one render.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The tile index is outside the pyramid (`TileOutOfRange`)
    /// - The raster cannot be found or opened
    /// - The rendering parameters do not fit the raster
    /// - Reading or encoding fails
    pub async fn get_tile(&self, request: TileRequest) -> Result<RenderedTile, TileError> {
        let (z, x, y) = (request.z, request.x, request.y);
        if !is_valid_tile(z, x, y) {
            return Err(TileError::TileOutOfRange { z, x, y });
        }

        let fingerprint = request.fingerprint();
        let registry = self.registry.clone();
        let encoder = self.encoder;
        let policy = self.policy;
        let key = fingerprint.clone();

        self.cache
            .get_or_compute(&fingerprint, move || async move {
                let started = Instant::now();
                let dataset = registry.get(&request.identifier).await?;
                let params = &request.params;
                let image = render_tile(&dataset, z, x, y, params, policy).await?;
                let bytes = encoder.encode_blocking(image, params.format).await?;
                debug!(
                    identifier = %request.identifier,
                    z, x, y,
                    bytes = bytes.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Rendered tile"
                );
                Ok(RenderedTile::new(bytes, params.format.content_type(), key))
            })
            .await
    }
}

/// Render web-mercator tile `(z, x, y)` of `dataset`.
///
/// Tiles outside the raster extent are fully transparent, but the style is
/// still validated so bad parameters fail the same way everywhere.
///
/// # Errors
/// `TileOutOfRange`, parameter errors, a source error for rasters without a
/// CRS, and read failures.
pub async fn render_tile<R: RangeReader>(
    dataset: &RasterDataset<R>,
    z: u32,
    x: u32,
    y: u32,
    params: &RenderParams,
    policy: OverviewPolicy,
) -> Result<RgbaImage, TileError> {
    let georef = dataset.require_georeference()?;
    let size = params.tile_size;
    match tile_to_window(dataset.info(), georef, z, x, y, size, policy)? {
        TileWindow::Empty => {
            Style::resolve(dataset, params).await?;
            Ok(RgbaImage::transparent(size, size))
        }
        TileWindow::Window(plan) => {
            render_window(dataset, &plan, &georef.from_mercator, size, size, params).await
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tiff::testing::{GeoSpec, GeoTiffFixture, SampleKind};
    use crate::raster::MemorySource;
    use crate::render::ImageFormat;

    fn world() -> Vec<u8> {
        GeoTiffFixture::new(256, 256)
            .tiled(64)
            .world_mercator()
            .build_u8(|_, c, r| ((c + r) % 256) as f64)
    }

    fn service() -> TileService<MemorySource> {
        let source = MemorySource::new();
        source.insert("world.tif", world());
        source.insert(
            "local.tif",
            GeoTiffFixture::new(32, 32)
                .geo(GeoSpec {
                    origin_x: 10.0,
                    origin_y: 50.0,
                    pixel_width: 0.01,
                    pixel_height: 0.01,
                    epsg: 4326,
                })
                .build(SampleKind::F32, |_, c, _| c as f64),
        );
        source.insert("plain.tif", GeoTiffFixture::new(8, 8).build_u8(|_, _, _| 1.0));
        TileService::new(DatasetRegistry::new(source))
    }

    #[tokio::test]
    async fn test_tile_is_png_and_cached() {
        let service = service();
        let request = TileRequest::new("world.tif", 1, 0, 1);
        let first = service.get_tile(request.clone()).await.unwrap();
        assert_eq!(first.content_type, "image/png");
        assert!(first.bytes.starts_with(&[0x89, b'P', b'N', b'G']));
        assert_eq!(&*first.fingerprint, request.fingerprint());

        let second = service.get_tile(request).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(service.cache().len(), 1);
        assert_eq!(service.registry().source().opens(), 1);
    }

    #[tokio::test]
    async fn test_tiles_render_on_spawned_tasks() {
        let service = Arc::new(service());
        let handles: Vec<_> = (0..4)
            .map(|x| {
                let service = service.clone();
                tokio::spawn(async move { service.get_tile(TileRequest::new("world.tif", 2, x, 1)).await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(service.cache().len(), 4);
        assert_eq!(service.registry().source().opens(), 1);
    }

    #[tokio::test]
    async fn test_identical_requests_give_identical_bytes() {
        let a = service().get_tile(TileRequest::new("world.tif", 2, 1, 1)).await.unwrap();
        let b = service().get_tile(TileRequest::new("world.tif", 2, 1, 1)).await.unwrap();
        assert_eq!(a.bytes, b.bytes);
    }

    #[tokio::test]
    async fn test_jpeg_tile() {
        let params = RenderParams {
            format: ImageFormat::Jpeg,
            ..RenderParams::default()
        };
        let tile = service()
            .get_tile(TileRequest::new("world.tif", 0, 0, 0).with_params(params))
            .await
            .unwrap();
        assert_eq!(tile.content_type, "image/jpeg");
        assert_eq!(&tile.bytes[..2], &[0xFF, 0xD8]);
    }

    #[tokio::test]
    async fn test_out_of_extent_tile_is_transparent_png() {
        let service = service();
        let tile = service.get_tile(TileRequest::new("local.tif", 5, 0, 0)).await.unwrap();
        let decoded = image::load_from_memory(&tile.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (256, 256));
        assert!(decoded.pixels().all(|p| p.0[3] == 0));
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let service = service();
        let err = service.get_tile(TileRequest::new("world.tif", 1, 2, 0)).await.unwrap_err();
        assert!(matches!(err, TileError::TileOutOfRange { z: 1, x: 2, y: 0 }));

        let err = service.get_tile(TileRequest::new("missing.tif", 0, 0, 0)).await.unwrap_err();
        assert!(matches!(err, TileError::NotFound { .. }));

        let params = RenderParams {
            bands: Some(vec![4]),
            ..RenderParams::default()
        };
        let err = service
            .get_tile(TileRequest::new("world.tif", 0, 0, 0).with_params(params))
            .await
            .unwrap_err();
        assert!(err.is_parameter());

        // No CRS: metadata is readable but tiles are not.
        let err = service.get_tile(TileRequest::new("plain.tif", 0, 0, 0)).await.unwrap_err();
        assert!(matches!(err, TileError::Source { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_requests_render_once() {
        let service = Arc::new(service());
        let mut handles = Vec::new();
        for _ in 0..12 {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                service.get_tile(TileRequest::new("world.tif", 1, 1, 1)).await
            }));
        }
        let mut tiles = Vec::new();
        for handle in handles {
            tiles.push(handle.await.unwrap().unwrap());
        }
        assert!(tiles.windows(2).all(|w| w[0] == w[1]));
        let stats = service.cache().stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(service.registry().source().opens(), 1);
    }
}
