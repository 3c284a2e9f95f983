//! Tile layers: anything that can serve `(z, x, y)` tiles.
//!
//! Two layers exist: [`RasterLayer`] renders one raster with fixed styling,
//! [`DebugGridLayer`] draws a bordered tile labelled with its coordinates,
//! useful to check that a map client requests the tiles it should.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TileError;
use crate::geo::mercator::is_valid_tile;
use crate::raster::RasterSource;
use crate::render::{ImageFormat, RenderParams, RgbaImage, DEFAULT_TILE_SIZE};

use super::cache::{RenderedTile, TileCache};
use super::encoder::TileEncoder;
use super::fingerprint::tile_fingerprint;
use super::service::{TileRequest, TileService};

/// Layer name mixed into debug tile fingerprints.
pub const DEBUG_LAYER: &str = "debug";

/// A source of slippy-map tiles.
#[async_trait]
pub trait TileLayer: Send + Sync {
    fn name(&self) -> &str;

    /// Encoded tile `(z, x, y)`.
    ///
    /// # Errors
    /// `TileError::TileOutOfRange` for indices outside the pyramid, plus
    /// whatever the layer's rendering can fail with.
    async fn tile(&self, z: u32, x: u32, y: u32) -> Result<RenderedTile, TileError>;
}

// =============================================================================
// Raster layer
// =============================================================================

/// One raster with fixed rendering parameters.
pub struct RasterLayer<S: RasterSource> {
    service: Arc<TileService<S>>,
    identifier: String,
    params: RenderParams,
}

impl<S: RasterSource + 'static> RasterLayer<S> {
    pub fn new(service: Arc<TileService<S>>, identifier: impl Into<String>) -> Self {
        Self {
            service,
            identifier: identifier.into(),
            params: RenderParams::default(),
        }
    }

    pub fn with_params(mut self, params: RenderParams) -> Self {
        self.params = params;
        self
    }
}

#[async_trait]
impl<S: RasterSource + 'static> TileLayer for RasterLayer<S> {
    fn name(&self) -> &str {
        &self.identifier
    }

    async fn tile(&self, z: u32, x: u32, y: u32) -> Result<RenderedTile, TileError> {
        let request = TileRequest::new(self.identifier.clone(), z, x, y)
            .with_params(self.params.clone());
        self.service.get_tile(request).await
    }
}

// =============================================================================
// Debug grid layer
// =============================================================================

const BORDER: [u8; 4] = [255, 0, 0, 255];
const INK: [u8; 4] = [0, 0, 0, 255];
const PAPER: [u8; 4] = [255, 255, 255, 220];

/// 3x5 bitmap glyphs, one row per byte, high bit on the left.
const GLYPH_WIDTH: u32 = 3;
const GLYPH_HEIGHT: u32 = 5;

fn glyph(c: char) -> Option<[u8; 5]> {
    Some(match c {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        _ => return None,
    })
}

/// Bordered tiles labelled `z/x/y`.
pub struct DebugGridLayer {
    tile_size: u32,
    format: ImageFormat,
    encoder: TileEncoder,
    cache: Option<Arc<TileCache>>,
}

impl Default for DebugGridLayer {
    fn default() -> Self {
        Self::new(DEFAULT_TILE_SIZE)
    }
}

impl DebugGridLayer {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(16),
            format: ImageFormat::Png,
            encoder: TileEncoder::default(),
            cache: None,
        }
    }

    /// Share a tile cache; debug tiles use their own fingerprints.
    pub fn with_cache(mut self, cache: Arc<TileCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_format(mut self, format: ImageFormat, encoder: TileEncoder) -> Self {
        self.format = format;
        self.encoder = encoder;
        self
    }

    fn fingerprint(&self, z: u32, x: u32, y: u32) -> String {
        let params = RenderParams {
            tile_size: self.tile_size,
            format: self.format,
            ..RenderParams::default()
        };
        tile_fingerprint(DEBUG_LAYER, "", z, x, y, &params)
    }

    fn encode(&self, z: u32, x: u32, y: u32, fingerprint: String) -> Result<RenderedTile, TileError> {
        let image = draw_debug_tile(self.tile_size, &format!("{}/{}/{}", z, x, y));
        let bytes = self.encoder.encode(&image, self.format)?;
        Ok(RenderedTile::new(bytes, self.format.content_type(), fingerprint))
    }
}

#[async_trait]
impl TileLayer for DebugGridLayer {
    fn name(&self) -> &str {
        DEBUG_LAYER
    }

    async fn tile(&self, z: u32, x: u32, y: u32) -> Result<RenderedTile, TileError> {
        if !is_valid_tile(z, x, y) {
            return Err(TileError::TileOutOfRange { z, x, y });
        }
        let fingerprint = self.fingerprint(z, x, y);
        match &self.cache {
            Some(cache) => {
                if let Some(tile) = cache.get(&fingerprint)? {
                    return Ok(tile);
                }
                let tile = self.encode(z, x, y, fingerprint)?;
                cache.insert(tile.clone());
                Ok(tile)
            }
            None => self.encode(z, x, y, fingerprint),
        }
    }
}

/// Transparent tile with a one pixel border and `label` centered on a
/// light box.
pub fn draw_debug_tile(size: u32, label: &str) -> RgbaImage {
    let mut image = RgbaImage::transparent(size, size);
    let put = |image: &mut RgbaImage, x: u32, y: u32, rgba: [u8; 4]| {
        if x < size && y < size {
            let i = (y as usize * size as usize + x as usize) * 4;
            image.data[i..i + 4].copy_from_slice(&rgba);
        }
    };

    let chars = label.chars().count() as u32;
    if chars > 0 {
        let advance = GLYPH_WIDTH + 1;
        let scale = (size / 64).min(size.saturating_sub(8) / (chars * advance)).max(1);
        let text_w = (chars * advance - 1) * scale;
        let text_h = GLYPH_HEIGHT * scale;
        let left = size.saturating_sub(text_w) / 2;
        let top = size.saturating_sub(text_h) / 2;

        for y in top.saturating_sub(scale)..top + text_h + scale {
            for x in left.saturating_sub(scale)..left + text_w + scale {
                put(&mut image, x, y, PAPER);
            }
        }
        for (n, c) in label.chars().enumerate() {
            let Some(rows) = glyph(c) else { continue };
            let origin = left + n as u32 * advance * scale;
            for (row, &bits) in rows.iter().enumerate() {
                for col in (0..GLYPH_WIDTH).filter(|col| bits >> (GLYPH_WIDTH - 1 - col) & 1 == 1) {
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let y = top + row as u32 * scale + dy;
                            put(&mut image, origin + col * scale + dx, y, INK);
                        }
                    }
                }
            }
        }
    }

    // Border last so long labels never hide it.
    for i in 0..size {
        put(&mut image, i, 0, BORDER);
        put(&mut image, i, size - 1, BORDER);
        put(&mut image, 0, i, BORDER);
        put(&mut image, size - 1, i, BORDER);
    }
    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tiff::testing::GeoTiffFixture;
    use crate::raster::{DatasetRegistry, MemorySource};

    #[test]
    fn test_debug_tile_has_border_and_label() {
        let image = draw_debug_tile(256, "3/2/1");
        assert_eq!(image.pixel(0, 0), BORDER);
        assert_eq!(image.pixel(255, 128), BORDER);
        assert_eq!(image.pixel(20, 20)[3], 0);

        let ink = image.data.chunks_exact(4).filter(|p| *p == INK).count();
        assert!(ink > 0);
        // Centered: the label box covers the middle row.
        assert_ne!(image.pixel(128, 128)[3], 0);
    }

    #[test]
    fn test_long_labels_stay_inside() {
        let image = draw_debug_tile(64, "30/1073741823/1073741823");
        assert_eq!(image.pixel(0, 32), BORDER);
        assert!(image.data.chunks_exact(4).any(|p| p == INK));
    }

    #[tokio::test]
    async fn test_debug_layer_tiles() {
        let cache = Arc::new(TileCache::new());
        let layer = DebugGridLayer::default().with_cache(cache.clone());
        assert_eq!(layer.name(), "debug");

        let a = layer.tile(4, 3, 2).await.unwrap();
        let b = layer.tile(4, 3, 2).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);
        assert_ne!(a.bytes, layer.tile(4, 3, 3).await.unwrap().bytes);

        let decoded = image::load_from_memory(&a.bytes).unwrap().to_rgba8();
        assert_eq!(decoded.dimensions(), (256, 256));

        let err = layer.tile(1, 2, 0).await.unwrap_err();
        assert!(matches!(err, TileError::TileOutOfRange { .. }));
    }

    #[tokio::test]
    async fn test_layers_behind_trait_objects() {
        let source = MemorySource::new();
        source.insert(
            "world.tif",
            GeoTiffFixture::new(64, 64).world_mercator().build_u8(|_, _, _| 50.0),
        );
        let service = Arc::new(TileService::new(DatasetRegistry::new(source)));
        let layers: Vec<Box<dyn TileLayer>> = vec![
            Box::new(RasterLayer::new(service, "world.tif")),
            Box::new(DebugGridLayer::new(128)),
        ];

        assert_eq!(layers[0].name(), "world.tif");
        for layer in &layers {
            let tile = layer.tile(0, 0, 0).await.unwrap();
            assert_eq!(tile.content_type, "image/png");
        }
    }
}
