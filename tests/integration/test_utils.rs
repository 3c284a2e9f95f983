//! Test utilities for integration tests.
//!
//! This module provides an in-memory GeoTIFF builder, a source that counts
//! byte range reads, and helpers for driving the router.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;
use tower::ServiceExt;

use raster_tileserver::error::{IoError, RasterError};
use raster_tileserver::io::{MemoryReader, RangeReader};
use raster_tileserver::raster::{MemorySource, RasterSource};

/// Half the web-mercator world width in meters.
pub const HALF_EARTH: f64 = 20_037_508.342_789_244;

// =============================================================================
// GeoTIFF Builder
// =============================================================================

/// Sample type of a [`TestRaster`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sample {
    U8,
    F32,
}

/// Builder for small tiled GeoTIFFs.
///
/// `build` evaluates `pixel(band, col, row)` in full-resolution coordinates,
/// overviews sample it by nearest decimation.
#[derive(Debug, Clone)]
pub struct TestRaster {
    width: u32,
    height: u32,
    tile: u32,
    bands: u16,
    sample: Sample,
    /// origin x, origin y, pixel width, pixel height, EPSG code
    geo: Option<(f64, f64, f64, f64, u16)>,
    nodata: Option<String>,
    overviews: Vec<u32>,
}

impl TestRaster {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tile: 64,
            bands: 1,
            sample: Sample::U8,
            geo: None,
            nodata: None,
            overviews: Vec::new(),
        }
    }

    pub fn tile(mut self, size: u32) -> Self {
        self.tile = size;
        self
    }

    pub fn bands(mut self, bands: u16) -> Self {
        self.bands = bands;
        self
    }

    pub fn float32(mut self) -> Self {
        self.sample = Sample::F32;
        self
    }

    pub fn geo(mut self, origin: (f64, f64), pixel: (f64, f64), epsg: u16) -> Self {
        self.geo = Some((origin.0, origin.1, pixel.0, pixel.1, epsg));
        self
    }

    /// Web-mercator georeferencing covering the whole world.
    pub fn world_mercator(self) -> Self {
        let (w, h) = (self.width as f64, self.height as f64);
        self.geo(
            (-HALF_EARTH, HALF_EARTH),
            (2.0 * HALF_EARTH / w, 2.0 * HALF_EARTH / h),
            3857,
        )
    }

    pub fn nodata(mut self, nodata: &str) -> Self {
        self.nodata = Some(nodata.to_string());
        self
    }

    pub fn overview(mut self, factor: u32) -> Self {
        self.overviews.push(factor);
        self
    }

    pub fn build(&self, pixel: impl Fn(usize, u32, u32) -> f64) -> Bytes {
        let mut cursor = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut cursor).expect("encoder");

        self.write_level(&mut encoder, 1, &pixel);
        for &factor in &self.overviews {
            self.write_level(&mut encoder, factor, &pixel);
        }
        drop(encoder);
        Bytes::from(cursor.into_inner())
    }

    fn write_level<W: std::io::Write + std::io::Seek>(
        &self,
        encoder: &mut TiffEncoder<W>,
        factor: u32,
        pixel: &impl Fn(usize, u32, u32) -> f64,
    ) {
        let width = self.width.div_ceil(factor);
        let height = self.height.div_ceil(factor);
        let bands = self.bands as usize;
        let across = width.div_ceil(self.tile);
        let down = height.div_ceil(self.tile);
        let bits: u16 = match self.sample {
            Sample::U8 => 8,
            Sample::F32 => 32,
        };

        let mut blocks = Vec::new();
        for ty in 0..down {
            for tx in 0..across {
                let mut raw = Vec::new();
                for r in 0..self.tile {
                    for c in 0..self.tile {
                        let (col, row) = (tx * self.tile + c, ty * self.tile + r);
                        for band in 0..bands {
                            let v = if col < width && row < height {
                                let fc = (col * factor).min(self.width - 1);
                                let fr = (row * factor).min(self.height - 1);
                                pixel(band, fc, fr)
                            } else {
                                0.0
                            };
                            match self.sample {
                                Sample::U8 => raw.push(v as u8),
                                Sample::F32 => raw.extend_from_slice(&(v as f32).to_ne_bytes()),
                            }
                        }
                    }
                }
                blocks.push(raw);
            }
        }

        let mut dir = encoder.new_directory().expect("directory");
        let subfile: u32 = if factor == 1 { 0 } else { 1 };
        dir.write_tag(Tag::Unknown(254), subfile).unwrap();
        dir.write_tag(Tag::ImageWidth, width).unwrap();
        dir.write_tag(Tag::ImageLength, height).unwrap();
        dir.write_tag(Tag::BitsPerSample, &vec![bits; bands][..]).unwrap();
        dir.write_tag(Tag::Compression, 1u16).unwrap();
        let photometric: u16 = if bands >= 3 { 2 } else { 1 };
        dir.write_tag(Tag::PhotometricInterpretation, photometric).unwrap();
        dir.write_tag(Tag::SamplesPerPixel, self.bands).unwrap();
        let format: u16 = match self.sample {
            Sample::U8 => 1,
            Sample::F32 => 3,
        };
        dir.write_tag(Tag::SampleFormat, &vec![format; bands][..]).unwrap();
        dir.write_tag(Tag::PlanarConfiguration, 1u16).unwrap();

        let mut offsets = Vec::with_capacity(blocks.len());
        let mut counts = Vec::with_capacity(blocks.len());
        for block in &blocks {
            offsets.push(dir.write_data(&block[..]).unwrap() as u32);
            counts.push(block.len() as u32);
        }
        dir.write_tag(Tag::Unknown(322), self.tile).unwrap();
        dir.write_tag(Tag::Unknown(323), self.tile).unwrap();
        dir.write_tag(Tag::Unknown(324), &offsets[..]).unwrap();
        dir.write_tag(Tag::Unknown(325), &counts[..]).unwrap();

        if factor == 1 {
            if let Some((ox, oy, pw, ph, epsg)) = self.geo {
                dir.write_tag(Tag::Unknown(33550), &[pw, ph, 0.0][..]).unwrap();
                dir.write_tag(Tag::Unknown(33922), &[0.0, 0.0, 0.0, ox, oy, 0.0][..])
                    .unwrap();
                let (model, key) = if epsg == 4326 { (2u16, 2048u16) } else { (1u16, 3072u16) };
                let keys: [u16; 16] = [
                    1, 1, 0, 3, //
                    1024, 0, 1, model, //
                    1025, 0, 1, 1, //
                    key, 0, 1, epsg,
                ];
                dir.write_tag(Tag::Unknown(34735), &keys[..]).unwrap();
            }
            if let Some(nodata) = &self.nodata {
                let mut text = nodata.clone().into_bytes();
                text.push(0);
                dir.write_tag(Tag::Unknown(42113), &text[..]).unwrap();
            }
        }

        dir.finish().expect("finish directory");
    }
}

/// A 100x100 single-band byte raster over lon 10..20, lat 40..50 whose
/// value is its column index.
pub fn geographic_raster() -> Bytes {
    TestRaster::new(100, 100)
        .tile(32)
        .geo((10.0, 50.0), (0.1, 0.1), 4326)
        .build(|_, col, _| col as f64)
}

/// A 512x512 world-covering float raster: `nodata` (-9999) in the left
/// half, 50.0 in the right half.
pub fn world_float_raster() -> Bytes {
    TestRaster::new(512, 512)
        .tile(128)
        .float32()
        .world_mercator()
        .nodata("-9999")
        .overview(2)
        .build(|_, col, _| if col < 256 { -9999.0 } else { 50.0 })
}

/// A 256x256 world-covering RGB raster.
pub fn world_rgb_raster() -> Bytes {
    TestRaster::new(256, 256)
        .tile(64)
        .bands(3)
        .world_mercator()
        .build(|band, col, row| match band {
            0 => col as f64,
            1 => row as f64,
            _ => 128.0,
        })
}

/// A memory source holding the standard fixtures.
pub fn fixture_source() -> MemorySource {
    let source = MemorySource::new();
    source.insert("geo.tif", geographic_raster());
    source.insert("world.tif", world_float_raster());
    source.insert("rgb.tif", world_rgb_raster());
    source.insert("not-a-tiff.tif", Bytes::from_static(b"definitely not a tiff"));
    source
}

// =============================================================================
// Counting Source
// =============================================================================

/// Range reader that counts the reads reaching it.
pub struct CountingReader {
    inner: MemoryReader,
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl RangeReader for CountingReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_exact_at(offset, len).await
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}

/// Serves a single raster under every identifier it knows and counts reads.
pub struct CountingSource {
    identifier: String,
    data: Bytes,
    reads: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(identifier: impl Into<String>, data: Bytes) -> Self {
        Self {
            identifier: identifier.into(),
            data,
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }
}

#[async_trait]
impl RasterSource for CountingSource {
    type Reader = CountingReader;

    async fn create_reader(&self, identifier: &str) -> Result<Self::Reader, RasterError> {
        if identifier != self.identifier {
            return Err(RasterError::NotFound(identifier.to_string()));
        }
        Ok(CountingReader {
            inner: MemoryReader::new(self.data.clone(), identifier),
            reads: Arc::clone(&self.reads),
        })
    }
}

// =============================================================================
// Request Helpers
// =============================================================================

/// Send a GET request through the router.
pub async fn get(router: &Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router.clone().oneshot(request).await.unwrap()
}

/// Collect a response body.
pub async fn body_bytes(response: Response<Body>) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

/// Collect a response body as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).expect("JSON body")
}

/// Decode a PNG or JPEG body to RGBA.
pub fn decode_rgba(bytes: &[u8]) -> image::RgbaImage {
    image::load_from_memory(bytes).expect("decodable image").to_rgba8()
}
