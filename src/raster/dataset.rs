//! An opened GeoTIFF and its window reads.
//!
//! Opening parses the IFD chain and georeferencing once; afterwards the
//! dataset is immutable and shared between requests. A read touches only the
//! blocks intersecting the window:
//!
//! ```text
//!        bx=0     bx=1     bx=2
//!      ┌────────┬────────┬────────┐
//! by=0 │        │   ┌────┼──┐     │   window ──▶ blocks (1,0) (2,0)
//!      ├────────┼───┼────┼──┼─────┤                     (1,1) (2,1)
//! by=1 │        │   └────┼──┘     │
//!      └────────┴────────┴────────┘
//! ```
//!
//! Decoded blocks are kept in a small LRU so neighbouring tiles that share a
//! block decode it once. Concurrent reads that need the same block while it
//! is being decoded wait for that decode instead of fetching it again.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use lru::LruCache;
use serde::Serialize;
use tokio::sync::{watch, OnceCell};
use tracing::{debug, warn};

use crate::error::RasterError;
use crate::format::detect_format;
use crate::format::tiff::{
    gdal_statistic, photometric, GeoTiffTags, ImageLevel, TiffPyramid, TiffTag, ValueReader,
};
use crate::format::RasterFormat;
use crate::geo::window::zoom_range;
use crate::geo::{Bounds, Crs, GeoTransform, Georeference, PixelWindow, ZoomRange};
use crate::io::RangeReader;

use super::{BandBuffer, DataType, LevelInfo, RasterInfo};

/// Default number of decoded blocks kept per dataset.
pub const DEFAULT_DECODED_BLOCKS: usize = 64;

/// Longest side sampled when computing statistics without GDAL metadata.
const STATISTICS_MAX_SIZE: u32 = 1024;

/// ExtraSamples values meaning associated (1) or unassociated (2) alpha.
const EXTRA_SAMPLE_ALPHA: [u16; 2] = [1, 2];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// `(level, block index)`
type BlockKey = (usize, usize);

/// Clears the decoding marker of a block when its leader finishes or is
/// cancelled; dropping the sender wakes the waiters.
struct DecodeGuard<'a> {
    decoding: &'a Mutex<HashMap<BlockKey, watch::Receiver<()>>>,
    key: BlockKey,
    _done: watch::Sender<()>,
}

impl Drop for DecodeGuard<'_> {
    fn drop(&mut self) {
        lock(self.decoding).remove(&self.key);
    }
}

/// Summary of one band's valid samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BandStatistics {
    pub min: f64,
    pub max: f64,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

/// An opened raster.
pub struct RasterDataset<R> {
    reader: R,
    format: RasterFormat,
    pyramid: TiffPyramid,
    info: RasterInfo,
    georef: Option<Georeference>,
    palette: Option<Vec<[u8; 4]>>,
    gdal_metadata: Option<String>,
    blocks: Mutex<LruCache<BlockKey, Arc<Vec<f64>>>>,
    decoding: Mutex<HashMap<BlockKey, watch::Receiver<()>>>,
    statistics: OnceCell<Vec<BandStatistics>>,
}

impl<R: RangeReader> RasterDataset<R> {
    /// Open a raster from a reader.
    ///
    /// # Arguments
    /// * `reader` - Byte source of the file
    /// * `decoded_blocks` - Capacity of the decoded block LRU
    ///
    /// # Errors
    /// `RasterError::Source` for files that are not TIFF or whose sample
    /// layout cannot be decoded, `RasterError::Tiff` for corrupt structure.
    pub async fn open(reader: R, decoded_blocks: usize) -> Result<Self, RasterError> {
        let format = detect_format(&reader).await?;
        let pyramid = TiffPyramid::parse(&reader).await?;
        let tags = GeoTiffTags::read(&reader, &pyramid.header, pyramid.primary_ifd()).await?;
        let base = pyramid.base_level();

        let dtype = DataType::from_sample(base.bits_per_sample, base.sample_format).ok_or_else(|| {
            RasterError::Source(format!(
                "{}: unsupported sample type ({} bits)",
                reader.identifier(),
                base.bits_per_sample
            ))
        })?;

        let transform = GeoTransform::from_tags(&tags);
        let crs = match (transform.is_some(), tags.geokeys.epsg()) {
            (true, Some(code)) => match Crs::from_epsg(code) {
                Ok(crs) => Some(crs),
                Err(e) => {
                    warn!(identifier = reader.identifier(), error = %e, "Ignoring unknown CRS");
                    None
                }
            },
            _ => None,
        };
        let georef = match &crs {
            Some(crs) => match Georeference::new(crs.clone()) {
                Ok(georef) => Some(georef),
                Err(e) => {
                    warn!(identifier = reader.identifier(), error = %e, "CRS cannot be reprojected");
                    None
                }
            },
            None => None,
        };
        let transform = transform.unwrap_or_else(GeoTransform::identity);

        let palette = if base.photometric == photometric::PALETTE {
            read_palette(&reader, &pyramid).await?
        } else {
            None
        };

        let band_count = base.samples_per_pixel as usize;
        let color_bands = band_count.saturating_sub(base.extra_samples.len());
        let alpha_band = base
            .extra_samples
            .iter()
            .position(|v| EXTRA_SAMPLE_ALPHA.contains(v))
            .map(|i| color_bands + i + 1);

        let info = RasterInfo {
            identifier: reader.identifier().to_string(),
            driver: format.name().to_string(),
            width: base.width,
            height: base.height,
            band_count,
            dtype,
            nodata: tags.nodata,
            transform,
            crs,
            bounds: transform.bounds(base.width, base.height),
            levels: pyramid.levels.iter().map(LevelInfo::from).collect(),
            alpha_band,
            color_interpretation: color_interpretation(base, band_count, alpha_band),
            compression: base.compression.name().to_string(),
        };

        debug!(
            identifier = %info.identifier,
            width = info.width,
            height = info.height,
            bands = info.band_count,
            dtype = info.dtype.name(),
            levels = info.levels.len(),
            crs = ?info.crs.as_ref().map(|c| c.epsg),
            "Opened raster"
        );

        Ok(Self {
            reader,
            format,
            pyramid,
            info,
            georef,
            palette,
            gdal_metadata: tags.gdal_metadata,
            blocks: Mutex::new(LruCache::new(
                NonZeroUsize::new(decoded_blocks).unwrap_or(NonZeroUsize::MIN),
            )),
            decoding: Mutex::new(HashMap::new()),
            statistics: OnceCell::new(),
        })
    }

    pub fn info(&self) -> &RasterInfo {
        &self.info
    }

    pub fn identifier(&self) -> &str {
        &self.info.identifier
    }

    pub fn format(&self) -> RasterFormat {
        self.format
    }

    pub fn pyramid(&self) -> &TiffPyramid {
        &self.pyramid
    }

    /// `None` when the raster has no CRS that can be reprojected.
    pub fn georeference(&self) -> Option<&Georeference> {
        self.georef.as_ref()
    }

    /// The raster's georeference, or a source error naming the raster.
    pub fn require_georeference(&self) -> Result<&Georeference, RasterError> {
        self.georef.as_ref().ok_or_else(|| {
            RasterError::Source(format!(
                "{} has no coordinate reference system",
                self.info.identifier
            ))
        })
    }

    /// RGBA entries of an embedded TIFF color map.
    pub fn palette(&self) -> Option<&[[u8; 4]]> {
        self.palette.as_deref()
    }

    // =========================================================================
    // Geometry
    // =========================================================================

    pub fn native_bounds(&self) -> Bounds {
        self.info.bounds
    }

    /// Extent reprojected into `crs`.
    ///
    /// # Errors
    /// Fails when the raster has no CRS or the extent has no image in `crs`.
    pub fn bounds_in(&self, crs: &Crs) -> Result<Bounds, RasterError> {
        self.require_georeference()?.bounds_in(&self.info.bounds, crs)
    }

    /// Center of the extent as `(lon, lat)`.
    pub fn center(&self) -> Result<(f64, f64), RasterError> {
        Ok(self.bounds_in(&Crs::wgs84())?.center())
    }

    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        self.info.transform.pixel_to_geo(col, row)
    }

    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        self.info.transform.geo_to_pixel(x, y)
    }

    /// Web-mercator zoom range; all zeros without a CRS.
    pub fn zoom_range(&self, tile_size: u32) -> ZoomRange {
        match &self.georef {
            Some(georef) => zoom_range(&self.info, georef, tile_size),
            None => ZoomRange {
                min_zoom: 0,
                max_zoom: 0,
                default_zoom: 0,
            },
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn check_bands(&self, bands: &[usize]) -> Result<(), RasterError> {
        if bands.is_empty() {
            return Err(RasterError::Parameter("no bands requested".into()));
        }
        match bands.iter().find(|&&b| b == 0 || b > self.info.band_count) {
            Some(b) => Err(RasterError::Parameter(format!(
                "band {} does not exist, raster has {} band(s)",
                b, self.info.band_count
            ))),
            None => Ok(()),
        }
    }

    /// Read `bands` (1-based) over `window`.
    ///
    /// With `out_shape` the window is sampled by nearest neighbour into a
    /// buffer of that size; otherwise the buffer matches the window. Parts of
    /// the window outside the level are NaN, and a window entirely outside
    /// yields an all-NaN buffer without touching the source.
    ///
    /// # Errors
    /// `RasterError::Parameter` for unknown bands or levels and empty shapes;
    /// I/O and decode failures of the touched blocks.
    pub async fn read_window(
        &self,
        window: &PixelWindow,
        bands: &[usize],
        out_shape: Option<(u32, u32)>,
    ) -> Result<BandBuffer, RasterError> {
        self.check_bands(bands)?;
        let level = self.pyramid.get_level(window.level).ok_or_else(|| {
            RasterError::Parameter(format!("level {} does not exist", window.level))
        })?;
        let (out_w, out_h) = out_shape.unwrap_or((window.width, window.height));
        if window.is_empty() || out_w == 0 || out_h == 0 {
            return Err(RasterError::Parameter(format!("empty window {:?}", window)));
        }

        let mut buffer = BandBuffer::filled(*window, out_w, out_h, bands.to_vec());
        if window.clip(level.width, level.height).is_none() {
            return Ok(buffer);
        }

        // Source column/row for every output pixel, grouped by block.
        let cols = sample_positions(window.col_off, window.width, out_w, level.width);
        let rows = sample_positions(window.row_off, window.height, out_h, level.height);
        let by_block_col = group_by_block(&cols, level.block_width);
        let by_block_row = group_by_block(&rows, level.block_height);

        let samples = level.samples_per_block_pixel();
        let block_w = level.block_width as usize;
        let out_w = out_w as usize;

        for (&by, out_rows) in &by_block_row {
            for (&bx, out_cols) in &by_block_col {
                for (slot, &band) in bands.iter().enumerate() {
                    let (plane, sample) = if level.planar {
                        ((band - 1) as u16, 0)
                    } else {
                        (0, band - 1)
                    };
                    let block = self.block(level, bx, by, plane).await?;
                    let target = buffer.band_mut(slot);
                    for &(oy, row) in out_rows {
                        let block_row = (row - by * level.block_height) as usize;
                        for &(ox, col) in out_cols {
                            let block_col = (col - bx * level.block_width) as usize;
                            let i = (block_row * block_w + block_col) * samples + sample;
                            if let Some(&v) = block.get(i) {
                                target[oy * out_w + ox] = v;
                            }
                        }
                    }
                }
            }
        }
        Ok(buffer)
    }

    /// Decoded samples of one block, cached.
    async fn block(
        &self,
        level: &ImageLevel,
        bx: u32,
        by: u32,
        plane: u16,
    ) -> Result<Arc<Vec<f64>>, RasterError> {
        let index = level.block_index(bx, by, plane).ok_or_else(|| {
            RasterError::Source(format!(
                "{}: block ({}, {}) outside level {}",
                self.info.identifier, bx, by, level.level_index
            ))
        })?;
        let key = (level.level_index, index);

        loop {
            let cached = lock(&self.blocks).get(&key).cloned();
            if let Some(block) = cached {
                return Ok(block);
            }

            let claim = {
                let mut decoding = lock(&self.decoding);
                match decoding.get(&key) {
                    Some(rx) => Ok(rx.clone()),
                    None => {
                        // The previous leader may have finished since the lookup above.
                        if let Some(block) = lock(&self.blocks).peek(&key) {
                            return Ok(block.clone());
                        }
                        let (tx, rx) = watch::channel(());
                        decoding.insert(key, rx);
                        Err(tx)
                    }
                }
            };

            let done = match claim {
                Ok(mut rx) => {
                    // Resolves once the leader drops its sender.
                    let _ = rx.changed().await;
                    continue;
                }
                Err(tx) => tx,
            };

            let _guard = DecodeGuard {
                decoding: &self.decoding,
                key,
                _done: done,
            };
            let block = Arc::new(self.decode_block(level, by, index).await?);
            lock(&self.blocks).put(key, block.clone());
            return Ok(block);
        }
    }

    /// Fetch and decompress one block.
    async fn decode_block(&self, level: &ImageLevel, by: u32, index: usize) -> Result<Vec<f64>, RasterError> {
        let (offset, length) = level.block_location(index).ok_or_else(|| {
            RasterError::Source(format!("{}: missing offset for block {}", self.info.identifier, index))
        })?;
        let rows = level.block_rows(by) as usize;
        if length == 0 {
            // Sparse files leave empty blocks unwritten.
            return Ok(vec![f64::NAN; level.block_width as usize * rows * level.samples_per_block_pixel()]);
        }

        let data = self.reader.read_exact_at(offset, length as usize).await?;
        let layout = level.block_layout(self.pyramid.header.byte_order);
        let decoded = tokio::task::spawn_blocking(move || layout.decode(&data, rows))
            .await
            .map_err(|e| RasterError::Source(format!("decode task failed: {}", e)))??;
        Ok(decoded)
    }

    /// All band values at a full-resolution pixel, `None` outside the raster.
    pub async fn pixel_values(&self, col: f64, row: f64) -> Result<Option<Vec<f64>>, RasterError> {
        if !(col >= 0.0 && row >= 0.0 && col < self.info.width as f64 && row < self.info.height as f64) {
            return Ok(None);
        }
        let window = PixelWindow::new(col.floor() as i64, row.floor() as i64, 1, 1, 0);
        let bands: Vec<usize> = (1..=self.info.band_count).collect();
        let buffer = self.read_window(&window, &bands, None).await?;
        Ok(Some((0..bands.len()).map(|i| buffer.get(i, 0, 0)).collect()))
    }

    /// Window and output shape for a whole-raster preview of at most
    /// `max_size` pixels on the long side.
    ///
    /// Reads from the coarsest level that still has at least the preview size.
    pub fn preview_window(&self, max_size: u32) -> (PixelWindow, (u32, u32)) {
        let max_size = max_size.max(1);
        let level = self
            .info
            .levels
            .iter()
            .filter(|l| l.width.max(l.height) >= max_size)
            .last()
            .unwrap_or(&self.info.levels[0]);
        let long = level.width.max(level.height);
        let scale = if long > max_size { max_size as f64 / long as f64 } else { 1.0 };
        let out_w = ((level.width as f64 * scale).round() as u32).max(1);
        let out_h = ((level.height as f64 * scale).round() as u32).max(1);
        (
            PixelWindow::new(0, 0, level.width, level.height, level.index),
            (out_w, out_h),
        )
    }

    /// Per-band statistics, computed once.
    ///
    /// GDAL `STATISTICS_*` metadata is used when present for every band;
    /// otherwise the coarsest level is sampled.
    pub async fn statistics(&self) -> Result<&[BandStatistics], RasterError> {
        let stats = self
            .statistics
            .get_or_try_init(|| async {
                if let Some(stats) = self.metadata_statistics() {
                    return Ok(stats);
                }
                self.compute_statistics().await
            })
            .await?;
        Ok(stats.as_slice())
    }

    fn metadata_statistics(&self) -> Option<Vec<BandStatistics>> {
        let metadata = self.gdal_metadata.as_deref()?;
        (0..self.info.band_count)
            .map(|band| {
                Some(BandStatistics {
                    min: gdal_statistic(metadata, "STATISTICS_MINIMUM", band)?,
                    max: gdal_statistic(metadata, "STATISTICS_MAXIMUM", band)?,
                    mean: gdal_statistic(metadata, "STATISTICS_MEAN", band),
                    std: gdal_statistic(metadata, "STATISTICS_STDDEV", band),
                })
            })
            .collect()
    }

    async fn compute_statistics(&self) -> Result<Vec<BandStatistics>, RasterError> {
        let coarsest = self.info.levels.len() - 1;
        let level = &self.info.levels[coarsest];
        let long = level.width.max(level.height);
        let scale = (STATISTICS_MAX_SIZE as f64 / long as f64).min(1.0);
        let shape = (
            ((level.width as f64 * scale).round() as u32).max(1),
            ((level.height as f64 * scale).round() as u32).max(1),
        );
        let window = PixelWindow::new(0, 0, level.width, level.height, coarsest);
        let bands: Vec<usize> = (1..=self.info.band_count).collect();
        let buffer = self.read_window(&window, &bands, Some(shape)).await?;

        let stats = (0..bands.len())
            .map(|i| band_statistics(buffer.band(i), self.info.nodata))
            .collect();
        debug!(identifier = %self.info.identifier, level = coarsest, "Computed band statistics");
        Ok(stats)
    }
}

/// Whether `v` is a real sample rather than NaN or nodata.
pub(crate) fn is_valid_sample(v: f64, nodata: Option<f64>) -> bool {
    !v.is_nan() && nodata.map_or(true, |nd| v != nd)
}

fn band_statistics(values: &[f64], nodata: Option<f64>) -> BandStatistics {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for &v in values.iter().filter(|&&v| is_valid_sample(v, nodata)) {
        min = min.min(v);
        max = max.max(v);
        sum += v;
        sum_sq += v * v;
        count += 1;
    }
    if count == 0 {
        return BandStatistics {
            min: 0.0,
            max: 0.0,
            mean: None,
            std: None,
        };
    }
    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64 - mean * mean).max(0.0);
    BandStatistics {
        min,
        max,
        mean: Some(mean),
        std: Some(variance.sqrt()),
    }
}

/// Nearest source index for each of `out` samples across `len` source pixels
/// starting at `offset`; `None` where the source falls outside `0..limit`.
fn sample_positions(offset: i64, len: u32, out: u32, limit: u32) -> Vec<Option<u32>> {
    let step = len as f64 / out as f64;
    (0..out)
        .map(|i| {
            let src = offset + ((i as f64 + 0.5) * step).floor() as i64;
            (src >= 0 && src < limit as i64).then_some(src as u32)
        })
        .collect()
}

/// `block index -> [(output index, source index)]`.
fn group_by_block(positions: &[Option<u32>], block: u32) -> BTreeMap<u32, Vec<(usize, u32)>> {
    let mut groups: BTreeMap<u32, Vec<(usize, u32)>> = BTreeMap::new();
    for (out, src) in positions.iter().enumerate() {
        if let Some(src) = src {
            groups.entry(src / block.max(1)).or_default().push((out, *src));
        }
    }
    groups
}

async fn read_palette<R: RangeReader>(
    reader: &R,
    pyramid: &TiffPyramid,
) -> Result<Option<Vec<[u8; 4]>>, RasterError> {
    let entry = match pyramid.primary_ifd().get_entry_by_tag(TiffTag::ColorMap) {
        Some(entry) => entry,
        None => return Ok(None),
    };
    let values = ValueReader::new(reader, &pyramid.header)
        .read_u16_array(entry)
        .await?;
    let n = values.len() / 3;
    if n == 0 {
        return Ok(None);
    }
    let palette = (0..n)
        .map(|i| {
            [
                (values[i] >> 8) as u8,
                (values[n + i] >> 8) as u8,
                (values[2 * n + i] >> 8) as u8,
                255,
            ]
        })
        .collect();
    Ok(Some(palette))
}

fn color_interpretation(
    level: &ImageLevel,
    band_count: usize,
    alpha_band: Option<usize>,
) -> Vec<&'static str> {
    (1..=band_count)
        .map(|band| {
            if Some(band) == alpha_band {
                return "alpha";
            }
            match (level.photometric, band) {
                (photometric::PALETTE, 1) => "palette",
                (photometric::RGB | photometric::YCBCR, 1) => "red",
                (photometric::RGB | photometric::YCBCR, 2) => "green",
                (photometric::RGB | photometric::YCBCR, 3) => "blue",
                (photometric::MIN_IS_BLACK | photometric::MIN_IS_WHITE, 1) => "gray",
                _ => "undefined",
            }
        })
        .collect()
}
