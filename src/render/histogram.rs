//! Band histograms over a whole-raster preview.

use serde::Serialize;

use crate::error::TileError;
use crate::io::RangeReader;
use crate::raster::{is_valid_sample, RasterDataset};

/// Preview size the histogram is computed on.
pub const HISTOGRAM_PREVIEW_SIZE: u32 = 1024;

/// Largest accepted bin count.
pub const MAX_BINS: usize = 4096;

/// Counts of valid samples per bin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub band: usize,
    /// One value per bin, probability densities when `density` is set
    pub counts: Vec<f64>,
    /// `counts.len() + 1` bin edges
    pub edges: Vec<f64>,
    pub density: bool,
    /// Valid samples that fell inside the range
    pub total: u64,
}

/// Options of a histogram request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramOptions {
    pub bins: usize,
    /// Explicit `(min, max)`; defaults to the data range
    pub range: Option<(f64, f64)>,
    pub density: bool,
    pub nodata: Option<f64>,
}

impl Default for HistogramOptions {
    fn default() -> Self {
        Self {
            bins: 256,
            range: None,
            density: false,
            nodata: None,
        }
    }
}

/// Bin `values`, skipping NaN and nodata.
///
/// The last bin is closed so the maximum is counted. A degenerate data range
/// is widened by half a unit on each side.
pub fn compute_histogram(values: &[f64], band: usize, options: &HistogramOptions) -> Histogram {
    let bins = options.bins.max(1);
    let valid = || values.iter().copied().filter(|&v| is_valid_sample(v, options.nodata));

    let (mut lo, mut hi) = options.range.unwrap_or_else(|| {
        valid().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
    });
    if !lo.is_finite() || !hi.is_finite() {
        (lo, hi) = (0.0, 1.0);
    }
    if hi <= lo {
        (lo, hi) = (lo - 0.5, lo + 0.5);
    }

    let width = (hi - lo) / bins as f64;
    let mut counts = vec![0.0; bins];
    let mut total = 0u64;
    for v in valid() {
        if v < lo || v > hi {
            continue;
        }
        let bin = (((v - lo) / width) as usize).min(bins - 1);
        counts[bin] += 1.0;
        total += 1;
    }
    if options.density && total > 0 {
        let norm = total as f64 * width;
        counts.iter_mut().for_each(|c| *c /= norm);
    }

    Histogram {
        band,
        counts,
        edges: (0..=bins).map(|i| lo + width * i as f64).collect(),
        density: options.density,
        total,
    }
}

/// Histogram of one band (1-based) computed on a preview of the raster.
///
/// # Errors
/// `TileError::Parameter` for unknown bands or bin counts out of range;
/// read failures.
pub async fn histogram<R: RangeReader>(
    dataset: &RasterDataset<R>,
    band: usize,
    options: &HistogramOptions,
) -> Result<Histogram, TileError> {
    if options.bins == 0 || options.bins > MAX_BINS {
        return Err(TileError::parameter(format!(
            "bins must be in 1..={}",
            MAX_BINS
        )));
    }
    if let Some((lo, hi)) = options.range {
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(TileError::parameter("histogram range must satisfy min < max"));
        }
    }

    let (window, shape) = dataset.preview_window(HISTOGRAM_PREVIEW_SIZE);
    let buffer = dataset.read_window(&window, &[band], Some(shape)).await?;
    let options = HistogramOptions {
        nodata: options.nodata.or(dataset.info().nodata),
        ..*options
    };
    Ok(compute_histogram(buffer.band(0), band, &options))
}
