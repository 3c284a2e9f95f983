//! Cloud Optimized GeoTIFF structure checks.
//!
//! A COG is laid out so a client can read the header, every IFD and then
//! only the blocks it needs, with the coarsest data nearest the front:
//!
//! ```text
//!   header │ IFD 0 │ IFD 1 │ ... │ overview N data │ ... │ overview 1 │ full-res data
//! ```
//!
//! The report is advisory. A file that fails it is still served, just less
//! efficiently over the network.

use serde::Serialize;

use super::pyramid::{ImageLevel, TiffPyramid};

/// Largest image that is acceptable without tiling or overviews.
const SMALL_IMAGE_LIMIT: u32 = 512;

/// The first IFD must start within this many bytes of the file start.
const MAX_FIRST_IFD_OFFSET: u64 = 300;

/// Outcome of a COG structure check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn new() -> Self {
        Self {
            is_valid: true,
            ..Default::default()
        }
    }

    fn add_error(&mut self, error: String) {
        self.is_valid = false;
        self.errors.push(error);
    }

    fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }
}

/// Check the layout of a parsed TIFF against COG conventions.
///
/// With `strict`, warnings also make the file invalid.
pub fn validate_cog(pyramid: &TiffPyramid, strict: bool) -> ValidationResult {
    let mut result = ValidationResult::new();
    let base = pyramid.base_level();
    let overviews = &pyramid.levels[1..];
    let large = base.width > SMALL_IMAGE_LIMIT || base.height > SMALL_IMAGE_LIMIT;

    if large && !base.tiled {
        result.add_error(format!(
            "The file is greater than {0}x{0} but is not tiled",
            SMALL_IMAGE_LIMIT
        ));
    }
    if large && overviews.is_empty() {
        result.add_warning(format!(
            "The file is greater than {0}x{0}; internal overviews are recommended",
            SMALL_IMAGE_LIMIT
        ));
    }

    let primary_ifd = pyramid.primary_ifd();
    if primary_ifd.offset > MAX_FIRST_IFD_OFFSET {
        result.add_error(format!(
            "The offset of the main IFD should be < {}. It is {} instead",
            MAX_FIRST_IFD_OFFSET, primary_ifd.offset
        ));
    }

    for (i, level) in overviews.iter().enumerate() {
        if !level.tiled {
            result.add_error(format!("Overview of index {} is not tiled", i));
        }
    }

    // Overviews must appear in the IFD chain from largest to smallest.
    let in_file_order = overviews.windows(2).all(|w| w[0].ifd_index < w[1].ifd_index);
    if !in_file_order {
        result.add_error("Overviews are not sorted by decreasing size in the IFD chain".into());
    }

    let base_data = first_block_offset(base);
    if let Some(base_data) = base_data {
        for ifd in &pyramid.ifds {
            if ifd.offset > base_data {
                result.add_error(format!(
                    "The offset of IFD at {} is after the start of image data at {}",
                    ifd.offset, base_data
                ));
            }
        }
    }

    // Block data should run from the coarsest overview to the full resolution.
    let mut previous = base_data;
    for (i, level) in overviews.iter().enumerate() {
        match (first_block_offset(level), previous) {
            (Some(offset), Some(finer)) if offset > finer => {
                let finer_name = if i == 0 {
                    "the main image".to_string()
                } else {
                    format!("overview {}", i - 1)
                };
                result.add_error(format!(
                    "The first block of overview {} at {} should come before the one of {} at {}",
                    i, offset, finer_name, finer
                ));
            }
            _ => {}
        }
        previous = first_block_offset(level);
    }

    if strict && !result.warnings.is_empty() {
        result.is_valid = false;
    }
    result
}

/// Smallest non-zero block offset of a level (zero marks sparse blocks).
fn first_block_offset(level: &ImageLevel) -> Option<u64> {
    level.offsets.iter().copied().filter(|&o| o > 0).min()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::tiff::testing::GeoTiffFixture;
    use crate::io::MemoryReader;

    async fn pyramid(bytes: Vec<u8>) -> TiffPyramid {
        let reader = MemoryReader::new(bytes, "memory://cog.tif");
        TiffPyramid::parse(&reader).await.unwrap()
    }

    #[tokio::test]
    async fn test_small_striped_file_needs_no_tiles_or_overviews() {
        let p = pyramid(GeoTiffFixture::new(64, 64).build_u8(|_, _, _| 0.0)).await;
        let report = validate_cog(&p, false);
        assert!(report.warnings.is_empty());
        assert!(!report.errors.iter().any(|e| e.contains("not tiled")));
    }

    #[tokio::test]
    async fn test_large_striped_file_is_not_a_cog() {
        let p = pyramid(GeoTiffFixture::new(1024, 600).strips(64).build_u8(|_, _, _| 0.0)).await;
        let report = validate_cog(&p, false);
        assert!(!report.is_valid);
        assert!(report.errors.iter().any(|e| e.contains("not tiled")));
        assert!(report.warnings.iter().any(|w| w.contains("overviews")));
    }

    #[tokio::test]
    async fn test_strict_turns_warnings_into_failure() {
        let p = pyramid(GeoTiffFixture::new(1024, 1024).tiled(256).build_u8(|_, _, _| 0.0)).await;
        let lenient = validate_cog(&p, false);
        let strict = validate_cog(&p, true);
        assert!(!lenient.warnings.is_empty());
        assert!(!strict.is_valid);
        assert_eq!(lenient.warnings, strict.warnings);
    }

    #[tokio::test]
    async fn test_overviews_are_accepted_as_tiled() {
        let p = pyramid(
            GeoTiffFixture::new(1024, 1024)
                .tiled(256)
                .overview(2)
                .overview(4)
                .build_u8(|_, _, _| 0.0),
        )
        .await;
        let report = validate_cog(&p, false);
        assert!(report.warnings.is_empty());
        assert!(!report.errors.iter().any(|e| e.contains("not tiled")));
        assert!(!report.errors.iter().any(|e| e.contains("not sorted")));
    }
}
