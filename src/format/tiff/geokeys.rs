//! GeoTIFF georeferencing tags.
//!
//! A GeoTIFF carries its georeferencing in a handful of private tags:
//!
//! | Tag   | Name                | Content                                   |
//! |-------|---------------------|-------------------------------------------|
//! | 33550 | ModelPixelScale     | (sx, sy, sz)                              |
//! | 33922 | ModelTiepoint       | (i, j, k, x, y, z) raster → model pairs   |
//! | 34264 | ModelTransformation | 4x4 row-major affine                      |
//! | 34735 | GeoKeyDirectory     | header + (key, location, count, value)    |
//! | 34736 | GeoDoubleParams     | doubles referenced by keys                |
//! | 34737 | GeoAsciiParams      | '|'-separated strings referenced by keys  |
//! | 42113 | GDAL_NODATA         | nodata value as ASCII                     |
//!
//! Only the keys needed to identify the CRS are interpreted.

use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::parser::{Ifd, TiffHeader};
use super::tags::TiffTag;
use super::values::ValueReader;

pub const GT_MODEL_TYPE: u16 = 1024;
pub const GT_RASTER_TYPE: u16 = 1025;
pub const GT_CITATION: u16 = 1026;
pub const GEOGRAPHIC_TYPE: u16 = 2048;
pub const GEOG_CITATION: u16 = 2049;
pub const PROJECTED_CS_TYPE: u16 = 3072;
pub const PT_CITATION: u16 = 3073;

/// ModelType values.
pub const MODEL_TYPE_PROJECTED: u16 = 1;
pub const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

/// RasterType values.
pub const RASTER_PIXEL_IS_AREA: u16 = 1;
pub const RASTER_PIXEL_IS_POINT: u16 = 2;

/// Code meaning "user-defined" in GeoKey EPSG slots.
const USER_DEFINED: u16 = 32767;

/// Interpreted subset of the GeoKey directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoKeys {
    pub model_type: Option<u16>,
    pub raster_type: Option<u16>,
    pub geographic_type: Option<u16>,
    pub projected_type: Option<u16>,
    pub citation: Option<String>,
}

impl GeoKeys {
    /// Parse the GeoKeyDirectory short array.
    ///
    /// `ascii` holds the GeoAsciiParams string for citation lookups.
    pub fn parse(directory: &[u16], ascii: Option<&str>) -> Self {
        let mut keys = GeoKeys::default();
        if directory.len() < 4 {
            return keys;
        }

        let count = directory[3] as usize;
        for entry in directory[4..].chunks_exact(4).take(count) {
            let (key, location, value_count, value) = (entry[0], entry[1], entry[2], entry[3]);

            let short = (location == 0).then_some(value);
            let text = if location == TiffTag::GeoAsciiParams.as_u16() {
                ascii.and_then(|s| {
                    let start = value as usize;
                    let end = start.saturating_add(value_count as usize).min(s.len());
                    s.get(start..end)
                        .map(|t| t.trim_end_matches('|').trim().to_string())
                })
            } else {
                None
            };

            match key {
                GT_MODEL_TYPE => keys.model_type = short,
                GT_RASTER_TYPE => keys.raster_type = short,
                GEOGRAPHIC_TYPE => keys.geographic_type = short,
                PROJECTED_CS_TYPE => keys.projected_type = short,
                GT_CITATION | PT_CITATION | GEOG_CITATION => {
                    if keys.citation.is_none() {
                        keys.citation = text;
                    }
                }
                _ => {}
            }
        }

        keys
    }

    /// EPSG code of the raster CRS, if the file names one.
    ///
    /// Projected codes win over geographic ones; user-defined codes are ignored.
    pub fn epsg(&self) -> Option<u16> {
        let usable = |code: Option<u16>| code.filter(|&c| c != 0 && c != USER_DEFINED);

        match self.model_type {
            Some(MODEL_TYPE_GEOGRAPHIC) => usable(self.geographic_type),
            _ => usable(self.projected_type).or_else(|| usable(self.geographic_type)),
        }
    }

    pub fn is_pixel_is_point(&self) -> bool {
        self.raster_type == Some(RASTER_PIXEL_IS_POINT)
    }
}

/// Raw georeferencing read from the primary IFD.
#[derive(Debug, Clone, Default)]
pub struct GeoTiffTags {
    pub pixel_scale: Option<Vec<f64>>,
    pub tiepoints: Option<Vec<f64>>,
    pub transformation: Option<Vec<f64>>,
    pub geokeys: GeoKeys,
    pub nodata: Option<f64>,
    pub gdal_metadata: Option<String>,
}

impl GeoTiffTags {
    /// Read all georeferencing tags present in `ifd`.
    pub async fn read<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
    ) -> Result<Self, TiffError> {
        let values = ValueReader::new(reader, header);

        let pixel_scale = match ifd.get_entry_by_tag(TiffTag::ModelPixelScale) {
            Some(entry) => Some(values.read_f64_array(entry).await?),
            None => None,
        };
        let tiepoints = match ifd.get_entry_by_tag(TiffTag::ModelTiepoint) {
            Some(entry) => Some(values.read_f64_array(entry).await?),
            None => None,
        };
        let transformation = match ifd.get_entry_by_tag(TiffTag::ModelTransformation) {
            Some(entry) => Some(values.read_f64_array(entry).await?),
            None => None,
        };

        let ascii = match ifd.get_entry_by_tag(TiffTag::GeoAsciiParams) {
            Some(entry) => Some(values.read_string(entry).await?),
            None => None,
        };
        let geokeys = match ifd.get_entry_by_tag(TiffTag::GeoKeyDirectory) {
            Some(entry) => {
                let directory = values.read_u16_array(entry).await?;
                GeoKeys::parse(&directory, ascii.as_deref())
            }
            None => GeoKeys::default(),
        };

        let nodata = match ifd.get_entry_by_tag(TiffTag::GdalNodata) {
            Some(entry) => parse_nodata(&values.read_string(entry).await?),
            None => None,
        };
        let gdal_metadata = match ifd.get_entry_by_tag(TiffTag::GdalMetadata) {
            Some(entry) => Some(values.read_string(entry).await?),
            None => None,
        };

        debug!(
            epsg = ?geokeys.epsg(),
            has_scale = pixel_scale.is_some(),
            has_transform = transformation.is_some(),
            ?nodata,
            "Read GeoTIFF tags"
        );

        Ok(Self {
            pixel_scale,
            tiepoints,
            transformation,
            geokeys,
            nodata,
            gdal_metadata,
        })
    }
}

/// Parse a GDAL_NODATA string ("-9999", "nan", "-3.4e+38").
pub fn parse_nodata(text: &str) -> Option<f64> {
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    if text.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    text.parse::<f64>().ok()
}

/// Pull `<Item name="STATISTICS_MINIMUM" sample="0">` style values out of GDAL metadata.
pub fn gdal_statistic(metadata: &str, name: &str, band: usize) -> Option<f64> {
    let needle = format!("name=\"{}\"", name);
    for item in metadata.split("<Item").skip(1) {
        let (attrs, rest) = item.split_once('>')?;
        if !attrs.contains(&needle) {
            continue;
        }
        let sample = attrs
            .split("sample=\"")
            .nth(1)
            .and_then(|s| s.split('"').next())
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(0);
        if sample != band {
            continue;
        }
        return rest.split("</Item>").next()?.trim().parse().ok();
    }
    None
}
