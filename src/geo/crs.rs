//! Coordinate reference systems and reprojection.
//!
//! EPSG codes resolve to PROJ strings through `crs-definitions` and are
//! transformed with `proj4rs`. The web-mercator and WGS84 pair, which every
//! tile request needs, uses closed-form math instead.

use proj4rs::proj::Proj;
use serde::Serialize;

use crate::error::RasterError;

use super::mercator::{lon_lat_to_mercator, mercator_to_lon_lat};
use super::Bounds;

pub const WGS84: u16 = 4326;
pub const WEB_MERCATOR: u16 = 3857;

/// EPSG aliases for web mercator found in older files.
const WEB_MERCATOR_ALIASES: &[u16] = &[3857, 3785];

/// Points sampled along each edge when reprojecting a box.
pub const DENSIFY_POINTS: usize = 21;

/// A coordinate reference system identified by EPSG code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Crs {
    pub epsg: u16,
    pub proj: String,
    pub geographic: bool,
}

impl Crs {
    /// Look up an EPSG code.
    ///
    /// # Errors
    /// `RasterError::Projection` for codes unknown to the definition database.
    pub fn from_epsg(epsg: u16) -> Result<Self, RasterError> {
        let epsg = if WEB_MERCATOR_ALIASES.contains(&epsg) { WEB_MERCATOR } else { epsg };
        let proj = crs_definitions::from_code(epsg)
            .map(|def| def.proj4.to_string())
            .ok_or_else(|| RasterError::Projection(format!("EPSG:{} is not a known CRS", epsg)))?;
        let geographic = proj.contains("+proj=longlat");
        Ok(Self { epsg, proj, geographic })
    }

    pub fn wgs84() -> Self {
        Self {
            epsg: WGS84,
            proj: "+proj=longlat +datum=WGS84 +no_defs".to_string(),
            geographic: true,
        }
    }

    pub fn web_mercator() -> Self {
        Self {
            epsg: WEB_MERCATOR,
            proj: "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +nadgrids=@null +no_defs".to_string(),
            geographic: false,
        }
    }

    /// Parse a user-supplied CRS such as `EPSG:4326`, `epsg:3857` or `4326`.
    ///
    /// # Errors
    /// `RasterError::Parameter` for malformed input, `Projection` for unknown codes.
    pub fn parse(text: &str) -> Result<Self, RasterError> {
        let trimmed = text.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let epsg: u16 = code
            .parse()
            .map_err(|_| RasterError::Parameter(format!("unrecognized CRS '{}'", text)))?;
        Self::from_epsg(epsg)
    }

    pub fn name(&self) -> String {
        format!("EPSG:{}", self.epsg)
    }
}

// =============================================================================
// Reprojector
// =============================================================================

enum Kind {
    Identity,
    MercatorToWgs84,
    Wgs84ToMercator,
    Proj {
        src: Box<Proj>,
        dst: Box<Proj>,
        src_geographic: bool,
        dst_geographic: bool,
    },
}

/// Point transformation from one CRS to another.
pub struct Reprojector {
    kind: Kind,
    src: u16,
    dst: u16,
}

impl std::fmt::Debug for Reprojector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reprojector")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .finish()
    }
}

impl Reprojector {
    /// # Errors
    /// `RasterError::Projection` when either PROJ string is rejected.
    pub fn new(src: &Crs, dst: &Crs) -> Result<Self, RasterError> {
        let kind = match (src.epsg, dst.epsg) {
            (a, b) if a == b => Kind::Identity,
            (WEB_MERCATOR, WGS84) => Kind::MercatorToWgs84,
            (WGS84, WEB_MERCATOR) => Kind::Wgs84ToMercator,
            _ => {
                let parse = |crs: &Crs| {
                    Proj::from_proj_string(&crs.proj).map_err(|e| {
                        RasterError::Projection(format!("invalid projection {}: {:?}", crs.name(), e))
                    })
                };
                Kind::Proj {
                    src: Box::new(parse(src)?),
                    dst: Box::new(parse(dst)?),
                    src_geographic: src.geographic,
                    dst_geographic: dst.geographic,
                }
            }
        };
        Ok(Self { kind, src: src.epsg, dst: dst.epsg })
    }

    pub fn is_identity(&self) -> bool {
        matches!(self.kind, Kind::Identity)
    }

    /// Transform one point.
    ///
    /// # Errors
    /// `RasterError::Projection` when the point has no image in the target CRS.
    pub fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), RasterError> {
        let (ox, oy) = match &self.kind {
            Kind::Identity => (x, y),
            Kind::MercatorToWgs84 => mercator_to_lon_lat(x, y),
            Kind::Wgs84ToMercator => lon_lat_to_mercator(x, y),
            Kind::Proj { src, dst, src_geographic, dst_geographic } => {
                let mut point = if *src_geographic {
                    (x.to_radians(), y.to_radians(), 0.0)
                } else {
                    (x, y, 0.0)
                };
                proj4rs::transform::transform(src, dst, &mut point).map_err(|e| {
                    RasterError::Projection(format!(
                        "EPSG:{} -> EPSG:{} failed at ({}, {}): {:?}",
                        self.src, self.dst, x, y, e
                    ))
                })?;
                if *dst_geographic {
                    (point.0.to_degrees(), point.1.to_degrees())
                } else {
                    (point.0, point.1)
                }
            }
        };
        if ox.is_finite() && oy.is_finite() {
            Ok((ox, oy))
        } else {
            Err(RasterError::Projection(format!(
                "EPSG:{} -> EPSG:{} produced a non-finite point for ({}, {})",
                self.src, self.dst, x, y
            )))
        }
    }

    /// Reproject a box by sampling [`DENSIFY_POINTS`] along every edge.
    ///
    /// Points without an image in the target CRS are skipped.
    ///
    /// # Errors
    /// `RasterError::Projection` when no sampled point transforms.
    pub fn transform_bounds(&self, bounds: &Bounds) -> Result<Bounds, RasterError> {
        if self.is_identity() {
            return Ok(*bounds);
        }
        let n = DENSIFY_POINTS - 1;
        let mut points = Vec::with_capacity(4 * DENSIFY_POINTS);
        for i in 0..=n {
            let t = i as f64 / n as f64;
            let x = bounds.left + (bounds.right - bounds.left) * t;
            let y = bounds.bottom + (bounds.top - bounds.bottom) * t;
            points.push((x, bounds.bottom));
            points.push((x, bounds.top));
            points.push((bounds.left, y));
            points.push((bounds.right, y));
        }
        Bounds::from_points(points.into_iter().filter_map(|(x, y)| self.transform(x, y).ok()))
            .ok_or_else(|| {
                RasterError::Projection(format!(
                    "bounds {:?} have no image in EPSG:{}",
                    bounds, self.dst
                ))
            })
    }
}
