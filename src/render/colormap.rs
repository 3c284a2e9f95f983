//! Named palettes and 256-entry color lookup tables.
//!
//! A palette is a list of color stops on `[0, 1]`. Rendering never
//! interpolates per pixel: a palette is expanded once into a [`Colormap`]
//! of 256 RGBA entries indexed by the stretched byte value.
//!
//! ```text
//!   "viridis"            named palette
//!   "viridis_r"          same, reversed
//!   "#000000,#ff0000"    custom evenly spaced stops
//! ```

use crate::error::TileError;

/// A color stop: position in [0, 1] and an RGB color.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Stop {
    t: f64,
    rgb: [u8; 3],
}

/// Stops of a built-in palette.
enum Stops {
    /// Evenly spaced `0xRRGGBB` colors
    Even(&'static [u32]),
    /// Explicit `(position, 0xRRGGBB)` pairs
    At(&'static [(f64, u32)]),
}

struct Palette {
    name: &'static str,
    stops: Stops,
}

// ─── Palette definitions ───────────────────────────────────────────────

const PALETTES: &[Palette] = &[
    Palette { name: "gray", stops: Stops::Even(&[0x000000, 0xffffff]) },
    Palette {
        name: "viridis",
        stops: Stops::Even(&[
            0x440154, 0x472d7b, 0x3b528b, 0x2c728e, 0x21918c, 0x28ae80, 0x5ec962, 0xaddc30, 0xfde725,
        ]),
    },
    Palette {
        name: "magma",
        stops: Stops::Even(&[
            0x000004, 0x1c1044, 0x4f127b, 0x812581, 0xb5367a, 0xe55964, 0xfb8761, 0xfec287, 0xfcfdbf,
        ]),
    },
    Palette {
        name: "inferno",
        stops: Stops::Even(&[
            0x000004, 0x1f0c48, 0x550f6d, 0x88226a, 0xba3655, 0xe35933, 0xf98e09, 0xf9cb35, 0xfcffa4,
        ]),
    },
    Palette {
        name: "plasma",
        stops: Stops::Even(&[
            0x0d0887, 0x4c02a1, 0x7e03a8, 0xa92395, 0xcc4778, 0xe56b5d, 0xf89540, 0xfdc328, 0xf0f921,
        ]),
    },
    Palette {
        name: "cividis",
        stops: Stops::Even(&[
            0x00224e, 0x123570, 0x3b496c, 0x575d6d, 0x707173, 0x8a8779, 0xa69d75, 0xc4b56c, 0xe4cf5b,
            0xfee838,
        ]),
    },
    Palette {
        name: "terrain",
        stops: Stops::At(&[
            (0.00, 0x333399),
            (0.15, 0x0099ff),
            (0.25, 0x00cc66),
            (0.50, 0xffff99),
            (0.75, 0x805c54),
            (1.00, 0xffffff),
        ]),
    },
    Palette {
        name: "jet",
        stops: Stops::At(&[
            (0.000, 0x00007f),
            (0.125, 0x0000ff),
            (0.375, 0x00ffff),
            (0.625, 0xffff00),
            (0.875, 0xff0000),
            (1.000, 0x7f0000),
        ]),
    },
    Palette {
        name: "rdbu",
        stops: Stops::Even(&[
            0x67001f, 0xb2182b, 0xd6604d, 0xf4a582, 0xfddbc7, 0xf7f7f7, 0xd1e5f0, 0x92c5de, 0x4393c3,
            0x2166ac, 0x053061,
        ]),
    },
    Palette {
        name: "spectral",
        stops: Stops::Even(&[
            0x9e0142, 0xd53e4f, 0xf46d43, 0xfdae61, 0xfee08b, 0xffffbf, 0xe6f598, 0xabdda4, 0x66c2a5,
            0x3288bd, 0x5e4fa2,
        ]),
    },
    Palette {
        name: "greens",
        stops: Stops::Even(&[
            0xf7fcf5, 0xe5f5e0, 0xc7e9c0, 0xa1d99b, 0x74c476, 0x41ab5d, 0x238b45, 0x006d2c, 0x00441b,
        ]),
    },
    Palette {
        name: "blues",
        stops: Stops::Even(&[
            0xf7fbff, 0xdeebf7, 0xc6dbef, 0x9ecae1, 0x6baed6, 0x4292c6, 0x2171b5, 0x08519c, 0x08306b,
        ]),
    },
    Palette {
        name: "reds",
        stops: Stops::Even(&[
            0xfff5f0, 0xfee0d2, 0xfcbba1, 0xfc9272, 0xfb6a4a, 0xef3b2c, 0xcb181d, 0xa50f15, 0x67000d,
        ]),
    },
];

fn rgb(hex: u32) -> [u8; 3] {
    [(hex >> 16) as u8, (hex >> 8) as u8, hex as u8]
}

fn even_stops(colors: impl ExactSizeIterator<Item = [u8; 3]>) -> Vec<Stop> {
    let last = colors.len().saturating_sub(1).max(1) as f64;
    colors
        .enumerate()
        .map(|(i, rgb)| Stop { t: i as f64 / last, rgb })
        .collect()
}

impl Palette {
    fn stops(&self) -> Vec<Stop> {
        match self.stops {
            Stops::Even(colors) => even_stops(colors.iter().map(|&c| rgb(c))),
            Stops::At(pairs) => pairs.iter().map(|&(t, c)| Stop { t, rgb: rgb(c) }).collect(),
        }
    }
}

/// Names of the built-in palettes. Each also exists with an `_r` suffix.
pub fn palette_names() -> Vec<&'static str> {
    PALETTES.iter().map(|p| p.name).collect()
}

// ─── Interpolation ─────────────────────────────────────────────────────

fn lerp(a: u8, b: u8, t: f64) -> u8 {
    (a as f64 + (b as f64 - a as f64) * t).round() as u8
}

fn evaluate(stops: &[Stop], t: f64) -> [u8; 3] {
    let (first, last) = match (stops.first(), stops.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return [0, 0, 0],
    };
    if t <= first.t {
        return first.rgb;
    }
    if t >= last.t {
        return last.rgb;
    }
    for pair in stops.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t <= b.t {
            let span = b.t - a.t;
            let ratio = if span > 0.0 { (t - a.t) / span } else { 0.0 };
            return [
                lerp(a.rgb[0], b.rgb[0], ratio),
                lerp(a.rgb[1], b.rgb[1], ratio),
                lerp(a.rgb[2], b.rgb[2], ratio),
            ];
        }
    }
    last.rgb
}

fn parse_hex(text: &str) -> Option<[u8; 3]> {
    let hex = text.trim().trim_start_matches('#');
    let value = u32::from_str_radix(hex, 16).ok()?;
    match hex.len() {
        6 => Some(rgb(value)),
        3 => {
            let expand = |n: u32| ((n & 0xf) * 17) as u8;
            Some([expand(value >> 8), expand(value >> 4), expand(value)])
        }
        _ => None,
    }
}

// =============================================================================
// Colormap
// =============================================================================

/// 256 RGBA entries indexed by a stretched byte value.
#[derive(Debug, Clone, PartialEq)]
pub struct Colormap {
    lut: Vec<[u8; 4]>,
}

impl Colormap {
    fn from_stops(stops: &[Stop]) -> Self {
        let lut = (0..256)
            .map(|i| {
                let [r, g, b] = evaluate(stops, i as f64 / 255.0);
                [r, g, b, 255]
            })
            .collect();
        Self { lut }
    }

    /// Black to white.
    pub fn gray() -> Self {
        let lut = (0..=255u8).map(|v| [v, v, v, 255]).collect();
        Self { lut }
    }

    /// A built-in palette by name, `_r` reverses it.
    pub fn named(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase();
        let (base, reversed) = match name.strip_suffix("_r") {
            Some(base) => (base, true),
            None => (name.as_str(), false),
        };
        let base = match base {
            "grey" | "greys" | "grays" => "gray",
            "rd_bu" => "rdbu",
            other => other,
        };
        let palette = PALETTES.iter().find(|p| p.name == base)?;
        let mut stops = palette.stops();
        if reversed {
            stops = stops
                .into_iter()
                .rev()
                .map(|s| Stop { t: 1.0 - s.t, rgb: s.rgb })
                .collect();
        }
        Some(Self::from_stops(&stops))
    }

    /// Parse a palette name or a comma-separated list of hex colors.
    ///
    /// # Errors
    /// `TileError::Parameter` for unknown names and malformed colors.
    pub fn parse(spec: &str) -> Result<Self, TileError> {
        if let Some(map) = Self::named(spec) {
            return Ok(map);
        }
        if !spec.contains(',') {
            return Err(TileError::parameter(format!("unknown colormap '{}'", spec)));
        }
        let colors = spec
            .split(',')
            .map(|c| {
                parse_hex(c).ok_or_else(|| {
                    TileError::parameter(format!("invalid color '{}' in colormap", c.trim()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_stops(&even_stops(colors.into_iter())))
    }

    /// Lookup table of a dataset's color map, indexed by raw sample value.
    /// Entries past the end of a short map are transparent.
    pub fn from_palette(entries: &[[u8; 4]]) -> Self {
        let lut = (0..256)
            .map(|i| entries.get(i).copied().unwrap_or([0, 0, 0, 0]))
            .collect();
        Self { lut }
    }

    /// Quantize into `n` flat classes spread over the whole ramp.
    pub fn discrete(&self, n: u32) -> Self {
        let n = n.clamp(2, 256) as usize;
        let lut = (0..256)
            .map(|i| {
                let class = (i * n / 256).min(n - 1);
                let source = class * 255 / (n - 1);
                self.lut[source]
            })
            .collect();
        Self { lut }
    }

    pub fn get(&self, index: u8) -> [u8; 4] {
        self.lut[index as usize]
    }
}
