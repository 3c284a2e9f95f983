//! GeoTIFF fixtures for unit tests, written with the `tiff` crate's
//! directory encoder so tiles, overviews and GeoTIFF tags are all under test
//! control.

use std::io::{Cursor, Write};

use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

/// Sample encodings the fixtures can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    U8,
    U16,
    I16,
    F32,
    F64,
}

impl SampleKind {
    fn bits(self) -> u16 {
        match self {
            SampleKind::U8 => 8,
            SampleKind::U16 | SampleKind::I16 => 16,
            SampleKind::F32 => 32,
            SampleKind::F64 => 64,
        }
    }

    fn format(self) -> u16 {
        match self {
            SampleKind::U8 | SampleKind::U16 => 1,
            SampleKind::I16 => 2,
            SampleKind::F32 | SampleKind::F64 => 3,
        }
    }

    fn push(self, out: &mut Vec<u8>, value: f64) {
        match self {
            SampleKind::U8 => out.push(value as u8),
            SampleKind::U16 => out.extend_from_slice(&(value as u16).to_ne_bytes()),
            SampleKind::I16 => out.extend_from_slice(&(value as i16).to_ne_bytes()),
            SampleKind::F32 => out.extend_from_slice(&(value as f32).to_ne_bytes()),
            SampleKind::F64 => out.extend_from_slice(&value.to_ne_bytes()),
        }
    }
}

/// An extra IFD after the full-resolution image.
#[derive(Debug, Clone)]
pub struct LevelSpec {
    pub width: u32,
    pub height: u32,
    pub subfile_type: u32,
    pub is_mask: bool,
}

impl LevelSpec {
    pub fn overview(width: u32, height: u32) -> Self {
        Self { width, height, subfile_type: 1, is_mask: false }
    }

    pub fn mask(width: u32, height: u32) -> Self {
        Self { width, height, subfile_type: 4, is_mask: true }
    }
}

#[derive(Debug, Clone, Copy)]
enum Blocks {
    Tiles(u32),
    Strips(u32),
}

/// Georeferencing written into the primary IFD.
#[derive(Debug, Clone, Copy)]
pub struct GeoSpec {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
    pub epsg: u16,
}

/// Builder for small in-memory GeoTIFFs.
#[derive(Debug, Clone)]
pub struct GeoTiffFixture {
    width: u32,
    height: u32,
    blocks: Blocks,
    bands: u16,
    planar: bool,
    deflate: bool,
    predictor: u16,
    levels: Vec<LevelSpec>,
    geo: Option<GeoSpec>,
    nodata: Option<String>,
    extra_samples: Vec<u16>,
    color_map: Option<Vec<u16>>,
}

impl GeoTiffFixture {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            blocks: Blocks::Strips(height.max(1)),
            bands: 1,
            planar: false,
            deflate: false,
            predictor: 1,
            levels: Vec::new(),
            geo: None,
            nodata: None,
            extra_samples: Vec::new(),
            color_map: None,
        }
    }

    pub fn tiled(mut self, size: u32) -> Self {
        self.blocks = Blocks::Tiles(size);
        self
    }

    pub fn strips(mut self, rows: u32) -> Self {
        self.blocks = Blocks::Strips(rows);
        self
    }

    pub fn bands(mut self, bands: u16) -> Self {
        self.bands = bands;
        self
    }

    pub fn planar(mut self) -> Self {
        self.planar = true;
        self
    }

    pub fn deflate(mut self) -> Self {
        self.deflate = true;
        self
    }

    /// Apply predictor 2 (integers) or 3 (floats) before compression.
    pub fn predictor(mut self, predictor: u16) -> Self {
        self.predictor = predictor;
        self
    }

    /// Add an overview decimated by `factor`.
    pub fn overview(mut self, factor: u32) -> Self {
        self.levels.push(LevelSpec::overview(
            self.width.div_ceil(factor),
            self.height.div_ceil(factor),
        ));
        self
    }

    pub fn with_level(mut self, level: LevelSpec) -> Self {
        self.levels.push(level);
        self
    }

    pub fn geo(mut self, geo: GeoSpec) -> Self {
        self.geo = Some(geo);
        self
    }

    /// Web-mercator georeferencing covering the whole world.
    pub fn world_mercator(self) -> Self {
        let span = 2.0 * crate::geo::mercator::HALF_EARTH;
        let (w, h) = (self.width as f64, self.height as f64);
        self.geo(GeoSpec {
            origin_x: -crate::geo::mercator::HALF_EARTH,
            origin_y: crate::geo::mercator::HALF_EARTH,
            pixel_width: span / w,
            pixel_height: span / h,
            epsg: 3857,
        })
    }

    pub fn nodata(mut self, nodata: &str) -> Self {
        self.nodata = Some(nodata.to_string());
        self
    }

    pub fn extra_samples(mut self, extra: &[u16]) -> Self {
        self.extra_samples = extra.to_vec();
        self
    }

    pub fn color_map(mut self, map: Vec<u16>) -> Self {
        self.color_map = Some(map);
        self
    }

    pub fn build_u8(&self, pixel: impl Fn(usize, u32, u32) -> f64) -> Vec<u8> {
        self.build(SampleKind::U8, pixel)
    }

    pub fn build_f32(&self, pixel: impl Fn(usize, u32, u32) -> f64) -> Vec<u8> {
        self.build(SampleKind::F32, pixel)
    }

    /// Write the file. `pixel(band, col, row)` is evaluated in full-resolution
    /// coordinates; overviews sample it by nearest decimation.
    pub fn build(&self, kind: SampleKind, pixel: impl Fn(usize, u32, u32) -> f64) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut encoder = TiffEncoder::new(&mut cursor).expect("encoder");

        let primary = LevelSpec { width: self.width, height: self.height, subfile_type: 0, is_mask: false };
        for (index, level) in std::iter::once(&primary).chain(self.levels.iter()).enumerate() {
            self.write_level(&mut encoder, level, kind, &pixel, index == 0);
        }
        drop(encoder);
        cursor.into_inner()
    }

    fn write_level<W: std::io::Write + std::io::Seek>(
        &self,
        encoder: &mut TiffEncoder<W>,
        level: &LevelSpec,
        kind: SampleKind,
        pixel: &impl Fn(usize, u32, u32) -> f64,
        primary: bool,
    ) {
        let (kind, bands) = if level.is_mask { (SampleKind::U8, 1) } else { (kind, self.bands) };
        let planar = self.planar && bands > 1;
        let sx = self.width as f64 / level.width as f64;
        let sy = self.height as f64 / level.height as f64;
        let value = |band: usize, col: u32, row: u32| -> f64 {
            if level.is_mask {
                return 255.0;
            }
            let c = ((col as f64 * sx) as u32).min(self.width - 1);
            let r = ((row as f64 * sy) as u32).min(self.height - 1);
            pixel(band, c, r)
        };

        let (block_w, block_h, tiled) = match self.blocks {
            Blocks::Tiles(size) => (size, size, true),
            Blocks::Strips(rows) => (level.width, rows.min(level.height).max(1), false),
        };
        let across = level.width.div_ceil(block_w);
        let down = level.height.div_ceil(block_h);
        let planes = if planar { bands as usize } else { 1 };
        let per_pixel = if planar { 1 } else { bands as usize };

        let mut blocks = Vec::new();
        for plane in 0..planes {
            for by in 0..down {
                for bx in 0..across {
                    let rows = if tiled { block_h } else { block_h.min(level.height - by * block_h) };
                    let mut raw = Vec::new();
                    for r in 0..rows {
                        for c in 0..block_w {
                            let (col, row) = (bx * block_w + c, by * block_h + r);
                            for s in 0..per_pixel {
                                let band = if planar { plane } else { s };
                                let v = if col < level.width && row < level.height {
                                    value(band, col, row)
                                } else {
                                    0.0
                                };
                                kind.push(&mut raw, v);
                            }
                        }
                    }
                    let row_bytes = block_w as usize * per_pixel * (kind.bits() as usize / 8);
                    if !level.is_mask {
                        apply_predictor(&mut raw, self.predictor, row_bytes, per_pixel, kind);
                    }
                    if self.deflate {
                        let mut z = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                        z.write_all(&raw).expect("deflate");
                        raw = z.finish().expect("deflate");
                    }
                    blocks.push(raw);
                }
            }
        }

        let mut dir = encoder.new_directory().expect("directory");
        dir.write_tag(Tag::Unknown(254), level.subfile_type).unwrap();
        dir.write_tag(Tag::ImageWidth, level.width).unwrap();
        dir.write_tag(Tag::ImageLength, level.height).unwrap();
        dir.write_tag(Tag::BitsPerSample, &vec![kind.bits(); bands as usize][..]).unwrap();
        dir.write_tag(Tag::Compression, if self.deflate { 8u16 } else { 1u16 }).unwrap();
        let photometric: u16 = if level.is_mask {
            4
        } else if self.color_map.is_some() {
            3
        } else if bands >= 3 {
            2
        } else {
            1
        };
        dir.write_tag(Tag::PhotometricInterpretation, photometric).unwrap();
        dir.write_tag(Tag::SamplesPerPixel, bands).unwrap();
        dir.write_tag(Tag::SampleFormat, &vec![kind.format(); bands as usize][..]).unwrap();
        dir.write_tag(Tag::PlanarConfiguration, if planar { 2u16 } else { 1u16 }).unwrap();
        if self.predictor != 1 && !level.is_mask {
            dir.write_tag(Tag::Unknown(317), self.predictor).unwrap();
        }
        if !self.extra_samples.is_empty() && !level.is_mask {
            dir.write_tag(Tag::ExtraSamples, &self.extra_samples[..]).unwrap();
        }
        if let (Some(map), false) = (&self.color_map, level.is_mask) {
            dir.write_tag(Tag::Unknown(320), &map[..]).unwrap();
        }

        let mut offsets = Vec::with_capacity(blocks.len());
        let mut counts = Vec::with_capacity(blocks.len());
        for block in &blocks {
            offsets.push(dir.write_data(&block[..]).unwrap() as u32);
            counts.push(block.len() as u32);
        }
        if tiled {
            dir.write_tag(Tag::Unknown(322), block_w).unwrap();
            dir.write_tag(Tag::Unknown(323), block_h).unwrap();
            dir.write_tag(Tag::Unknown(324), &offsets[..]).unwrap();
            dir.write_tag(Tag::Unknown(325), &counts[..]).unwrap();
        } else {
            dir.write_tag(Tag::RowsPerStrip, block_h).unwrap();
            dir.write_tag(Tag::StripOffsets, &offsets[..]).unwrap();
            dir.write_tag(Tag::StripByteCounts, &counts[..]).unwrap();
        }

        if primary {
            if let Some(geo) = self.geo {
                dir.write_tag(Tag::Unknown(33550), &[geo.pixel_width, geo.pixel_height, 0.0][..])
                    .unwrap();
                dir.write_tag(
                    Tag::Unknown(33922),
                    &[0.0, 0.0, 0.0, geo.origin_x, geo.origin_y, 0.0][..],
                )
                .unwrap();
                let geographic = geo.epsg == 4326 || geo.epsg == 4269 || geo.epsg == 4258;
                let (model, key) = if geographic { (2u16, 2048u16) } else { (1u16, 3072u16) };
                let keys: [u16; 16] = [
                    1, 1, 0, 3, //
                    1024, 0, 1, model, //
                    1025, 0, 1, 1, //
                    key, 0, 1, geo.epsg,
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

fn apply_predictor(raw: &mut [u8], predictor: u16, row_bytes: usize, samples: usize, kind: SampleKind) {
    if row_bytes == 0 {
        return;
    }
    match (predictor, kind) {
        (2, SampleKind::U8) => {
            for row in raw.chunks_exact_mut(row_bytes) {
                for i in (samples..row.len()).rev() {
                    row[i] = row[i].wrapping_sub(row[i - samples]);
                }
            }
        }
        (2, SampleKind::U16) | (2, SampleKind::I16) => {
            for row in raw.chunks_exact_mut(row_bytes) {
                let n = row.len() / 2;
                for i in (samples..n).rev() {
                    let cur = u16::from_ne_bytes([row[2 * i], row[2 * i + 1]]);
                    let prev = u16::from_ne_bytes([row[2 * (i - samples)], row[2 * (i - samples) + 1]]);
                    row[2 * i..2 * i + 2].copy_from_slice(&cur.wrapping_sub(prev).to_ne_bytes());
                }
            }
        }
        (3, SampleKind::F32) | (3, SampleKind::F64) => {
            let size = kind.bits() as usize / 8;
            for row in raw.chunks_exact_mut(row_bytes) {
                let n = row.len() / size;
                let mut planes = vec![0u8; row.len()];
                for i in 0..n {
                    let mut be = row[i * size..(i + 1) * size].to_vec();
                    if cfg!(target_endian = "little") {
                        be.reverse();
                    }
                    for (byte, b) in be.iter().enumerate() {
                        planes[byte * n + i] = *b;
                    }
                }
                for i in (samples..planes.len()).rev() {
                    planes[i] = planes[i].wrapping_sub(planes[i - samples]);
                }
                row.copy_from_slice(&planes);
            }
        }
        _ => {}
    }
}
