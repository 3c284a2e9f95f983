//! Image levels of a GeoTIFF: the full-resolution image and its overviews.
//!
//! A Cloud Optimized GeoTIFF stores the full-resolution image in the first
//! IFD, followed by reduced-resolution overviews and optional masks:
//!
//! ```text
//!   IFD 0  full resolution      NewSubfileType = 0
//!   IFD 1  overview /2          NewSubfileType = 1 (reduced)
//!   IFD 2  mask of IFD 0        NewSubfileType = 4 (mask)
//!   IFD 3  overview /4          NewSubfileType = 1
//!   ...
//! ```
//!
//! Masks are skipped, overviews are ordered from finest to coarsest, and every
//! level carries its block offsets so a read never has to revisit the IFD.

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::RangeReader;

use super::decompress::{check_sample_layout, BlockLayout};
use super::parser::{ByteOrder, Ifd, TiffHeader, BIGTIFF_HEADER_SIZE};
use super::tags::{photometric, Compression, Predictor, SampleFormat, TiffTag};
use super::values::{tag_name, ValueReader};

// =============================================================================
// Constants
// =============================================================================

/// Maximum number of IFDs to follow before giving up on the chain
const MAX_IFDS: usize = 100;

/// NewSubfileType bit for reduced-resolution images
const SUBFILE_REDUCED: u32 = 1;

/// NewSubfileType bit for transparency masks
const SUBFILE_MASK: u32 = 4;

// =============================================================================
// ImageLevel
// =============================================================================

/// One resolution level of the raster.
///
/// Level 0 is the full-resolution image; higher indices are coarser.
#[derive(Debug, Clone)]
pub struct ImageLevel {
    pub level_index: usize,
    /// Position of the IFD in the file's chain
    pub ifd_index: usize,

    pub width: u32,
    pub height: u32,

    /// Tile size, or (image width, rows per strip) for stripped images
    pub block_width: u32,
    pub block_height: u32,
    pub tiled: bool,
    pub blocks_across: u32,
    pub blocks_down: u32,

    pub samples_per_pixel: u16,
    pub bits_per_sample: u16,
    pub sample_format: SampleFormat,
    /// PlanarConfiguration = 2: one plane of blocks per sample
    pub planar: bool,
    pub compression: Compression,
    pub predictor: Predictor,
    pub photometric: u16,
    pub extra_samples: Vec<u16>,

    /// Horizontal and vertical decimation relative to level 0
    pub downsample_x: f64,
    pub downsample_y: f64,

    pub offsets: Vec<u64>,
    pub byte_counts: Vec<u64>,
    pub jpeg_tables: Option<Bytes>,
}

impl ImageLevel {
    /// Build a level from a parsed IFD, loading its offset arrays.
    ///
    /// # Errors
    /// Fails when required tags are missing, when the compression or sample
    /// layout cannot be decoded, or when the offset arrays are too short.
    pub async fn load<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
        ifd: &Ifd,
        ifd_index: usize,
    ) -> Result<Self, TiffError> {
        let bo = header.byte_order;
        let values = ValueReader::new(reader, header);

        let width = ifd
            .image_width(bo)
            .ok_or(TiffError::MissingTag("ImageWidth"))?;
        let height = ifd
            .image_height(bo)
            .ok_or(TiffError::MissingTag("ImageLength"))?;
        if width == 0 || height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: "ImageWidth",
                message: format!("empty image {}x{}", width, height),
            });
        }

        let samples_per_pixel = ifd.get_u16(TiffTag::SamplesPerPixel, bo).unwrap_or(1).max(1);

        let bits_per_sample = match ifd.get_entry_by_tag(TiffTag::BitsPerSample) {
            Some(entry) => uniform_value(&values.read_u16_array(entry).await?, "BitsPerSample")?,
            None => 1,
        };
        let sample_format = match ifd.get_entry_by_tag(TiffTag::SampleFormat) {
            Some(entry) => SampleFormat::from_u16(uniform_value(
                &values.read_u16_array(entry).await?,
                "SampleFormat",
            )?),
            None => SampleFormat::Unsigned,
        };
        check_sample_layout(bits_per_sample, sample_format)?;

        let compression_code = ifd.compression(bo).unwrap_or(1);
        let compression = Compression::from_u16(compression_code)
            .ok_or_else(|| TiffError::UnsupportedCompression(format!("code {}", compression_code)))?;
        if !compression.is_supported() {
            return Err(TiffError::UnsupportedCompression(compression.name().to_string()));
        }

        let predictor_code = ifd.get_u16(TiffTag::Predictor, bo).unwrap_or(1);
        let predictor = Predictor::from_u16(predictor_code).ok_or_else(|| {
            TiffError::InvalidTagValue {
                tag: "Predictor",
                message: format!("unknown predictor {}", predictor_code),
            }
        })?;

        let photometric = ifd
            .get_u16(TiffTag::PhotometricInterpretation, bo)
            .unwrap_or(photometric::MIN_IS_BLACK);
        let planar = ifd.get_u16(TiffTag::PlanarConfiguration, bo).unwrap_or(1) == 2;
        let extra_samples = match ifd.get_entry_by_tag(TiffTag::ExtraSamples) {
            Some(entry) => values.read_u16_array(entry).await?,
            None => Vec::new(),
        };

        let tiled = ifd.is_tiled();
        let (block_width, block_height, offsets_tag, counts_tag) = if tiled {
            let tw = ifd.tile_width(bo).ok_or(TiffError::MissingTag("TileWidth"))?;
            let th = ifd.tile_height(bo).ok_or(TiffError::MissingTag("TileLength"))?;
            (tw, th, TiffTag::TileOffsets, TiffTag::TileByteCounts)
        } else {
            let rows = ifd
                .get_u32(TiffTag::RowsPerStrip, bo)
                .unwrap_or(height)
                .clamp(1, height);
            (width, rows, TiffTag::StripOffsets, TiffTag::StripByteCounts)
        };
        if block_width == 0 || block_height == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: if tiled { "TileWidth" } else { "RowsPerStrip" },
                message: "block size is zero".into(),
            });
        }

        let offsets_entry = ifd
            .get_entry_by_tag(offsets_tag)
            .ok_or(TiffError::MissingTag(if tiled { "TileOffsets" } else { "StripOffsets" }))?;
        let counts_entry = ifd
            .get_entry_by_tag(counts_tag)
            .ok_or(TiffError::MissingTag(if tiled {
                "TileByteCounts"
            } else {
                "StripByteCounts"
            }))?;
        let offsets = values.read_u64_array(offsets_entry).await?;
        let byte_counts = values.read_u64_array(counts_entry).await?;

        let blocks_across = width.div_ceil(block_width);
        let blocks_down = height.div_ceil(block_height);
        let planes = if planar { samples_per_pixel as u64 } else { 1 };
        let required = blocks_across as u64 * blocks_down as u64 * planes;
        if (offsets.len() as u64) < required || (byte_counts.len() as u64) < required {
            return Err(TiffError::InvalidTagValue {
                tag: tag_name(offsets_entry),
                message: format!(
                    "{} offsets and {} byte counts for {} blocks",
                    offsets.len(),
                    byte_counts.len(),
                    required
                ),
            });
        }

        let jpeg_tables = match ifd.get_entry_by_tag(TiffTag::JpegTables) {
            Some(entry) if compression == Compression::Jpeg => Some(values.read_bytes(entry).await?),
            _ => None,
        };

        Ok(ImageLevel {
            level_index: 0,
            ifd_index,
            width,
            height,
            block_width,
            block_height,
            tiled,
            blocks_across,
            blocks_down,
            samples_per_pixel,
            bits_per_sample,
            sample_format,
            planar,
            compression,
            predictor,
            photometric,
            extra_samples,
            downsample_x: 1.0,
            downsample_y: 1.0,
            offsets,
            byte_counts,
            jpeg_tables,
        })
    }

    /// Index into the offset arrays for block `(bx, by)` of `plane`.
    ///
    /// `plane` is ignored for chunky data.
    pub fn block_index(&self, bx: u32, by: u32, plane: u16) -> Option<usize> {
        if bx >= self.blocks_across || by >= self.blocks_down {
            return None;
        }
        let per_plane = self.blocks_across as usize * self.blocks_down as usize;
        let plane = if self.planar {
            if plane >= self.samples_per_pixel {
                return None;
            }
            plane as usize
        } else {
            0
        };
        Some(plane * per_plane + by as usize * self.blocks_across as usize + bx as usize)
    }

    /// File location `(offset, length)` of a block.
    pub fn block_location(&self, index: usize) -> Option<(u64, u64)> {
        Some((*self.offsets.get(index)?, *self.byte_counts.get(index)?))
    }

    /// Rows stored in block row `by`. The last strip may be short; tiles never are.
    pub fn block_rows(&self, by: u32) -> u32 {
        if self.tiled {
            return self.block_height;
        }
        let start = by * self.block_height;
        self.block_height.min(self.height.saturating_sub(start))
    }

    /// Samples interleaved inside one block.
    pub fn samples_per_block_pixel(&self) -> usize {
        if self.planar {
            1
        } else {
            self.samples_per_pixel as usize
        }
    }

    /// Decoding parameters for this level's blocks.
    pub fn block_layout(&self, byte_order: ByteOrder) -> BlockLayout {
        BlockLayout {
            compression: self.compression,
            predictor: self.predictor,
            bits_per_sample: self.bits_per_sample,
            sample_format: self.sample_format,
            byte_order,
            width: self.block_width as usize,
            samples: self.samples_per_block_pixel(),
            jpeg_tables: self.jpeg_tables.as_ref().map(|t| t.to_vec()),
        }
    }

    /// Mean decimation factor relative to level 0.
    pub fn downsample(&self) -> f64 {
        (self.downsample_x + self.downsample_y) / 2.0
    }
}

/// Multi-valued tags must agree across samples; mixed layouts are not decoded.
fn uniform_value(values: &[u16], tag: &'static str) -> Result<u16, TiffError> {
    let first = *values.first().ok_or(TiffError::InvalidTagValue {
        tag,
        message: "empty value".into(),
    })?;
    if values.iter().any(|&v| v != first) {
        return Err(TiffError::UnsupportedSampleFormat(format!(
            "{} differs between samples: {:?}",
            tag, values
        )));
    }
    Ok(first)
}

// =============================================================================
// TiffPyramid
// =============================================================================

/// The parsed IFD chain of a GeoTIFF and its resolution levels.
#[derive(Debug, Clone)]
pub struct TiffPyramid {
    pub header: TiffHeader,
    /// Every IFD in file order, masks and extra pages included
    pub ifds: Vec<Ifd>,
    /// Full resolution first, then overviews from finest to coarsest
    pub levels: Vec<ImageLevel>,
    /// Number of IFDs skipped as masks
    pub mask_count: usize,
}

impl TiffPyramid {
    /// Parse the header and IFD chain of a TIFF and load its levels.
    ///
    /// # Errors
    /// Fails on malformed headers or IFDs, when no full-resolution image is
    /// present, or when any level cannot be decoded.
    pub async fn parse<R: RangeReader + ?Sized>(reader: &R) -> Result<Self, TiffError> {
        let head_len = (BIGTIFF_HEADER_SIZE as u64).min(reader.size()) as usize;
        let header_bytes = reader.read_exact_at(0, head_len).await?;
        let header = TiffHeader::parse(&header_bytes, reader.size())?;

        let ifds = Self::parse_all_ifds(reader, &header).await?;
        let bo = header.byte_order;

        let is_mask = |ifd: &Ifd| {
            ifd.subfile_type(bo) & SUBFILE_MASK != 0
                || ifd.get_u16(TiffTag::PhotometricInterpretation, bo) == Some(photometric::MASK)
        };
        let mask_count = ifds.iter().filter(|ifd| is_mask(ifd)).count();

        let primary_index = ifds
            .iter()
            .position(|ifd| !is_mask(ifd) && ifd.subfile_type(bo) & SUBFILE_REDUCED == 0)
            .ok_or(TiffError::MissingTag("full-resolution image"))?;

        let mut primary = ImageLevel::load(reader, &header, &ifds[primary_index], primary_index).await?;
        primary.level_index = 0;

        let mut overviews = Vec::new();
        for (index, ifd) in ifds.iter().enumerate() {
            if index == primary_index || is_mask(ifd) || ifd.subfile_type(bo) & SUBFILE_REDUCED == 0 {
                continue;
            }
            let level = ImageLevel::load(reader, &header, ifd, index).await?;
            if level.samples_per_pixel != primary.samples_per_pixel {
                debug!(
                    ifd = index,
                    samples = level.samples_per_pixel,
                    "Skipping overview with mismatched sample count"
                );
                continue;
            }
            overviews.push(level);
        }
        overviews.sort_by(|a, b| b.width.cmp(&a.width).then(b.height.cmp(&a.height)));

        let mut levels = vec![primary];
        for mut level in overviews {
            if level.width >= levels[0].width {
                continue;
            }
            level.level_index = levels.len();
            level.downsample_x = levels[0].width as f64 / level.width as f64;
            level.downsample_y = levels[0].height as f64 / level.height as f64;
            levels.push(level);
        }

        debug!(
            ifds = ifds.len(),
            levels = levels.len(),
            masks = mask_count,
            bigtiff = header.is_bigtiff,
            "Parsed TIFF structure"
        );

        Ok(TiffPyramid {
            header,
            ifds,
            levels,
            mask_count,
        })
    }

    /// Follow the next-IFD chain, stopping at loops or after [`MAX_IFDS`].
    async fn parse_all_ifds<R: RangeReader + ?Sized>(
        reader: &R,
        header: &TiffHeader,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut ifds: Vec<Ifd> = Vec::new();
        let mut offset = header.first_ifd_offset;

        while offset != 0 && ifds.len() < MAX_IFDS {
            if offset >= reader.size() || ifds.iter().any(|ifd| ifd.offset == offset) {
                return Err(TiffError::InvalidIfdOffset(offset));
            }

            let count_bytes = reader.read_exact_at(offset, header.ifd_count_size()).await?;
            let entry_count = header.read_entry_count(&count_bytes)?;
            let ifd_size = Ifd::calculate_size(entry_count, header);
            let ifd_bytes = reader.read_exact_at(offset, ifd_size).await?;
            let ifd = Ifd::parse(&ifd_bytes, offset, header)?;

            offset = ifd.next_ifd_offset;
            ifds.push(ifd);
        }

        Ok(ifds)
    }

    /// The full-resolution level.
    pub fn base_level(&self) -> &ImageLevel {
        &self.levels[0]
    }

    /// The IFD of the full-resolution level.
    pub fn primary_ifd(&self) -> &Ifd {
        &self.ifds[self.base_level().ifd_index]
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn get_level(&self, level: usize) -> Option<&ImageLevel> {
        self.levels.get(level)
    }
}

// =============================================================================
// Tests
// =============================================================================
