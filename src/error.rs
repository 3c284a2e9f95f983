use thiserror::Error;

/// I/O errors that can occur when reading from local or remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Remote read did not complete within the configured timeout
    #[error("Timed out reading {0}")]
    Timeout(String),

    /// Upstream server answered with an error status
    #[error("Upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Fewer bytes arrived than were requested
    #[error("Truncated read: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Local filesystem error
    #[error("File error: {0}")]
    Local(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),
}

impl IoError {
    /// Whether a later attempt at the same read may succeed.
    ///
    /// Timeouts, dropped connections, throttling and 5xx answers are transient.
    /// Missing objects, bad ranges and local file errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            IoError::Connection(_) | IoError::Timeout(_) | IoError::Truncated { .. } => true,
            IoError::Upstream { status, .. } => *status >= 500 || *status == 429,
            IoError::S3(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("timeout")
                    || message.contains("throttl")
                    || message.contains("slow down")
                    || message.contains("dispatch")
            }
            IoError::RangeOutOfBounds { .. } | IoError::Local(_) | IoError::NotFound(_) => false,
        }
    }
}

/// Errors that can occur when parsing and decoding TIFF files
#[derive(Debug, Clone, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version number
    #[error("Invalid TIFF version: expected 42 (TIFF) or 43 (BigTIFF), got {0}")]
    InvalidVersion(u16),

    /// Invalid BigTIFF offset byte size (must be 8)
    #[error("Invalid BigTIFF offset byte size: expected 8, got {0}")]
    InvalidBigTiffOffsetSize(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: &'static str, message: String },

    /// Unsupported compression scheme
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Sample layout that cannot be turned into numeric bands
    #[error("Unsupported sample format: {0}")]
    UnsupportedSampleFormat(String),

    /// A compressed block could not be decoded
    #[error("Failed to decompress block: {0}")]
    Decompress(String),

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),
}

/// Errors raised while opening or reading a raster dataset
#[derive(Debug, Clone, Error)]
pub enum RasterError {
    /// The dataset cannot be opened or its metadata is unusable
    #[error("Cannot open raster: {0}")]
    Source(String),

    /// The identifier does not resolve to an existing dataset
    #[error("Raster not found: {0}")]
    NotFound(String),

    /// Read failure below the TIFF layer
    #[error("I/O error: {0}")]
    Io(IoError),

    /// Malformed or unsupported TIFF structure
    #[error("TIFF error: {0}")]
    Tiff(TiffError),

    /// Caller supplied an invalid argument (band, window, CRS)
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// Coordinate transformation failure
    #[error("Projection error: {0}")]
    Projection(String),
}

impl From<IoError> for RasterError {
    fn from(err: IoError) -> Self {
        match err {
            IoError::NotFound(path) => RasterError::NotFound(path),
            other => RasterError::Io(other),
        }
    }
}

impl From<TiffError> for RasterError {
    fn from(err: TiffError) -> Self {
        match err {
            TiffError::Io(io) => io.into(),
            other => RasterError::Tiff(other),
        }
    }
}

impl RasterError {
    /// Whether the failure is permanent for this dataset.
    ///
    /// Permanent failures may be remembered by the registry; transient
    /// I/O failures never are.
    pub fn is_permanent(&self) -> bool {
        match self {
            RasterError::Io(io) => !io.is_retryable(),
            RasterError::Parameter(_) => false,
            _ => true,
        }
    }
}

/// Errors surfaced by the tile pipeline and the HTTP layer
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Unknown or unreachable identifier
    #[error("Raster not found: {identifier}")]
    NotFound { identifier: String },

    /// Tile index outside the zoom level's pyramid
    #[error("Tile {z}/{x}/{y} is outside the tile pyramid")]
    TileOutOfRange { z: u32, x: u32, y: u32 },

    /// Malformed request parameter
    #[error("Invalid parameter: {message}")]
    Parameter { message: String },

    /// The raster could not be opened or parsed
    #[error("Source error: {message}")]
    Source { message: String },

    /// Read failure while rendering
    #[error("I/O error: {0}")]
    Io(IoError),

    /// Encoding the pixel buffer failed
    #[error("Encode error: {message}")]
    Encode { message: String },

    /// A cached entry failed its integrity check
    #[error("Cache corruption for {fingerprint}: {reason}")]
    CacheCorruption { fingerprint: String, reason: String },

    /// A background task failed to deliver its result
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TileError {
    /// Shorthand for building a parameter error.
    pub fn parameter(message: impl Into<String>) -> Self {
        TileError::Parameter {
            message: message.into(),
        }
    }

    /// Parameter errors describe the request, not the source, and are never cached.
    pub fn is_parameter(&self) -> bool {
        matches!(
            self,
            TileError::Parameter { .. } | TileError::TileOutOfRange { .. }
        )
    }

    /// Whether the client may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TileError::Io(io) if io.is_retryable())
    }
}

impl From<RasterError> for TileError {
    fn from(err: RasterError) -> Self {
        match err {
            RasterError::NotFound(identifier) => TileError::NotFound { identifier },
            RasterError::Parameter(message) => TileError::Parameter { message },
            RasterError::Io(io) => TileError::Io(io),
            RasterError::Tiff(tiff) => TileError::Source {
                message: tiff.to_string(),
            },
            RasterError::Source(message) | RasterError::Projection(message) => {
                TileError::Source { message }
            }
        }
    }
}
