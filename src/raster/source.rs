//! Turning identifiers into byte readers.
//!
//! An identifier is one of
//!
//! ```text
//!   /data/dem.tif  or  dem/srtm.tif     local file (relative to the data root)
//!   https://host/cog.tif                HTTP(S) with Range requests
//!   s3://bucket/key.tif                 S3 ranged GetObject
//! ```

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::RasterError;
use crate::io::{
    HttpRangeReader, LocalRangeReader, MemoryReader, RangeReader, RetryPolicy, RetryingReader,
    S3Location, S3RangeReader, DEFAULT_HTTP_TIMEOUT,
};

/// Creates range readers from raster identifiers.
///
/// The registry works against this trait so storage backends can be swapped
/// without touching the caching and rendering layers.
#[async_trait]
pub trait RasterSource: Send + Sync {
    /// The type of range reader this source creates.
    type Reader: RangeReader + 'static;

    /// Create a range reader for the given identifier.
    ///
    /// # Errors
    /// `RasterError::NotFound` for identifiers that do not resolve,
    /// `RasterError::Parameter` for malformed ones.
    async fn create_reader(&self, identifier: &str) -> Result<Self::Reader, RasterError>;
}

// =============================================================================
// Identifier resolution
// =============================================================================

/// Where an identifier points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    Local(PathBuf),
    Http(String),
    S3(S3Location),
}

impl SourceLocation {
    /// Classify an identifier, confining local paths to `data_root` when set.
    ///
    /// # Errors
    /// `RasterError::Parameter` for empty identifiers, malformed URLs and
    /// paths escaping the data root.
    pub fn resolve(identifier: &str, data_root: Option<&Path>) -> Result<Self, RasterError> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Err(RasterError::Parameter("empty raster identifier".into()));
        }

        if identifier.starts_with("http://") || identifier.starts_with("https://") {
            url::Url::parse(identifier)
                .map_err(|e| RasterError::Parameter(format!("invalid URL '{}': {}", identifier, e)))?;
            return Ok(SourceLocation::Http(identifier.to_string()));
        }
        if identifier.starts_with("s3://") {
            return S3Location::parse(identifier)
                .map(SourceLocation::S3)
                .ok_or_else(|| RasterError::Parameter(format!("invalid S3 URI '{}'", identifier)));
        }

        let path = Path::new(identifier.strip_prefix("file://").unwrap_or(identifier));
        let root = match data_root {
            Some(root) => root,
            None => return Ok(SourceLocation::Local(path.to_path_buf())),
        };

        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(RasterError::Parameter(format!(
                "'{}' escapes the data root",
                identifier
            )));
        }
        if path.is_absolute() {
            if !path.starts_with(root) {
                return Err(RasterError::Parameter(format!(
                    "'{}' is outside the data root",
                    identifier
                )));
            }
            return Ok(SourceLocation::Local(path.to_path_buf()));
        }
        Ok(SourceLocation::Local(root.join(path)))
    }
}

// =============================================================================
// UriSource
// =============================================================================

/// Resolves local paths, HTTP(S) URLs and `s3://` URIs.
///
/// Every reader is wrapped in a [`RetryingReader`] so transient upstream
/// failures are retried with backoff.
pub struct UriSource {
    http: reqwest::Client,
    s3: Option<aws_sdk_s3::Client>,
    data_root: Option<PathBuf>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl UriSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            s3: None,
            data_root: None,
            timeout: DEFAULT_HTTP_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Confine local identifiers to `root`.
    pub fn with_data_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.data_root = Some(root.into());
        self
    }

    pub fn with_s3(mut self, client: aws_sdk_s3::Client) -> Self {
        self.s3 = Some(client);
        self
    }

    /// Timeout applied to each S3 request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn data_root(&self) -> Option<&Path> {
        self.data_root.as_deref()
    }
}

#[async_trait]
impl RasterSource for UriSource {
    type Reader = RetryingReader<Arc<dyn RangeReader>>;

    async fn create_reader(&self, identifier: &str) -> Result<Self::Reader, RasterError> {
        let location = SourceLocation::resolve(identifier, self.data_root.as_deref())?;
        debug!(identifier, ?location, "Resolved raster identifier");

        let reader: Arc<dyn RangeReader> = match location {
            SourceLocation::Local(path) => Arc::new(LocalRangeReader::open(path).await?),
            SourceLocation::Http(url) => Arc::new(HttpRangeReader::new(self.http.clone(), url).await?),
            SourceLocation::S3(location) => {
                let client = self.s3.clone().ok_or_else(|| {
                    RasterError::Source(format!("{}: S3 access is not configured", identifier))
                })?;
                Arc::new(S3RangeReader::new(client, location, self.timeout).await?)
            }
        };
        Ok(RetryingReader::new(reader, self.retry))
    }
}

// =============================================================================
// MemorySource
// =============================================================================

/// Rasters held in memory, keyed by identifier.
///
/// Counts reader creations so callers can observe caching behaviour.
#[derive(Default)]
pub struct MemorySource {
    files: Mutex<HashMap<String, Bytes>>,
    opens: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, identifier: impl Into<String>, data: impl Into<Bytes>) {
        self.files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(identifier.into(), data.into());
    }

    /// Number of readers created so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RasterSource for MemorySource {
    type Reader = MemoryReader;

    async fn create_reader(&self, identifier: &str) -> Result<Self::Reader, RasterError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let data = self
            .files
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(identifier)
            .cloned()
            .ok_or_else(|| RasterError::NotFound(identifier.to_string()))?;
        Ok(MemoryReader::new(data, identifier))
    }
}
