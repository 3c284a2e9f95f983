use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Default timeout applied to every remote request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Range reader for rasters served over HTTP(S).
///
/// The size is discovered once when the reader is created, with a HEAD
/// request or, for servers that do not answer HEAD, a one-byte ranged GET.
/// Every later read is a single `Range: bytes=a-b` request bounded by the
/// client timeout.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    size: u64,
}

/// Build the shared HTTP client used for remote rasters.
pub fn create_http_client(timeout: Duration) -> Result<Client, IoError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| IoError::Connection(format!("failed to build HTTP client: {}", e)))
}

impl HttpRangeReader {
    /// Create a new reader for the given URL.
    ///
    /// # Errors
    /// - `IoError::NotFound` for a 404 answer
    /// - `IoError::Timeout` when the server does not answer in time
    /// - `IoError::Upstream` for other error statuses
    pub async fn new(client: Client, url: impl Into<String>) -> Result<Self, IoError> {
        let url = url.into();

        let size = match Self::size_from_head(&client, &url).await? {
            Some(size) => size,
            None => Self::size_from_range_probe(&client, &url).await?,
        };

        Ok(Self { client, url, size })
    }

    async fn size_from_head(client: &Client, url: &str) -> Result<Option<u64>, IoError> {
        let response = client
            .head(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            // Some object stores reject HEAD on presigned URLs; fall back to a probe.
            if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::FORBIDDEN {
                return Ok(None);
            }
            return Err(upstream_error(status, url));
        }

        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&len| len > 0))
    }

    async fn size_from_range_probe(client: &Client, url: &str) -> Result<u64, IoError> {
        let response = client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(url.to_string()));
        }
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(IoError::Upstream {
                status: status.as_u16(),
                message: format!("{} does not support range requests", url),
            });
        }

        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| IoError::Upstream {
                status: status.as_u16(),
                message: format!("{} returned no usable Content-Range", url),
            })
    }

    /// The URL this reader fetches from.
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Extract the total length from a `Content-Range: bytes a-b/total` value.
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.rsplit_once('/')?;
    total.trim().parse().ok()
}

fn map_reqwest_error(url: &str, err: reqwest::Error) -> IoError {
    if err.is_timeout() {
        IoError::Timeout(url.to_string())
    } else if err.is_connect() || err.is_request() || err.is_body() {
        IoError::Connection(format!("{}: {}", url, err))
    } else {
        IoError::Connection(err.to_string())
    }
}

fn upstream_error(status: StatusCode, url: &str) -> IoError {
    IoError::Upstream {
        status: status.as_u16(),
        message: format!("{} ({})", url, status.canonical_reason().unwrap_or("error")),
    }
}

#[async_trait]
impl RangeReader for HttpRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let end = offset + len as u64 - 1;
        let response = self
            .client
            .get(&self.url)
            .header(RANGE, format!("bytes={}-{}", offset, end))
            .send()
            .await
            .map_err(|e| map_reqwest_error(&self.url, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IoError::NotFound(self.url.clone()));
        }
        if !status.is_success() {
            return Err(upstream_error(status, &self.url));
        }
        let whole_body = status == StatusCode::OK;

        let body = response
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(&self.url, e))?;

        // A server that ignores Range answers 200 with the full object.
        let body = if whole_body && body.len() as u64 == self.size {
            body.slice(offset as usize..offset as usize + len)
        } else {
            body
        };

        if body.len() != len {
            return Err(IoError::Truncated {
                expected: len,
                actual: body.len(),
            });
        }

        Ok(body)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.url
    }
}
