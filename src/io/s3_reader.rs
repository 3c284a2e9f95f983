use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Bucket and key parsed from an `s3://bucket/key` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    /// Parse an `s3://bucket/key` URI.
    ///
    /// Returns `None` for other schemes, a missing bucket or an empty key.
    pub fn parse(uri: &str) -> Option<Self> {
        let parsed = url::Url::parse(uri).ok()?;
        if parsed.scheme() != "s3" {
            return None;
        }
        let bucket = parsed.host_str()?.to_string();
        let key = urlencoding::decode(parsed.path().trim_start_matches('/'))
            .ok()?
            .into_owned();
        if bucket.is_empty() || key.is_empty() {
            return None;
        }
        Some(Self { bucket, key })
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

/// S3-backed implementation of RangeReader.
///
/// Reads byte ranges from objects in S3 or S3-compatible storage (MinIO, Ceph, ...)
/// using ranged `GetObject` calls. The object size is fetched once on creation via
/// HEAD, and every request is bounded by `timeout`.
#[derive(Clone)]
pub struct S3RangeReader {
    client: Client,
    location: S3Location,
    size: u64,
    identifier: String,
    timeout: Duration,
}

impl S3RangeReader {
    /// Create a new S3RangeReader for the given location.
    ///
    /// # Errors
    /// `IoError::NotFound` when the object does not exist, `IoError::Timeout`
    /// when HEAD does not complete in time, `IoError::S3` otherwise.
    pub async fn new(
        client: Client,
        location: S3Location,
        timeout: Duration,
    ) -> Result<Self, IoError> {
        let identifier = location.uri();

        let head = client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send();

        let head = tokio::time::timeout(timeout, head)
            .await
            .map_err(|_| IoError::Timeout(identifier.clone()))?
            .map_err(|e| {
                let is_not_found = e
                    .as_service_error()
                    .map(|se| se.is_not_found())
                    .unwrap_or(false)
                    || e.raw_response()
                        .map(|r| r.status().as_u16() == 404)
                        .unwrap_or(false);

                if is_not_found {
                    IoError::NotFound(identifier.clone())
                } else {
                    IoError::S3(format!("{}: {}", identifier, e))
                }
            })?;

        let size = head.content_length().unwrap_or(0).max(0) as u64;

        Ok(Self {
            client,
            location,
            size,
            identifier,
            timeout,
        })
    }

    pub fn location(&self) -> &S3Location {
        &self.location
    }
}

#[async_trait]
impl RangeReader for S3RangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let range = format!("bytes={}-{}", offset, offset + len as u64 - 1);

        let fetch = async {
            let resp = self
                .client
                .get_object()
                .bucket(&self.location.bucket)
                .key(&self.location.key)
                .range(range)
                .send()
                .await
                .map_err(|e| IoError::S3(e.to_string()))?;

            resp.body
                .collect()
                .await
                .map(|data| data.into_bytes())
                .map_err(|e| IoError::Connection(e.to_string()))
        };

        let data = tokio::time::timeout(self.timeout, fetch)
            .await
            .map_err(|_| IoError::Timeout(self.identifier.clone()))??;

        if data.len() != len {
            return Err(IoError::Truncated {
                expected: len,
                actual: data.len(),
            });
        }

        Ok(data)
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// A custom endpoint (MinIO and friends) switches to path-style addressing.
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
    if endpoint_url.is_some() {
        builder = builder.force_path_style(true);
    }

    Client::from_conf(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_s3_location() {
        let loc = S3Location::parse("s3://rasters/dem/srtm.tif").unwrap();
        assert_eq!(loc.bucket, "rasters");
        assert_eq!(loc.key, "dem/srtm.tif");
        assert_eq!(loc.uri(), "s3://rasters/dem/srtm.tif");
    }

    #[test]
    fn test_parse_s3_location_decodes_key() {
        let loc = S3Location::parse("s3://rasters/my%20file.tif").unwrap();
        assert_eq!(loc.key, "my file.tif");
    }

    #[test]
    fn test_parse_s3_location_rejects_bad_uris() {
        assert!(S3Location::parse("https://rasters/a.tif").is_none());
        assert!(S3Location::parse("s3://rasters/").is_none());
        assert!(S3Location::parse("s3:///a.tif").is_none());
        assert!(S3Location::parse("not a uri").is_none());
    }
}
