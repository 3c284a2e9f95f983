use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use super::range_reader::check_range;
use super::RangeReader;
use crate::error::IoError;

/// Range reader for files on the local filesystem.
///
/// A single read-only descriptor is opened once and shared. Reads are
/// positioned (`pread` on Unix, `seek_read` on Windows) so concurrent
/// callers never race on a shared cursor, and each read runs on the
/// blocking pool to keep the async workers free.
pub struct LocalRangeReader {
    file: Arc<File>,
    size: u64,
    identifier: String,
}

impl LocalRangeReader {
    /// Open a file for ranged reads.
    ///
    /// # Errors
    /// Returns `IoError::NotFound` if the path does not exist, and
    /// `IoError::Local` for any other open or stat failure.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let identifier = path.display().to_string();

        let opened = tokio::task::spawn_blocking(move || {
            let file = File::open(&path)?;
            let size = file.metadata()?.len();
            Ok::<_, std::io::Error>((file, size))
        })
        .await
        .map_err(|e| IoError::Local(format!("open task failed: {}", e)))?;

        let (file, size) = opened.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(identifier.clone()),
            _ => IoError::Local(format!("{}: {}", identifier, e)),
        })?;

        if !size_is_regular_file(&file) {
            return Err(IoError::Local(format!("{} is not a regular file", identifier)));
        }

        Ok(Self {
            file: Arc::new(file),
            size,
            identifier,
        })
    }
}

fn size_is_regular_file(file: &File) -> bool {
    file.metadata().map(|m| m.is_file()).unwrap_or(false)
}

#[cfg(unix)]
fn read_exact_at_sync(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at_sync(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[async_trait]
impl RangeReader for LocalRangeReader {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        check_range(offset, len, self.size)?;
        if len == 0 {
            return Ok(Bytes::new());
        }

        let file = Arc::clone(&self.file);
        let result = tokio::task::spawn_blocking(move || {
            let mut buf = vec![0u8; len];
            read_exact_at_sync(&file, &mut buf, offset).map(|_| buf)
        })
        .await
        .map_err(|e| IoError::Local(format!("read task failed: {}", e)))?;

        match result {
            Ok(buf) => Ok(Bytes::from(buf)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(IoError::Truncated {
                expected: len,
                actual: 0,
            }),
            Err(e) => Err(IoError::Local(format!("{}: {}", self.identifier, e))),
        }
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "rts-local-reader-{}-{}",
            std::process::id(),
            name
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_open_and_read() {
        let path = temp_file("read", b"0123456789");
        let reader = LocalRangeReader::open(&path).await.unwrap();

        assert_eq!(reader.size(), 10);
        assert_eq!(&reader.read_exact_at(2, 4).await.unwrap()[..], b"2345");
        assert!(matches!(
            reader.read_exact_at(8, 4).await,
            Err(IoError::RangeOutOfBounds { .. })
        ));

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let path = std::env::temp_dir().join("rts-definitely-missing.tif");
        let result = LocalRangeReader::open(&path).await;
        assert!(matches!(result, Err(IoError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_reads() {
        let data: Vec<u8> = (0..=255u8).collect();
        let path = temp_file("concurrent", &data);
        let reader = Arc::new(LocalRangeReader::open(&path).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..16u64 {
            let reader = Arc::clone(&reader);
            handles.push(tokio::spawn(async move {
                let bytes = reader.read_exact_at(i * 16, 16).await.unwrap();
                (i, bytes)
            }));
        }

        for handle in handles {
            let (i, bytes) = handle.await.unwrap();
            assert_eq!(bytes[0], (i * 16) as u8);
            assert_eq!(bytes.len(), 16);
        }

        std::fs::remove_file(path).ok();
    }
}
