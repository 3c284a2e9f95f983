use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tokio::sync::watch;

use super::RangeReader;
use crate::error::IoError;

/// Default block size: 64KB.
///
/// Large enough to hold a COG header and the first IFDs in one request,
/// small enough that scattered tile-index reads do not waste bandwidth.
pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

/// Default cache capacity in number of blocks (16MB with the default block size).
pub const DEFAULT_BLOCK_CAPACITY: usize = 256;

/// Reads spanning more than this many blocks bypass the cache.
const MAX_CACHED_SPAN_BLOCKS: u64 = 4;

/// Block-based caching layer that wraps any RangeReader.
///
/// Parsing a GeoTIFF issues many small reads at scattered offsets (header,
/// IFD chain, tag arrays). Against object storage each of those would be a
/// round trip; the block cache turns them into a few aligned block fetches.
///
/// - Fixed-size blocks, LRU eviction
/// - Singleflight: concurrent requests for the same block share one fetch
/// - Reads spanning a few blocks are stitched together, larger reads
///   (whole compressed tiles) go straight to the source
pub struct BlockCache<R> {
    inner: Arc<R>,
    block_size: usize,
    cache: Mutex<LruCache<u64, Bytes>>,
    in_flight: Mutex<HashMap<u64, watch::Receiver<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight marker for a block when the fetching task finishes
/// or is cancelled. Dropping the sender wakes every waiter, so nobody hangs
/// on an abandoned fetch.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<u64, watch::Receiver<()>>>,
    block_idx: u64,
    _done: watch::Sender<()>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.block_idx);
    }
}

impl<R: RangeReader> BlockCache<R> {
    /// Create a new BlockCache with default block size and capacity.
    pub fn new(inner: R) -> Self {
        Self::with_capacity(inner, DEFAULT_BLOCK_SIZE, DEFAULT_BLOCK_CAPACITY)
    }

    /// Create a new BlockCache with custom block size and capacity.
    ///
    /// # Arguments
    /// * `inner` - The underlying reader to wrap
    /// * `block_size` - Size of each cached block in bytes
    /// * `capacity` - Maximum number of blocks to cache
    pub fn with_capacity(inner: R, block_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(inner),
            block_size: block_size.max(1),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// The wrapped reader.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Number of blocks currently cached.
    pub fn cached_blocks(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Get a block from cache or fetch it from the underlying reader.
    async fn get_block(&self, block_idx: u64) -> Result<Bytes, IoError> {
        loop {
            if let Some(data) = lock(&self.cache).get(&block_idx) {
                return Ok(data.clone());
            }

            let waiter = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(&block_idx) {
                    Some(rx) => Ok(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(());
                        in_flight.insert(block_idx, rx);
                        Err(tx)
                    }
                }
            };

            let done = match waiter {
                Ok(mut rx) => {
                    // Resolves once the leader drops its sender.
                    let _ = rx.changed().await;
                    continue;
                }
                Err(tx) => tx,
            };

            let _guard = InFlightGuard {
                in_flight: &self.in_flight,
                block_idx,
                _done: done,
            };

            let result = self.fetch_block_from_source(block_idx).await;
            if let Ok(ref data) = result {
                lock(&self.cache).put(block_idx, data.clone());
            }

            // Failed fetches are not cached: waiters retry and one becomes the new leader.
            return result;
        }
    }

    async fn fetch_block_from_source(&self, block_idx: u64) -> Result<Bytes, IoError> {
        let offset = block_idx * self.block_size as u64;
        let size = self.inner.size();

        let remaining = size.saturating_sub(offset);
        if remaining == 0 {
            return Err(IoError::RangeOutOfBounds {
                offset,
                requested: self.block_size as u64,
                size,
            });
        }

        let len = std::cmp::min(self.block_size as u64, remaining) as usize;
        self.inner.read_exact_at(offset, len).await
    }

    #[inline]
    fn block_for_offset(&self, offset: u64) -> u64 {
        offset / self.block_size as u64
    }

    #[inline]
    fn offset_within_block(&self, offset: u64) -> usize {
        (offset % self.block_size as u64) as usize
    }
}

#[async_trait]
impl<R: RangeReader + 'static> RangeReader for BlockCache<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.inner.size();
        super::range_reader::check_range(offset, len, size)?;

        if len == 0 {
            return Ok(Bytes::new());
        }

        let start_block = self.block_for_offset(offset);
        let end_block = self.block_for_offset(offset + len as u64 - 1);

        if end_block - start_block >= MAX_CACHED_SPAN_BLOCKS {
            return self.inner.read_exact_at(offset, len).await;
        }

        if start_block == end_block {
            let block = self.get_block(start_block).await?;
            let block_offset = self.offset_within_block(offset);
            return Ok(block.slice(block_offset..block_offset + len));
        }

        let mut result = BytesMut::with_capacity(len);
        let mut remaining = len;
        let mut current_offset = offset;

        for block_idx in start_block..=end_block {
            let block = self.get_block(block_idx).await?;
            let block_offset = self.offset_within_block(current_offset);
            let bytes_in_block = std::cmp::min(block.len() - block_offset, remaining);

            result.extend_from_slice(&block[block_offset..block_offset + bytes_in_block]);

            remaining -= bytes_in_block;
            current_offset += bytes_in_block as u64;
        }

        Ok(result.freeze())
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
