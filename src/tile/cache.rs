//! Tile cache for encoded tiles.
//!
//! Tiles are keyed by their fingerprint. The cache provides:
//! - LRU eviction bounded by total bytes and entry count; reads touch
//! - Singleflight computation: concurrent misses for one fingerprint share
//!   one render, which runs on its own task and survives abandoned requests
//! - A failure cooldown so a failing tile is not re-rendered on every request
//! - An integrity check of every entry on read
//!
//! ```text
//!   get_or_compute(fp)
//!        │
//!        ├─ hit ────────────────────────────────▶ RenderedTile
//!        ├─ failure cooling down ───────────────▶ same TileError
//!        ├─ in flight ── wait on watch ─────────▶ shared Result
//!        └─ miss ── tokio::spawn(compute) ──▶ store ──▶ broadcast
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error};

use crate::error::TileError;
use crate::raster::FailureMemo;

/// Default cache capacity: 100MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 100 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Default time a failed tile is remembered
pub const DEFAULT_FAILURE_COOLDOWN: Duration = Duration::from_secs(5);

type TileResult = Result<RenderedTile, TileError>;

// =============================================================================
// Rendered tile
// =============================================================================

/// An encoded tile. Cloning shares the bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTile {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub fingerprint: Arc<str>,
}

impl RenderedTile {
    pub fn new(bytes: Bytes, content_type: &'static str, fingerprint: impl Into<Arc<str>>) -> Self {
        Self {
            bytes,
            content_type,
            fingerprint: fingerprint.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Bounds of a [`TileCache`].
#[derive(Debug, Clone, Copy)]
pub struct TileCacheOptions {
    /// Maximum total size of cached tiles in bytes
    pub max_bytes: usize,
    /// Maximum number of cached tiles
    pub max_entries: usize,
    /// How long a failed computation is remembered; zero disables
    pub failure_cooldown: Duration,
}

impl Default for TileCacheOptions {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_TILE_CACHE_CAPACITY,
            max_entries: DEFAULT_MAX_ENTRIES,
            failure_cooldown: DEFAULT_FAILURE_COOLDOWN,
        }
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub max_bytes: usize,
    pub max_entries: usize,
    pub in_flight: usize,
    /// Failed fingerprints still cooling down
    pub failures: usize,
    pub hits: u64,
    pub misses: u64,
}

// =============================================================================
// Tile Cache
// =============================================================================

struct Entry {
    tile: RenderedTile,
    /// Length recorded at insertion
    length: usize,
}

struct Index {
    lru: LruCache<String, Entry>,
    bytes: usize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight marker once the computing task ends, including
/// when it panics.
struct InFlightGuard {
    cache: Arc<TileCache>,
    fingerprint: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.cache.in_flight).remove(&self.fingerprint);
    }
}

/// LRU cache of encoded tiles with singleflight computation.
///
/// # Thread Safety
///
/// Share it across tasks via `Arc`; [`TileCache::get_or_compute`] takes
/// `self: &Arc<Self>` so the computing task can outlive the caller.
pub struct TileCache {
    index: Mutex<Index>,
    in_flight: Mutex<HashMap<String, watch::Receiver<Option<TileResult>>>>,
    failures: FailureMemo<TileError>,
    options: TileCacheOptions,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TileCache {
    /// Create a new tile cache with default capacity (100MB).
    pub fn new() -> Self {
        Self::with_options(TileCacheOptions::default())
    }

    /// Create a new tile cache with the specified capacity in bytes.
    pub fn with_capacity(max_bytes: usize) -> Self {
        Self::with_options(TileCacheOptions {
            max_bytes,
            ..TileCacheOptions::default()
        })
    }

    pub fn with_options(options: TileCacheOptions) -> Self {
        Self {
            index: Mutex::new(Index {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
            in_flight: Mutex::new(HashMap::new()),
            failures: FailureMemo::new(options.failure_cooldown, options.max_entries),
            options,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a tile from the cache, marking it as recently used.
    ///
    /// # Errors
    ///
    /// `TileError::CacheCorruption` when the stored entry does not match its
    /// key or recorded length; the entry is evicted.
    pub fn get(&self, fingerprint: &str) -> Result<Option<RenderedTile>, TileError> {
        let mut index = lock(&self.index);
        let reason = match index.lru.get(fingerprint) {
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
            Some(entry) if &*entry.tile.fingerprint != fingerprint => {
                format!("entry holds tile {}", entry.tile.fingerprint)
            }
            Some(entry) if entry.tile.len() != entry.length => format!(
                "stored {} bytes, found {}",
                entry.length,
                entry.tile.len()
            ),
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.tile.clone()));
            }
        };

        if let Some(entry) = index.lru.pop(fingerprint) {
            index.bytes = index.bytes.saturating_sub(entry.length);
        }
        drop(index);
        error!(fingerprint, reason = %reason, "Evicting corrupt tile cache entry");
        Err(TileError::CacheCorruption {
            fingerprint: fingerprint.to_string(),
            reason,
        })
    }

    /// Check if a tile is cached without updating LRU order.
    pub fn contains(&self, fingerprint: &str) -> bool {
        lock(&self.index).lru.contains(fingerprint)
    }

    /// Store a tile under its fingerprint.
    ///
    /// Least-recently-used entries are evicted until both bounds hold.
    /// Tiles larger than the whole cache are not stored.
    pub fn insert(&self, tile: RenderedTile) {
        let key = tile.fingerprint.to_string();
        self.insert_entry(key, tile);
    }

    fn insert_entry(&self, key: String, tile: RenderedTile) {
        let length = tile.len();
        if length > self.options.max_bytes {
            debug!(fingerprint = %key, length, "Tile larger than the cache, not stored");
            return;
        }

        let mut index = lock(&self.index);
        if let Some(old) = index.lru.put(key, Entry { tile, length }) {
            index.bytes = index.bytes.saturating_sub(old.length);
        }
        index.bytes += length;

        while index.bytes > self.options.max_bytes || index.lru.len() > self.options.max_entries {
            match index.lru.pop_lru() {
                Some((_, evicted)) => index.bytes = index.bytes.saturating_sub(evicted.length),
                None => break,
            }
        }
    }

    /// Remove a tile from the cache.
    pub fn remove(&self, fingerprint: &str) -> Option<RenderedTile> {
        let mut index = lock(&self.index);
        let entry = index.lru.pop(fingerprint)?;
        index.bytes = index.bytes.saturating_sub(entry.length);
        Some(entry.tile)
    }

    /// Clear all entries and remembered failures.
    pub fn clear(&self) {
        let mut index = lock(&self.index);
        index.lru.clear();
        index.bytes = 0;
        drop(index);
        self.failures.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.index).lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total size of cached tiles in bytes.
    pub fn size(&self) -> usize {
        lock(&self.index).bytes
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let index = lock(&self.index);
            (index.lru.len(), index.bytes)
        };
        CacheStats {
            entries,
            bytes,
            max_bytes: self.options.max_bytes,
            max_entries: self.options.max_entries,
            in_flight: lock(&self.in_flight).len(),
            failures: self.failures.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Return the cached tile or compute it exactly once.
    ///
    /// Concurrent callers with the same fingerprint wait for a single
    /// computation and all receive its result. The computation runs on a
    /// spawned task, so dropping the caller does not cancel it.
    ///
    /// # Arguments
    ///
    /// * `fingerprint` - Cache key; the computed tile should carry it
    /// * `compute` - Called only when this caller leads a new computation
    ///
    /// # Errors
    ///
    /// The computation's error (possibly remembered from an earlier failure
    /// within the cooldown), or `TileError::CacheCorruption`.
    pub async fn get_or_compute<F, Fut>(
        self: &Arc<Self>,
        fingerprint: &str,
        compute: F,
    ) -> TileResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = TileResult> + Send + 'static,
    {
        loop {
            if let Some(tile) = self.get(fingerprint)? {
                return Ok(tile);
            }
            if let Some(err) = self.failures.get(fingerprint) {
                debug!(fingerprint, error = %err, "Tile failure still cooling down");
                return Err(err);
            }

            let claim = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(fingerprint) {
                    Some(rx) => Ok(rx.clone()),
                    None => {
                        // The previous leader may have finished since the lookup above.
                        if let Some(tile) = self.peek_settled(fingerprint) {
                            return tile;
                        }
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(fingerprint.to_string(), rx.clone());
                        Err((tx, rx))
                    }
                }
            };

            match claim {
                Ok(waiter) => {
                    if let Some(result) = wait(waiter).await {
                        return result;
                    }
                    // The computing task died without a result; start over.
                }
                Err((tx, rx)) => return self.lead(fingerprint, tx, rx, compute()).await,
            }
        }
    }

    /// A stored tile or a remembered failure, without touching LRU order.
    fn peek_settled(&self, fingerprint: &str) -> Option<TileResult> {
        let stored = lock(&self.index)
            .lru
            .peek(fingerprint)
            .map(|entry| entry.tile.clone());
        if let Some(tile) = stored {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Ok(tile));
        }
        self.failures.get(fingerprint).map(Err)
    }

    async fn lead<Fut>(
        self: &Arc<Self>,
        fingerprint: &str,
        tx: watch::Sender<Option<TileResult>>,
        rx: watch::Receiver<Option<TileResult>>,
        compute: Fut,
    ) -> TileResult
    where
        Fut: Future<Output = TileResult> + Send + 'static,
    {
        debug!(fingerprint, "Computing tile");
        let guard = InFlightGuard {
            cache: self.clone(),
            fingerprint: fingerprint.to_string(),
        };
        tokio::spawn(async move {
            let result = compute.await;
            let cache = &guard.cache;
            match &result {
                Ok(tile) => cache.insert_entry(guard.fingerprint.clone(), tile.clone()),
                Err(err) if !err.is_parameter() && !cache.options.failure_cooldown.is_zero() => {
                    cache.failures.insert(guard.fingerprint.clone(), err.clone());
                }
                Err(_) => {}
            }
            // Stored before the marker goes, so later callers find the result.
            drop(guard);
            tx.send_replace(Some(result));
        });

        wait(rx).await.unwrap_or_else(|| {
            Err(TileError::Internal {
                message: format!("tile computation {} was aborted", fingerprint),
            })
        })
    }

    #[cfg(test)]
    fn insert_raw(&self, key: &str, tile: RenderedTile, length: usize) {
        let mut index = lock(&self.index);
        index.lru.put(key.to_string(), Entry { tile, length });
        index.bytes += length;
    }
}

/// Wait for a computation's result; `None` if it ended without one.
async fn wait(mut rx: watch::Receiver<Option<TileResult>>) -> Option<TileResult> {
    let result = rx.wait_for(Option::is_some).await.ok()?;
    result.as_ref().cloned()
}

// =============================================================================
// Tests
// =============================================================================
