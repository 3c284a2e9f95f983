//! Dataset registry: opened rasters shared across requests.
//!
//! The registry provides:
//! - LRU caching of opened datasets so headers and IFDs are parsed once
//! - Singleflight opens: concurrent requests for the same identifier share one open
//! - A short negative cache for permanent failures, so a broken source is
//!   reported instead of re-opened on every tile
//! - Block caching in front of every reader

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::RasterError;
use crate::io::{BlockCache, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};

use super::dataset::{RasterDataset, DEFAULT_DECODED_BLOCKS};
use super::failures::FailureMemo;
use super::source::RasterSource;

/// A dataset opened through source `S`.
pub type Dataset<S> = RasterDataset<BlockCache<<S as RasterSource>::Reader>>;

type OpenResult<S> = Result<Arc<Dataset<S>>, RasterError>;

/// Distinct failed identifiers remembered at once.
const FAILURE_CAPACITY: usize = 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Capacities and timings of a [`DatasetRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    /// Maximum number of open datasets
    pub capacity: usize,
    /// Block size of each dataset's byte cache
    pub block_size: usize,
    /// Blocks cached per dataset
    pub block_capacity: usize,
    /// Decoded blocks cached per dataset
    pub decoded_blocks: usize,
    /// How long a permanent open failure is remembered
    pub failure_ttl: Duration,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            capacity: 64,
            block_size: DEFAULT_BLOCK_SIZE,
            block_capacity: DEFAULT_BLOCK_CAPACITY,
            decoded_blocks: DEFAULT_DECODED_BLOCKS,
            failure_ttl: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// DatasetRegistry
// =============================================================================

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type InFlight<S> = Mutex<HashMap<String, watch::Receiver<Option<OpenResult<S>>>>>;

/// Removes the in-flight marker when the opening task finishes or is
/// cancelled; waiters of a cancelled open see the channel close and retry.
struct InFlightGuard<'a, S: RasterSource> {
    in_flight: &'a InFlight<S>,
    identifier: &'a str,
}

impl<S: RasterSource> Drop for InFlightGuard<'_, S> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(self.identifier);
    }
}

/// Registry for managing dataset lifecycle and caching.
pub struct DatasetRegistry<S: RasterSource> {
    source: S,
    options: RegistryOptions,
    cache: Mutex<LruCache<String, Arc<Dataset<S>>>>,
    failures: FailureMemo<RasterError>,
    in_flight: InFlight<S>,
}

impl<S: RasterSource> DatasetRegistry<S> {
    /// Create a registry with default capacities.
    pub fn new(source: S) -> Self {
        Self::with_options(source, RegistryOptions::default())
    }

    pub fn with_options(source: S, options: RegistryOptions) -> Self {
        Self {
            source,
            options,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(options.capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            failures: FailureMemo::new(options.failure_ttl, FAILURE_CAPACITY),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a dataset, opening it if not already cached.
    ///
    /// # Errors
    /// The open failure, possibly remembered from an earlier attempt within
    /// the failure TTL.
    pub async fn get(&self, identifier: &str) -> OpenResult<S> {
        loop {
            let cached = lock(&self.cache).get(identifier).cloned();
            if let Some(dataset) = cached {
                return Ok(dataset);
            }
            if let Some(err) = self.failures.get(identifier) {
                debug!(identifier, error = %err, "Open failure still cooling down");
                return Err(err);
            }

            let claim = {
                let mut in_flight = lock(&self.in_flight);
                match in_flight.get(identifier) {
                    Some(rx) => Ok(rx.clone()),
                    None => {
                        // The previous leader may have finished since the lookup above.
                        if let Some(dataset) = lock(&self.cache).peek(identifier) {
                            return Ok(dataset.clone());
                        }
                        let (tx, rx) = watch::channel(None);
                        in_flight.insert(identifier.to_string(), rx);
                        Err(tx)
                    }
                }
            };

            let mut rx = match claim {
                Ok(rx) => rx,
                Err(tx) => return self.lead_open(identifier, tx).await,
            };
            if let Ok(result) = rx.wait_for(|r| r.is_some()).await {
                if let Some(result) = result.as_ref() {
                    return result.clone();
                }
            };
            // The leader was cancelled; try again.
        }
    }

    async fn lead_open(
        &self,
        identifier: &str,
        tx: watch::Sender<Option<OpenResult<S>>>,
    ) -> OpenResult<S> {
        let _guard = InFlightGuard::<S> {
            in_flight: &self.in_flight,
            identifier,
        };

        let started = Instant::now();
        let result = self.open(identifier).await;
        match &result {
            Ok(dataset) => {
                lock(&self.cache).put(identifier.to_string(), dataset.clone());
                info!(
                    identifier,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Opened dataset"
                );
            }
            Err(err) if err.is_permanent() => {
                warn!(identifier, error = %err, "Failed to open dataset");
                self.failures.insert(identifier, err.clone());
            }
            Err(err) => {
                warn!(identifier, error = %err, "Transient failure opening dataset");
            }
        }
        tx.send_replace(Some(result.clone()));
        result
    }

    async fn open(&self, identifier: &str) -> OpenResult<S> {
        let reader = self.source.create_reader(identifier).await?;
        let cached = BlockCache::with_capacity(
            reader,
            self.options.block_size,
            self.options.block_capacity,
        );
        let dataset = RasterDataset::open(cached, self.options.decoded_blocks).await?;
        Ok(Arc::new(dataset))
    }

    /// Drop a dataset and any remembered failure, forcing a reopen.
    pub fn invalidate(&self, identifier: &str) {
        lock(&self.cache).pop(identifier);
        self.failures.remove(identifier);
    }

    pub fn clear(&self) {
        lock(&self.cache).clear();
        self.failures.clear();
    }

    pub fn cached_count(&self) -> usize {
        lock(&self.cache).len()
    }

    /// Number of failed identifiers currently remembered.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
