//! Configuration management for the raster tile server.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `RTS_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use raster_tileserver::config::Config;
//!
//! let config = Config::parse();
//! config.validate()?;
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! Every option can be set via an environment variable with the `RTS_` prefix:
//!
//! - `RTS_HOST` / `RTS_PORT` - Bind address (default: 0.0.0.0:8000)
//! - `RTS_DATA_ROOT` - Directory local identifiers must stay under
//! - `RTS_S3_ENDPOINT` / `RTS_S3_REGION` - S3 or S3-compatible storage
//! - `RTS_HTTP_TIMEOUT` - Remote read timeout in seconds (default: 30)
//! - `RTS_RETRY_ATTEMPTS` / `RTS_RETRY_BACKOFF_MS` - Remote read retries
//! - `RTS_BLOCK_SIZE` / `RTS_CACHE_BLOCKS` - Byte block cache per dataset
//! - `RTS_CACHE_DATASETS` / `RTS_FAILURE_TTL` - Open dataset cache
//! - `RTS_TILE_CACHE_BYTES` / `RTS_TILE_CACHE_ENTRIES` - Rendered tile cache
//! - `RTS_FAILURE_COOLDOWN_MS` - How long a failed tile is not recomputed
//! - `RTS_TILE_SIZE` / `RTS_RESAMPLING` / `RTS_OVERVIEW_POLICY` - Rendering defaults
//! - `RTS_JPEG_QUALITY` - JPEG quality (default: 80)
//! - `RTS_CORS_ORIGINS` - Allowed origins, comma-separated (default: any)
//! - `RTS_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `RTS_MAX_REGION_PIXELS` - Largest region output
//! - `RTS_CHANNEL_TIMEOUT` - Control channel request timeout in seconds

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::geo::OverviewPolicy;
use crate::io::{RetryPolicy, DEFAULT_BLOCK_CAPACITY, DEFAULT_BLOCK_SIZE};
use crate::raster::{RegistryOptions, DEFAULT_DECODED_BLOCKS};
use crate::render::{RenderParams, Resampling, DEFAULT_MAX_REGION_PIXELS, DEFAULT_TILE_SIZE, MAX_TILE_SIZE};
use crate::server::{RouterConfig, DEFAULT_THUMBNAIL_SIZE};
use crate::tile::{
    TileCacheOptions, TileServiceOptions, DEFAULT_JPEG_QUALITY, DEFAULT_MAX_ENTRIES,
    DEFAULT_TILE_CACHE_CAPACITY,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8000;

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default number of open datasets to cache.
pub const DEFAULT_DATASET_CACHE_CAPACITY: usize = 64;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

// =============================================================================
// CLI Arguments
// =============================================================================

/// raster-tileserver - Dynamic slippy-map tiles from GeoTIFF and COG rasters.
///
/// Renders tiles on demand from local files, HTTP(S) URLs or S3 objects,
/// reading only the byte ranges each tile needs.
#[derive(Parser, Debug, Clone)]
#[command(name = "raster-tileserver")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "RTS_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "RTS_PORT")]
    pub port: u16,

    // =========================================================================
    // Source Configuration
    // =========================================================================
    /// Directory that local identifiers are resolved against and confined to.
    ///
    /// If not specified, any readable local path is accepted.
    #[arg(long, env = "RTS_DATA_ROOT")]
    pub data_root: Option<PathBuf>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "RTS_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "RTS_S3_REGION")]
    pub s3_region: String,

    /// Timeout of a single remote read, in seconds.
    #[arg(long, default_value_t = 30, env = "RTS_HTTP_TIMEOUT")]
    pub http_timeout: u64,

    /// Attempts per remote read, including the first (1 disables retries).
    #[arg(long, default_value_t = 3, env = "RTS_RETRY_ATTEMPTS")]
    pub retry_attempts: u32,

    /// Delay before the first retry in milliseconds; doubles per attempt.
    #[arg(long, default_value_t = 100, env = "RTS_RETRY_BACKOFF_MS")]
    pub retry_backoff_ms: u64,

    // =========================================================================
    // Cache Configuration
    // =========================================================================
    /// Block size in bytes for the byte range cache.
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, env = "RTS_BLOCK_SIZE")]
    pub block_size: usize,

    /// Maximum number of byte blocks to cache per dataset.
    #[arg(long, default_value_t = DEFAULT_BLOCK_CAPACITY, env = "RTS_CACHE_BLOCKS")]
    pub cache_blocks: usize,

    /// Maximum number of open datasets to keep.
    #[arg(long, default_value_t = DEFAULT_DATASET_CACHE_CAPACITY, env = "RTS_CACHE_DATASETS")]
    pub cache_datasets: usize,

    /// Seconds a dataset that failed to open is reported without retrying.
    #[arg(long, default_value_t = 30, env = "RTS_FAILURE_TTL")]
    pub failure_ttl: u64,

    /// Maximum total size of rendered tiles kept in memory, in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "RTS_TILE_CACHE_BYTES")]
    pub tile_cache_bytes: usize,

    /// Maximum number of rendered tiles kept in memory.
    #[arg(long, default_value_t = DEFAULT_MAX_ENTRIES, env = "RTS_TILE_CACHE_ENTRIES")]
    pub tile_cache_entries: usize,

    /// Milliseconds a failed tile render is reported without recomputing (0 disables).
    #[arg(long, default_value_t = 5000, env = "RTS_FAILURE_COOLDOWN_MS")]
    pub failure_cooldown_ms: u64,

    // =========================================================================
    // Rendering Configuration
    // =========================================================================
    /// Default tile size in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "RTS_TILE_SIZE")]
    pub tile_size: u32,

    /// Default resampling: nearest or bilinear.
    #[arg(long, default_value = "nearest", env = "RTS_RESAMPLING")]
    pub resampling: Resampling,

    /// Overview choice: finer, nearest or full.
    #[arg(long, default_value = "finer", env = "RTS_OVERVIEW_POLICY")]
    pub overview_policy: OverviewPolicy,

    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "RTS_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Largest region output, in pixels.
    #[arg(long, default_value_t = DEFAULT_MAX_REGION_PIXELS, env = "RTS_MAX_REGION_PIXELS")]
    pub max_region_pixels: u64,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "RTS_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "RTS_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Seconds a control channel request may take before a timeout reply.
    #[arg(long, default_value_t = 30, env = "RTS_CHANNEL_TIMEOUT")]
    pub channel_timeout: u64,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(root) = &self.data_root {
            if !root.is_dir() {
                return Err(format!("data_root {} is not a directory", root.display()));
            }
        }

        if self.http_timeout == 0 {
            return Err("http_timeout must be greater than 0".to_string());
        }
        if self.retry_attempts == 0 {
            return Err("retry_attempts must be at least 1".to_string());
        }

        // Validate cache sizes
        if self.cache_datasets == 0 {
            return Err("cache_datasets must be greater than 0".to_string());
        }
        if self.cache_blocks == 0 {
            return Err("cache_blocks must be greater than 0".to_string());
        }
        if self.tile_cache_bytes == 0 || self.tile_cache_entries == 0 {
            return Err("tile cache bytes and entries must be greater than 0".to_string());
        }

        // Validate block size
        if self.block_size < 1024 || self.block_size > 16 * 1024 * 1024 {
            return Err("block_size must be between 1KB and 16MB".to_string());
        }

        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.max_region_pixels == 0 {
            return Err("max_region_pixels must be greater than 0".to_string());
        }
        if self.channel_timeout == 0 {
            return Err("channel_timeout must be greater than 0".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn registry_options(&self) -> RegistryOptions {
        RegistryOptions {
            capacity: self.cache_datasets,
            block_size: self.block_size,
            block_capacity: self.cache_blocks,
            decoded_blocks: DEFAULT_DECODED_BLOCKS,
            failure_ttl: Duration::from_secs(self.failure_ttl),
        }
    }

    pub fn tile_cache_options(&self) -> TileCacheOptions {
        TileCacheOptions {
            max_bytes: self.tile_cache_bytes,
            max_entries: self.tile_cache_entries,
            failure_cooldown: Duration::from_millis(self.failure_cooldown_ms),
        }
    }

    pub fn service_options(&self) -> TileServiceOptions {
        TileServiceOptions {
            policy: self.overview_policy,
            jpeg_quality: self.jpeg_quality,
        }
    }

    /// Rendering parameters applied when a request omits them.
    pub fn render_defaults(&self) -> RenderParams {
        RenderParams {
            tile_size: self.tile_size,
            resampling: self.resampling,
            ..RenderParams::default()
        }
    }

    /// Build the HTTP router configuration.
    pub fn router_config(&self) -> RouterConfig {
        let mut router_config = RouterConfig::new()
            .with_cache_max_age(self.cache_max_age)
            .with_defaults(self.render_defaults())
            .with_max_region_pixels(self.max_region_pixels)
            .with_thumbnail_size(DEFAULT_THUMBNAIL_SIZE)
            .with_channel_timeout(Duration::from_secs(self.channel_timeout))
            .with_tracing(!self.no_tracing);

        if let Some(ref origins) = self.cors_origins {
            router_config = router_config.with_cors_origins(origins.clone());
        }
        router_config
    }
}

// =============================================================================
// Tests
// =============================================================================
