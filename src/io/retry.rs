//! Retry with exponential backoff for transient read failures.
//!
//! Remote sources fail in transient ways (timeouts, resets, 503s, throttling).
//! [`RetryingReader`] wraps any [`RangeReader`] and retries those failures a
//! bounded number of times, doubling the delay between attempts:
//!
//! ```text
//! attempt 1 ──✗──▶ sleep base ──▶ attempt 2 ──✗──▶ sleep 2·base ──▶ attempt 3 ...
//! ```
//!
//! Permanent failures (not found, out of range) are returned immediately.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::RangeReader;
use crate::error::IoError;

/// Bounds for retrying a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (1 disables retries)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// A [`RangeReader`] that retries retryable failures of the wrapped reader.
pub struct RetryingReader<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: RangeReader> RetryingReader<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: RangeReader> RangeReader for RetryingReader<R> {
    async fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let mut attempt = 1;
        loop {
            match self.inner.read_exact_at(offset, len).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_for(attempt);
                    debug!(
                        source = self.inner.identifier(),
                        offset,
                        len,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying range read"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt > 1 {
                        warn!(
                            source = self.inner.identifier(),
                            offset,
                            attempts = attempt,
                            error = %err,
                            "Range read failed after retries"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn identifier(&self) -> &str {
        self.inner.identifier()
    }
}
