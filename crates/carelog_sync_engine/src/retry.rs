//! Bounded retry of a single transport call.

use crate::config::RetryConfig;
use crate::connectivity::Connectivity;
use crate::error::{EngineResult, SyncError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Runs a transport call with exponential backoff.
///
/// Client errors (HTTP 4xx) and non-transient errors are returned on the
/// attempt that produced them. Network errors, timeouts and 5xx responses
/// are retried until `max_attempts` is reached, after which the last error
/// is returned. If the device goes offline before a retry fires the
/// executor gives up with [`SyncError::Disconnected`].
#[derive(Debug)]
pub struct RetryExecutor {
    config: RetryConfig,
    connectivity: Connectivity,
    retries: AtomicU64,
}

impl RetryExecutor {
    /// Creates an executor.
    pub fn new(config: RetryConfig, connectivity: Connectivity) -> Self {
        Self {
            config,
            connectivity,
            retries: AtomicU64::new(0),
        }
    }

    /// Returns the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total number of retries performed by this executor.
    pub fn total_retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Runs `call` until it succeeds or the retry budget is spent.
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> EngineResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_client_error() || !err.is_retryable() {
                tracing::debug!(%label, error = %err, "not retrying");
                return Err(err);
            }
            if attempt + 1 >= max_attempts {
                tracing::warn!(%label, attempts = max_attempts, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.config.delay_for_attempt(attempt);
            tracing::warn!(
                %label,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );

            if !self.connectivity.is_online() {
                return Err(SyncError::Disconnected);
            }
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.connectivity.wait_offline() => return Err(SyncError::Disconnected),
            }
            if !self.connectivity.is_online() {
                return Err(SyncError::Disconnected);
            }

            self.retries.fetch_add(1, Ordering::Relaxed);
            attempt += 1;
        }
    }
}
