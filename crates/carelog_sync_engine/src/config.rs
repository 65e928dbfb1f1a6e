//! Configuration for the sync engine.

use crate::device::DeviceId;
use rand::Rng;
use std::time::Duration;

/// Configuration for sync operations.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Device ID (unique per installation).
    pub device_id: DeviceId,
    /// Server URL.
    pub server_url: String,
    /// Maximum number of queue entries pushed in one request.
    pub batch_size: usize,
    /// Period of the automatic sync trigger.
    pub sync_interval: Duration,
    /// Retry configuration for a single push.
    pub retry: RetryConfig,
    /// Request timeout.
    pub timeout: Duration,
    /// Retry count at which a failing queue entry is parked.
    pub max_entry_retries: u32,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(device_id: DeviceId, server_url: impl Into<String>) -> Self {
        Self {
            device_id,
            server_url: server_url.into(),
            batch_size: 50,
            sync_interval: Duration::from_secs(30),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            max_entry_retries: 5,
        }
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the interval of the automatic sync trigger.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry count at which queue entries are parked.
    pub fn with_max_entry_retries(mut self, max: u32) -> Self {
        self.max_entry_retries = max;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DeviceId::nil(), "")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound of the pre-jitter delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each delay (0.25 = ±25 %).
    pub jitter: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(60_000),
            backoff_multiplier: 2.0,
            jitter: 0.25,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the relative jitter, clamped to `0.0..=1.0`.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Pre-jitter delay after the given failed attempt (0-indexed):
    /// `min(initial_delay * multiplier^attempt, max_delay)`.
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            Duration::ZERO
        }
    }

    /// Jittered delay after the given failed attempt (0-indexed).
    ///
    /// The result lies within `±jitter` of [`Self::base_delay_for_attempt`].
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let sample = rand::thread_rng().gen_range(-1.0..=1.0);
        self.jittered(base, sample)
    }

    /// Applies jitter to a delay; `sample` is a uniform value in `-1.0..=1.0`.
    pub fn jittered(&self, base: Duration, sample: f64) -> Duration {
        let factor = 1.0 + self.jitter * sample.clamp(-1.0, 1.0);
        Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
