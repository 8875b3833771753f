//! Retry Backoff
//!
//! Exponential backoff with jitter for transport failures and code-only
//! throttle responses.

use std::time::Duration;

/// Backoff settings for retryable failures.
///
/// # Fields
/// * `max_attempts` - Transport attempts per call, including the first (default: 3)
/// * `base_delay` - Delay before the first retry (default: 200ms)
/// * `max_delay` - Upper bound for any single delay (default: 5s)
/// * `jitter` - Extra random delay as a fraction of the backoff (default: 0.1)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.1,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts per call including the first one. Never less than 1.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Jitter factor, clamped to `0.0..=1.0`.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (0 = first retry).
    ///
    /// `base_delay * 2^retry` plus up to `jitter` of that again, capped at `max_delay`.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let exponent = retry.min(16) as u32;
        let backoff = self.base_delay.saturating_mul(2_u32.pow(exponent));
        let spread = backoff.mul_f64(self.jitter * rand::random::<f64>());
        backoff.saturating_add(spread).min(self.max_delay)
    }
}
