use std::time::Duration;

use rand::Rng;

use crate::models::RetryConfig;

/// Exponential backoff with full jitter for transient embedding failures.
///
/// The delay before attempt `n + 1` is `base * 2^(n - 1)`, capped at the
/// configured maximum, then scaled by a random factor in `[0.5, 1.5)` so
/// jobs that failed together do not retry together.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a job that has run `attempt_count` times has no attempts left.
    pub fn exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }

    /// Jittered delay before the attempt after `attempt_count` failures.
    pub fn next_delay(&self, attempt_count: u32) -> Duration {
        let factor = rand::rng().random_range(0.5..1.5);
        self.next_delay_with(attempt_count, factor)
    }

    fn next_delay_with(&self, attempt_count: u32, jitter: f64) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(31);
        let raw = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        raw.mul_f64(jitter).min(self.max_delay)
    }
}
