//! Bounded retry policy for transient explorer failures.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a hard cap on attempts and delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per window, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let max_attempts = env::var("MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|v: &u32| *v > 0)
            .unwrap_or(5);

        let base_delay_ms = env::var("RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5_000);

        let max_delay_secs = env::var("RETRY_MAX_DELAY_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Self {
            max_attempts,
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_secs(max_delay_secs),
        }
    }

    /// Retry immediately, `max_attempts` times
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// [`delay_for`](Self::delay_for) with ±20% randomization so retries on
    /// rotated credentials do not line up
    #[must_use]
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let delay = self.delay_for(attempt);
        if delay.is_zero() {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.8..1.2);
        delay.mul_f64(jitter).min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts_made` attempts
    #[must_use]
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}
