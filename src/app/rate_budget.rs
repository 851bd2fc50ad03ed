//! Request-rate budget shared by every explorer call.
//!
//! Each credential gets its own `governor` limiter with a quota of one
//! request per `min_interval`. Rotation moves the active credential
//! round-robin when the provider signals rate limiting, which raises the
//! effective ceiling without exceeding any single key's limit.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use secrecy::SecretString;
use tracing::{debug, info, warn};

use crate::domain::{AppError, ConfigError, CredentialId};

/// Configuration for request throttling
#[derive(Debug, Clone)]
pub struct RateBudgetConfig {
    /// Minimum spacing between two requests on the same credential
    pub min_interval: Duration,
    /// Cooldown added per consecutive rate-limit response
    pub rate_limit_cooldown: Duration,
    /// Upper bound for the rate-limit cooldown
    pub max_rate_limit_cooldown: Duration,
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1_000), // 1 req/s, under the 2 req/s free tier
            rate_limit_cooldown: Duration::from_secs(5),
            max_rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

impl RateBudgetConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        use std::env;

        let min_interval_ms = env::var("MIN_REQUEST_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1_000);

        let cooldown_secs = env::var("RATE_LIMIT_COOLDOWN_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let max_cooldown_secs = env::var("RATE_LIMIT_MAX_COOLDOWN_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        Self {
            min_interval: Duration::from_millis(min_interval_ms),
            rate_limit_cooldown: Duration::from_secs(cooldown_secs),
            max_rate_limit_cooldown: Duration::from_secs(max_cooldown_secs),
        }
    }

    /// No throttling and no cooldowns. Used by tests and offline replays.
    pub fn unthrottled() -> Self {
        Self {
            min_interval: Duration::ZERO,
            rate_limit_cooldown: Duration::ZERO,
            max_rate_limit_cooldown: Duration::ZERO,
        }
    }
}

/// Per-credential throttling state. Never persisted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialState {
    pub last_request_at: Option<Instant>,
    pub consecutive_rate_limits: u32,
}

/// Rate budget controller owning the credential pool
pub struct RateBudget {
    config: RateBudgetConfig,
    api_keys: Vec<SecretString>,
    /// `None` when `min_interval` is zero
    limiters: Vec<Option<DefaultDirectRateLimiter>>,
    states: Mutex<Vec<CredentialState>>,
    active: AtomicUsize,
    requests: AtomicU64,
}

impl RateBudget {
    /// Create a controller over a non-empty credential pool
    pub fn new(api_keys: Vec<SecretString>, config: RateBudgetConfig) -> Result<Self, AppError> {
        if api_keys.is_empty() {
            return Err(AppError::Config(ConfigError::MissingEnv(
                "EXPLORER_API_KEYS".to_string(),
            )));
        }

        let limiters = api_keys
            .iter()
            .map(|_| Quota::with_period(config.min_interval).map(RateLimiter::direct))
            .collect();
        let states = Mutex::new(vec![CredentialState::default(); api_keys.len()]);

        info!(
            credentials = api_keys.len(),
            min_interval_ms = config.min_interval.as_millis() as u64,
            "Rate budget initialized"
        );

        Ok(Self {
            config,
            api_keys,
            limiters,
            states,
            active: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
        })
    }

    /// Wait until the active credential may issue its next request.
    ///
    /// Returns the credential the slot was taken on. Never fails.
    pub async fn acquire(&self) -> CredentialId {
        let id = self.active_id();
        if let Some(limiter) = &self.limiters[id] {
            limiter.until_ready().await;
        }

        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states[id].last_request_at = Some(Instant::now());
        drop(states);

        self.requests.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Switch to the next credential in round-robin order
    pub fn rotate(&self) -> CredentialId {
        let count = self.api_keys.len();
        let next = (self.active_id() + 1) % count;
        self.active.store(next, Ordering::Release);
        info!(credential = next + 1, of = count, "Rotated explorer credential");
        next
    }

    /// Register a rate-limit response on the active credential and return
    /// how long to back off before retrying.
    pub fn record_rate_limited(&self) -> Duration {
        let id = self.active_id();
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        let state = &mut states[id];
        state.consecutive_rate_limits = state.consecutive_rate_limits.saturating_add(1);

        let cooldown = self
            .config
            .rate_limit_cooldown
            .saturating_mul(state.consecutive_rate_limits)
            .min(self.config.max_rate_limit_cooldown);

        warn!(
            credential = id + 1,
            consecutive = state.consecutive_rate_limits,
            cooldown_ms = cooldown.as_millis() as u64,
            "Explorer rate limit hit"
        );
        cooldown
    }

    /// Clear the consecutive rate-limit counter of the active credential
    pub fn record_success(&self) {
        let id = self.active_id();
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if states[id].consecutive_rate_limits > 0 {
            debug!(credential = id + 1, "Rate-limit streak cleared");
        }
        states[id].consecutive_rate_limits = 0;
    }

    #[must_use]
    pub fn active_id(&self) -> CredentialId {
        self.active.load(Ordering::Acquire)
    }

    /// API key for a credential returned by [`acquire`](Self::acquire)
    #[must_use]
    pub fn api_key(&self, id: CredentialId) -> &SecretString {
        &self.api_keys[id % self.api_keys.len()]
    }

    #[must_use]
    pub fn credential_state(&self, id: CredentialId) -> CredentialState {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        states[id % states.len()]
    }

    /// Total requests issued through this controller since start
    #[must_use]
    pub fn requests_issued(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn credential_count(&self) -> usize {
        self.api_keys.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<SecretString> {
        (0..n)
            .map(|i| SecretString::from(format!("key_{}", i)))
            .collect()
    }

    fn config_with_interval(ms: u64) -> RateBudgetConfig {
        RateBudgetConfig {
            min_interval: Duration::from_millis(ms),
            rate_limit_cooldown: Duration::from_secs(5),
            max_rate_limit_cooldown: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        let result = RateBudget::new(vec![], RateBudgetConfig::default());
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_rotate_is_round_robin() {
        let budget = RateBudget::new(keys(3), RateBudgetConfig::unthrottled()).unwrap();
        assert_eq!(budget.active_id(), 0);
        assert_eq!(budget.rotate(), 1);
        assert_eq!(budget.rotate(), 2);
        assert_eq!(budget.rotate(), 0);
    }

    #[tokio::test]
    async fn test_acquire_enforces_min_interval() {
        let budget = RateBudget::new(keys(1), config_with_interval(60)).unwrap();

        let started = Instant::now();
        budget.acquire().await;
        budget.acquire().await;
        budget.acquire().await;

        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(budget.requests_issued(), 3);
    }

    #[tokio::test]
    async fn test_rotation_uses_fresh_credential_budget() {
        let budget = RateBudget::new(keys(2), config_with_interval(500)).unwrap();

        let started = Instant::now();
        assert_eq!(budget.acquire().await, 0);
        budget.rotate();
        assert_eq!(budget.acquire().await, 1);

        assert!(started.elapsed() < Duration::from_millis(400));
        assert!(budget.credential_state(0).last_request_at.is_some());
        assert!(budget.credential_state(1).last_request_at.is_some());
    }

    #[test]
    fn test_rate_limit_cooldown_escalates_and_caps() {
        let budget = RateBudget::new(keys(1), config_with_interval(0)).unwrap();

        assert_eq!(budget.record_rate_limited(), Duration::from_secs(5));
        assert_eq!(budget.record_rate_limited(), Duration::from_secs(10));
        for _ in 0..20 {
            budget.record_rate_limited();
        }
        assert_eq!(budget.record_rate_limited(), Duration::from_secs(60));

        budget.record_success();
        assert_eq!(budget.credential_state(0).consecutive_rate_limits, 0);
        assert_eq!(budget.record_rate_limited(), Duration::from_secs(5));
    }

    #[test]
    fn test_rate_limit_counters_are_per_credential() {
        let budget = RateBudget::new(keys(2), config_with_interval(0)).unwrap();
        budget.record_rate_limited();
        budget.record_rate_limited();
        budget.rotate();
        budget.record_rate_limited();

        assert_eq!(budget.credential_state(0).consecutive_rate_limits, 2);
        assert_eq!(budget.credential_state(1).consecutive_rate_limits, 1);
    }
}
