//! Gateway client configuration.

use std::time::Duration;

use duelsettle_common::time::{constants, DurationExt};

/// Configuration for the gateway client.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Bound on a single gateway request.
    pub request_timeout: Duration,
    /// Bound on waiting for a submitted transaction to confirm.
    pub confirmation_timeout: Duration,
    /// Interval between confirmation polls.
    pub poll_interval: Duration,
    /// Extra attempts for idempotent calls after a timeout.
    pub max_retries: usize,
    /// Initial delay between retries. Doubles per attempt.
    pub retry_backoff: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            request_timeout: constants::request_timeout().as_std(),
            confirmation_timeout: constants::confirmation_timeout().as_std(),
            poll_interval: constants::confirmation_poll_interval().as_std(),
            max_retries: 3,
            retry_backoff: constants::retry_backoff().as_std(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_millis("GATEWAY_REQUEST_TIMEOUT_MS") {
            config.request_timeout = ms;
        }

        if let Some(ms) = env_millis("GATEWAY_CONFIRMATION_TIMEOUT_MS") {
            config.confirmation_timeout = ms;
        }

        if let Some(ms) = env_millis("GATEWAY_POLL_INTERVAL_MS") {
            config.poll_interval = ms;
        }

        if let Ok(retries) = std::env::var("GATEWAY_MAX_RETRIES") {
            if let Ok(retries) = retries.parse() {
                config.max_retries = retries;
            }
        }

        if let Some(ms) = env_millis("GATEWAY_RETRY_BACKOFF_MS") {
            config.retry_backoff = ms;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.request_timeout.is_zero() {
            return Err("Request timeout cannot be zero".to_string());
        }

        if self.confirmation_timeout.is_zero() {
            return Err("Confirmation timeout cannot be zero".to_string());
        }

        if self.poll_interval.is_zero() {
            return Err("Poll interval cannot be zero".to_string());
        }

        if self.poll_interval > self.confirmation_timeout {
            return Err("Poll interval must not exceed the confirmation timeout".to_string());
        }

        Ok(())
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(16) as u32;
        self.retry_backoff.saturating_mul(1 << shift)
    }
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
}
