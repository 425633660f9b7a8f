//! Time utilities and constants for DuelSettle.

use chrono::{DateTime, Duration, Utc};

/// Gateway timing constants.
pub mod constants {
    use super::Duration;

    /// Per-request timeout for a gateway call (10 seconds).
    pub fn request_timeout() -> Duration {
        Duration::seconds(10)
    }

    /// How long to wait for a transaction to confirm (30 seconds).
    pub fn confirmation_timeout() -> Duration {
        Duration::seconds(30)
    }

    /// Interval between confirmation polls (200 milliseconds).
    pub fn confirmation_poll_interval() -> Duration {
        Duration::milliseconds(200)
    }

    /// Base backoff between retries of idempotent calls (500 milliseconds).
    pub fn retry_backoff() -> Duration {
        Duration::milliseconds(500)
    }
}

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if a timestamp has expired (is in the past).
pub fn is_expired(expiry: Timestamp) -> bool {
    now() > expiry
}

/// Calculate expiry time from now.
pub fn expires_in(duration: Duration) -> Timestamp {
    now() + duration
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}

/// Deadline for a bounded wait.
#[derive(Debug, Clone)]
pub struct Timeout {
    /// Deadline for the operation.
    pub deadline: Timestamp,
    /// Operation description.
    pub operation: String,
}

impl Timeout {
    /// Create a new timeout.
    pub fn new(duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            deadline: expires_in(duration),
            operation: operation.into(),
        }
    }

    /// Check if the timeout has been exceeded.
    pub fn is_exceeded(&self) -> bool {
        is_expired(self.deadline)
    }

    /// Get remaining duration.
    pub fn remaining(&self) -> Duration {
        let remaining = self.deadline - now();
        if remaining < Duration::zero() {
            Duration::zero()
        } else {
            remaining
        }
    }

    /// Get remaining as std::time::Duration.
    pub fn remaining_std(&self) -> std::time::Duration {
        self.remaining().as_std()
    }
}
