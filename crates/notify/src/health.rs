//! Per-destination delivery health.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Delivery counters for one destination.
///
/// `consecutive_failures` only grows until the next success, which resets
/// it to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelHealth {
    pub sent: u64,
    pub failed: u64,
    /// Sends dropped by the destination's rate limiter. Not failures.
    pub rate_limited: u64,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ChannelHealth {
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.sent += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(at);
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.failed += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(at);
        self.last_error = Some(error.into());
    }

    pub fn record_rate_limited(&mut self) {
        self.rate_limited += 1;
    }

    pub fn is_healthy(&self) -> bool {
        self.consecutive_failures == 0
    }
}
