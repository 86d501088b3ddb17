//! Token-bucket rate limiting per destination.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Destination rate limit: `burst` sends at once, refilled at
/// `max_per_hour` tokens per hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub burst: u32,
    pub max_per_hour: u32,
}

impl RateLimit {
    pub fn new(burst: u32, max_per_hour: u32) -> Self {
        Self { burst, max_per_hour }
    }
}

impl From<&guardian_core::config::RateLimitDefaults> for RateLimit {
    fn from(d: &guardian_core::config::RateLimitDefaults) -> Self {
        Self::new(d.burst, d.max_per_hour)
    }
}

/// Classic token bucket on the tokio clock, so paused-time tests can
/// drive refill deterministically.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket. A zero burst still admits one send at a time.
    pub fn new(limit: RateLimit) -> Self {
        let capacity = f64::from(limit.burst.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: f64::from(limit.max_per_hour) / 3600.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }

    /// How long until the next token is available. `None` if the bucket
    /// never refills.
    pub fn time_until_next(&mut self) -> Option<Duration> {
        self.refill(Instant::now());
        if self.tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_per_sec <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_of_one_admits_exactly_one() {
        let mut bucket = TokenBucket::new(RateLimit::new(1, 60));
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refills_at_hourly_rate() {
        // 60/hour is one token a minute.
        let mut bucket = TokenBucket::new(RateLimit::new(2, 60));
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!bucket.try_acquire());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn refill_is_capped_at_burst() {
        let mut bucket = TokenBucket::new(RateLimit::new(3, 3600));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!((bucket.available() - 3.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_rate_never_refills() {
        let mut bucket = TokenBucket::new(RateLimit::new(1, 0));
        assert!(bucket.try_acquire());
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(!bucket.try_acquire());
        assert_eq!(bucket.time_until_next(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn time_until_next_token() {
        let mut bucket = TokenBucket::new(RateLimit::new(1, 3600));
        assert_eq!(bucket.time_until_next(), Some(Duration::ZERO));
        assert!(bucket.try_acquire());
        let wait = bucket.time_until_next().unwrap();
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-6);
    }
}
