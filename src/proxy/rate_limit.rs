//! Per-provider rate limiting
//!
//! A token bucket per provider: tokens replenish continuously at the
//! configured rate and each request consumes one. Check-and-decrement runs
//! under the bucket map lock, so the decision is atomic. Exhaustion maps to
//! 429 with a retry_after advisory derived from the refill rate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::GatewayError;

/// Token bucket state for one provider
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

impl Bucket {
    fn new(rate: f64) -> Self {
        Self {
            tokens: rate,
            last_update: Instant::now(),
        }
    }

    /// Replenish by elapsed time, then try to take one token
    fn try_acquire(&mut self, rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(rate);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Seconds until one token is available again
    fn retry_after(&self, rate: f64) -> u64 {
        if rate <= 0.0 {
            return 1;
        }
        ((1.0 - self.tokens) / rate).ceil().max(1.0) as u64
    }
}

/// Shared limiter over all providers
pub struct RateLimiter {
    enabled: bool,
    rate: f64,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    pub fn new(enabled: bool, requests_per_second: f64) -> Self {
        Self {
            enabled,
            rate: requests_per_second,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject a request for the given provider
    pub fn check(&self, provider: &str) -> Result<(), GatewayError> {
        if !self.enabled {
            return Ok(());
        }

        let mut buckets = self.buckets.lock().expect("rate limiter lock poisoned");
        let bucket = buckets
            .entry(provider.to_string())
            .or_insert_with(|| Bucket::new(self.rate));

        if bucket.try_acquire(self.rate) {
            Ok(())
        } else {
            let retry_after = bucket.retry_after(self.rate);
            Err(GatewayError::rate_limited(provider, retry_after))
        }
    }
}
