//! Performance and resilience settings
//!
//! Timeouts, ingress caps, rate limiting, retry, and circuit breaker knobs.
//! Documented defaults live here as named constants; the legacy 60-minute
//! ceiling is kept as the upper clamp for the request timeout.

use serde::Deserialize;
use std::time::Duration;

/// Default overall upstream deadline
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Legacy upper bound for the request timeout
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 3600;

/// Default ingress body cap (10 MiB)
pub const DEFAULT_MAX_REQUEST_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Retry policy for upstream 5xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Attempts after the initial request (0 disables retry)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff interval in milliseconds
    #[serde(default = "default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Multiplier applied to the interval after each attempt
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Ceiling for any single backoff interval
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_max_retries() -> u32 {
    2
}
fn default_initial_interval_ms() -> u64 {
    500
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_interval_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_interval_ms: default_initial_interval_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_interval_ms: default_max_interval_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff interval for the given attempt (0-indexed), before jitter
    pub fn interval_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_interval_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((base as u64).min(self.max_interval_ms))
    }
}

/// The `[performance]` section
#[derive(Debug, Clone, Deserialize)]
pub struct PerformanceConfig {
    /// Overall upstream deadline in seconds; clamped to the legacy ceiling
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Ingress body size cap in bytes
    #[serde(default = "default_body_size")]
    pub max_request_body_size: usize,

    /// Per-provider token bucket toggle
    #[serde(default)]
    pub rate_limit_enabled: bool,

    /// Sustained requests per second per provider
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_requests_per_second: f64,

    /// Per-provider circuit breaker toggle
    #[serde(default = "default_breaker_enabled")]
    pub circuit_breaker_enabled: bool,

    /// Consecutive failures before the breaker opens
    #[serde(default = "default_breaker_threshold")]
    pub circuit_breaker_failure_threshold: u32,

    /// Seconds the breaker stays open before probing again
    #[serde(default = "default_breaker_cooldown")]
    pub circuit_breaker_cooldown_secs: u64,

    /// Retry policy for retriable upstream failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_body_size() -> usize {
    DEFAULT_MAX_REQUEST_BODY_SIZE
}
fn default_rate_limit_rps() -> f64 {
    10.0
}
fn default_breaker_enabled() -> bool {
    true
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_cooldown() -> u64 {
    30
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_request_body_size: default_body_size(),
            rate_limit_enabled: false,
            rate_limit_requests_per_second: default_rate_limit_rps(),
            circuit_breaker_enabled: default_breaker_enabled(),
            circuit_breaker_failure_threshold: default_breaker_threshold(),
            circuit_breaker_cooldown_secs: default_breaker_cooldown(),
            retry: RetryConfig::default(),
        }
    }
}

impl PerformanceConfig {
    /// The effective upstream deadline, clamped to the legacy ceiling
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.min(MAX_REQUEST_TIMEOUT_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let perf = PerformanceConfig::default();
        assert_eq!(perf.request_timeout(), Duration::from_secs(30));
        assert_eq!(perf.max_request_body_size, 10 * 1024 * 1024);
        assert!(!perf.rate_limit_enabled);
        assert!(perf.circuit_breaker_enabled);
    }

    #[test]
    fn test_timeout_clamped_to_legacy_ceiling() {
        let perf = PerformanceConfig {
            request_timeout_secs: 86_400,
            ..Default::default()
        };
        assert_eq!(perf.request_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn test_backoff_intervals_grow_and_cap() {
        let retry = RetryConfig::default();
        assert_eq!(retry.interval_for_attempt(0), Duration::from_millis(500));
        assert_eq!(retry.interval_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(retry.interval_for_attempt(2), Duration::from_millis(2000));
        // Far attempts hit the ceiling
        assert_eq!(retry.interval_for_attempt(10), Duration::from_millis(10_000));
    }
}
