//! Per-provider circuit breaker
//!
//! Counts consecutive dispatch failures per provider. At the threshold the
//! breaker opens and requests fail fast with 503 until the cooldown passes;
//! the first request after cooldown probes the provider (half-open) and a
//! success closes the breaker again.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::GatewayError;

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
}

pub struct CircuitBreaker {
    enabled: bool,
    failure_threshold: u32,
    cooldown: Duration,
    states: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(enabled: bool, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            enabled,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or fail fast. An expired open window admits one probe.
    pub fn check(&self, provider: &str) -> Result<(), GatewayError> {
        if !self.enabled {
            return Ok(());
        }

        let mut states = self.states.lock().expect("breaker lock poisoned");
        let state = states.entry(provider.to_string()).or_default();

        if let Some(open_until) = state.open_until {
            if Instant::now() < open_until {
                return Err(GatewayError::circuit_open(provider));
            }
            // Half-open: let this request probe; a failure re-opens
            state.open_until = None;
        }
        Ok(())
    }

    pub fn record_success(&self, provider: &str) {
        if !self.enabled {
            return;
        }
        let mut states = self.states.lock().expect("breaker lock poisoned");
        if let Some(state) = states.get_mut(provider) {
            state.consecutive_failures = 0;
            state.open_until = None;
        }
    }

    pub fn record_failure(&self, provider: &str) {
        if !self.enabled {
            return;
        }
        let mut states = self.states.lock().expect("breaker lock poisoned");
        let state = states.entry(provider.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            tracing::warn!(
                provider = provider,
                failures = state.consecutive_failures,
                "circuit breaker opened"
            );
        }
    }

    /// Whether the breaker for a provider is currently open
    pub fn is_open(&self, provider: &str) -> bool {
        let states = self.states.lock().expect("breaker lock poisoned");
        states
            .get(provider)
            .and_then(|s| s.open_until)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_at_threshold() {
        let breaker = CircuitBreaker::new(true, 3, Duration::from_secs(60));

        for _ in 0..2 {
            breaker.record_failure("openai");
            assert!(breaker.check("openai").is_ok());
        }
        breaker.record_failure("openai");

        let err = breaker.check("openai").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
        assert!(breaker.is_open("openai"));
    }

    #[test]
    fn test_success_resets_failures() {
        let breaker = CircuitBreaker::new(true, 2, Duration::from_secs(60));

        breaker.record_failure("openai");
        breaker.record_success("openai");
        breaker.record_failure("openai");
        assert!(breaker.check("openai").is_ok());
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(true, 1, Duration::from_millis(0));

        breaker.record_failure("openai");
        // Cooldown of zero: the next check is the probe and is admitted
        assert!(breaker.check("openai").is_ok());

        breaker.record_success("openai");
        assert!(breaker.check("openai").is_ok());
    }

    #[test]
    fn test_disabled_never_opens() {
        let breaker = CircuitBreaker::new(false, 1, Duration::from_secs(60));
        breaker.record_failure("openai");
        breaker.record_failure("openai");
        assert!(breaker.check("openai").is_ok());
    }

    #[test]
    fn test_providers_isolated() {
        let breaker = CircuitBreaker::new(true, 1, Duration::from_secs(60));
        breaker.record_failure("openai");
        assert!(breaker.check("openai").is_err());
        assert!(breaker.check("anthropic").is_ok());
    }
}
