//! Gateway state and per-request context

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::registry::ProviderRegistry;
use crate::router::Router;

use super::breaker::CircuitBreaker;
use super::dispatch::Dispatcher;
use super::rate_limit::RateLimiter;

// ─────────────────────────────────────────────────────────────────────────────
// Gateway State
// ─────────────────────────────────────────────────────────────────────────────

/// Shared state for the gateway server
///
/// Everything here is read-only or internally synchronized; request tasks
/// never take locks beyond the registry snapshot swap and the limiter and
/// breaker maps.
pub struct GatewayState {
    pub config: Config,
    pub registry: ProviderRegistry,
    pub router: Router,
    pub dispatcher: Dispatcher,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    pub fn new(config: Config) -> Result<SharedState> {
        let registry = ProviderRegistry::from_config(&config.providers);
        let router = Router::new(config.routes.clone());

        let perf = &config.performance;
        let breaker = Arc::new(CircuitBreaker::new(
            perf.circuit_breaker_enabled,
            perf.circuit_breaker_failure_threshold,
            Duration::from_secs(perf.circuit_breaker_cooldown_secs),
        ));
        let rate_limiter = RateLimiter::new(
            perf.rate_limit_enabled,
            perf.rate_limit_requests_per_second,
        );
        let dispatcher = Dispatcher::new(&config, breaker)?;

        Ok(Arc::new(Self {
            config,
            registry,
            router,
            dispatcher,
            rate_limiter,
            started_at: Instant::now(),
        }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request Context
// ─────────────────────────────────────────────────────────────────────────────

/// Per-request state carried through the pipeline stages
///
/// Created at intake, filled in as the request moves through counting,
/// routing, and transformation, and dropped when the emitter finishes.
#[derive(Debug)]
pub struct RequestContext {
    /// Parsed request body, preserved verbatim for the transformer chain
    pub body: Value,
    /// Client-requested model string, before routing rewrites it
    pub requested_model: String,
    /// Whether the client asked for a streaming response
    pub stream: bool,
    /// Whether extended thinking is enabled on the request
    pub thinking: bool,
    /// Estimated input tokens (0 when estimation fails)
    pub token_count: u32,
    /// Chosen provider name, set by routing
    pub provider: String,
    /// Chosen upstream model, set by routing
    pub upstream_model: String,
    /// Routing reason, for observability
    pub reason: String,
}

impl RequestContext {
    pub fn new(body: Value, requested_model: String, stream: bool, thinking: bool) -> Self {
        Self {
            body,
            requested_model,
            stream,
            thinking,
            token_count: 0,
            provider: String::new(),
            upstream_model: String::new(),
            reason: String::new(),
        }
    }
}
