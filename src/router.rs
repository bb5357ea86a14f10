//! Model routing
//!
//! Maps `(requested_model, token_count, thinking)` to a `(provider, model)`
//! target. Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. Explicit `provider,model` selection embedded in the model string
//! 2. Direct route keyed by the exact requested model
//! 3. Long context when the input estimate exceeds the threshold
//! 4. Background for haiku-class models
//! 5. Think when the request enables extended thinking
//! 6. The mandatory default route
//!
//! Rule order makes long context take precedence over background and think.

use crate::config::RoutesConfig;

/// Input token count above which the long-context route applies.
/// Exactly at the threshold does not trigger; one past it does.
pub const LONG_CONTEXT_TOKEN_THRESHOLD: u32 = 60_000;

/// Requested-model prefix that routes to the background target
pub const BACKGROUND_MODEL_PREFIX: &str = "claude-3-5-haiku";

/// The routing outcome attached to every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub provider: String,
    pub model: String,
    /// Human-readable reason, surfaced in logs and the request context
    pub reason: String,
}

/// Routing state machine over a fixed route table
#[derive(Debug, Clone)]
pub struct Router {
    routes: RoutesConfig,
}

impl Router {
    pub fn new(routes: RoutesConfig) -> Self {
        Self { routes }
    }

    /// Decide the upstream target for a request
    pub fn decide(&self, requested_model: &str, token_count: u32, thinking: bool) -> RouteDecision {
        // Explicit selection short-circuits everything, including validation
        // against the route table; the registry lookup is the backstop.
        if let Some((provider, model)) = requested_model.split_once(',') {
            return RouteDecision {
                provider: provider.to_string(),
                model: model.to_string(),
                reason: "explicit model selection".to_string(),
            };
        }

        if let Some(target) = self.routes.models.get(requested_model) {
            return RouteDecision {
                provider: target.provider.clone(),
                model: target.model.clone(),
                reason: "direct model route".to_string(),
            };
        }

        if let Some(target) = &self.routes.long_context {
            if token_count > LONG_CONTEXT_TOKEN_THRESHOLD {
                return RouteDecision {
                    provider: target.provider.clone(),
                    model: target.model.clone(),
                    reason: format!("long context ({} input tokens)", token_count),
                };
            }
        }

        if let Some(target) = &self.routes.background {
            if requested_model.starts_with(BACKGROUND_MODEL_PREFIX) {
                return RouteDecision {
                    provider: target.provider.clone(),
                    model: target.model.clone(),
                    reason: "haiku model routed to background".to_string(),
                };
            }
        }

        if let Some(target) = &self.routes.think {
            if thinking {
                return RouteDecision {
                    provider: target.provider.clone(),
                    model: target.model.clone(),
                    reason: "thinking parameter enabled".to_string(),
                };
            }
        }

        RouteDecision {
            provider: self.routes.default.provider.clone(),
            model: self.routes.default.model.clone(),
            reason: "default model".to_string(),
        }
    }
}
