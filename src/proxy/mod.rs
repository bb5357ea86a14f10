//! Gateway server - the request-processing pipeline behind `/v1/messages`
//!
//! Submodules follow the pipeline order:
//! - `handler`: intake, routing, transformation, and response emission
//! - `dispatch`: the outbound HTTP call with deadline, retry, and breaker
//! - `rate_limit` / `breaker`: per-provider admission control
//! - `auth`: API key middleware with the loopback fallback
//! - `admin`: health endpoints and provider CRUD
//! - `server`: router construction and lifecycle
//! - `state`: shared gateway state and the per-request context

pub mod admin;
pub mod auth;
pub mod breaker;
pub mod dispatch;
pub mod handler;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use server::run;
pub use state::{GatewayState, RequestContext, SharedState};
