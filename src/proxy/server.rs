//! Server setup and lifecycle
//!
//! Builds the axum router, enforces the loopback rule when no API key is
//! configured, and serves with graceful shutdown bounded by the configured
//! drain timeout.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tokio::net::TcpListener;

use crate::config::Config;
use crate::token_count;

use super::admin;
use super::auth;
use super::handler;
use super::state::{GatewayState, SharedState};

/// Build the route table over the shared state
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        // Core endpoint
        .route("/v1/messages", post(handler::handle_messages))
        .route(
            "/v1/messages/count_tokens",
            post(handler::handle_count_tokens),
        )
        // Health (auth-exempt)
        .route("/", get(admin::liveness))
        .route("/health", get(admin::health))
        // Admin (auth-gated)
        .route("/status", get(admin::status))
        .route(
            "/providers",
            get(admin::list_providers).post(admin::create_provider),
        )
        .route(
            "/providers/:name",
            get(admin::get_provider)
                .put(admin::update_provider)
                .delete(admin::delete_provider),
        )
        .route("/providers/:name/toggle", post(admin::toggle_provider))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state)
}

/// Run the gateway until ctrl-c, then drain within the shutdown timeout
pub async fn run(mut config: Config) -> Result<()> {
    // Without an API key the gateway must not be reachable from off-host
    if config.api_key.is_none() && !is_loopback_host(&config.host) {
        tracing::warn!(
            host = %config.host,
            "no API key configured; forcing bind to 127.0.0.1"
        );
        config.host = "127.0.0.1".to_string();
    }

    let bind_addr = config.bind_addr()?;
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    // The tokenizer takes ~200ms to load; warm it before traffic arrives
    token_count::preload();

    let state = GatewayState::new(config)?;
    tracing::info!(
        providers = state.registry.snapshot().len(),
        "provider registry loaded"
    );

    let app = build_router(state);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("ccproxy listening on {}", bind_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_rx.await.ok();
    });

    let server_task = tokio::spawn(server.into_future());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received, draining connections");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(drain, server_task).await {
        Ok(joined) => joined.context("server task panicked")?.context("server error")?,
        Err(_) => {
            tracing::warn!(
                timeout_secs = drain.as_secs(),
                "drain timeout elapsed, aborting remaining connections"
            );
        }
    }

    tracing::info!("ccproxy stopped");
    Ok(())
}

fn is_loopback_host(host: &str) -> bool {
    match host.parse::<std::net::IpAddr>() {
        Ok(ip) => ip.is_loopback(),
        Err(_) => host == "localhost",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("localhost"));
        assert!(!is_loopback_host("0.0.0.0"));
        assert!(!is_loopback_host("192.168.1.5"));
    }
}
