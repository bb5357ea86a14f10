//! Health and admin endpoints
//!
//! Liveness, readiness, runtime status, and provider CRUD. Mutations go
//! through the registry's copy-on-write swap, so in-flight requests keep
//! the snapshot they started with. Credentials never appear in listings.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{MessageFormat, ProviderConfig, TransformerRef, VERSION};
use crate::error::GatewayError;
use crate::registry::Provider;

use super::state::SharedState;

// ─────────────────────────────────────────────────────────────────────────────
// Health
// ─────────────────────────────────────────────────────────────────────────────

/// GET / - liveness
pub async fn liveness() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "message": "ccproxy is running",
        "version": VERSION,
    }))
}

/// GET /health - readiness
pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    let snapshot = state.registry.snapshot();
    Json(json!({
        "status": "healthy",
        "providers": snapshot.len(),
    }))
}

/// GET /status - runtime info (admin-gated)
pub async fn status(State(state): State<SharedState>) -> Json<Value> {
    let snapshot = state.registry.snapshot();
    let enabled = snapshot.list().iter().filter(|p| p.enabled).count();

    Json(json!({
        "version": VERSION,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "providers": {
            "total": snapshot.len(),
            "enabled": enabled,
        },
        "routes": {
            "default": format!(
                "{},{}",
                state.config.routes.default.provider, state.config.routes.default.model
            ),
            "long_context": state.config.routes.long_context.is_some(),
            "background": state.config.routes.background.is_some(),
            "think": state.config.routes.think.is_some(),
            "direct": state.config.routes.models.len(),
        },
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider CRUD
// ─────────────────────────────────────────────────────────────────────────────

/// Wire payload for provider create/update
#[derive(Debug, Deserialize)]
pub struct ProviderPayload {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub transformers: Vec<TransformerRef>,
    #[serde(default)]
    pub message_format: MessageFormat,
    #[serde(default)]
    pub auth_header: Option<String>,
}

fn default_true() -> bool {
    true
}

impl ProviderPayload {
    fn into_provider(self) -> Result<Provider, GatewayError> {
        let config = ProviderConfig {
            base_url: self.base_url,
            api_key: self.api_key,
            api_key_env: None,
            models: self.models,
            enabled: self.enabled,
            transformers: self.transformers,
            message_format: self.message_format,
            auth_header: self.auth_header,
        };
        config
            .validate(&self.name)
            .map_err(GatewayError::invalid_request)?;
        Ok(Provider::from_config(&self.name, &config))
    }
}

/// Listing shape: the credential is reported only as presence
fn provider_summary(provider: &Provider) -> Value {
    json!({
        "name": provider.name,
        "base_url": provider.base_url,
        "api_key_set": provider.api_key.is_some(),
        "models": provider.models,
        "enabled": provider.enabled,
        "message_format": provider.message_format.as_str(),
        "transformers": provider
            .transformers
            .iter()
            .map(|t| t.name().to_string())
            .collect::<Vec<_>>(),
        "created_at": provider.created_at.to_rfc3339(),
        "updated_at": provider.updated_at.to_rfc3339(),
    })
}

/// GET /providers
pub async fn list_providers(State(state): State<SharedState>) -> Json<Value> {
    let providers: Vec<Value> = state
        .registry
        .snapshot()
        .list()
        .iter()
        .map(|p| provider_summary(p))
        .collect();
    Json(json!({ "providers": providers }))
}

/// GET /providers/:name
pub async fn get_provider(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    let snapshot = state.registry.snapshot();
    let provider = snapshot
        .list()
        .into_iter()
        .find(|p| p.name == name)
        .ok_or_else(|| GatewayError::not_found(format!("provider '{}' not found", name)))?;
    Ok(Json(provider_summary(&provider)))
}

/// POST /providers
pub async fn create_provider(
    State(state): State<SharedState>,
    Json(payload): Json<ProviderPayload>,
) -> Result<Response, GatewayError> {
    if state.registry.snapshot().contains(&payload.name) {
        return Err(GatewayError::invalid_request(format!(
            "provider '{}' already exists",
            payload.name
        )));
    }

    let provider = payload.into_provider()?;
    let name = provider.name.clone();
    let summary = provider_summary(&provider);
    state.registry.upsert(provider);

    tracing::info!(provider = %name, "provider created");
    Ok((StatusCode::CREATED, Json(summary)).into_response())
}

/// PUT /providers/:name
pub async fn update_provider(
    State(state): State<SharedState>,
    Path(name): Path<String>,
    Json(mut payload): Json<ProviderPayload>,
) -> Result<Json<Value>, GatewayError> {
    if !state.registry.snapshot().contains(&name) {
        return Err(GatewayError::not_found(format!(
            "provider '{}' not found",
            name
        )));
    }
    payload.name = name.clone();

    let provider = payload.into_provider()?;
    let summary = provider_summary(&provider);
    state.registry.upsert(provider);

    tracing::info!(provider = %name, "provider updated");
    Ok(Json(summary))
}

/// DELETE /providers/:name
pub async fn delete_provider(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<StatusCode, GatewayError> {
    if state.registry.remove(&name) {
        tracing::info!(provider = %name, "provider deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(GatewayError::not_found(format!(
            "provider '{}' not found",
            name
        )))
    }
}

/// POST /providers/:name/toggle
pub async fn toggle_provider(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, GatewayError> {
    match state.registry.toggle(&name) {
        Some(enabled) => {
            tracing::info!(provider = %name, enabled, "provider toggled");
            Ok(Json(json!({ "name": name, "enabled": enabled })))
        }
        None => Err(GatewayError::not_found(format!(
            "provider '{}' not found",
            name
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_validation() {
        let payload = ProviderPayload {
            name: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key: Some("sk".to_string()),
            models: vec!["gpt-4".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
        };
        let provider = payload.into_provider().unwrap();
        assert_eq!(provider.name, "openai");
        assert!(provider.enabled);
    }

    #[test]
    fn test_payload_rejects_bad_base_url() {
        let payload = ProviderPayload {
            name: "bad".to_string(),
            base_url: "not-a-url".to_string(),
            api_key: None,
            models: vec!["m".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
        };
        assert!(payload.into_provider().is_err());
    }

    #[test]
    fn test_summary_masks_credential() {
        let payload = ProviderPayload {
            name: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key: Some("sk-secret".to_string()),
            models: vec!["gpt-4".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
        };
        let provider = payload.into_provider().unwrap();
        let summary = provider_summary(&provider);

        assert_eq!(summary["api_key_set"], true);
        assert!(summary.to_string().find("sk-secret").is_none());
    }
}
