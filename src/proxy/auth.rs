//! API key middleware
//!
//! Accepts `Authorization: Bearer <key>` or `x-api-key: <key>`. Health
//! endpoints bypass the check. When no key is configured the server binds
//! loopback-only and non-local peers get 403 as a second line of defense.
//! Presented keys are logged only as truncated SHA-256 hashes.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use std::net::SocketAddr;

use crate::error::GatewayError;

use super::state::SharedState;

/// Paths that never require authentication
const PUBLIC_PATHS: &[&str] = &["/", "/health"];

pub async fn require_auth(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let path = request.uri().path();
    if PUBLIC_PATHS.contains(&path) {
        return Ok(next.run(request).await);
    }

    match &state.config.api_key {
        Some(expected) => {
            let presented = presented_key(request.headers());
            match presented {
                Some(key) if key == *expected => Ok(next.run(request).await),
                Some(key) => {
                    tracing::debug!(key_hash = %key_hash(&key), "rejected wrong API key");
                    Err(GatewayError::authentication("invalid API key"))
                }
                None => Err(GatewayError::authentication(
                    "missing API key; send Authorization: Bearer <key> or x-api-key",
                )),
            }
        }
        None => {
            if peer.ip().is_loopback() {
                Ok(next.run(request).await)
            } else {
                tracing::warn!(peer = %peer, "rejected non-localhost client (no API key configured)");
                Err(GatewayError::permission(
                    "access restricted to localhost; configure an API key for remote access",
                ))
            }
        }
    }
}

/// Extract the presented key from either accepted header
fn presented_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}

/// Truncated SHA-256 of a key, safe for logs
fn key_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presented_key_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret-key".parse().unwrap());
        assert_eq!(presented_key(&headers).as_deref(), Some("secret-key"));
    }

    #[test]
    fn test_presented_key_x_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "other-key".parse().unwrap());
        assert_eq!(presented_key(&headers).as_deref(), Some("other-key"));
    }

    #[test]
    fn test_bearer_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer first".parse().unwrap());
        headers.insert("x-api-key", "second".parse().unwrap());
        assert_eq!(presented_key(&headers).as_deref(), Some("first"));
    }

    #[test]
    fn test_non_bearer_authorization_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic dXNlcjpwYXNz".parse().unwrap());
        assert_eq!(presented_key(&headers), None);
    }

    #[test]
    fn test_key_hash_is_short_and_stable() {
        let a = key_hash("some-key");
        let b = key_hash("some-key");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, key_hash("other-key"));
    }
}
