//! Gateway error types and response shaping
//!
//! Every error that escapes the request pipeline is rendered as an
//! Anthropic-style error body:
//!
//! ```json
//! {"error": {"type": "<kind>", "message": "...", "code": "...", "details": {...}}}
//! ```
//!
//! The kind strings and status codes follow the taxonomy used by the
//! Messages API, so clients that already understand Anthropic errors need
//! no special handling for gateway-originated failures.

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use serde_json::{json, Value};

/// Error category, serialized as the `error.type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidRequest,
    Authentication,
    Permission,
    NotFound,
    RateLimit,
    Api,
    Provider,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest => "invalid_request_error",
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Permission => "permission_error",
            ErrorKind::NotFound => "not_found_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Api => "api_error",
            ErrorKind::Provider => "provider_error",
        }
    }
}

/// An error carrying everything needed to build the HTTP error response
#[derive(Debug)]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
    pub code: Option<String>,
    pub details: Option<Value>,
}

impl GatewayError {
    fn new(kind: ErrorKind, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Malformed JSON or missing/invalid required fields (400)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, StatusCode::BAD_REQUEST, message)
    }

    /// Ingress body over the configured cap (413)
    pub fn too_large(limit: usize) -> Self {
        Self::new(
            ErrorKind::InvalidRequest,
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("request body exceeds the {} byte limit", limit),
        )
    }

    /// Missing or wrong API key (401)
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Authentication, StatusCode::UNAUTHORIZED, message)
    }

    /// Non-localhost access without a configured API key (403)
    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permission, StatusCode::FORBIDDEN, message)
    }

    /// Provider or route target not found (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, StatusCode::NOT_FOUND, message)
    }

    /// Local rate limit exhausted (429), with an advisory retry window
    pub fn rate_limited(provider: &str, retry_after_secs: u64) -> Self {
        let mut err = Self::new(
            ErrorKind::RateLimit,
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate limit exceeded for provider '{}'", provider),
        );
        err.details = Some(json!({ "retry_after": retry_after_secs }));
        err
    }

    /// Internal transformer failure or invariant violation (500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Upstream transport failure: connection refused, TLS, DNS (502)
    pub fn upstream_transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, StatusCode::BAD_GATEWAY, message)
    }

    /// Upstream non-2xx relayed with its original status
    pub fn upstream_status(status: StatusCode, body: Value) -> Self {
        let message = body
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .unwrap_or("upstream request failed")
            .to_string();
        let mut err = Self::new(ErrorKind::Provider, status, message);
        err.details = Some(body);
        err
    }

    /// Overall deadline exceeded (504)
    pub fn timeout(provider: &str) -> Self {
        let mut err = Self::new(
            ErrorKind::Provider,
            StatusCode::GATEWAY_TIMEOUT,
            format!("request to provider '{}' timed out", provider),
        );
        err.code = Some("timeout".to_string());
        err
    }

    /// Circuit breaker open: fail fast (503)
    pub fn circuit_open(provider: &str) -> Self {
        let mut err = Self::new(
            ErrorKind::Provider,
            StatusCode::SERVICE_UNAVAILABLE,
            format!("provider '{}' is temporarily unavailable", provider),
        );
        err.code = Some("circuit_open".to_string());
        err
    }

    /// Serialize to the wire error body
    pub fn to_body(&self) -> Value {
        let mut error = json!({
            "type": self.kind.as_str(),
            "message": self.message,
        });
        if let Some(code) = &self.code {
            error["code"] = json!(code);
        }
        if let Some(details) = &self.details {
            error["details"] = details.clone();
        }
        json!({ "error": error })
    }

    /// The SSE `error` event payload for mid-stream failures
    pub fn to_stream_event(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.kind.as_str(),
                "message": self.message,
            }
        })
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

impl std::error::Error for GatewayError {}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response<Body> {
        tracing::debug!(
            kind = self.kind.as_str(),
            status = %self.status,
            "request failed: {}",
            self.message
        );

        let body = self.to_body().to_string();

        Response::builder()
            .status(self.status)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap_or_else(|_| Response::new(Body::from("internal error building error response")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings() {
        assert_eq!(ErrorKind::InvalidRequest.as_str(), "invalid_request_error");
        assert_eq!(ErrorKind::Provider.as_str(), "provider_error");
        assert_eq!(ErrorKind::RateLimit.as_str(), "rate_limit_error");
    }

    #[test]
    fn test_error_body_shape() {
        let err = GatewayError::invalid_request("model is required");
        let body = err.to_body();

        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["message"], "model is required");
        assert!(body["error"].get("code").is_none());
    }

    #[test]
    fn test_timeout_carries_code() {
        let err = GatewayError::timeout("openai");
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);

        let body = err.to_body();
        assert_eq!(body["error"]["type"], "provider_error");
        assert_eq!(body["error"]["code"], "timeout");
    }

    #[test]
    fn test_rate_limit_advisory() {
        let err = GatewayError::rate_limited("groq", 3);
        assert_eq!(err.status, StatusCode::TOO_MANY_REQUESTS);

        let body = err.to_body();
        assert_eq!(body["error"]["details"]["retry_after"], 3);
    }

    #[test]
    fn test_upstream_status_extracts_message() {
        let upstream = json!({"error": {"message": "invalid model", "type": "invalid_request_error"}});
        let err = GatewayError::upstream_status(StatusCode::NOT_FOUND, upstream);

        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "invalid model");
    }
}
