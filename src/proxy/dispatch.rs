//! Upstream dispatch
//!
//! Performs the outbound HTTP call for a transformed request: URL
//! resolution, credential attachment, the overall deadline, retry with
//! exponential backoff and jitter on upstream 5xx, and circuit breaker
//! bookkeeping.
//!
//! Failure categorization:
//! - transport errors (refused, TLS, DNS) → 502 provider_error
//! - upstream 4xx → relayed status and body, never retried
//! - upstream 5xx → retried per policy, then 502; breaker counts failures
//! - deadline exceeded → 504 provider_error with code "timeout"

use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{Config, RetryConfig};
use crate::error::GatewayError;
use crate::registry::Provider;
use crate::transform::RequestDescriptor;

use super::breaker::CircuitBreaker;

pub struct Dispatcher {
    client: reqwest::Client,
    retry: RetryConfig,
    timeout: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl Dispatcher {
    /// Build the shared outbound client. The proxy URL is consulted once,
    /// here; connection pooling is per-host with keep-alive.
    pub fn new(config: &Config, breaker: Arc<CircuitBreaker>) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            client: builder.build()?,
            retry: config.performance.retry.clone(),
            timeout: config.performance.request_timeout(),
            breaker,
        })
    }

    /// The configured overall deadline, shared with body reads
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send the request, returning the upstream response on 2xx
    pub async fn dispatch(
        &self,
        provider: &Provider,
        desc: &RequestDescriptor,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        self.breaker.check(&provider.name)?;

        let url = build_url(provider, desc);
        let body = serde_json::to_vec(&desc.body)
            .map_err(|e| GatewayError::internal(format!("cannot serialize request body: {}", e)))?;

        let deadline = Instant::now() + self.timeout;
        let mut attempt: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.breaker.record_failure(&provider.name);
                return Err(GatewayError::timeout(&provider.name));
            }

            let mut request = self
                .client
                .post(&url)
                .header("content-type", "application/json")
                .body(body.clone());
            request = if stream {
                request.header("accept", "text/event-stream")
            } else {
                request.header("accept", "application/json")
            };

            // Later chain stages override earlier ones for the same header
            for (name, value) in merged_headers(&desc.headers) {
                request = request.header(name.as_str(), value.as_str());
            }
            if !desc.has_auth_header() {
                if let Some((name, value)) = credential_header(provider) {
                    request = request.header(name.as_str(), value.as_str());
                }
            }

            // The deadline covers connect and response headers; streaming
            // bodies are read beyond it by design.
            let result = tokio::time::timeout(remaining, request.send()).await;

            let response = match result {
                Err(_) => {
                    self.breaker.record_failure(&provider.name);
                    return Err(GatewayError::timeout(&provider.name));
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure(&provider.name);
                    if e.is_timeout() {
                        return Err(GatewayError::timeout(&provider.name));
                    }
                    return Err(GatewayError::upstream_transport(format!(
                        "request to provider '{}' failed: {}",
                        provider.name, e
                    )));
                }
                Ok(Ok(response)) => response,
            };

            let status = response.status();

            if status.is_success() {
                self.breaker.record_success(&provider.name);
                return Ok(response);
            }

            let upstream_body = read_error_body(response).await;

            if status.is_client_error() {
                // Client errors relay as-is and never retry
                tracing::debug!(
                    provider = %provider.name,
                    status = %status,
                    "upstream rejected request"
                );
                return Err(GatewayError::upstream_status(status, upstream_body));
            }

            // 5xx: count toward the breaker and retry while attempts remain
            self.breaker.record_failure(&provider.name);
            if attempt >= self.retry.max_retries {
                tracing::warn!(
                    provider = %provider.name,
                    status = %status,
                    attempts = attempt + 1,
                    "upstream failed after retries"
                );
                return Err(GatewayError::upstream_status(
                    axum::http::StatusCode::BAD_GATEWAY,
                    upstream_body,
                ));
            }

            let backoff = with_jitter(self.retry.interval_for_attempt(attempt));
            tracing::debug!(
                provider = %provider.name,
                status = %status,
                backoff_ms = backoff.as_millis() as u64,
                "retrying upstream request"
            );
            tokio::time::sleep(backoff.min(remaining)).await;
            attempt += 1;
        }
    }
}

/// Resolve the request URL: a chain override wins, otherwise the provider
/// base plus its format's default path
fn build_url(provider: &Provider, desc: &RequestDescriptor) -> String {
    match &desc.url {
        Some(url) => url.clone(),
        None => format!(
            "{}{}",
            provider.base_url,
            provider.message_format.default_api_path()
        ),
    }
}

/// The credential header for a provider: bearer by default, raw value under
/// a custom header name when configured
fn credential_header(provider: &Provider) -> Option<(String, String)> {
    let key = provider.api_key.as_ref()?;
    match &provider.auth_header {
        Some(name) => Some((name.to_lowercase(), key.clone())),
        None => Some(("authorization".to_string(), format!("Bearer {}", key))),
    }
}

/// Collapse duplicate header names, keeping the last value for each
fn merged_headers(headers: &[(String, String)]) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if let Some(existing) = out.iter_mut().find(|(n, _)| *n == lower) {
            existing.1 = value.clone();
        } else {
            out.push((lower, value.clone()));
        }
    }
    out
}

/// Multiply a backoff interval by a random factor in [0.8, 1.2)
fn with_jitter(interval: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(0.8..1.2);
    interval.mul_f64(factor)
}

/// Best-effort parse of an upstream error body
async fn read_error_body(response: reqwest::Response) -> serde_json::Value {
    match response.bytes().await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::json!({
                "error": {"message": String::from_utf8_lossy(&bytes).into_owned()}
            })
        }),
        Err(_) => serde_json::json!({"error": {"message": "upstream request failed"}}),
    }
}
