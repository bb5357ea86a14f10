//! The `/v1/messages` request pipeline
//!
//! ```text
//! intake → token count → routing → registry snapshot → rate limit
//!     → request transformer chain → upstream dispatch
//!     → response chain (buffered) or stream converter (SSE) → client
//! ```
//!
//! The handler owns the `RequestContext` for the request's lifetime. The
//! registry snapshot taken here is used throughout, so admin mutations
//! mid-request cannot change this request's view.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use bytes::Bytes;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::MessageFormat;
use crate::error::GatewayError;
use crate::sse;
use crate::token_count;
use crate::transform::{RequestDescriptor, StreamConverter, TransformerChain};

use super::state::{RequestContext, SharedState};

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /v1/messages
pub async fn handle_messages(State(state): State<SharedState>, request: Request) -> Response {
    match process_messages(state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

/// POST /v1/messages/count_tokens
///
/// Anthropic-format providers support this endpoint natively and get
/// passthrough; for everyone else the local estimator answers directly.
pub async fn handle_count_tokens(State(state): State<SharedState>, request: Request) -> Response {
    match process_count_tokens(state, request).await {
        Ok(response) => response,
        Err(error) => error.into_response(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Intake
// ─────────────────────────────────────────────────────────────────────────────

/// Read, parse, and validate the request body into a `RequestContext`
async fn intake(state: &SharedState, request: Request) -> Result<RequestContext, GatewayError> {
    let limit = state.config.performance.max_request_body_size;
    let bytes = axum::body::to_bytes(request.into_body(), limit)
        .await
        .map_err(|_| GatewayError::too_large(limit))?;

    let body: Value = serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::invalid_request(format!("malformed JSON body: {}", e)))?;

    if !body.is_object() {
        return Err(GatewayError::invalid_request("request body must be a JSON object"));
    }

    let model = body
        .get("model")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| GatewayError::invalid_request("model is required and must be a non-empty string"))?
        .to_string();

    let messages = body
        .get("messages")
        .and_then(|m| m.as_array())
        .filter(|m| !m.is_empty())
        .ok_or_else(|| GatewayError::invalid_request("messages is required and must be a non-empty array"))?;

    for (i, message) in messages.iter().enumerate() {
        let valid = message.get("role").and_then(|r| r.as_str()).is_some()
            && message.get("content").is_some();
        if !valid {
            return Err(GatewayError::invalid_request(format!(
                "messages[{}] must have role and content",
                i
            )));
        }
    }

    let stream = body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false);
    let thinking = body
        .get("thinking")
        .map(|t| !matches!(t, Value::Null | Value::Bool(false)))
        .unwrap_or(false);

    Ok(RequestContext::new(body, model, stream, thinking))
}

// ─────────────────────────────────────────────────────────────────────────────
// The /v1/messages pipeline
// ─────────────────────────────────────────────────────────────────────────────

async fn process_messages(
    state: SharedState,
    request: Request,
) -> Result<Response, GatewayError> {
    let mut ctx = intake(&state, request).await?;

    ctx.token_count = token_count::estimate_input_tokens(&ctx.body);

    let decision = state
        .router
        .decide(&ctx.requested_model, ctx.token_count, ctx.thinking);
    ctx.provider = decision.provider;
    ctx.upstream_model = decision.model;
    ctx.reason = decision.reason;
    tracing::info!(
        model = %ctx.requested_model,
        provider = %ctx.provider,
        upstream_model = %ctx.upstream_model,
        tokens = ctx.token_count,
        stream = ctx.stream,
        "routed: {}",
        ctx.reason
    );

    // Rewrite the body's model to the explicit form before transformers run
    if let Some(obj) = ctx.body.as_object_mut() {
        obj.insert(
            "model".to_string(),
            json!(format!("{},{}", ctx.provider, ctx.upstream_model)),
        );
    }

    let snapshot = state.registry.snapshot();
    let provider = snapshot.get(&ctx.provider)?;

    state.rate_limiter.check(&provider.name)?;

    let chain = TransformerChain::build(provider.clone(), &ctx.upstream_model, ctx.stream)?;
    let desc = chain.transform_request(ctx.body.clone())?;

    let response = state.dispatcher.dispatch(&provider, &desc, ctx.stream).await?;

    if ctx.stream && sse::is_event_stream(response.headers()) {
        stream_response(chain, response).await
    } else {
        if ctx.stream {
            tracing::warn!(provider = %provider.name, "stream requested but upstream sent JSON");
        }
        buffered_response(&state, chain, response).await
    }
}

/// Buffered path: read the upstream JSON, run the response chain, emit 200
async fn buffered_response(
    state: &SharedState,
    chain: TransformerChain,
    response: reqwest::Response,
) -> Result<Response, GatewayError> {
    let bytes = tokio::time::timeout(state.dispatcher.timeout(), response.bytes())
        .await
        .map_err(|_| GatewayError::internal("upstream body read timed out"))?
        .map_err(|e| GatewayError::upstream_transport(format!("upstream body read failed: {}", e)))?;

    let upstream: Value = serde_json::from_slice(&bytes)
        .map_err(|e| GatewayError::internal(format!("upstream sent invalid JSON: {}", e)))?;

    let body = chain.transform_response(upstream)?;
    Ok((StatusCode::OK, Json(body)).into_response())
}

/// Streaming path
///
/// The converter is pumped inline until it yields its first frames; an
/// upstream failure before that point falls back to a plain JSON error.
/// After the first frames the response headers are committed and failures
/// become in-band `error` events. The relay task stops as soon as the
/// client goes away, which drops the upstream read and cancels it.
async fn stream_response(
    chain: TransformerChain,
    response: reqwest::Response,
) -> Result<Response, GatewayError> {
    let mut upstream = response.bytes_stream();

    let Some(mut converter) = chain.stream_converter() else {
        // Anthropic-format upstream already speaks the client's protocol;
        // relay frames verbatim.
        let body = Body::from_stream(upstream.map(|chunk| {
            chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
        }));
        return Ok(sse_response(body));
    };

    // Pump until the converter produces output or the upstream ends
    let mut initial: Vec<Bytes> = Vec::new();
    let mut upstream_done = false;
    while initial.is_empty() {
        match upstream.next().await {
            Some(Ok(chunk)) => {
                initial = converter.convert_chunk(&chunk)?;
            }
            Some(Err(e)) => {
                // Nothing emitted yet: fail over to a JSON error response
                return Err(GatewayError::upstream_transport(format!(
                    "upstream stream failed: {}",
                    e
                )));
            }
            None => {
                initial = converter.finish();
                upstream_done = true;
                break;
            }
        }
    }

    if initial.is_empty() {
        return Err(GatewayError::upstream_transport(
            "upstream closed the stream without sending data",
        ));
    }

    let (tx, rx) = mpsc::channel::<Result<Bytes, std::io::Error>>(32);
    tokio::spawn(async move {
        for frame in initial {
            if tx.send(Ok(frame)).await.is_err() {
                return; // client disconnected
            }
        }
        if upstream_done {
            return;
        }

        loop {
            match upstream.next().await {
                Some(Ok(chunk)) => {
                    let frames = match converter.convert_chunk(&chunk) {
                        Ok(frames) => frames,
                        Err(error) => {
                            send_stream_error(&tx, &mut converter, error).await;
                            return;
                        }
                    };
                    for frame in frames {
                        if tx.send(Ok(frame)).await.is_err() {
                            return; // client disconnected, drop upstream read
                        }
                    }
                }
                Some(Err(e)) => {
                    let error = GatewayError::upstream_transport(format!(
                        "upstream stream failed: {}",
                        e
                    ));
                    send_stream_error(&tx, &mut converter, error).await;
                    return;
                }
                None => {
                    // EOF; the converter closes out ([DONE] already made
                    // this a no-op on the normal path)
                    for frame in converter.finish() {
                        if tx.send(Ok(frame)).await.is_err() {
                            return;
                        }
                    }
                    return;
                }
            }
        }
    });

    Ok(sse_response(Body::from_stream(ReceiverStream::new(rx))))
}

/// Emit an in-band error event followed by a clean stream close
async fn send_stream_error(
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
    converter: &mut Box<dyn StreamConverter>,
    error: GatewayError,
) {
    tracing::warn!("mid-stream failure: {}", error.message);
    let event = sse::format_event("error", &error.to_stream_event());
    if tx.send(Ok(event)).await.is_err() {
        return;
    }
    for frame in converter.finish() {
        if tx.send(Ok(frame)).await.is_err() {
            return;
        }
    }
}

/// SSE response headers: flush-friendly, uncached, keep-alive
fn sse_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

// ─────────────────────────────────────────────────────────────────────────────
// count_tokens
// ─────────────────────────────────────────────────────────────────────────────

async fn process_count_tokens(
    state: SharedState,
    request: Request,
) -> Result<Response, GatewayError> {
    let mut ctx = intake(&state, request).await?;
    ctx.token_count = token_count::estimate_input_tokens(&ctx.body);

    let decision = state
        .router
        .decide(&ctx.requested_model, ctx.token_count, ctx.thinking);

    let snapshot = state.registry.snapshot();
    let provider = snapshot.get(&decision.provider)?;

    if provider.message_format == MessageFormat::Anthropic {
        let mut body = ctx.body.clone();
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), json!(decision.model));
        }
        let desc = RequestDescriptor {
            body,
            headers: Vec::new(),
            url: Some(format!("{}/v1/messages/count_tokens", provider.base_url)),
        };
        let response = state.dispatcher.dispatch(&provider, &desc, false).await?;
        let bytes = tokio::time::timeout(state.dispatcher.timeout(), response.bytes())
            .await
            .map_err(|_| GatewayError::internal("upstream body read timed out"))?
            .map_err(|e| {
                GatewayError::upstream_transport(format!("upstream body read failed: {}", e))
            })?;
        let body: Value = serde_json::from_slice(&bytes)
            .map_err(|e| GatewayError::internal(format!("upstream sent invalid JSON: {}", e)))?;
        return Ok(Json(body).into_response());
    }

    Ok(Json(json!({ "input_tokens": ctx.token_count })).into_response())
}
