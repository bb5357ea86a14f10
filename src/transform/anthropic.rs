//! Anthropic passthrough format stage
//!
//! Used when the provider natively accepts the Anthropic Messages schema.
//! The only change is pinning the body's `model` to the routed upstream
//! model; everything else passes through untouched in both directions.
//! Streams relay verbatim (no converter).

use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::transform::{RequestDescriptor, TransformContext, Transformer};

pub struct AnthropicPassthrough;

impl Transformer for AnthropicPassthrough {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn transform_request(
        &self,
        mut desc: RequestDescriptor,
        ctx: &TransformContext,
    ) -> Result<RequestDescriptor, GatewayError> {
        if let Some(obj) = desc.body.as_object_mut() {
            obj.insert("model".to_string(), json!(ctx.model));
        }
        Ok(desc)
    }

    fn transform_response(
        &self,
        body: Value,
        _ctx: &TransformContext,
    ) -> Result<Value, GatewayError> {
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageFormat;
    use crate::registry::Provider;
    use chrono::Utc;
    use std::collections::HashMap;

    fn test_ctx<'a>(
        provider: &'a Provider,
        options: &'a HashMap<String, Value>,
    ) -> TransformContext<'a> {
        TransformContext {
            provider,
            model: "claude-3-opus",
            stream: false,
            options,
        }
    }

    fn test_provider() -> Provider {
        let now = Utc::now();
        Provider {
            name: "anthropic".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            api_key: None,
            models: vec!["claude-3-opus".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Anthropic,
            auth_header: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_request_identity_except_model() {
        let provider = test_provider();
        let options = HashMap::new();
        let ctx = test_ctx(&provider, &options);

        let body = json!({
            "model": "anthropic,claude-3-opus",
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": "Hello"}]
        });
        let desc = AnthropicPassthrough
            .transform_request(RequestDescriptor::new(body.clone()), &ctx)
            .unwrap();

        assert_eq!(desc.body["model"], "claude-3-opus");
        assert_eq!(desc.body["messages"], body["messages"]);
        assert_eq!(desc.body["max_tokens"], body["max_tokens"]);
        assert!(desc.headers.is_empty());
        assert!(desc.url.is_none());
    }

    #[test]
    fn test_response_is_identity() {
        let provider = test_provider();
        let options = HashMap::new();
        let ctx = test_ctx(&provider, &options);

        let body = json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}]
        });
        let out = AnthropicPassthrough
            .transform_response(body.clone(), &ctx)
            .unwrap();
        assert_eq!(out, body);
    }

    #[test]
    fn test_no_stream_converter() {
        let provider = test_provider();
        let options = HashMap::new();
        let ctx = test_ctx(&provider, &options);
        assert!(AnthropicPassthrough.stream_converter(&ctx).is_none());
    }
}
