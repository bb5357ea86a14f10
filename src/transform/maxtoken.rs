//! Configurable max_tokens clamp
//!
//! Caps the request's `max_tokens` at the ceiling from the stage options:
//!
//! ```toml
//! transformers = [{ name = "maxtoken", options = { max_tokens = 4096 } }]
//! ```
//!
//! Requests without a `max_tokens` get the ceiling as their value, so the
//! cap also works for providers that require the field.

use serde_json::json;

use crate::error::GatewayError;
use crate::transform::{RequestDescriptor, TransformContext, Transformer};

const DEFAULT_CEILING: u64 = 8192;

pub struct MaxTokenTransformer;

impl Transformer for MaxTokenTransformer {
    fn name(&self) -> &'static str {
        "maxtoken"
    }

    fn transform_request(
        &self,
        mut desc: RequestDescriptor,
        ctx: &TransformContext,
    ) -> Result<RequestDescriptor, GatewayError> {
        let ceiling = ctx.option_u64("max_tokens").unwrap_or(DEFAULT_CEILING);
        clamp_max_tokens(&mut desc.body, ceiling);
        Ok(desc)
    }
}

/// Clamp (or set) the body's max_tokens to the ceiling
pub(crate) fn clamp_max_tokens(body: &mut serde_json::Value, ceiling: u64) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    let current = obj.get("max_tokens").and_then(|v| v.as_u64());
    match current {
        Some(value) if value <= ceiling => {}
        _ => {
            obj.insert("max_tokens".to_string(), json!(ceiling));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageFormat;
    use crate::registry::Provider;
    use chrono::Utc;
    use serde_json::Value;
    use std::collections::HashMap;

    fn run(body: Value, options: HashMap<String, Value>) -> Value {
        let now = Utc::now();
        let provider = Provider {
            name: "p".to_string(),
            base_url: "https://api.example.com".to_string(),
            api_key: None,
            models: vec!["m".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
            created_at: now,
            updated_at: now,
        };
        let ctx = TransformContext {
            provider: &provider,
            model: "m",
            stream: false,
            options: &options,
        };
        MaxTokenTransformer
            .transform_request(RequestDescriptor::new(body), &ctx)
            .unwrap()
            .body
    }

    #[test]
    fn test_clamps_above_ceiling() {
        let mut options = HashMap::new();
        options.insert("max_tokens".to_string(), serde_json::json!(4096));

        let body = run(serde_json::json!({"max_tokens": 100_000}), options);
        assert_eq!(body["max_tokens"], 4096);
    }

    #[test]
    fn test_leaves_values_under_ceiling() {
        let mut options = HashMap::new();
        options.insert("max_tokens".to_string(), serde_json::json!(4096));

        let body = run(serde_json::json!({"max_tokens": 1024}), options);
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn test_fills_missing_max_tokens() {
        let body = run(serde_json::json!({"model": "m"}), HashMap::new());
        assert_eq!(body["max_tokens"], DEFAULT_CEILING);
    }
}
