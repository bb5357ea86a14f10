//! DeepSeek adjustments
//!
//! DeepSeek's chat endpoint rejects `max_tokens` above 8192, so requests
//! are capped there (overridable via the `max_tokens` option). Reasoning
//! content in responses is handled by the OpenAI format stage, which turns
//! `reasoning_content` into thinking blocks on both the buffered and
//! streaming paths.

use crate::error::GatewayError;
use crate::transform::maxtoken::clamp_max_tokens;
use crate::transform::{RequestDescriptor, TransformContext, Transformer};

/// Documented DeepSeek ceiling
pub const DEEPSEEK_MAX_TOKENS: u64 = 8192;

pub struct DeepSeekTransformer;

impl Transformer for DeepSeekTransformer {
    fn name(&self) -> &'static str {
        "deepseek"
    }

    fn transform_request(
        &self,
        mut desc: RequestDescriptor,
        ctx: &TransformContext,
    ) -> Result<RequestDescriptor, GatewayError> {
        let ceiling = ctx.option_u64("max_tokens").unwrap_or(DEEPSEEK_MAX_TOKENS);
        clamp_max_tokens(&mut desc.body, ceiling);
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessageFormat;
    use crate::registry::Provider;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_caps_at_8192() {
        let now = Utc::now();
        let provider = Provider {
            name: "deepseek".to_string(),
            base_url: "https://api.deepseek.com".to_string(),
            api_key: None,
            models: vec!["deepseek-chat".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
            created_at: now,
            updated_at: now,
        };
        let options = HashMap::new();
        let ctx = TransformContext {
            provider: &provider,
            model: "deepseek-chat",
            stream: false,
            options: &options,
        };

        let desc = DeepSeekTransformer
            .transform_request(
                RequestDescriptor::new(json!({"max_tokens": 32_000})),
                &ctx,
            )
            .unwrap();
        assert_eq!(desc.body["max_tokens"], 8192);

        let desc = DeepSeekTransformer
            .transform_request(RequestDescriptor::new(json!({"max_tokens": 2048})), &ctx)
            .unwrap();
        assert_eq!(desc.body["max_tokens"], 2048);
    }
}
