//! OpenAI-compatible format stage
//!
//! Serves the OpenAI-family backends: OpenAI, OpenRouter, Groq, DeepSeek,
//! XAI, Mistral, Ollama. Requests convert Anthropic → Chat Completions,
//! buffered responses convert back, and streams run through the stateful
//! SSE converter.

mod request;
mod response;
mod stream;

pub use stream::OpenAiStreamConverter;

use serde_json::Value;

use crate::error::GatewayError;
use crate::transform::{
    RequestDescriptor, StreamConverter, TransformContext, Transformer,
};

pub struct OpenAiTransformer;

impl Transformer for OpenAiTransformer {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn transform_request(
        &self,
        mut desc: RequestDescriptor,
        ctx: &TransformContext,
    ) -> Result<RequestDescriptor, GatewayError> {
        desc.body = request::convert_request(desc.body, ctx.model)?;
        Ok(desc)
    }

    fn transform_response(
        &self,
        body: Value,
        ctx: &TransformContext,
    ) -> Result<Value, GatewayError> {
        response::convert_response(body, ctx.model)
    }

    fn stream_converter(&self, ctx: &TransformContext) -> Option<Box<dyn StreamConverter>> {
        Some(Box::new(OpenAiStreamConverter::new(ctx.model)))
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

    fn test_provider() -> Provider {
        let now = Utc::now();
        Provider {
            name: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key: Some("sk-test".to_string()),
            models: vec!["gpt-4".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_request_and_response_directions() {
        let provider = test_provider();
        let options = HashMap::new();
        let ctx = TransformContext {
            provider: &provider,
            model: "gpt-4",
            stream: false,
            options: &options,
        };

        let body = json!({
            "model": "openai,gpt-4",
            "system": "be brief",
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let desc = OpenAiTransformer
            .transform_request(RequestDescriptor::new(body), &ctx)
            .unwrap();
        assert_eq!(desc.body["model"], "gpt-4");
        assert_eq!(desc.body["messages"][0]["role"], "system");

        let upstream = json!({
            "id": "chatcmpl-1",
            "model": "gpt-4",
            "choices": [{
                "message": {"role": "assistant", "content": "Hello"},
                "finish_reason": "stop"
            }]
        });
        let anthropic = OpenAiTransformer.transform_response(upstream, &ctx).unwrap();
        assert_eq!(anthropic["type"], "message");
        assert_eq!(anthropic["content"][0]["text"], "Hello");
    }

    #[test]
    fn test_provides_stream_converter() {
        let provider = test_provider();
        let options = HashMap::new();
        let ctx = TransformContext {
            provider: &provider,
            model: "gpt-4",
            stream: true,
            options: &options,
        };
        assert!(OpenAiTransformer.stream_converter(&ctx).is_some());
    }
}
