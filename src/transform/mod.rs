//! Transformer chains - format conversion between the Anthropic Messages
//! schema and provider-native schemas
//!
//! A transformer is a named processing stage with two directions: request-out
//! (client → provider) and response-in (provider → client). The chain for a
//! request is assembled as:
//!
//! ```text
//! format stage (from the provider's message_format tag)
//!     → provider's global transformers, declared order
//!     → per-model transformers, declared order
//! ```
//!
//! Requests fold through the stages left to right; buffered responses fold
//! right to left. Streaming responses go through the format stage's stream
//! converter, a stateful machine that re-frames provider SSE chunks as
//! Anthropic events.
//!
//! Stages are reentrant and may appear multiple times in one chain. Each
//! stage sees the accumulated request descriptor and may modify the body,
//! add headers, or override the upstream URL; later stages win.

mod anthropic;
mod deepseek;
mod gemini;
mod maxtoken;
pub mod openai;
mod tooluse;

pub use anthropic::AnthropicPassthrough;
pub use deepseek::DeepSeekTransformer;
pub use gemini::GeminiTransformer;
pub use maxtoken::MaxTokenTransformer;
pub use openai::OpenAiTransformer;
pub use tooluse::ToolUseTransformer;

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::MessageFormat;
use crate::error::GatewayError;
use crate::registry::Provider;

// ============================================================================
// Request Descriptor
// ============================================================================

/// The request as it moves through the chain: body plus accumulated call
/// configuration. Headers set by later stages override earlier ones at
/// dispatch; a URL override replaces the format-default path entirely.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub body: Value,
    pub headers: Vec<(String, String)>,
    pub url: Option<String>,
}

impl RequestDescriptor {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            headers: Vec::new(),
            url: None,
        }
    }

    /// Whether the chain already attached an authentication header; the
    /// dispatcher only adds the provider credential when it did not
    pub fn has_auth_header(&self) -> bool {
        self.headers.iter().any(|(name, _)| {
            let name = name.to_ascii_lowercase();
            name == "authorization" || name == "x-api-key" || name == "x-goog-api-key"
        })
    }
}

// ============================================================================
// Transform Context
// ============================================================================

/// Per-stage context: the provider snapshot, the selected upstream model,
/// the streaming flag, and this stage's options map
pub struct TransformContext<'a> {
    pub provider: &'a Provider,
    pub model: &'a str,
    pub stream: bool,
    pub options: &'a HashMap<String, Value>,
}

impl<'a> TransformContext<'a> {
    /// Read an integer option
    pub fn option_u64(&self, key: &str) -> Option<u64> {
        self.options.get(key).and_then(|v| v.as_u64())
    }
}

// ============================================================================
// Transformer Trait
// ============================================================================

/// A named, reentrant processing stage
///
/// Default implementations pass through, so a transformer only implements
/// the directions it cares about.
pub trait Transformer: Send + Sync {
    /// Stable name, matching the config reference
    fn name(&self) -> &'static str;

    /// Client → provider direction
    fn transform_request(
        &self,
        desc: RequestDescriptor,
        _ctx: &TransformContext,
    ) -> Result<RequestDescriptor, GatewayError> {
        Ok(desc)
    }

    /// Provider → client direction, buffered JSON
    fn transform_response(
        &self,
        body: Value,
        _ctx: &TransformContext,
    ) -> Result<Value, GatewayError> {
        Ok(body)
    }

    /// Provider → client direction, streaming. Only format stages convert
    /// streams; `None` means the frames relay verbatim.
    fn stream_converter(&self, _ctx: &TransformContext) -> Option<Box<dyn StreamConverter>> {
        None
    }
}

/// Stateful converter turning provider SSE chunks into Anthropic SSE frames
///
/// One converter instance serves one response stream; it is driven from a
/// single task, so emission order is the call order.
pub trait StreamConverter: Send {
    /// Feed one upstream chunk; returns zero or more complete output frames
    fn convert_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, GatewayError>;

    /// Upstream ended (normally or not); emit whatever closes the stream.
    /// Idempotent: once terminated, returns nothing.
    fn finish(&mut self) -> Vec<Bytes>;
}

// ============================================================================
// Named Lookup
// ============================================================================

/// Resolve a transformer by its config name
pub fn lookup(name: &str) -> Result<Arc<dyn Transformer>, GatewayError> {
    match name {
        "anthropic" => Ok(Arc::new(AnthropicPassthrough)),
        "openai" => Ok(Arc::new(OpenAiTransformer)),
        "gemini" => Ok(Arc::new(GeminiTransformer)),
        "deepseek" => Ok(Arc::new(DeepSeekTransformer)),
        "maxtoken" => Ok(Arc::new(MaxTokenTransformer)),
        "tooluse" => Ok(Arc::new(ToolUseTransformer)),
        other => Err(GatewayError::internal(format!(
            "unknown transformer '{}'",
            other
        ))),
    }
}

/// The format stage for a provider's message format tag
fn format_stage(format: MessageFormat) -> Arc<dyn Transformer> {
    match format {
        MessageFormat::Anthropic => Arc::new(AnthropicPassthrough),
        MessageFormat::Openai => Arc::new(OpenAiTransformer),
        MessageFormat::Gemini => Arc::new(GeminiTransformer),
    }
}

// ============================================================================
// Chain
// ============================================================================

struct Stage {
    transformer: Arc<dyn Transformer>,
    options: HashMap<String, Value>,
}

/// Ordered transformer composition for one request
pub struct TransformerChain {
    stages: Vec<Stage>,
    provider: Arc<Provider>,
    model: String,
    stream: bool,
}

impl std::fmt::Debug for TransformerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformerChain")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("stream", &self.stream)
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl TransformerChain {
    /// Assemble the chain for a provider and selected upstream model
    pub fn build(
        provider: Arc<Provider>,
        model: &str,
        stream: bool,
    ) -> Result<Self, GatewayError> {
        let mut stages = vec![Stage {
            transformer: format_stage(provider.message_format),
            options: HashMap::new(),
        }];

        // Global stages first, then model-scoped stages, each in declared order
        for scoped in [false, true] {
            for reference in &provider.transformers {
                if reference.is_model_scoped() != scoped {
                    continue;
                }
                if !reference.applies_to(model) {
                    continue;
                }
                stages.push(Stage {
                    transformer: lookup(reference.name())?,
                    options: reference.options(),
                });
            }
        }

        Ok(Self {
            stages,
            provider,
            model: model.to_string(),
            stream,
        })
    }

    fn context<'a>(&'a self, options: &'a HashMap<String, Value>) -> TransformContext<'a> {
        TransformContext {
            provider: &self.provider,
            model: &self.model,
            stream: self.stream,
            options,
        }
    }

    /// Run the request direction, left to right
    pub fn transform_request(&self, body: Value) -> Result<RequestDescriptor, GatewayError> {
        let mut desc = RequestDescriptor::new(body);
        for stage in &self.stages {
            let ctx = self.context(&stage.options);
            desc = stage.transformer.transform_request(desc, &ctx)?;
        }
        Ok(desc)
    }

    /// Run the buffered response direction, right to left
    pub fn transform_response(&self, body: Value) -> Result<Value, GatewayError> {
        let mut body = body;
        for stage in self.stages.iter().rev() {
            let ctx = self.context(&stage.options);
            body = stage.transformer.transform_response(body, &ctx)?;
        }
        Ok(body)
    }

    /// The stream converter, when the format stage provides one
    pub fn stream_converter(&self) -> Option<Box<dyn StreamConverter>> {
        let stage = self.stages.first()?;
        let ctx = self.context(&stage.options);
        stage.transformer.stream_converter(&ctx)
    }
}
