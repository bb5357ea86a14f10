//! OpenAI → Anthropic buffered response conversion
//!
//! Maps a complete Chat Completions response onto the Anthropic Message
//! shape. DeepSeek-style `reasoning_content` becomes a leading thinking
//! block; tool calls become `tool_use` blocks; finish reasons map onto the
//! Anthropic stop-reason vocabulary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Convert a buffered OpenAI response body to an Anthropic message
pub fn convert_response(body: Value, fallback_model: &str) -> Result<Value, GatewayError> {
    let response: OpenAiChatCompletion = serde_json::from_value(body).map_err(|e| {
        GatewayError::internal(format!("cannot parse upstream response: {}", e))
    })?;

    let choice = response.choices.first();
    let mut content: Vec<AnthropicContentBlock> = Vec::new();

    if let Some(choice) = choice {
        if let Some(reasoning) = &choice.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(AnthropicContentBlock::Thinking {
                    thinking: reasoning.clone(),
                    signature: String::new(),
                });
            }
        }

        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(AnthropicContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(tool_calls) = &choice.message.tool_calls {
            for call in tool_calls {
                let input: Value = serde_json::from_str(&call.function.arguments)
                    .unwrap_or_else(|_| serde_json::json!({}));
                content.push(AnthropicContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    input,
                });
            }
        }
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(convert_finish_reason);

    let usage = response
        .usage
        .map(|u| AnthropicUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or(AnthropicUsage {
            input_tokens: 0,
            output_tokens: 0,
        });

    let model = if response.model.is_empty() {
        fallback_model.to_string()
    } else {
        response.model
    };

    let anthropic = AnthropicResponse {
        id: message_id(&response.id),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model,
        stop_reason: stop_reason.map(str::to_string),
        stop_sequence: None,
        usage,
    };

    serde_json::to_value(anthropic)
        .map_err(|e| GatewayError::internal(format!("cannot serialize response: {}", e)))
}

/// Map an OpenAI completion id onto the Anthropic message id space
pub fn message_id(openai_id: &str) -> String {
    if openai_id.is_empty() {
        return "msg_unknown".to_string();
    }
    format!("msg_{}", openai_id.trim_start_matches("chatcmpl-"))
}

/// Map OpenAI `finish_reason` onto Anthropic `stop_reason`
pub fn convert_finish_reason(finish_reason: &str) -> &'static str {
    match finish_reason {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

// ============================================================================
// OpenAI Response Types (Input - Deserialize)
// ============================================================================

#[derive(Debug, Deserialize)]
struct OpenAiChatCompletion {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek and OpenRouter surface model reasoning here
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ============================================================================
// Anthropic Response Types (Output - Serialize)
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicResponse {
    id: String,
    #[serde(rename = "type")]
    response_type: String,
    role: String,
    content: Vec<AnthropicContentBlock>,
    model: String,
    stop_reason: Option<String>,
    stop_sequence: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "thinking")]
    Thinking { thinking: String, signature: String },
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
