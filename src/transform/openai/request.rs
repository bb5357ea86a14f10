//! Anthropic → OpenAI request conversion
//!
//! Converts Anthropic Messages API requests to OpenAI Chat Completions
//! format for OpenAI-compatible backends (OpenAI, OpenRouter, Groq,
//! DeepSeek, XAI, Mistral, Ollama).
//!
//! # Key Differences
//!
//! | Anthropic                       | OpenAI                           |
//! |---------------------------------|----------------------------------|
//! | Top-level `system` field        | `messages[].role: "system"`      |
//! | `stop_sequences` (array)        | `stop` (array)                   |
//! | `tool_use` content blocks       | `assistant.tool_calls[]`         |
//! | `tool_result` content blocks    | `role: "tool"` messages          |
//! | `input_schema`                  | `function.parameters`            |
//! | `thinking.budget_tokens`        | `reasoning.max_tokens`           |
//!
//! Every `tool_use` block must be answered by a `role: "tool"` message or
//! OpenAI rejects the history; gaps are closed with a synthetic success
//! result. Input that already matches the OpenAI shape passes through so a
//! second application is a no-op.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::error::GatewayError;

/// Body of the synthetic result injected for an unanswered tool call
const SYNTHETIC_TOOL_RESULT: &str = "Tool call executed successfully";

/// Convert an Anthropic-format request body to OpenAI format, targeting the
/// given upstream model
pub fn convert_request(body: Value, model: &str) -> Result<Value, GatewayError> {
    // Already in the target format: pin the model and leave the rest alone,
    // so applying the transformer twice equals applying it once.
    if looks_like_openai(&body) {
        let mut body = body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), json!(model));
        }
        return Ok(body);
    }

    let request: AnthropicRequest = serde_json::from_value(body)
        .map_err(|e| GatewayError::invalid_request(format!("cannot parse request body: {}", e)))?;

    let mut messages: Vec<OpenAiMessage> = Vec::new();

    // System prompt becomes the leading system message
    if let Some(system) = &request.system {
        let text = system.flatten();
        if !text.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(text),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for message in &request.messages {
        messages.extend(convert_message(message));
    }

    let messages = inject_missing_tool_results(messages);

    let reasoning = request.thinking.as_ref().map(|t| ReasoningConfig {
        max_tokens: t.budget_tokens,
    });

    let openai = OpenAiChatRequest {
        model: model.to_string(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences,
        stream: request.stream,
        tools: request
            .tools
            .map(|tools| tools.into_iter().map(convert_tool).collect()),
        tool_choice: request.tool_choice.map(convert_tool_choice),
        reasoning,
    };

    serde_json::to_value(openai)
        .map_err(|e| GatewayError::internal(format!("cannot serialize request: {}", e)))
}

/// Detect bodies already in OpenAI shape
fn looks_like_openai(body: &Value) -> bool {
    if let Some(messages) = body.get("messages").and_then(|m| m.as_array()) {
        for message in messages {
            let role = message.get("role").and_then(|r| r.as_str()).unwrap_or("");
            if role == "system" || role == "tool" {
                return true;
            }
            if message.get("tool_calls").is_some() || message.get("tool_call_id").is_some() {
                return true;
            }
        }
    }
    if let Some(first_tool) = body
        .get("tools")
        .and_then(|t| t.as_array())
        .and_then(|t| t.first())
    {
        if first_tool.get("function").is_some() {
            return true;
        }
    }
    body.get("stop").is_some() || body.get("reasoning").is_some()
}

// ============================================================================
// Anthropic Request Types (Input - Deserialize)
// ============================================================================

#[derive(Debug, Deserialize)]
struct AnthropicRequest {
    #[serde(default)]
    #[allow(dead_code)]
    model: String,
    messages: Vec<AnthropicMessage>,
    #[serde(default)]
    system: Option<SystemPrompt>,
    #[serde(default)]
    max_tokens: Option<u32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    top_p: Option<f32>,
    #[serde(default)]
    stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    stream: Option<bool>,
    #[serde(default)]
    tools: Option<Vec<AnthropicTool>>,
    #[serde(default)]
    tool_choice: Option<AnthropicToolChoice>,
    #[serde(default)]
    thinking: Option<ThinkingConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    SystemBlock::Text { text } => text.as_str(),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SystemBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Debug, Deserialize)]
struct ThinkingConfig {
    #[serde(default)]
    #[allow(dead_code)]
    r#type: Option<String>,
    #[serde(default)]
    budget_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: AnthropicContent,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<AnthropicContentBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: Option<ToolResultContent>,
    },
    // Thinking blocks are not part of the OpenAI schema and are dropped
    #[serde(rename = "thinking")]
    Thinking {
        #[allow(dead_code)]
        thinking: String,
    },
    // Images and unknown blocks are flattened away; OpenAI multi-part
    // content is out of scope for this direction
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

impl ToolResultContent {
    fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ToolResultBlock::Text { text } => Some(text.as_str()),
                    ToolResultBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ToolResultBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    input_schema: Value,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicToolChoice {
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "tool")]
    Tool { name: String },
}

// ============================================================================
// OpenAI Request Types (Output - Serialize)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<OpenAiToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning: Option<ReasoningConfig>,
}

#[derive(Debug, Serialize)]
struct ReasoningConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiToolChoice {
    Mode(String),
    Specific {
        #[serde(rename = "type")]
        choice_type: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Serialize)]
struct ToolChoiceFunction {
    name: String,
}

// ============================================================================
// Conversion Functions
// ============================================================================

/// Convert one Anthropic message to OpenAI messages
///
/// A single Anthropic message may produce several OpenAI messages: text and
/// tool_use blocks collapse into one, while each tool_result block becomes
/// its own `role: "tool"` message.
fn convert_message(message: &AnthropicMessage) -> Vec<OpenAiMessage> {
    let blocks = match &message.content {
        AnthropicContent::Text(text) => {
            return vec![OpenAiMessage {
                role: message.role.clone(),
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }];
        }
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut tool_results: Vec<OpenAiMessage> = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

    for block in blocks {
        match block {
            AnthropicContentBlock::Text { text } => text_parts.push(text.clone()),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(OpenAiToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            AnthropicContentBlock::ToolResult {
                tool_use_id,
                content,
            } => {
                tool_results.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(content.as_ref().map(|c| c.flatten()).unwrap_or_default()),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            AnthropicContentBlock::Thinking { .. } | AnthropicContentBlock::Other => {}
        }
    }

    let mut messages = Vec::new();
    if !text_parts.is_empty() || !tool_calls.is_empty() {
        messages.push(OpenAiMessage {
            role: message.role.clone(),
            content: if text_parts.is_empty() {
                None
            } else {
                Some(text_parts.join(""))
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        });
    }
    messages.extend(tool_results);

    if messages.is_empty() {
        messages.push(OpenAiMessage {
            role: message.role.clone(),
            content: Some(String::new()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    messages
}

/// Close tool-call gaps: every tool call id without a `role: "tool"` answer
/// anywhere in the conversation gets a synthetic success result inserted
/// directly after the assistant message that issued it
fn inject_missing_tool_results(messages: Vec<OpenAiMessage>) -> Vec<OpenAiMessage> {
    let answered: HashSet<String> = messages
        .iter()
        .filter(|m| m.role == "tool")
        .filter_map(|m| m.tool_call_id.clone())
        .collect();

    let mut out = Vec::with_capacity(messages.len());
    for message in messages {
        let unanswered: Vec<String> = message
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .filter(|call| !answered.contains(&call.id))
                    .map(|call| call.id.clone())
                    .collect()
            })
            .unwrap_or_default();

        out.push(message);

        for id in unanswered {
            let content = json!({
                "success": true,
                "message": SYNTHETIC_TOOL_RESULT,
            })
            .to_string();
            out.push(OpenAiMessage {
                role: "tool".to_string(),
                content: Some(content),
                tool_calls: None,
                tool_call_id: Some(id),
            });
        }
    }
    out
}

fn convert_tool(tool: AnthropicTool) -> OpenAiTool {
    OpenAiTool {
        tool_type: "function".to_string(),
        function: OpenAiFunction {
            name: tool.name,
            description: tool.description,
            parameters: tool.input_schema,
        },
    }
}

fn convert_tool_choice(choice: AnthropicToolChoice) -> OpenAiToolChoice {
    match choice {
        AnthropicToolChoice::Auto => OpenAiToolChoice::Mode("auto".to_string()),
        AnthropicToolChoice::Any => OpenAiToolChoice::Mode("required".to_string()),
        AnthropicToolChoice::Tool { name } => OpenAiToolChoice::Specific {
            choice_type: "function".to_string(),
            function: ToolChoiceFunction { name },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_request() {
        let body = json!({
            "model": "openai,gpt-4",
            "max_tokens": 1024,
            "messages": [{"role": "user", "content": "Hello"}]
        });
        let openai = convert_request(body, "gpt-4").unwrap();

        assert_eq!(openai["model"], "gpt-4");
        assert_eq!(openai["messages"][0]["role"], "user");
        assert_eq!(openai["messages"][0]["content"], "Hello");
        assert_eq!(openai["max_tokens"], 1024);
    }

    #[test]
    fn test_system_prompt_becomes_message() {
        let body = json!({
            "model": "m",
            "system": "You are helpful",
            "messages": [{"role": "user", "content": "Hello"}]
        });
        let openai = convert_request(body, "gpt-4").unwrap();

        assert_eq!(openai["messages"][0]["role"], "system");
        assert_eq!(openai["messages"][0]["content"], "You are helpful");
        assert_eq!(openai["messages"][1]["role"], "user");
    }

    #[test]
    fn test_system_blocks_joined() {
        let body = json!({
            "model": "m",
            "system": [
                {"type": "text", "text": "Line one"},
                {"type": "text", "text": "Line two"}
            ],
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let openai = convert_request(body, "gpt-4").unwrap();
        assert_eq!(openai["messages"][0]["content"], "Line one\nLine two");
    }

    #[test]
    fn test_tool_use_and_result_conversion() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "What's the weather?"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "tool_1", "name": "get_weather", "input": {"city": "London"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "tool_1", "content": "Sunny"}
                ]}
            ]
        });
        let openai = convert_request(body, "gpt-4").unwrap();

        let assistant = &openai["messages"][1];
        assert_eq!(assistant["role"], "assistant");
        assert_eq!(assistant["tool_calls"][0]["id"], "tool_1");
        assert_eq!(assistant["tool_calls"][0]["function"]["name"], "get_weather");

        let tool = &openai["messages"][2];
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "tool_1");
        assert_eq!(tool["content"], "Sunny");
    }

    #[test]
    fn test_unanswered_tool_call_gets_synthetic_result() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "user", "content": "Do the thing"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "call_1", "name": "do_thing", "input": {}}
                ]},
                {"role": "user", "content": "And now continue"}
            ]
        });
        let openai = convert_request(body, "gpt-4").unwrap();
        let messages = openai["messages"].as_array().unwrap();

        // Synthetic result sits between the assistant turn and the next user turn
        assert_eq!(messages[2]["role"], "tool");
        assert_eq!(messages[2]["tool_call_id"], "call_1");
        let content: Value =
            serde_json::from_str(messages[2]["content"].as_str().unwrap()).unwrap();
        assert_eq!(content["success"], true);
        assert_eq!(content["message"], "Tool call executed successfully");

        assert_eq!(messages[3]["role"], "user");
    }

    #[test]
    fn test_every_tool_use_has_matching_tool_message() {
        let body = json!({
            "model": "m",
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "a", "name": "t", "input": {}},
                    {"type": "tool_use", "id": "b", "name": "t", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "a", "content": "done"}
                ]}
            ]
        });
        let openai = convert_request(body, "gpt-4").unwrap();
        let messages = openai["messages"].as_array().unwrap();

        let answered: Vec<&str> = messages
            .iter()
            .filter(|m| m["role"] == "tool")
            .map(|m| m["tool_call_id"].as_str().unwrap())
            .collect();
        assert!(answered.contains(&"a"));
        assert!(answered.contains(&"b"));
    }

    #[test]
    fn test_tool_definitions_converted() {
        let body = json!({
            "model": "m",
            "tools": [{
                "name": "get_weather",
                "description": "Weather lookup",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }],
            "tool_choice": {"type": "any"},
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let openai = convert_request(body, "gpt-4").unwrap();

        assert_eq!(openai["tools"][0]["type"], "function");
        assert_eq!(openai["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(
            openai["tools"][0]["function"]["parameters"]["properties"]["city"]["type"],
            "string"
        );
        assert_eq!(openai["tool_choice"], "required");
    }

    #[test]
    fn test_thinking_blocks_dropped_and_budget_mapped() {
        let body = json!({
            "model": "m",
            "thinking": {"type": "enabled", "budget_tokens": 8000},
            "messages": [
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "answer"}
                ]},
                {"role": "user", "content": "next"}
            ]
        });
        let openai = convert_request(body, "gpt-4").unwrap();

        assert_eq!(openai["messages"][0]["content"], "answer");
        assert_eq!(openai["reasoning"]["max_tokens"], 8000);
    }

    #[test]
    fn test_stop_sequences_mapped() {
        let body = json!({
            "model": "m",
            "stop_sequences": ["END"],
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let openai = convert_request(body, "gpt-4").unwrap();
        assert_eq!(openai["stop"][0], "END");
    }

    #[test]
    fn test_idempotent_on_openai_input() {
        let body = json!({
            "model": "m",
            "system": "sys",
            "stop_sequences": ["END"],
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let once = convert_request(body, "gpt-4").unwrap();
        let twice = convert_request(once.clone(), "gpt-4").unwrap();
        assert_eq!(once, twice);
    }
}
