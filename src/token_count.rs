//! Input token estimation
//!
//! Routing thresholds need a stable estimate of the effective input size:
//! messages, system prompt, and tool definitions. The estimate uses the
//! cl100k_base BPE vocabulary so the long-context threshold does not drift
//! between releases. Non-text content (images, unknown blocks) contributes
//! via a length heuristic.
//!
//! Counting failures are non-fatal: the estimate falls back to zero and
//! routing proceeds on the default path.

use serde_json::Value;
use tiktoken_rs::cl100k_base_singleton;

/// Per-message framing overhead, matching the OpenAI chat accounting scheme
const TOKENS_PER_MESSAGE: u32 = 3;

/// Heuristic divisor for non-text content: ~4 bytes per token
const BYTES_PER_TOKEN: u32 = 4;

/// Tokenizers lazy-load on first use (~200ms); warm them outside the
/// request path.
pub fn preload() {
    let _ = cl100k_base_singleton();
}

/// Estimate the input token count of an Anthropic-format request body.
///
/// Never fails: malformed sections simply contribute nothing.
pub fn estimate_input_tokens(body: &Value) -> u32 {
    let mut total: u32 = 0;

    if let Some(messages) = body.get("messages").and_then(|m| m.as_array()) {
        for message in messages {
            total = total.saturating_add(TOKENS_PER_MESSAGE);
            if let Some(content) = message.get("content") {
                total = total.saturating_add(count_content(content));
            }
        }
    }

    if let Some(system) = body.get("system") {
        total = total.saturating_add(count_content(system));
    }

    if let Some(tools) = body.get("tools").and_then(|t| t.as_array()) {
        for tool in tools {
            if let Some(name) = tool.get("name").and_then(|n| n.as_str()) {
                total = total.saturating_add(count_text(name));
            }
            if let Some(desc) = tool.get("description").and_then(|d| d.as_str()) {
                total = total.saturating_add(count_text(desc));
            }
            if let Some(schema) = tool.get("input_schema") {
                total = total.saturating_add(count_json(schema));
            }
        }
    }

    total
}

/// Count a `content` value: plain string, or an array of content blocks
fn count_content(content: &Value) -> u32 {
    match content {
        Value::String(text) => count_text(text),
        Value::Array(blocks) => blocks.iter().map(count_block).sum(),
        _ => 0,
    }
}

/// Count a single content block by its type tag
fn count_block(block: &Value) -> u32 {
    let block_type = block.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match block_type {
        "text" => block
            .get("text")
            .and_then(|t| t.as_str())
            .map(count_text)
            .unwrap_or(0),
        "thinking" => block
            .get("thinking")
            .and_then(|t| t.as_str())
            .map(count_text)
            .unwrap_or(0),
        "tool_use" => block.get("input").map(count_json).unwrap_or(0),
        "tool_result" => block.get("content").map(count_content).unwrap_or(0),
        // Images and anything unrecognized: length heuristic over the raw JSON
        _ => heuristic(block),
    }
}

/// BPE-encode a text fragment
fn count_text(text: &str) -> u32 {
    let bpe = cl100k_base_singleton();
    bpe.encode_with_special_tokens(text).len() as u32
}

/// Count a JSON value by encoding its serialized form
fn count_json(value: &Value) -> u32 {
    match serde_json::to_string(value) {
        Ok(serialized) => count_text(&serialized),
        Err(_) => 0,
    }
}

/// Length heuristic for content the tokenizer cannot see as text
fn heuristic(value: &Value) -> u32 {
    serde_json::to_string(value)
        .map(|s| s.len() as u32 / BYTES_PER_TOKEN)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_body_counts_zero() {
        assert_eq!(estimate_input_tokens(&json!({})), 0);
    }

    #[test]
    fn test_simple_message_counts_nonzero() {
        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hello there, how are you today?"}]
        });
        let count = estimate_input_tokens(&body);
        assert!(count > TOKENS_PER_MESSAGE);
    }

    #[test]
    fn test_longer_input_counts_more() {
        let short = json!({"messages": [{"role": "user", "content": "hi"}]});
        let long = json!({"messages": [{"role": "user", "content": "hi ".repeat(500)}]});
        assert!(estimate_input_tokens(&long) > estimate_input_tokens(&short));
    }

    #[test]
    fn test_system_and_tools_contribute() {
        let base = json!({"messages": [{"role": "user", "content": "hi"}]});
        let with_system = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "system": "You are a careful assistant that explains its work."
        });
        let with_tools = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{
                "name": "get_weather",
                "description": "Look up the weather for a city",
                "input_schema": {"type": "object", "properties": {"city": {"type": "string"}}}
            }]
        });

        assert!(estimate_input_tokens(&with_system) > estimate_input_tokens(&base));
        assert!(estimate_input_tokens(&with_tools) > estimate_input_tokens(&base));
    }

    #[test]
    fn test_content_blocks_counted() {
        let body = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "describe this"},
                    {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "aGVsbG8="}}
                ]
            }]
        });
        let count = estimate_input_tokens(&body);
        // Text tokens plus the image heuristic
        assert!(count > TOKENS_PER_MESSAGE);
    }

    #[test]
    fn test_malformed_sections_ignored() {
        let body = json!({
            "messages": "not an array",
            "system": 42,
            "tools": {"not": "an array"}
        });
        assert_eq!(estimate_input_tokens(&body), 0);
    }
}
