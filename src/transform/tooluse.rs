//! Forced tool-use mode
//!
//! Some models ignore their tools unless tool choice is forced. This stage
//! forces `tool_choice: "required"`, appends a system reminder, and injects
//! an `ExitTool` escape hatch the model can call when a plain answer is the
//! right response. On the way back, an `ExitTool` invocation is unwrapped
//! into ordinary text content.
//!
//! Runs after the format stage, so it sees the provider-native (OpenAI)
//! request and response shapes.

use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::transform::{RequestDescriptor, TransformContext, Transformer};

pub const EXIT_TOOL_NAME: &str = "ExitTool";

const SYSTEM_REMINDER: &str = "Tool mode is active: you must respond by calling one of the \
available tools. When none of the other tools fit and a direct answer is appropriate, call \
ExitTool with your answer in its response parameter.";

pub struct ToolUseTransformer;

impl Transformer for ToolUseTransformer {
    fn name(&self) -> &'static str {
        "tooluse"
    }

    fn transform_request(
        &self,
        mut desc: RequestDescriptor,
        _ctx: &TransformContext,
    ) -> Result<RequestDescriptor, GatewayError> {
        let Some(obj) = desc.body.as_object_mut() else {
            return Ok(desc);
        };

        // Append the reminder to an existing system message, or prepend one
        let mut appended = false;
        if let Some(messages) = obj.get_mut("messages").and_then(|m| m.as_array_mut()) {
            for message in messages.iter_mut() {
                if message.get("role").and_then(|r| r.as_str()) == Some("system") {
                    if let Some(content) = message.get("content").and_then(|c| c.as_str()) {
                        let combined = format!("{}\n\n{}", content, SYSTEM_REMINDER);
                        message["content"] = json!(combined);
                        appended = true;
                        break;
                    }
                }
            }
            if !appended {
                messages.insert(
                    0,
                    json!({"role": "system", "content": SYSTEM_REMINDER}),
                );
            }
        }

        // Inject the ExitTool definition
        let exit_tool = json!({
            "type": "function",
            "function": {
                "name": EXIT_TOOL_NAME,
                "description": "Exit tool mode and respond to the user directly.",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "response": {
                            "type": "string",
                            "description": "The direct answer for the user."
                        }
                    },
                    "required": ["response"]
                }
            }
        });
        match obj.get_mut("tools").and_then(|t| t.as_array_mut()) {
            Some(tools) => {
                let already_present = tools.iter().any(|t| {
                    t.pointer("/function/name").and_then(|n| n.as_str()) == Some(EXIT_TOOL_NAME)
                });
                if !already_present {
                    tools.push(exit_tool);
                }
            }
            None => {
                obj.insert("tools".to_string(), json!([exit_tool]));
            }
        }

        obj.insert("tool_choice".to_string(), json!("required"));

        Ok(desc)
    }

    fn transform_response(
        &self,
        mut body: Value,
        _ctx: &TransformContext,
    ) -> Result<Value, GatewayError> {
        let exit_arguments = body
            .pointer("/choices/0/message/tool_calls")
            .and_then(|calls| calls.as_array())
            .and_then(|calls| {
                calls.iter().find(|call| {
                    call.pointer("/function/name").and_then(|n| n.as_str())
                        == Some(EXIT_TOOL_NAME)
                })
            })
            .and_then(|call| call.pointer("/function/arguments"))
            .and_then(|a| a.as_str())
            .map(String::from);

        if let Some(arguments) = exit_arguments {
            let text = serde_json::from_str::<Value>(&arguments)
                .ok()
                .and_then(|parsed| {
                    parsed
                        .get("response")
                        .and_then(|r| r.as_str())
                        .map(String::from)
                })
                .unwrap_or(arguments);

            if let Some(message) = body
                .pointer_mut("/choices/0/message")
                .and_then(|m| m.as_object_mut())
            {
                message.insert("content".to_string(), json!(text));
                message.remove("tool_calls");
            }
            if let Some(choice) = body
                .pointer_mut("/choices/0")
                .and_then(|c| c.as_object_mut())
            {
                choice.insert("finish_reason".to_string(), json!("stop"));
            }
        }

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

    fn provider() -> Provider {
        let now = Utc::now();
        Provider {
            name: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            api_key: None,
            models: vec!["gpt-4".to_string()],
            enabled: true,
            transformers: Vec::new(),
            message_format: MessageFormat::Openai,
            auth_header: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn ctx<'a>(provider: &'a Provider, options: &'a HashMap<String, Value>) -> TransformContext<'a> {
        TransformContext {
            provider,
            model: "gpt-4",
            stream: false,
            options,
        }
    }

    #[test]
    fn test_request_injection() {
        let provider = provider();
        let options = HashMap::new();

        let body = json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "Hi"}
            ],
            "tools": [{"type": "function", "function": {"name": "search", "parameters": {}}}]
        });
        let desc = ToolUseTransformer
            .transform_request(RequestDescriptor::new(body), &ctx(&provider, &options))
            .unwrap();

        let system = desc.body["messages"][0]["content"].as_str().unwrap();
        assert!(system.starts_with("be brief"));
        assert!(system.contains("ExitTool"));

        let tools = desc.body["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[1]["function"]["name"], "ExitTool");

        assert_eq!(desc.body["tool_choice"], "required");
    }

    #[test]
    fn test_request_without_system_or_tools() {
        let provider = provider();
        let options = HashMap::new();

        let body = json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "Hi"}]
        });
        let desc = ToolUseTransformer
            .transform_request(RequestDescriptor::new(body), &ctx(&provider, &options))
            .unwrap();

        assert_eq!(desc.body["messages"][0]["role"], "system");
        assert_eq!(desc.body["tools"][0]["function"]["name"], "ExitTool");
    }

    #[test]
    fn test_exit_tool_unwrapped() {
        let provider = provider();
        let options = HashMap::new();

        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "ExitTool",
                            "arguments": "{\"response\": \"Just the answer.\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let out = ToolUseTransformer
            .transform_response(body, &ctx(&provider, &options))
            .unwrap();

        assert_eq!(out["choices"][0]["message"]["content"], "Just the answer.");
        assert!(out["choices"][0]["message"].get("tool_calls").is_none());
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
    }

    #[test]
    fn test_other_tool_calls_untouched() {
        let provider = provider();
        let options = HashMap::new();

        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "search", "arguments": "{}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let out = ToolUseTransformer
            .transform_response(body.clone(), &ctx(&provider, &options))
            .unwrap();
        assert_eq!(out, body);
    }
}
