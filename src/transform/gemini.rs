//! Gemini format stage
//!
//! Converts Anthropic Messages traffic to the Gemini `generateContent` API:
//! - URL is model-dependent: `:streamGenerateContent?alt=sse` when streaming,
//!   `:generateContent` otherwise
//! - Authentication uses the `x-goog-api-key` header, not a bearer token
//! - Roles map `assistant` → `model`, everything else → `user`
//! - Tool schemas are sanitized: `$schema` and `additionalProperties` are
//!   stripped, and `format` keeps only `enum` and `date-time`

use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::error::GatewayError;
use crate::sse::{self, LineBuffer};
use crate::transform::{RequestDescriptor, StreamConverter, TransformContext, Transformer};

pub struct GeminiTransformer;

impl Transformer for GeminiTransformer {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn transform_request(
        &self,
        mut desc: RequestDescriptor,
        ctx: &TransformContext,
    ) -> Result<RequestDescriptor, GatewayError> {
        desc.body = convert_request(desc.body)?;

        let action = if ctx.stream {
            "streamGenerateContent?alt=sse"
        } else {
            "generateContent"
        };
        desc.url = Some(format!(
            "{}/v1beta/models/{}:{}",
            ctx.provider.base_url, ctx.model, action
        ));

        if let Some(key) = &ctx.provider.api_key {
            desc.headers
                .push(("x-goog-api-key".to_string(), key.clone()));
        }

        Ok(desc)
    }

    fn transform_response(
        &self,
        body: Value,
        ctx: &TransformContext,
    ) -> Result<Value, GatewayError> {
        convert_response(body, ctx.model)
    }

    fn stream_converter(&self, ctx: &TransformContext) -> Option<Box<dyn StreamConverter>> {
        Some(Box::new(GeminiStreamConverter::new(ctx.model)))
    }
}

// ============================================================================
// Request Conversion
// ============================================================================

fn convert_request(body: Value) -> Result<Value, GatewayError> {
    let obj = body
        .as_object()
        .ok_or_else(|| GatewayError::invalid_request("request body must be a JSON object"))?;

    let mut out = Map::new();

    if let Some(messages) = obj.get("messages").and_then(|m| m.as_array()) {
        let contents: Vec<Value> = messages.iter().map(convert_message).collect();
        out.insert("contents".to_string(), Value::Array(contents));
    }

    if let Some(system) = obj.get("system") {
        let text = flatten_text(system);
        if !text.is_empty() {
            out.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": text}]}),
            );
        }
    }

    if let Some(tools) = obj.get("tools").and_then(|t| t.as_array()) {
        let declarations: Vec<Value> = tools
            .iter()
            .filter_map(|tool| {
                let name = tool.get("name")?.as_str()?;
                let mut declaration = Map::new();
                declaration.insert("name".to_string(), json!(name));
                if let Some(desc) = tool.get("description") {
                    declaration.insert("description".to_string(), desc.clone());
                }
                if let Some(schema) = tool.get("input_schema") {
                    declaration.insert("parameters".to_string(), sanitize_schema(schema.clone()));
                }
                Some(Value::Object(declaration))
            })
            .collect();
        if !declarations.is_empty() {
            out.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": declarations}]),
            );
        }
    }

    let mut generation = Map::new();
    if let Some(max_tokens) = obj.get("max_tokens") {
        generation.insert("maxOutputTokens".to_string(), max_tokens.clone());
    }
    if let Some(temperature) = obj.get("temperature") {
        generation.insert("temperature".to_string(), temperature.clone());
    }
    if let Some(top_p) = obj.get("top_p") {
        generation.insert("topP".to_string(), top_p.clone());
    }
    if let Some(stop) = obj.get("stop_sequences") {
        generation.insert("stopSequences".to_string(), stop.clone());
    }
    if !generation.is_empty() {
        out.insert("generationConfig".to_string(), Value::Object(generation));
    }

    Ok(Value::Object(out))
}

fn convert_message(message: &Value) -> Value {
    let role = match message.get("role").and_then(|r| r.as_str()) {
        Some("assistant") => "model",
        _ => "user",
    };

    let parts: Vec<Value> = match message.get("content") {
        Some(Value::String(text)) => vec![json!({"text": text})],
        Some(Value::Array(blocks)) => blocks.iter().filter_map(convert_block).collect(),
        _ => Vec::new(),
    };

    json!({"role": role, "parts": parts})
}

fn convert_block(block: &Value) -> Option<Value> {
    match block.get("type").and_then(|t| t.as_str())? {
        "text" => Some(json!({"text": block.get("text")?.clone()})),
        "tool_use" => Some(json!({
            "functionCall": {
                "name": block.get("name")?.clone(),
                "args": block.get("input").cloned().unwrap_or_else(|| json!({})),
            }
        })),
        "tool_result" => {
            let content = block
                .get("content")
                .map(flatten_text)
                .unwrap_or_default();
            Some(json!({
                "functionResponse": {
                    "name": block.get("tool_use_id")?.clone(),
                    "response": {"content": content},
                }
            }))
        }
        // Thinking and unknown blocks have no Gemini representation
        _ => None,
    }
}

fn flatten_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Strip the JSON Schema fields Gemini rejects
fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                match key.as_str() {
                    "$schema" | "additionalProperties" => continue,
                    "format" => {
                        // Only enum and date-time survive
                        if value.as_str() == Some("enum") || value.as_str() == Some("date-time") {
                            out.insert(key, value);
                        }
                    }
                    _ => {
                        out.insert(key, sanitize_schema(value));
                    }
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(sanitize_schema).collect())
        }
        other => other,
    }
}

// ============================================================================
// Response Conversion
// ============================================================================

fn convert_response(body: Value, model: &str) -> Result<Value, GatewayError> {
    let candidate = body
        .pointer("/candidates/0")
        .ok_or_else(|| GatewayError::internal("upstream response has no candidates"))?;

    let mut content: Vec<Value> = Vec::new();
    let mut saw_function_call = false;

    if let Some(parts) = candidate.pointer("/content/parts").and_then(|p| p.as_array()) {
        for (i, part) in parts.iter().enumerate() {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                content.push(json!({"type": "text", "text": text}));
            } else if let Some(call) = part.get("functionCall") {
                saw_function_call = true;
                content.push(json!({
                    "type": "tool_use",
                    "id": format!("toolu_{}", i),
                    "name": call.get("name").cloned().unwrap_or_else(|| json!("")),
                    "input": call.get("args").cloned().unwrap_or_else(|| json!({})),
                }));
            }
        }
    }

    let stop_reason = if saw_function_call {
        "tool_use"
    } else {
        match candidate.get("finishReason").and_then(|r| r.as_str()) {
            Some("MAX_TOKENS") => "max_tokens",
            _ => "end_turn",
        }
    };

    let input_tokens = body
        .pointer("/usageMetadata/promptTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let output_tokens = body
        .pointer("/usageMetadata/candidatesTokenCount")
        .and_then(|v| v.as_u64())
        .unwrap_or(0);

    Ok(json!({
        "id": format!("msg_{}", model.replace('/', "_")),
        "type": "message",
        "role": "assistant",
        "content": content,
        "model": model,
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
    }))
}

// ============================================================================
// Stream Conversion
// ============================================================================

/// Append one framed event to the output batch
fn emit(out: &mut Vec<Bytes>, event: &str, data: &Value) {
    out.push(sse::format_event(event, data));
}

/// Gemini SSE → Anthropic SSE
///
/// Gemini streams `GenerateContentResponse` fragments with no terminator
/// line; EOF ends the stream. Text accumulates into a single text block;
/// each functionCall arrives whole and becomes a complete tool_use block.
struct GeminiStreamConverter {
    model: String,
    lines: LineBuffer,
    started: bool,
    next_index: u32,
    text_block_open: bool,
    terminated: bool,
    output_tokens: u64,
    input_tokens: u64,
    saw_function_call: bool,
}

impl GeminiStreamConverter {
    fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            lines: LineBuffer::new(),
            started: false,
            next_index: 0,
            text_block_open: false,
            terminated: false,
            output_tokens: 0,
            input_tokens: 0,
            saw_function_call: false,
        }
    }

    fn ensure_started(&mut self, out: &mut Vec<Bytes>) {
        if self.started {
            return;
        }
        self.started = true;
        let model = self.model.clone();
        emit(
            out,
            "message_start",
            &json!({
                "type": "message_start",
                "message": {
                    "id": format!("msg_{}", model.replace('/', "_")),
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": model,
                    "stop_reason": null,
                    "stop_sequence": null,
                    "usage": {"input_tokens": 0, "output_tokens": 0}
                }
            }),
        );
    }

    fn close_text_block(&mut self, out: &mut Vec<Bytes>) {
        if !self.text_block_open {
            return;
        }
        self.text_block_open = false;
        let index = self.next_index - 1;
        emit(
            out,
            "content_block_stop",
            &json!({"type": "content_block_stop", "index": index}),
        );
    }

    fn handle_data(&mut self, data: &Value, out: &mut Vec<Bytes>) {
        self.ensure_started(out);

        if let Some(usage) = data.get("usageMetadata") {
            if let Some(n) = usage.get("promptTokenCount").and_then(|v| v.as_u64()) {
                self.input_tokens = n;
            }
            if let Some(n) = usage.get("candidatesTokenCount").and_then(|v| v.as_u64()) {
                self.output_tokens = n;
            }
        }

        let parts = data
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                if !self.text_block_open {
                    let index = self.next_index;
                    self.next_index += 1;
                    self.text_block_open = true;
                    emit(
                        out,
                        "content_block_start",
                        &json!({
                            "type": "content_block_start",
                            "index": index,
                            "content_block": {"type": "text", "text": ""},
                        }),
                    );
                }
                let index = self.next_index - 1;
                emit(
                    out,
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "text_delta", "text": text},
                    }),
                );
            } else if let Some(call) = part.get("functionCall") {
                self.close_text_block(out);
                self.saw_function_call = true;
                let index = self.next_index;
                self.next_index += 1;
                let name = call.get("name").cloned().unwrap_or_else(|| json!(""));
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                emit(
                    out,
                    "content_block_start",
                    &json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {"type": "tool_use", "id": format!("toolu_{}", index), "name": name, "input": {}},
                    }),
                );
                emit(
                    out,
                    "content_block_delta",
                    &json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {"type": "input_json_delta", "partial_json": args.to_string()},
                    }),
                );
                emit(
                    out,
                    "content_block_stop",
                    &json!({"type": "content_block_stop", "index": index}),
                );
            }
        }
    }

    fn terminate(&mut self, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if !self.started {
            return;
        }
        self.close_text_block(out);
        let stop_reason = if self.saw_function_call {
            "tool_use"
        } else {
            "end_turn"
        };
        let input_tokens = self.input_tokens;
        let output_tokens = self.output_tokens;
        emit(
            out,
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": stop_reason, "stop_sequence": null},
                "usage": {"input_tokens": input_tokens, "output_tokens": output_tokens},
            }),
        );
        emit(out, "message_stop", &json!({"type": "message_stop"}));
    }
}

impl StreamConverter for GeminiStreamConverter {
    fn convert_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, GatewayError> {
        let mut out = Vec::new();
        if self.terminated {
            return Ok(out);
        }
        for line in self.lines.push(chunk) {
            if let Some(data) = sse::parse_data_line(&line) {
                self.handle_data(&data, &mut out);
            }
        }
        Ok(out)
    }

    fn finish(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        self.terminate(&mut out);
        out
    }
}
