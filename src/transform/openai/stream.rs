//! OpenAI → Anthropic stream conversion
//!
//! The upstream delivers Chat Completions chunks as SSE
//! (`data: {delta...}`, terminated by `data: [DONE]`). The client expects
//! the Anthropic event sequence:
//!
//! ```text
//! message_start
//! (content_block_start · content_block_delta* · content_block_stop)*
//! message_delta
//! message_stop
//! ```
//!
//! The converter is an explicit state machine driven one chunk at a time
//! from a single task. Block indices start at 0, increase monotonically,
//! and are never reused; at most one block is open at a time, and a block
//! is always stopped before the next one starts.
//!
//! Special handling:
//! - `reasoning_content` fragments accumulate into a thinking block; the
//!   first non-reasoning content closes it with a trailing signature delta.
//! - Tool-call argument fragments stream as `input_json_delta` events under
//!   the tool's block.
//! - `[DONE]` terminates normally; EOF without `[DONE]` is an abnormal
//!   close that still emits `message_delta` and `message_stop`.
//! - Once terminated, no further frames are ever produced.

use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::GatewayError;
use crate::sse::{self, LineBuffer, DONE_MARKER};
use crate::transform::StreamConverter;

use super::response::{convert_finish_reason, message_id};

// ============================================================================
// Upstream Chunk Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    id: String,
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    /// DeepSeek and OpenRouter stream reasoning here
    #[serde(default, alias = "reasoning")]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

// ============================================================================
// Converter State
// ============================================================================

/// The kind and index of the currently open content block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Thinking { index: u32 },
    Text { index: u32 },
    Tool { index: u32, upstream_index: u32 },
}

impl OpenBlock {
    fn index(&self) -> u32 {
        match *self {
            OpenBlock::Thinking { index }
            | OpenBlock::Text { index }
            | OpenBlock::Tool { index, .. } => index,
        }
    }
}

/// Stateful OpenAI SSE → Anthropic SSE converter for one response stream
pub struct OpenAiStreamConverter {
    /// Model name reported in `message_start`
    model: String,
    lines: LineBuffer,
    started: bool,
    next_index: u32,
    open: Option<OpenBlock>,
    message_delta_sent: bool,
    terminated: bool,
    stop_reason: Option<&'static str>,
    input_tokens: u32,
    output_tokens: u32,
}

/// Append one framed event to the output batch
fn emit<T: serde::Serialize>(out: &mut Vec<Bytes>, event: &str, data: &T) {
    out.push(sse::format_event(event, data));
}

impl OpenAiStreamConverter {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            lines: LineBuffer::new(),
            started: false,
            next_index: 0,
            open: None,
            message_delta_sent: false,
            terminated: false,
            stop_reason: None,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    fn ensure_started(&mut self, chunk_id: &str, out: &mut Vec<Bytes>) {
        if self.started {
            return;
        }
        self.started = true;
        let payload = json!({
            "type": "message_start",
            "message": {
                "id": message_id(chunk_id),
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": self.model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0}
            }
        });
        emit(out, "message_start", &payload);
    }

    fn open_block(&mut self, block: OpenBlock, content_block: Value, out: &mut Vec<Bytes>) {
        let payload = json!({
            "type": "content_block_start",
            "index": block.index(),
            "content_block": content_block,
        });
        emit(out, "content_block_start", &payload);
        self.open = Some(block);
    }

    /// Stop whichever block is open. Thinking blocks get their signature
    /// delta appended first.
    fn close_open_block(&mut self, out: &mut Vec<Bytes>) {
        let Some(block) = self.open.take() else {
            return;
        };
        if let OpenBlock::Thinking { index } = block {
            let payload = json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "signature_delta", "signature": ""},
            });
            emit(out, "content_block_delta", &payload);
        }
        let payload = json!({
            "type": "content_block_stop",
            "index": block.index(),
        });
        emit(out, "content_block_stop", &payload);
    }

    fn take_index(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    fn handle_reasoning(&mut self, fragment: &str, out: &mut Vec<Bytes>) {
        if !matches!(self.open, Some(OpenBlock::Thinking { .. })) {
            self.close_open_block(out);
            let index = self.take_index();
            self.open_block(
                OpenBlock::Thinking { index },
                json!({"type": "thinking", "thinking": "", "signature": ""}),
                out,
            );
        }
        let index = self.open.expect("thinking block open").index();
        let payload = json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "thinking_delta", "thinking": fragment},
        });
        emit(out, "content_block_delta", &payload);
    }

    fn handle_text(&mut self, fragment: &str, out: &mut Vec<Bytes>) {
        if !matches!(self.open, Some(OpenBlock::Text { .. })) {
            self.close_open_block(out);
            let index = self.take_index();
            self.open_block(
                OpenBlock::Text { index },
                json!({"type": "text", "text": ""}),
                out,
            );
        }
        let index = self.open.expect("text block open").index();
        let payload = json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "text_delta", "text": fragment},
        });
        emit(out, "content_block_delta", &payload);
    }

    fn handle_tool_call(&mut self, call: &ToolCallDelta, out: &mut Vec<Bytes>) {
        let starts_new = call.id.is_some()
            || call
                .function
                .as_ref()
                .map(|f| f.name.is_some())
                .unwrap_or(false);

        let continues_open = matches!(
            self.open,
            Some(OpenBlock::Tool { upstream_index, .. }) if upstream_index == call.index
        );

        if starts_new && !continues_open {
            self.close_open_block(out);
            let index = self.take_index();
            let id = call.id.clone().unwrap_or_default();
            let name = call
                .function
                .as_ref()
                .and_then(|f| f.name.clone())
                .unwrap_or_default();
            self.open_block(
                OpenBlock::Tool {
                    index,
                    upstream_index: call.index,
                },
                json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
                out,
            );
        }

        if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.as_ref()) {
            if !arguments.is_empty() {
                if let Some(OpenBlock::Tool { index, upstream_index }) = self.open {
                    // Fragments for an already-closed call have nowhere to
                    // go; only the open block accepts deltas.
                    if upstream_index == call.index {
                        let payload = json!({
                            "type": "content_block_delta",
                            "index": index,
                            "delta": {"type": "input_json_delta", "partial_json": arguments},
                        });
                        emit(out, "content_block_delta", &payload);
                    }
                }
            }
        }
    }

    fn emit_message_delta(&mut self, out: &mut Vec<Bytes>) {
        if self.message_delta_sent {
            return;
        }
        self.message_delta_sent = true;
        let payload = json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": self.stop_reason.unwrap_or("end_turn"),
                "stop_sequence": null,
            },
            "usage": {
                "input_tokens": self.input_tokens,
                "output_tokens": self.output_tokens,
            },
        });
        emit(out, "message_delta", &payload);
    }

    /// Close out the stream. Safe to call more than once; only the first
    /// call produces frames.
    fn terminate(&mut self, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if !self.started {
            return;
        }
        self.close_open_block(out);
        self.emit_message_delta(out);
        let payload = json!({"type": "message_stop"});
        emit(out, "message_stop", &payload);
    }

    fn handle_data(&mut self, data: &str, out: &mut Vec<Bytes>) -> Result<(), GatewayError> {
        let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
            GatewayError::internal(format!("cannot parse upstream stream chunk: {}", e))
        })?;

        self.ensure_started(&chunk.id, out);

        if let Some(usage) = &chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        for choice in &chunk.choices {
            if let Some(reasoning) = &choice.delta.reasoning_content {
                if !reasoning.is_empty() {
                    self.handle_reasoning(reasoning, out);
                }
            }

            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    self.handle_text(content, out);
                }
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for call in tool_calls {
                    self.handle_tool_call(call, out);
                }
            }

            if let Some(finish_reason) = &choice.finish_reason {
                self.stop_reason = Some(convert_finish_reason(finish_reason));
                self.close_open_block(out);
                self.emit_message_delta(out);
            }
        }

        Ok(())
    }
}

impl StreamConverter for OpenAiStreamConverter {
    fn convert_chunk(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, GatewayError> {
        let mut out = Vec::new();
        if self.terminated {
            return Ok(out);
        }

        for line in self.lines.push(chunk) {
            if self.terminated {
                break;
            }
            let Some(payload) = sse::data_payload(&line) else {
                continue;
            };
            if payload.is_empty() {
                continue;
            }
            if payload == DONE_MARKER {
                self.terminate(&mut out);
                continue;
            }

            // One malformed frame must not kill the stream; skip it.
            let payload = payload.to_string();
            if let Err(e) = self.handle_data(&payload, &mut out) {
                tracing::warn!("skipping unparseable stream chunk: {}", e.message);
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
