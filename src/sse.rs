//! SSE framing helpers
//!
//! The gateway speaks SSE on both sides: upstream OpenAI-style chunk streams
//! (`data: {...}` lines terminated by `data: [DONE]`) and downstream
//! Anthropic event streams (`event: <type>\ndata: <json>`). These helpers
//! handle the line-level framing; event semantics live in the stream
//! converters.

use bytes::Bytes;
use serde::Serialize;
use serde_json::Value;

/// The OpenAI stream terminator payload
pub const DONE_MARKER: &str = "[DONE]";

/// Extract the payload of an SSE `data:` line, if this is one
///
/// Returns the trimmed payload, including the `[DONE]` marker. `event:`,
/// comment, and blank lines return `None`.
pub fn data_payload(line: &str) -> Option<&str> {
    line.trim_start().strip_prefix("data:").map(|d| d.trim())
}

/// Parse an SSE `data:` line into JSON
///
/// Returns `None` for non-data lines, empty payloads, `[DONE]`, and
/// unparseable JSON.
pub fn parse_data_line(line: &str) -> Option<Value> {
    let payload = data_payload(line)?;
    if payload.is_empty() || payload == DONE_MARKER {
        return None;
    }
    serde_json::from_str(payload).ok()
}

/// Serialize an Anthropic SSE frame: `event: <type>\ndata: <json>\n\n`
pub fn format_event<T: Serialize>(event_type: &str, data: &T) -> Bytes {
    let json = serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("event: {}\ndata: {}\n\n", event_type, json))
}

/// Check whether a response is an event stream by content type
pub fn is_event_stream(headers: &reqwest::header::HeaderMap) -> bool {
    headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false)
}

/// Accumulates raw bytes and yields complete lines
///
/// SSE events may be split across TCP chunks, including mid-character in
/// multi-byte UTF-8 text. Bytes are buffered raw and decoded only once a
/// full line is available, so split characters reassemble correctly.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it finishes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }

    /// Whether undelivered bytes remain after the stream ends
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_data_payload() {
        assert_eq!(data_payload("data: {\"a\":1}"), Some("{\"a\":1}"));
        assert_eq!(data_payload("data: [DONE]"), Some("[DONE]"));
        assert_eq!(data_payload("event: message_start"), None);
        assert_eq!(data_payload(""), None);
    }

    #[test]
    fn test_parse_data_line_skips_done_and_garbage() {
        assert!(parse_data_line("data: [DONE]").is_none());
        assert!(parse_data_line("data: not json").is_none());
        assert_eq!(
            parse_data_line("data: {\"x\": 1}").unwrap()["x"],
            json!(1)
        );
    }

    #[test]
    fn test_format_event_framing() {
        let frame = format_event("message_stop", &json!({"type": "message_stop"}));
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("event: message_stop\ndata: "));
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn test_line_buffer_reassembles_split_chunks() {
        let mut buffer = LineBuffer::new();

        let first = buffer.push(b"data: {\"a\"");
        assert!(first.is_empty());

        let second = buffer.push(b": 1}\ndata: [DO");
        assert_eq!(second, vec!["data: {\"a\": 1}".to_string()]);

        let third = buffer.push(b"NE]\n");
        assert_eq!(third, vec!["data: [DONE]".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_line_buffer_reassembles_split_utf8() {
        let mut buffer = LineBuffer::new();
        let text = "data: caf\u{e9}\n".as_bytes();
        // Split inside the two-byte encoding of 'é'
        let split = text.len() - 2;

        assert!(buffer.push(&text[..split]).is_empty());
        let lines = buffer.push(&text[split..]);
        assert_eq!(lines, vec!["data: café".to_string()]);
    }

    #[test]
    fn test_line_buffer_strips_carriage_returns() {
        let mut buffer = LineBuffer::new();
        let lines = buffer.push(b"data: x\r\n");
        assert_eq!(lines, vec!["data: x".to_string()]);
    }
}
