//! NDJSON stream-event parsing for executor stdout.
//!
//! Executors emit one JSON object per line: a session-init event carrying a
//! resumable session id, assistant/content events carrying text, and a final
//! result event whose text overrides everything accumulated before it. The
//! exact schema varies between CLIs, so parsing probes fields instead of
//! deserializing a fixed shape. Non-JSON lines are ignored, never fatal.

use serde_json::Value;

/// One parsed stdout line.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Session established; `session_id` can be used with `--resume`.
    SessionInit { session_id: String },
    /// A chunk of assistant output text.
    AssistantText { text: String },
    /// Terminal result. When `text` is present it replaces accumulated text.
    Result { text: Option<String>, is_error: bool },
    /// Valid JSON we don't care about (tool calls, usage, progress).
    Other,
}

/// Parse one stdout line. Returns `None` for non-JSON lines.
pub fn parse_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;

    let event_type = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match event_type {
        "system" => {
            let subtype = value.get("subtype").and_then(|v| v.as_str()).unwrap_or("");
            if subtype == "init"
                && let Some(id) = value.get("session_id").and_then(|v| v.as_str())
            {
                return Some(StreamEvent::SessionInit {
                    session_id: id.to_string(),
                });
            }
            Some(StreamEvent::Other)
        }
        "assistant" => {
            let text = assistant_text(&value);
            if text.is_empty() {
                Some(StreamEvent::Other)
            } else {
                Some(StreamEvent::AssistantText { text })
            }
        }
        "content_block_delta" => {
            let text = value
                .get("delta")
                .and_then(|d| d.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("");
            if text.is_empty() {
                Some(StreamEvent::Other)
            } else {
                Some(StreamEvent::AssistantText {
                    text: text.to_string(),
                })
            }
        }
        "result" => Some(StreamEvent::Result {
            text: value
                .get("result")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            is_error: value
                .get("is_error")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        }),
        _ => Some(StreamEvent::Other),
    }
}

/// Pull assistant text out of `message.content[]` blocks, or a bare `text`
/// field for flatter schemas.
fn assistant_text(value: &Value) -> String {
    if let Some(blocks) = value
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    {
        let mut out = String::new();
        for block in blocks {
            if block.get("type").and_then(|t| t.as_str()) == Some("text")
                && let Some(text) = block.get("text").and_then(|t| t.as_str())
            {
                out.push_str(text);
            }
        }
        return out;
    }
    value
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .to_string()
}

/// Accumulates stream events into the final output text, enforcing the
/// output cap. Bytes beyond the cap are counted and dropped; the stream
/// itself keeps draining so the child never blocks on a full pipe.
#[derive(Debug)]
pub struct OutputAccumulator {
    cap: usize,
    text: String,
    dropped_bytes: usize,
    session_id: Option<String>,
    result_text: Option<String>,
    result_was_error: bool,
}

/// Final shape handed back to the adapter.
#[derive(Debug)]
pub struct AccumulatedOutput {
    pub text: String,
    pub session_id: Option<String>,
    pub result_was_error: bool,
    pub dropped_bytes: usize,
}

impl OutputAccumulator {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            text: String::new(),
            dropped_bytes: 0,
            session_id: None,
            result_text: None,
            result_was_error: false,
        }
    }

    /// Feed one raw stdout line.
    pub fn absorb_line(&mut self, line: &str) {
        match parse_line(line) {
            Some(StreamEvent::SessionInit { session_id }) => {
                self.session_id = Some(session_id);
            }
            Some(StreamEvent::AssistantText { text }) => {
                self.push_capped(&text);
            }
            Some(StreamEvent::Result { text, is_error }) => {
                self.result_text = text;
                self.result_was_error = is_error;
            }
            Some(StreamEvent::Other) | None => {}
        }
    }

    fn push_capped(&mut self, text: &str) {
        let remaining = self.cap.saturating_sub(self.text.len());
        if remaining == 0 {
            self.dropped_bytes += text.len();
            return;
        }
        if text.len() <= remaining {
            self.text.push_str(text);
        } else {
            let mut cut = remaining;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            self.text.push_str(&text[..cut]);
            self.dropped_bytes += text.len() - cut;
        }
    }

    pub fn finish(self) -> AccumulatedOutput {
        let mut dropped = self.dropped_bytes;
        // A terminal result event is authoritative over accumulated deltas.
        let text = match self.result_text {
            Some(result) => {
                if result.len() > self.cap {
                    let mut cut = self.cap;
                    while !result.is_char_boundary(cut) {
                        cut -= 1;
                    }
                    dropped += result.len() - cut;
                    result[..cut].to_string()
                } else {
                    result
                }
            }
            None => self.text,
        };
        AccumulatedOutput {
            text,
            session_id: self.session_id,
            result_was_error: self.result_was_error,
            dropped_bytes: dropped,
        }
    }
}
