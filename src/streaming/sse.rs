//! Stream framing.
//!
//! Decodes Server-Sent Events (`event:` / `data:` lines, blank-line
//! terminated, `data: [DONE]` sentinel) and newline-delimited JSON as used
//! by Ollama and some gateways. Input may arrive split at arbitrary byte
//! boundaries; incomplete lines are buffered until the next push.
//!
//! One departure from the SSE grammar: a `data:` line that is on its own a
//! complete JSON value (or `[DONE]`) is dispatched without waiting for the
//! blank line. Providers that omit the blank line are still decoded, but two
//! consecutive JSON `data:` lines become two frames instead of one
//! newline-joined payload. Data lines that only parse together (a JSON
//! document wrapped over several `data:` lines) are still joined.

use serde_json::Value;

/// One decoded unit of a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Json {
        event: Option<String>,
        payload: Value,
    },
    /// End-of-stream sentinel.
    Done,
    /// A frame that could not be decoded. Never contains the frame text.
    Malformed { reason: String },
}

#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
    /// Whether `data` parses as it stands. Updated when a data line lands.
    data_complete: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw stream text, returning every frame completed by it.
    pub fn push(&mut self, raw: &str) -> Vec<Frame> {
        self.buffer.push_str(raw);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.process_line(line.trim_end_matches(['\n', '\r']), &mut frames);
        }

        // A trailing line without newline is processed early when it is
        // already complete on its own.
        if !self.buffer.is_empty() && line_is_complete(&self.buffer) {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(line.trim_end_matches('\r'), &mut frames);
        }

        // Likewise a data event still waiting for its blank line.
        if self.pending_is_complete() {
            self.dispatch(&mut frames);
        }

        frames
    }

    /// Flush whatever is buffered at end of stream.
    pub fn finish(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(line.trim_end_matches('\r'), &mut frames);
        }
        self.dispatch(&mut frames);
        frames
    }

    fn process_line(&mut self, line: &str, frames: &mut Vec<Frame>) {
        if line.trim().is_empty() {
            self.dispatch(frames);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        if let Some(value) = field_value(line, "data") {
            if self.pending_is_complete() {
                self.dispatch(frames);
            }
            self.data.push(value.to_string());
            self.data_complete = data_is_complete(&self.data);
        } else if let Some(value) = field_value(line, "event") {
            self.event = Some(value.to_string());
        } else if field_value(line, "id").is_some() || field_value(line, "retry").is_some() {
            // Reconnection fields carry nothing we assemble
        } else {
            let trimmed = line.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                self.dispatch(frames);
                frames.push(decode_payload(None, trimmed));
            } else {
                frames.push(Frame::Malformed {
                    reason: "unrecognized line".to_string(),
                });
            }
        }
    }

    fn pending_is_complete(&self) -> bool {
        !self.data.is_empty() && self.data_complete
    }

    fn dispatch(&mut self, frames: &mut Vec<Frame>) {
        let event = self.event.take();
        if self.data.is_empty() {
            return;
        }
        let data = self.data.join("\n");
        self.data.clear();
        self.data_complete = false;

        let data = data.trim();
        if data == "[DONE]" {
            frames.push(Frame::Done);
        } else if data.is_empty() {
            // Keep-alive
        } else {
            frames.push(decode_payload(event, data));
        }
    }
}

fn decode_payload(event: Option<String>, data: &str) -> Frame {
    match serde_json::from_str::<Value>(data) {
        Ok(payload) => Frame::Json { event, payload },
        Err(e) => Frame::Malformed {
            reason: format!("invalid json at line {} column {}", e.line(), e.column()),
        },
    }
}

/// `name: value` or `name:value`, per the SSE field grammar.
fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Only text ending in `}` or `]` can be a complete payload, which keeps a
/// long frame arriving in small pieces from being re-parsed on every push.
fn is_complete_payload(data: &str) -> bool {
    let data = data.trim();
    if !(data.ends_with('}') || data.ends_with(']')) {
        return false;
    }
    data == "[DONE]" || serde_json::from_str::<Value>(data).is_ok()
}

fn data_is_complete(data: &[String]) -> bool {
    match data {
        [] => false,
        [single] => is_complete_payload(single),
        lines => is_complete_payload(&lines.join("\n")),
    }
}

fn line_is_complete(line: &str) -> bool {
    let line = line.trim();
    if line.starts_with('{') || line.starts_with('[') {
        return is_complete_payload(line);
    }
    match field_value(line, "data") {
        Some(data) => is_complete_payload(data),
        // An unterminated `event:` line may still be growing
        None => false,
    }
}
