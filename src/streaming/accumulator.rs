//! Per-stream accumulation and reassembly.
//!
//! A [`StreamingAccumulator`] is a three-state machine:
//!
//! ```text
//! OPEN --finalize()--> FINALIZED
//!   \
//!    --abandon()-----> ABANDONED   (idle timeout / client disconnect)
//! ```
//!
//! Chunks are stored in arrival order and only merged when the stream
//! leaves `OPEN`, so the merge always sees the complete sequence.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::StreamError;
use crate::events::Completeness;
use crate::extraction::json_path::{resolve_json_path, resolve_json_path_all};
use crate::extraction::rules::{ExtractionRules, StreamRules, ToolCallFormat, UsageRules};
use crate::extraction::usage::UsageRecord;
use crate::logging::structured::LogContext;
use crate::streaming::sse::{Frame, FrameDecoder};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Open,
    Finalized,
    Abandoned,
}

/// Why an abandoned stream is incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingReason {
    IdleTimeout,
    ClientDisconnect,
}

impl MissingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissingReason::IdleTimeout => "idle_timeout",
            MissingReason::ClientDisconnect => "client_disconnect",
        }
    }
}

/// A tool call assembled from stream fragments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    pub index: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Concatenated argument fragments (normally a JSON document).
    pub arguments: String,
}

/// What one accepted chunk contributed, for per-chunk events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkDelta {
    pub sequence: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_delta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Result of feeding raw stream text to an accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub deltas: Vec<ChunkDelta>,
    pub malformed: usize,
    pub first_chunk: bool,
    pub done: bool,
}

/// The merged view of a stream that left `OPEN`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledResponse {
    pub correlation_id: String,
    pub provider: Option<String>,
    pub state: StreamState,
    pub model: Option<String>,
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: UsageRecord,
    pub chunk_count: usize,
    pub malformed_chunks: usize,
    pub done_received: bool,
    pub started_at: DateTime<Utc>,
    pub first_chunk_at: Option<DateTime<Utc>>,
    pub ended_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub time_to_first_token_ms: Option<u64>,
    pub completeness: Completeness,
    pub missing: Option<MissingReason>,
}

#[derive(Debug)]
pub struct StreamingAccumulator {
    ctx: LogContext,
    correlation_id: String,
    provider: Option<String>,
    stream_rules: StreamRules,
    usage_rules: UsageRules,
    state: StreamState,
    decoder: FrameDecoder,
    chunks: Vec<Value>,
    events: Vec<Option<String>>,
    started_at: DateTime<Utc>,
    first_chunk_at: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
    malformed: usize,
    done: bool,
}

impl StreamingAccumulator {
    /// Open a stream. Without a known provider the OpenAI-compatible
    /// layout is assumed.
    pub fn new(
        correlation_id: &str,
        provider: Option<&str>,
        rules: Option<&ExtractionRules>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let defaults = ExtractionRules::default();
        let rules = rules.unwrap_or(&defaults);
        let ctx = match provider {
            Some(provider) => LogContext::new(correlation_id).with_provider(provider),
            None => LogContext::new(correlation_id),
        };
        Self {
            ctx,
            correlation_id: correlation_id.to_string(),
            provider: provider.map(str::to_string),
            stream_rules: rules.stream.clone(),
            usage_rules: rules.usage.clone(),
            state: StreamState::Open,
            decoder: FrameDecoder::new(),
            chunks: Vec::new(),
            events: Vec::new(),
            started_at,
            first_chunk_at: None,
            last_activity: started_at,
            malformed: 0,
            done: false,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Decoded chunks in arrival order.
    pub fn chunks(&self) -> &[Value] {
        &self.chunks
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn first_chunk_at(&self) -> Option<DateTime<Utc>> {
        self.first_chunk_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    fn ensure_open(&self) -> Result<(), StreamError> {
        if self.state == StreamState::Open {
            Ok(())
        } else {
            Err(StreamError::NotOpen {
                id: self.correlation_id.clone(),
                state: self.state,
            })
        }
    }

    /// Feed raw stream text. Malformed frames are counted and skipped.
    pub fn add_chunk(&mut self, raw: &str, now: DateTime<Utc>) -> Result<ChunkOutcome, StreamError> {
        self.ensure_open()?;
        self.last_activity = now;
        let frames = self.decoder.push(raw);
        Ok(self.accept_frames(frames, now))
    }

    /// Append an already-decoded payload (SDK hooks deliver these).
    pub fn add_payload(&mut self, payload: Value, now: DateTime<Utc>) -> Result<ChunkOutcome, StreamError> {
        self.ensure_open()?;
        self.last_activity = now;
        Ok(self.accept_frames(vec![Frame::Json { event: None, payload }], now))
    }

    fn accept_frames(&mut self, frames: Vec<Frame>, now: DateTime<Utc>) -> ChunkOutcome {
        let mut outcome = ChunkOutcome::default();
        for frame in frames {
            match frame {
                Frame::Json { event, payload } => {
                    if self.first_chunk_at.is_none() {
                        self.first_chunk_at = Some(now);
                        outcome.first_chunk = true;
                    }
                    outcome.deltas.push(ChunkDelta {
                        sequence: self.chunks.len(),
                        event: event.clone(),
                        content_delta: self.stream_rules.content_delta(&payload, event.as_deref()),
                        finish_reason: self.stream_rules.finish_reason(&payload, event.as_deref()),
                    });
                    self.chunks.push(payload);
                    self.events.push(event);
                }
                Frame::Done => {
                    self.done = true;
                    outcome.done = true;
                }
                Frame::Malformed { reason } => {
                    self.malformed += 1;
                    outcome.malformed += 1;
                    log::warn!(
                        "{} STREAM_CHUNK_MALFORMED sequence={} reason={}",
                        self.ctx,
                        self.chunks.len(),
                        reason
                    );
                }
            }
        }
        outcome
    }

    /// Whether no chunk has arrived for longer than `timeout`.
    pub fn is_idle(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now - self.last_activity > timeout,
            Err(_) => false,
        }
    }

    /// `OPEN -> FINALIZED`.
    pub fn finalize(&mut self, now: DateTime<Utc>) -> Result<AssembledResponse, StreamError> {
        self.ensure_open()?;
        let trailing = self.decoder.finish();
        self.accept_frames(trailing, now);
        self.state = StreamState::Finalized;
        Ok(self.assemble(now, Completeness::Full, None))
    }

    /// `OPEN -> ABANDONED`, keeping whatever arrived.
    pub fn abandon(
        &mut self,
        reason: MissingReason,
        now: DateTime<Utc>,
    ) -> Result<AssembledResponse, StreamError> {
        self.ensure_open()?;
        let trailing = self.decoder.finish();
        self.accept_frames(trailing, now);
        self.state = StreamState::Abandoned;
        Ok(self.assemble(now, Completeness::Partial, Some(reason)))
    }

    fn assemble(
        &self,
        now: DateTime<Utc>,
        completeness: Completeness,
        missing: Option<MissingReason>,
    ) -> AssembledResponse {
        let rules = &self.stream_rules;
        let mut content: Option<String> = None;
        let mut finish_reason = None;
        let mut model = None;
        let mut usage = UsageRecord::default();
        let mut tools = ToolCallAssembler::default();

        for (chunk, event) in self.chunks.iter().zip(self.events.iter()) {
            let event = event.as_deref();
            if let Some(delta) = rules.content_delta(chunk, event) {
                content.get_or_insert_with(String::new).push_str(&delta);
            }
            if let Some(reason) = rules.finish_reason(chunk, event) {
                finish_reason = Some(reason);
            }
            if model.is_none() {
                model = rules.model(chunk, event);
            }
            usage.merge(&UsageRecord::from_payload(chunk, &self.usage_rules));
            tools.apply(rules.tool_calls, chunk, event);
        }

        let elapsed_ms = |from: DateTime<Utc>, to: DateTime<Utc>| {
            (to - from).num_milliseconds().max(0) as u64
        };

        AssembledResponse {
            correlation_id: self.correlation_id.clone(),
            provider: self.provider.clone(),
            state: self.state,
            model,
            content,
            tool_calls: tools.finish(),
            finish_reason,
            usage,
            chunk_count: self.chunks.len(),
            malformed_chunks: self.malformed,
            done_received: self.done,
            started_at: self.started_at,
            first_chunk_at: self.first_chunk_at,
            ended_at: now,
            latency_ms: elapsed_ms(self.started_at, now),
            time_to_first_token_ms: self.first_chunk_at.map(|t| elapsed_ms(self.started_at, t)),
            completeness,
            missing,
        }
    }
}

/// Accumulates tool-call fragments keyed by index (or id when no index is
/// given). Names are set once; argument fragments are concatenated.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    calls: Vec<ToolCall>,
    by_key: HashMap<String, usize>,
}

impl ToolCallAssembler {
    fn apply(&mut self, format: ToolCallFormat, chunk: &Value, event: Option<&str>) {
        match format {
            ToolCallFormat::Openai => self.apply_openai(chunk),
            ToolCallFormat::Anthropic => self.apply_anthropic(chunk, event),
            ToolCallFormat::Gemini => self.apply_gemini(chunk),
            ToolCallFormat::None => {}
        }
    }

    fn entry(&mut self, key: String, index: u64) -> &mut ToolCall {
        let pos = match self.by_key.get(&key) {
            Some(pos) => *pos,
            None => {
                self.calls.push(ToolCall {
                    index,
                    id: None,
                    name: None,
                    arguments: String::new(),
                });
                self.by_key.insert(key, self.calls.len() - 1);
                self.calls.len() - 1
            }
        };
        &mut self.calls[pos]
    }

    fn apply_openai(&mut self, chunk: &Value) {
        for fragment in resolve_json_path_all(chunk, "choices.0.delta.tool_calls.*") {
            let id = fragment.get("id").and_then(Value::as_str);
            let index = fragment.get("index").and_then(Value::as_u64);
            let key = match (index, id) {
                (Some(index), _) => format!("idx:{}", index),
                (None, Some(id)) => format!("id:{}", id),
                (None, None) => format!("idx:{}", self.calls.len()),
            };
            let next_index = self.calls.len() as u64;
            let call = self.entry(key, index.unwrap_or(next_index));
            if call.id.is_none() {
                call.id = id.map(str::to_string);
            }
            if let Some(function) = fragment.get("function") {
                if call.name.is_none() {
                    call.name = function.get("name").and_then(Value::as_str).map(str::to_string);
                }
                if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                    call.arguments.push_str(args);
                }
            }
        }
    }

    fn apply_anthropic(&mut self, chunk: &Value, event: Option<&str>) {
        let kind = chunk.get("type").and_then(Value::as_str).or(event);
        let index = chunk.get("index").and_then(Value::as_u64).unwrap_or(0);
        match kind {
            Some("content_block_start") => {
                let Some(block) = chunk.get("content_block") else {
                    return;
                };
                if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                    return;
                }
                let call = self.entry(format!("idx:{}", index), index);
                call.id = block.get("id").and_then(Value::as_str).map(str::to_string);
                call.name = block.get("name").and_then(Value::as_str).map(str::to_string);
                if let Some(input) = block.get("input").filter(|i| i.as_object().is_some_and(|o| !o.is_empty())) {
                    call.arguments.push_str(&input.to_string());
                }
            }
            Some("content_block_delta") => {
                if resolve_json_path(chunk, "delta.type").and_then(Value::as_str) != Some("input_json_delta") {
                    return;
                }
                let key = format!("idx:{}", index);
                if !self.by_key.contains_key(&key) {
                    return;
                }
                if let Some(partial) = resolve_json_path(chunk, "delta.partial_json").and_then(Value::as_str) {
                    self.entry(key, index).arguments.push_str(partial);
                }
            }
            _ => {}
        }
    }

    fn apply_gemini(&mut self, chunk: &Value) {
        for call in resolve_json_path_all(chunk, "candidates.0.content.parts.*.functionCall") {
            let index = self.calls.len() as u64;
            let entry = self.entry(format!("idx:{}", index), index);
            entry.name = call.get("name").and_then(Value::as_str).map(str::to_string);
            entry.arguments = call.get("args").map(Value::to_string).unwrap_or_default();
        }
    }

    fn finish(self) -> Vec<ToolCall> {
        self.calls
    }
}
