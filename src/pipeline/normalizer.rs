//! Normalization pipeline.
//!
//! Coordinates one exchange end to end:
//! 1. Provider detection (domain, path, headers, payload)
//! 2. Model and usage extraction from provider rules
//! 3. Stream reassembly for streamed responses
//! 4. Redaction of prompt, completion and tool arguments
//! 5. Cost estimation from registry pricing
//! 6. Envelope assembly and validation
//!
//! Every call returns a `Result` for its own event only. State for an
//! exchange is keyed by correlation id and dropped once its response
//! (or abandoned stream) has been emitted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;

use crate::cost::{estimate, CostBreakdown, EstimateOptions};
use crate::error::{PipelineError, RegistryError};
use crate::events::{
    CanonicalEvent, Completeness, Confidence, EventData, EventDraft, EventEmitter, EventType,
    ModelRef, ProviderRef, RequestData, ResponseData, StreamingChunkData, ToolCallSummary,
};
use crate::extraction::{
    extract_finish_reason, extract_model, extract_request_text, extract_response_text,
    extract_tool_names, extract_usage, is_streaming_request, ModelIdentity, ModelSource,
    UsageRecord,
};
use crate::fingerprint::{detect_request, normalize_host, strip_query, DetectionResult};
use crate::logging::structured::LogContext;
use crate::pipeline::context::{CaptureContext, CapturedRequest, CapturedResponse};
use crate::registry::{RegistryHandle, RegistrySnapshot};
use crate::security::{redact, RedactionMarker, RedactionPolicy};
use crate::settings::Settings;
use crate::streaming::{AssembledResponse, MissingReason, StreamManager};
use crate::{log_info, log_warn};

/// Requests without a response are forgotten after this long.
pub const PENDING_REQUEST_TTL: Duration = Duration::from_secs(600);

/// What `on_request` learned, kept until the response arrives.
#[derive(Debug, Clone)]
struct PendingExchange {
    detection: DetectionResult,
    model: Option<ModelIdentity>,
    streaming: bool,
    started_at: DateTime<Utc>,
    context: CaptureContext,
}

/// Response-side facts common to streamed and complete responses.
struct ResponseParts {
    correlation_id: String,
    timestamp: DateTime<Utc>,
    status_code: Option<u16>,
    streaming: bool,
    response_model: Option<String>,
    usage: UsageRecord,
    finish_reason: Option<String>,
    completion: Option<RedactionMarker>,
    tool_calls: Vec<ToolCallSummary>,
    latency_ms: Option<u64>,
    time_to_first_token_ms: Option<u64>,
    chunk_count: Option<usize>,
    missing: Option<MissingReason>,
}

#[derive(Debug)]
pub struct Normalizer {
    registry: Arc<RegistryHandle>,
    streams: StreamManager,
    pending: Mutex<HashMap<String, PendingExchange>>,
    emitter: EventEmitter,
    policy: RedactionPolicy,
    emit_chunk_events: bool,
}

impl Normalizer {
    pub fn new(registry: Arc<RegistryHandle>, settings: &Settings) -> Self {
        Self::with_emitter(registry, settings, EventEmitter::new(settings.to_source()))
    }

    pub fn with_emitter(registry: Arc<RegistryHandle>, settings: &Settings, emitter: EventEmitter) -> Self {
        Self {
            registry,
            streams: StreamManager::new(settings.idle_timeout()),
            pending: Mutex::new(HashMap::new()),
            emitter,
            policy: settings.to_redaction_policy(),
            emit_chunk_events: settings.streaming.emit_chunk_events,
        }
    }

    /// Build from settings, loading the configured bundle or the built-in one.
    pub fn from_settings(settings: &Settings) -> Result<Self, RegistryError> {
        let snapshot = match &settings.registry.bundle_path {
            Some(path) => RegistrySnapshot::from_file(path)?,
            None => RegistrySnapshot::builtin()?,
        };
        let registry = Arc::new(RegistryHandle::new(snapshot, settings.registry_max_age()));
        Ok(Self::new(registry, settings))
    }

    pub fn registry(&self) -> &Arc<RegistryHandle> {
        &self.registry
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Normalize a captured request into an `ai.request` event.
    pub fn on_request(&self, request: &CapturedRequest) -> Result<CanonicalEvent, PipelineError> {
        let snapshot = self.registry.snapshot();
        let body = request.body.as_ref();
        let detection = detect_request(
            &snapshot,
            &request.host,
            &request.path,
            &request.method,
            &request.headers,
            body,
        );
        let ctx = log_context(&request.correlation_id, &detection);
        let provider = detection.provider.as_deref();

        let model = provider.and_then(|p| extract_model(&snapshot, p, body, None, Some(&request.path)));
        let streaming = is_streaming_request(body, &request.path);
        let prompt = body.map(|b| {
            let text = provider
                .and_then(|p| extract_request_text(&snapshot, p, b))
                .unwrap_or_else(|| b.to_string());
            self.redact_field(&text, "prompt", &ctx)
        });

        self.pending.lock().insert(
            request.correlation_id.clone(),
            PendingExchange {
                detection: detection.clone(),
                model: model.clone(),
                streaming,
                started_at: request.timestamp,
                context: request.context.clone(),
            },
        );

        let completeness = if prompt.is_some() {
            Completeness::Redacted
        } else {
            Completeness::MetadataOnly
        };
        let data = RequestData {
            request_id: request.correlation_id.clone(),
            provider: provider_ref(&detection),
            model: model.as_ref().map(|m| model_ref(&snapshot, Some(&m.provider), &m.id, m.source)),
            method: request.method.to_ascii_uppercase(),
            host: normalize_host(&request.host),
            path: strip_query(&request.path).to_string(),
            streaming,
            message_count: body.and_then(message_count),
            prompt,
        };

        log_info!(
            ctx,
            "REQUEST_NORMALIZED",
            confidence = detection.confidence().as_str(),
            model = model.as_ref().map(|m| m.id.as_str()).unwrap_or("unknown"),
            streaming = streaming
        );

        self.emitter.emit(
            EventDraft {
                event_type: EventType::AiRequest,
                timestamp: request.timestamp,
                confidence: Confidence::from_detection(&detection, completeness),
                data: EventData::Request(data),
                process: request.context.process.clone(),
                host: request.context.host.clone(),
                actor: request.context.actor.clone(),
                attrs: Some(request.context.attrs.clone()),
            },
            &ctx,
        )
    }

    /// Normalize a complete (non-streamed) response into an `ai.response` event.
    pub fn on_response(&self, response: &CapturedResponse) -> Result<CanonicalEvent, PipelineError> {
        let snapshot = self.registry.snapshot();
        let pending = self.pending.lock().remove(&response.correlation_id);
        let provider = pending.as_ref().and_then(|p| p.detection.provider.clone());
        let ctx = match &provider {
            Some(p) => LogContext::new(&response.correlation_id).with_provider(p),
            None => LogContext::new(&response.correlation_id),
        };

        let body = response.body.as_ref();
        let (response_model, usage, finish_reason, text, tool_names) = match (provider.as_deref(), body) {
            (Some(p), Some(b)) => (
                extract_model(&snapshot, p, None, Some(b), None).map(|m| m.id),
                extract_usage(&snapshot, p, b),
                extract_finish_reason(&snapshot, p, b),
                extract_response_text(&snapshot, p, b),
                extract_tool_names(&snapshot, p, b),
            ),
            _ => (None, UsageRecord::default(), None, None, Vec::new()),
        };

        let completion = body.map(|b| {
            let text = text.unwrap_or_else(|| b.to_string());
            self.redact_field(&text, "completion", &ctx)
        });
        let latency_ms = pending
            .as_ref()
            .map(|p| elapsed_ms(p.started_at, response.timestamp));
        let streaming = pending.as_ref().is_some_and(|p| p.streaming);

        let parts = ResponseParts {
            correlation_id: response.correlation_id.clone(),
            timestamp: response.timestamp,
            status_code: response.status_code,
            streaming,
            response_model,
            usage,
            finish_reason,
            completion,
            tool_calls: tool_names.into_iter().map(ToolCallSummary::named).collect(),
            latency_ms,
            time_to_first_token_ms: None,
            chunk_count: None,
            missing: None,
        };
        self.emit_response(&snapshot, pending, parts, Completeness::Full, &ctx)
    }

    /// Start accumulating a streamed response for `correlation_id`.
    pub fn begin_stream(&self, correlation_id: &str, started_at: DateTime<Utc>) -> Result<(), PipelineError> {
        let snapshot = self.registry.snapshot();
        let provider = self
            .pending
            .lock()
            .get(correlation_id)
            .and_then(|p| p.detection.provider.clone());
        let rules = provider
            .as_deref()
            .and_then(|p| snapshot.provider(p))
            .map(|record| &record.extraction);
        self.streams
            .open(correlation_id, provider.as_deref(), rules, started_at)?;
        Ok(())
    }

    /// Feed raw stream text. Returns `ai.streaming_chunk` events when chunk
    /// events are enabled, otherwise nothing.
    pub fn on_stream_chunk(
        &self,
        correlation_id: &str,
        raw: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<CanonicalEvent>, PipelineError> {
        let outcome = self.streams.add_chunk(correlation_id, raw, now)?;
        if !self.emit_chunk_events || outcome.deltas.is_empty() {
            return Ok(Vec::new());
        }

        let pending = self.pending.lock().get(correlation_id).cloned();
        let detection = pending
            .as_ref()
            .map(|p| p.detection.clone())
            .unwrap_or_else(DetectionResult::none);
        let context = pending.map(|p| p.context).unwrap_or_default();
        let ctx = log_context(correlation_id, &detection);

        outcome
            .deltas
            .into_iter()
            .map(|delta| {
                let marker = delta
                    .content_delta
                    .as_deref()
                    .map(|text| self.redact_field(text, "delta", &ctx));
                let completeness = if marker.is_some() {
                    Completeness::Redacted
                } else {
                    Completeness::MetadataOnly
                };
                self.emitter.emit(
                    EventDraft {
                        event_type: EventType::AiStreamingChunk,
                        timestamp: now,
                        confidence: Confidence::from_detection(&detection, completeness),
                        data: EventData::StreamingChunk(StreamingChunkData {
                            request_id: correlation_id.to_string(),
                            sequence: delta.sequence,
                            provider: detection.provider.clone(),
                            event: delta.event,
                            delta: marker,
                            finish_reason: delta.finish_reason,
                        }),
                        process: context.process.clone(),
                        host: context.host.clone(),
                        actor: context.actor.clone(),
                        attrs: Some(context.attrs.clone()),
                    },
                    &ctx,
                )
            })
            .collect()
    }

    /// Finalize a stream into one `ai.response` event.
    pub fn finish_stream(&self, correlation_id: &str, now: DateTime<Utc>) -> Result<CanonicalEvent, PipelineError> {
        let assembled = self.streams.finalize(correlation_id, now)?;
        self.emit_assembled(assembled)
    }

    /// Abandon a stream, emitting a partial `ai.response` event.
    pub fn abandon_stream(
        &self,
        correlation_id: &str,
        reason: MissingReason,
        now: DateTime<Utc>,
    ) -> Result<CanonicalEvent, PipelineError> {
        let assembled = self.streams.abandon(correlation_id, reason, now)?;
        self.emit_assembled(assembled)
    }

    /// Abandon idle streams and forget requests that never got a response.
    pub fn sweep_idle(&self, now: DateTime<Utc>) -> Vec<CanonicalEvent> {
        let events = self
            .streams
            .sweep_idle(now)
            .into_iter()
            .filter_map(|assembled| {
                let id = assembled.correlation_id.clone();
                match self.emit_assembled(assembled) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        log::warn!("{} STREAM_EVENT_DROPPED error={}", LogContext::new(&id), e);
                        None
                    }
                }
            })
            .collect();

        let ttl = chrono::Duration::from_std(PENDING_REQUEST_TTL).unwrap_or_else(|_| chrono::Duration::days(1));
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|id, exchange| now - exchange.started_at <= ttl || self.streams.contains(id));
        let expired = before - pending.len();
        if expired > 0 {
            log::debug!("PENDING_REQUESTS_EXPIRED count={}", expired);
        }

        events
    }

    fn emit_assembled(&self, assembled: AssembledResponse) -> Result<CanonicalEvent, PipelineError> {
        let snapshot = self.registry.snapshot();
        let pending = self.pending.lock().remove(&assembled.correlation_id);
        let ctx = match &assembled.provider {
            Some(p) => LogContext::new(&assembled.correlation_id).with_provider(p),
            None => LogContext::new(&assembled.correlation_id),
        };

        if assembled.malformed_chunks > 0 {
            log_warn!(
                ctx,
                "STREAM_HAD_MALFORMED_CHUNKS",
                malformed = assembled.malformed_chunks,
                chunks = assembled.chunk_count
            );
        }

        let completion = assembled
            .content
            .as_deref()
            .map(|text| self.redact_field(text, "completion", &ctx));
        let tool_calls = assembled
            .tool_calls
            .iter()
            .map(|call| {
                let arguments = (!call.arguments.is_empty())
                    .then(|| self.redact_field(&call.arguments, "tool_arguments", &ctx));
                ToolCallSummary::from_call(call, arguments)
            })
            .collect();

        let parts = ResponseParts {
            correlation_id: assembled.correlation_id.clone(),
            timestamp: assembled.ended_at,
            status_code: None,
            streaming: true,
            response_model: assembled.model.clone(),
            usage: assembled.usage,
            finish_reason: assembled.finish_reason.clone(),
            completion,
            tool_calls,
            latency_ms: Some(assembled.latency_ms),
            time_to_first_token_ms: assembled.time_to_first_token_ms,
            chunk_count: Some(assembled.chunk_count),
            missing: assembled.missing,
        };
        self.emit_response(&snapshot, pending, parts, assembled.completeness, &ctx)
    }

    fn emit_response(
        &self,
        snapshot: &RegistrySnapshot,
        pending: Option<PendingExchange>,
        parts: ResponseParts,
        captured: Completeness,
        ctx: &LogContext,
    ) -> Result<CanonicalEvent, PipelineError> {
        let (detection, request_model, context) = match pending {
            Some(p) => (p.detection, p.model, p.context),
            None => (DetectionResult::none(), None, CaptureContext::default()),
        };
        let provider = detection.provider.as_deref();

        let model = match (&request_model, &parts.response_model) {
            (Some(m), _) => Some(model_ref(snapshot, provider, &m.id, m.source)),
            (None, Some(id)) => Some(model_ref(snapshot, provider, id, ModelSource::ResponseBody)),
            (None, None) => None,
        };
        let cost = model
            .as_ref()
            .and_then(|m| self.estimate_cost(snapshot, provider?, &m.id, &parts.usage, ctx));

        let completeness = match captured {
            Completeness::Full if parts.completion.is_some() => Completeness::Redacted,
            Completeness::Full => Completeness::MetadataOnly,
            other => other,
        };

        log_info!(
            ctx,
            "RESPONSE_NORMALIZED",
            completeness = completeness.as_str(),
            model = model.as_ref().map(|m| m.id.as_str()).unwrap_or("unknown"),
            total_tokens = parts.usage.total(),
            cost = cost.as_ref().map(|c| c.total)
        );

        let data = ResponseData {
            request_id: parts.correlation_id,
            provider: provider_ref(&detection),
            model,
            status_code: parts.status_code,
            streaming: parts.streaming,
            finish_reason: parts.finish_reason,
            total_tokens: parts.usage.total(),
            usage: parts.usage,
            cost,
            latency_ms: parts.latency_ms,
            time_to_first_token_ms: parts.time_to_first_token_ms,
            chunk_count: parts.chunk_count,
            tool_calls: parts.tool_calls,
            completion: parts.completion,
            missing: parts.missing,
        };

        self.emitter.emit(
            EventDraft {
                event_type: EventType::AiResponse,
                timestamp: parts.timestamp,
                confidence: Confidence::from_detection(&detection, completeness),
                data: EventData::Response(Box::new(data)),
                process: context.process,
                host: context.host,
                actor: context.actor,
                attrs: Some(context.attrs),
            },
            ctx,
        )
    }

    fn estimate_cost(
        &self,
        snapshot: &RegistrySnapshot,
        provider: &str,
        model_id: &str,
        usage: &UsageRecord,
        ctx: &LogContext,
    ) -> Option<CostBreakdown> {
        let record = snapshot.lookup_model(provider, model_id)?;
        let rules = &snapshot.provider(provider)?.extraction.usage;
        let options = EstimateOptions::from_rules(rules).stale(self.registry.is_stale());
        let cost = estimate(record, usage, &options);
        match &cost {
            Some(c) => log::debug!(
                "{} COST_ESTIMATED model={} total={} best_effort={}",
                ctx,
                record.key(),
                c.total,
                c.best_effort
            ),
            None => log::debug!("{} COST_UNAVAILABLE model={}", ctx, record.key()),
        }
        cost
    }

    fn redact_field(&self, text: &str, field: &str, ctx: &LogContext) -> RedactionMarker {
        let marker = redact(text, &self.policy);
        if let Some(findings) = marker.findings.as_ref().filter(|f| !f.is_empty()) {
            let summary: Vec<String> = findings
                .iter()
                .map(|f| format!("{}:{}", f.category.as_str(), f.count))
                .collect();
            log::info!(
                "{} PII_DETECTED field={} findings={}",
                ctx,
                field,
                summary.join(",")
            );
        }
        marker
    }
}

fn log_context(correlation_id: &str, detection: &DetectionResult) -> LogContext {
    let ctx = LogContext::new(correlation_id);
    match &detection.provider {
        Some(provider) => ctx.with_provider(provider),
        None => ctx,
    }
}

fn provider_ref(detection: &DetectionResult) -> Option<ProviderRef> {
    Some(ProviderRef {
        name: detection.provider.clone()?,
        endpoint: detection.endpoint.as_ref().map(|e| e.template.clone()),
        request_type: detection.request_type(),
    })
}

fn model_ref(snapshot: &RegistrySnapshot, provider: Option<&str>, id: &str, source: ModelSource) -> ModelRef {
    match provider.and_then(|p| snapshot.lookup_model(p, id)) {
        Some(record) => ModelRef {
            id: id.to_string(),
            source,
            known: true,
            mode: Some(record.mode),
            deprecated: record.deprecated,
        },
        None => ModelRef {
            id: id.to_string(),
            source,
            known: false,
            mode: None,
            deprecated: false,
        },
    }
}

fn message_count(body: &Value) -> Option<usize> {
    body.get("messages")
        .or_else(|| body.get("contents"))
        .and_then(Value::as_array)
        .map(Vec::len)
}

fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    (to - from).num_milliseconds().max(0) as u64
}
