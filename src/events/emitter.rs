//! Envelope assembly and validation.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::PipelineError;
use crate::events::data::EventData;
use crate::events::envelope::{
    format_timestamp, new_event_id, ActorInfo, CanonicalEvent, Confidence, EventType,
    ExtensionMap, HostInfo, ProcessInfo, Source,
};
use crate::logging::structured::LogContext;
use crate::validation::{EventValidator, SchemaValidator};

/// Everything an event needs except the fields the emitter stamps.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub confidence: Confidence,
    pub data: EventData,
    pub process: Option<ProcessInfo>,
    pub host: Option<HostInfo>,
    pub actor: Option<ActorInfo>,
    pub attrs: Option<ExtensionMap>,
}

pub struct EventEmitter {
    source: Source,
    validator: Arc<dyn SchemaValidator>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("source", &self.source)
            .field("validator", &self.validator.name())
            .finish()
    }
}

impl EventEmitter {
    pub fn new(source: Source) -> Self {
        Self::with_validator(source, Arc::new(EventValidator::default()))
    }

    pub fn with_validator(source: Source, validator: Arc<dyn SchemaValidator>) -> Self {
        Self { source, validator }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Stamp id, version and source onto `draft` and validate the result.
    pub fn emit(&self, draft: EventDraft, ctx: &LogContext) -> Result<CanonicalEvent, PipelineError> {
        let event = CanonicalEvent {
            oisp_version: crate::OISP_VERSION.to_string(),
            event_id: new_event_id(),
            event_type: draft.event_type,
            timestamp: format_timestamp(draft.timestamp),
            source: self.source.clone(),
            confidence: draft.confidence,
            process: draft.process,
            host: draft.host,
            actor: draft.actor,
            data: draft.data,
            attrs: draft.attrs.filter(|a| !a.is_empty()),
            ext: None,
            x: None,
        };

        let value = event.to_value()?;
        if let Err(e) = self.validator.validate(&value) {
            log::warn!(
                "{} EVENT_VALIDATION_FAILED event_type={} validator={} violations={}",
                ctx,
                event.event_type,
                self.validator.name(),
                e.violations.len()
            );
            return Err(e.into());
        }

        log::debug!(
            "{} EVENT_EMITTED event_type={} event_id={} level={} completeness={}",
            ctx,
            event.event_type,
            event.event_id,
            event.confidence.level.as_str(),
            event.confidence.completeness.as_str()
        );
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::events::data::StreamingChunkData;
    use crate::events::envelope::Completeness;
    use crate::fingerprint::DetectionResult;
    use serde_json::Value;

    fn draft() -> EventDraft {
        EventDraft {
            event_type: EventType::AiStreamingChunk,
            timestamp: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
            confidence: Confidence::from_detection(&DetectionResult::none(), Completeness::MetadataOnly),
            data: EventData::StreamingChunk(StreamingChunkData {
                request_id: "req-1".to_string(),
                sequence: 0,
                provider: None,
                event: None,
                delta: None,
                finish_reason: None,
            }),
            process: Some(ProcessInfo {
                pid: Some(42),
                name: Some("python3".to_string()),
                ..Default::default()
            }),
            host: None,
            actor: None,
            attrs: Some(ExtensionMap::new()),
        }
    }

    struct RejectAll;

    impl SchemaValidator for RejectAll {
        fn validate(&self, _event: &Value) -> Result<(), ValidationError> {
            Err(ValidationError {
                violations: vec!["nope".to_string()],
            })
        }

        fn name(&self) -> &str {
            "reject-all"
        }
    }

    #[test]
    fn test_emit_stamps_envelope() {
        let emitter = EventEmitter::new(Source::default());
        let event = emitter.emit(draft(), &LogContext::new("req-1")).unwrap();
        assert_eq!(event.oisp_version, crate::OISP_VERSION);
        assert_eq!(event.timestamp, "2023-11-14T22:13:20.000000Z");
        assert_eq!(event.request_id(), "req-1");

        let json = event.to_value().unwrap();
        assert_eq!(json["process"]["pid"], 42);
        assert!(json.get("attrs").is_none());
        assert!(json.get("host").is_none());
        assert_eq!(json["confidence"]["level"], "inferred");
    }

    #[test]
    fn test_validator_rejection_is_an_error() {
        let emitter = EventEmitter::with_validator(Source::default(), Arc::new(RejectAll));
        let err = emitter.emit(draft(), &LogContext::new("req-1")).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
