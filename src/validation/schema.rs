//! Envelope validation.
//!
//! Checks a serialized event against the OISP envelope rules and the
//! required `data` fields of its event type. Field rules are data, keyed by
//! event type, so new event types only add rules.

use std::collections::HashMap;

use chrono::DateTime;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::error::ValidationError;
use crate::events::{Completeness, EventType};
use crate::extraction::json_path::resolve_json_path;
use crate::fingerprint::ConfidenceLevel;

lazy_static! {
    static ref EVENT_TYPE_FORMAT: Regex = Regex::new(r"^[a-z]+\.[a-z_]+$").unwrap();
}

/// Pluggable envelope validator.
pub trait SchemaValidator: Send + Sync {
    fn validate(&self, event: &Value) -> Result<(), ValidationError>;

    fn name(&self) -> &str;
}

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
}

impl JsonKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            JsonKind::String => value.is_string(),
            JsonKind::Integer => value.is_u64() || value.is_i64(),
            JsonKind::Number => value.is_number(),
            JsonKind::Boolean => value.is_boolean(),
            JsonKind::Object => value.is_object(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonKind::String => "string",
            JsonKind::Integer => "integer",
            JsonKind::Number => "number",
            JsonKind::Boolean => "boolean",
            JsonKind::Object => "object",
        }
    }
}

/// One field check under `data`.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub path: String,
    pub kind: JsonKind,
    pub required: bool,
}

impl FieldRule {
    pub fn required(path: &str, kind: JsonKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            required: true,
        }
    }

    pub fn optional(path: &str, kind: JsonKind) -> Self {
        Self {
            path: path.to_string(),
            kind,
            required: false,
        }
    }
}

/// Built-in validator for OISP envelopes.
#[derive(Debug, Clone)]
pub struct EventValidator {
    oisp_version: String,
    rules: HashMap<EventType, Vec<FieldRule>>,
}

impl Default for EventValidator {
    fn default() -> Self {
        Self::new(crate::OISP_VERSION)
    }
}

impl EventValidator {
    pub fn new(oisp_version: &str) -> Self {
        let mut rules = HashMap::new();
        rules.insert(
            EventType::AiRequest,
            vec![
                FieldRule::required("request_id", JsonKind::String),
                FieldRule::required("streaming", JsonKind::Boolean),
                FieldRule::required("host", JsonKind::String),
                FieldRule::optional("provider.name", JsonKind::String),
                FieldRule::optional("model.id", JsonKind::String),
                FieldRule::optional("prompt.content_hash", JsonKind::String),
            ],
        );
        rules.insert(
            EventType::AiResponse,
            vec![
                FieldRule::required("request_id", JsonKind::String),
                FieldRule::required("streaming", JsonKind::Boolean),
                FieldRule::optional("provider.name", JsonKind::String),
                FieldRule::optional("usage", JsonKind::Object),
                FieldRule::optional("cost.total", JsonKind::Number),
                FieldRule::optional("latency_ms", JsonKind::Integer),
                FieldRule::optional("completion.content_hash", JsonKind::String),
            ],
        );
        rules.insert(
            EventType::AiStreamingChunk,
            vec![
                FieldRule::required("request_id", JsonKind::String),
                FieldRule::required("sequence", JsonKind::Integer),
            ],
        );
        Self {
            oisp_version: oisp_version.to_string(),
            rules,
        }
    }

    /// Add a rule for `event_type`.
    pub fn with_rule(mut self, event_type: EventType, rule: FieldRule) -> Self {
        self.rules.entry(event_type).or_default().push(rule);
        self
    }

    fn check_envelope(&self, event: &Value, violations: &mut Vec<String>) -> Option<EventType> {
        match event.get("oisp_version").and_then(Value::as_str) {
            Some(v) if v == self.oisp_version => {}
            Some(v) => violations.push(format!(
                "oisp_version '{}' is not '{}'",
                v, self.oisp_version
            )),
            None => violations.push("oisp_version missing".to_string()),
        }

        match event.get("event_id").and_then(Value::as_str) {
            Some(id) if !id.trim().is_empty() => {}
            _ => violations.push("event_id missing or empty".to_string()),
        }

        match event.get("timestamp").and_then(Value::as_str) {
            Some(ts) if DateTime::parse_from_rfc3339(ts).is_ok() => {}
            Some(_) => violations.push("timestamp is not RFC 3339".to_string()),
            None => violations.push("timestamp missing".to_string()),
        }

        match event.pointer("/source/collector").and_then(Value::as_str) {
            Some(c) if !c.is_empty() => {}
            _ => violations.push("source.collector missing".to_string()),
        }

        check_vocabulary(
            event.pointer("/confidence/level"),
            "confidence.level",
            &[
                ConfidenceLevel::High,
                ConfidenceLevel::Medium,
                ConfidenceLevel::Low,
                ConfidenceLevel::Inferred,
            ]
            .map(|l| l.as_str()),
            violations,
        );
        check_vocabulary(
            event.pointer("/confidence/completeness"),
            "confidence.completeness",
            &Completeness::ALL.map(|c| c.as_str()),
            violations,
        );

        if !event.get("data").is_some_and(Value::is_object) {
            violations.push("data must be an object".to_string());
        }

        match event.get("event_type").and_then(Value::as_str) {
            Some(t) if !EVENT_TYPE_FORMAT.is_match(t) => {
                violations.push(format!("event_type '{}' is not category.action", t));
                None
            }
            Some(t) => {
                let parsed = EventType::parse(t);
                if parsed.is_none() {
                    violations.push(format!("event_type '{}' is not a known type", t));
                }
                parsed
            }
            None => {
                violations.push("event_type missing".to_string());
                None
            }
        }
    }

    fn check_data(&self, event_type: EventType, data: &Value, violations: &mut Vec<String>) {
        let Some(rules) = self.rules.get(&event_type) else {
            return;
        };
        for rule in rules {
            match resolve_json_path(data, &rule.path) {
                Some(Value::Null) | None if rule.required => {
                    violations.push(format!("data.{} is required", rule.path));
                }
                Some(Value::Null) | None => {}
                Some(value) if !rule.kind.matches(value) => violations.push(format!(
                    "data.{} must be {}",
                    rule.path,
                    rule.kind.as_str()
                )),
                Some(_) => {}
            }
        }
    }
}

fn check_vocabulary(value: Option<&Value>, field: &str, allowed: &[&str], violations: &mut Vec<String>) {
    match value.and_then(Value::as_str) {
        Some(v) if allowed.contains(&v) => {}
        Some(v) => violations.push(format!("{} '{}' not in {:?}", field, v, allowed)),
        None => violations.push(format!("{} missing", field)),
    }
}

impl SchemaValidator for EventValidator {
    fn validate(&self, event: &Value) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        let event_type = self.check_envelope(event, &mut violations);
        if let (Some(event_type), Some(data)) = (event_type, event.get("data")) {
            self.check_data(event_type, data, &mut violations);
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { violations })
        }
    }

    fn name(&self) -> &str {
        "oisp-envelope"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_event() -> Value {
        json!({
            "oisp_version": "0.1",
            "event_id": "0190b0a4-0000-7000-8000-000000000000",
            "event_type": "ai.response",
            "timestamp": "2024-07-01T12:00:00.000000Z",
            "source": {"collector": "oisp-normalize", "capture_method": "tls_intercept", "sensor_version": "0.1.0"},
            "confidence": {"level": "high", "completeness": "redacted"},
            "data": {"request_id": "req-1", "streaming": false, "latency_ms": 120}
        })
    }

    #[test]
    fn test_valid_event_passes() {
        assert!(EventValidator::default().validate(&valid_event()).is_ok());
    }

    #[test]
    fn test_envelope_violations_are_collected() {
        let mut event = valid_event();
        event["oisp_version"] = json!("9.9");
        event["timestamp"] = json!("yesterday");
        event["confidence"]["level"] = json!("certain");
        let err = EventValidator::default().validate(&event).unwrap_err();
        assert_eq!(err.violations.len(), 3);
    }

    #[test]
    fn test_unknown_event_type() {
        let mut event = valid_event();
        event["event_type"] = json!("ai.telepathy");
        let err = EventValidator::default().validate(&event).unwrap_err();
        assert!(err.violations[0].contains("not a known type"));

        event["event_type"] = json!("AiResponse");
        let err = EventValidator::default().validate(&event).unwrap_err();
        assert!(err.violations[0].contains("category.action"));
    }

    #[test]
    fn test_data_field_rules() {
        let mut event = valid_event();
        event["data"] = json!({"streaming": "no", "latency_ms": 1.5});
        let err = EventValidator::default().validate(&event).unwrap_err();
        assert_eq!(
            err.violations,
            vec![
                "data.request_id is required".to_string(),
                "data.streaming must be boolean".to_string(),
                "data.latency_ms must be integer".to_string(),
            ]
        );
    }

    #[test]
    fn test_custom_rule() {
        let validator = EventValidator::default()
            .with_rule(EventType::AiResponse, FieldRule::required("status_code", JsonKind::Integer));
        let err = validator.validate(&valid_event()).unwrap_err();
        assert_eq!(err.violations, vec!["data.status_code is required".to_string()]);
    }
}
