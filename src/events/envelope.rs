//! Canonical OISP event envelope.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::data::EventData;
use crate::fingerprint::{ConfidenceLevel, DetectionResult, Signal};

/// Hierarchical `category.action` event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "ai.request")]
    AiRequest,
    #[serde(rename = "ai.response")]
    AiResponse,
    #[serde(rename = "ai.streaming_chunk")]
    AiStreamingChunk,
}

impl EventType {
    pub const ALL: [EventType; 3] = [
        EventType::AiRequest,
        EventType::AiResponse,
        EventType::AiStreamingChunk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AiRequest => "ai.request",
            EventType::AiResponse => "ai.response",
            EventType::AiStreamingChunk => "ai.streaming_chunk",
        }
    }

    pub fn parse(s: &str) -> Option<EventType> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn category(&self) -> &'static str {
        "ai"
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared extent of the data captured for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    Full,
    Partial,
    MetadataOnly,
    Redacted,
    Sampled,
    VendorReported,
}

impl Completeness {
    pub const ALL: [Completeness; 6] = [
        Completeness::Full,
        Completeness::Partial,
        Completeness::MetadataOnly,
        Completeness::Redacted,
        Completeness::Sampled,
        Completeness::VendorReported,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Completeness::Full => "full",
            Completeness::Partial => "partial",
            Completeness::MetadataOnly => "metadata_only",
            Completeness::Redacted => "redacted",
            Completeness::Sampled => "sampled",
            Completeness::VendorReported => "vendor_reported",
        }
    }
}

/// Confidence block carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confidence {
    pub level: ConfidenceLevel,
    pub completeness: Completeness,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<Signal>,
}

impl Confidence {
    pub fn from_detection(detection: &DetectionResult, completeness: Completeness) -> Self {
        Self {
            level: detection.confidence(),
            completeness,
            signals: detection.signals.iter().copied().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub collector: String,
    pub capture_method: String,
    pub sensor_version: String,
}

impl Default for Source {
    fn default() -> Self {
        Self {
            collector: "oisp-normalize".to_string(),
            capture_method: "tls_intercept".to_string(),
            sensor_version: crate::NORMALIZER_VERSION.to_string(),
        }
    }
}

/// Originating process, as attributed by the capture layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

pub type ExtensionMap = BTreeMap<String, Value>;

/// The outer envelope of every emitted event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalEvent {
    pub oisp_version: String,
    pub event_id: String,
    pub event_type: EventType,
    pub timestamp: String,
    pub source: Source,
    pub confidence: Confidence,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process: Option<ProcessInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<HostInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorInfo>,
    pub data: EventData,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attrs: Option<ExtensionMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<ExtensionMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<ExtensionMap>,
}

impl CanonicalEvent {
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Correlation id of the request this event belongs to.
    pub fn request_id(&self) -> &str {
        self.data.request_id()
    }
}

/// Time-sortable unique event id (UUIDv7).
pub fn new_event_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// RFC 3339 UTC timestamp with microsecond precision.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
