//! Event-type-specific `data` payloads.

use serde::Serialize;

use crate::cost::CostBreakdown;
use crate::extraction::{ModelIdentity, ModelSource, UsageRecord};
use crate::registry::{ModelMode, RequestType};
use crate::security::RedactionMarker;
use crate::streaming::{MissingReason, ToolCall};

/// Provider identity as detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRef {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub request_type: RequestType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRef {
    pub id: String,
    pub source: ModelSource,
    /// Whether the registry knows this model.
    pub known: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ModelMode>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub deprecated: bool,
}

impl ModelRef {
    pub fn unknown(identity: &ModelIdentity) -> Self {
        Self {
            id: identity.id.clone(),
            source: identity.source,
            known: false,
            mode: None,
            deprecated: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestData {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    pub method: String,
    pub host: String,
    pub path: String,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<RedactionMarker>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseData {
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub streaming: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(skip_serializing_if = "UsageRecord::is_empty")]
    pub usage: UsageRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_to_first_token_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_count: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<RedactionMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<MissingReason>,
}

/// Tool call with its arguments redacted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<RedactionMarker>,
}

impl ToolCallSummary {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
            arguments: None,
        }
    }

    pub fn from_call(call: &ToolCall, arguments: Option<RedactionMarker>) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamingChunkData {
    pub request_id: String,
    pub sequence: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<RedactionMarker>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EventData {
    Request(RequestData),
    Response(Box<ResponseData>),
    StreamingChunk(StreamingChunkData),
}

impl EventData {
    pub fn request_id(&self) -> &str {
        match self {
            EventData::Request(d) => &d.request_id,
            EventData::Response(d) => &d.request_id,
            EventData::StreamingChunk(d) => &d.request_id,
        }
    }
}
