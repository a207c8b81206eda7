//! Provider and model records.
//!
//! These mirror the registry bundle layout and are immutable once loaded.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::extraction::rules::ExtractionRules;

/// What kind of API call an endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Chat,
    Completion,
    Embedding,
    Image,
    AudioTranscription,
    AudioSpeech,
    Moderation,
    Rerank,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Declared endpoint of a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointRecord {
    /// Path template; `{name}` captures part of one segment.
    pub path: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub request_type: RequestType,
    #[serde(default, alias = "streaming")]
    pub streaming_capable: bool,
}

fn default_method() -> String {
    "POST".to_string()
}

/// A header that identifies a provider even when the domain is unknown
/// (self-hosted gateways, corporate proxies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderSignal {
    pub name: String,
    #[serde(default)]
    pub value_prefix: Option<String>,
}

impl HeaderSignal {
    pub fn matches(&self, value: &str) -> bool {
        match &self.value_prefix {
            Some(prefix) => value.starts_with(prefix.as_str()),
            None => true,
        }
    }
}

/// Canonical provider metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Exact hostnames or globs such as `*.openai.azure.com`.
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub endpoints: Vec<EndpointRecord>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub header_signals: Vec<HeaderSignal>,
    #[serde(default)]
    pub extraction: ExtractionRules,
}

/// Model operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ModelMode {
    #[default]
    Chat,
    Completion,
    Embedding,
    #[serde(alias = "image_generation")]
    Image,
    AudioTranscription,
    AudioSpeech,
    Moderation,
    Rerank,
}

/// Model capability flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Vision,
    FunctionCalling,
    ParallelFunctionCalling,
    SystemMessages,
    JsonMode,
    PromptCaching,
    Reasoning,
    WebSearch,
    AudioInput,
    AudioOutput,
}

/// Per-1000-token pricing in USD. Every dimension is independently optional.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ModelPricing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cost_per_1k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_cost_per_1k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_cost_per_1k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_cost_per_1k: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_cost_per_1k: Option<f64>,
}

/// Canonical model metadata, keyed by `"{provider}/{id}"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: String,
    pub provider: String,
    #[serde(default)]
    pub mode: ModelMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u64>,
    #[serde(flatten)]
    pub pricing: ModelPricing,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub capabilities: BTreeSet<Capability>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deprecation_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub litellm_id: Option<String>,
}

impl ModelRecord {
    pub fn key(&self) -> String {
        model_key(&self.provider, &self.id)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Registry key for a model.
pub fn model_key(provider: &str, model_id: &str) -> String {
    format!("{}/{}", provider, model_id)
}
