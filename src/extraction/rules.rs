//! Per-provider extraction rules.
//!
//! Every provider difference in request/response shape is expressed here as
//! field paths, so adding a provider is a registry data change. All fields
//! default to the OpenAI-compatible layout, which most providers share.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extraction::json_path::{concat_strings, first_string};

/// How to pull user-visible prompt text out of a request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestTextFormat {
    /// OpenAI/Anthropic style: messages[].content (string or content blocks)
    #[default]
    Messages,
    /// Gemini style: contents[].parts[].text
    Contents,
    /// Simple prompt field: prompt
    Prompt,
    /// Embedding style: input (string or array of strings)
    Input,
    /// No extraction
    None,
}

/// Shape of incremental tool-call fragments in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallFormat {
    /// choices[0].delta.tool_calls[] with index/id/function.{name,arguments}
    #[default]
    Openai,
    /// content_block_start (tool_use) + content_block_delta (input_json_delta)
    Anthropic,
    /// candidates[0].content.parts[].functionCall, delivered whole
    Gemini,
    None,
}

/// Where token counts live in a response (or stream chunk).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageRules {
    /// Candidate paths to the usage object, tried in order.
    pub roots: Vec<String>,
    /// Paths relative to the usage object.
    pub prompt_tokens: Vec<String>,
    pub completion_tokens: Vec<String>,
    pub cached_tokens: Vec<String>,
    pub reasoning_tokens: Vec<String>,
    pub cache_write_tokens: Vec<String>,
    /// Whether `cached_tokens` is a subset of `prompt_tokens`.
    pub cached_included_in_prompt: bool,
    /// Whether `reasoning_tokens` is a subset of `completion_tokens`.
    pub reasoning_included_in_completion: bool,
}

impl Default for UsageRules {
    fn default() -> Self {
        Self {
            roots: strings(&["usage"]),
            prompt_tokens: strings(&["prompt_tokens"]),
            completion_tokens: strings(&["completion_tokens"]),
            cached_tokens: strings(&["prompt_tokens_details.cached_tokens"]),
            reasoning_tokens: strings(&["completion_tokens_details.reasoning_tokens"]),
            cache_write_tokens: Vec::new(),
            cached_included_in_prompt: true,
            reasoning_included_in_completion: true,
        }
    }
}

/// Extra stream paths that apply only to chunks of one event type.
///
/// A chunk matches when its `type` field or its SSE event name equals
/// `type`. Used for streams whose event kinds reuse field names with
/// different shapes (a string `delta` in one event, an object in another).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TypedStreamRule {
    #[serde(rename = "type")]
    pub event_type: String,
    pub content_delta_paths: Vec<String>,
    pub finish_reason_paths: Vec<String>,
    pub model_paths: Vec<String>,
}

impl TypedStreamRule {
    fn matches(&self, chunk: &Value, event: Option<&str>) -> bool {
        let kind = self.event_type.as_str();
        chunk.get("type").and_then(Value::as_str) == Some(kind) || event == Some(kind)
    }
}

/// Where incremental data lives in decoded stream chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamRules {
    pub content_delta_paths: Vec<String>,
    pub finish_reason_paths: Vec<String>,
    pub model_paths: Vec<String>,
    pub tool_calls: ToolCallFormat,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub typed: Vec<TypedStreamRule>,
}

impl StreamRules {
    /// Content fragment carried by one chunk.
    pub fn content_delta(&self, chunk: &Value, event: Option<&str>) -> Option<String> {
        let mut delta = concat_strings(chunk, &self.content_delta_paths);
        for rule in self.typed.iter().filter(|r| r.matches(chunk, event)) {
            if let Some(part) = concat_strings(chunk, &rule.content_delta_paths) {
                delta.get_or_insert_with(String::new).push_str(&part);
            }
        }
        delta
    }

    /// Finish reason carried by one chunk. Typed rules win.
    pub fn finish_reason(&self, chunk: &Value, event: Option<&str>) -> Option<String> {
        self.typed
            .iter()
            .filter(|r| r.matches(chunk, event))
            .find_map(|r| first_string(chunk, &r.finish_reason_paths))
            .or_else(|| first_string(chunk, &self.finish_reason_paths))
    }

    /// Model id carried by one chunk. Typed rules win.
    pub fn model(&self, chunk: &Value, event: Option<&str>) -> Option<String> {
        self.typed
            .iter()
            .filter(|r| r.matches(chunk, event))
            .find_map(|r| first_string(chunk, &r.model_paths))
            .or_else(|| first_string(chunk, &self.model_paths))
            .filter(|m| !m.is_empty())
    }
}

impl Default for StreamRules {
    fn default() -> Self {
        Self {
            content_delta_paths: strings(&["choices.0.delta.content", "choices.0.text", "content"]),
            finish_reason_paths: strings(&["choices.0.finish_reason", "finish_reason"]),
            model_paths: strings(&["model"]),
            tool_calls: ToolCallFormat::Openai,
            typed: Vec::new(),
        }
    }
}

/// Complete extraction rule set for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionRules {
    /// Paths to the model id in the request body.
    pub request_model_paths: Vec<String>,
    /// Endpoint path placeholder carrying the model id (e.g. "deployment").
    pub model_path_param: Option<String>,
    /// Paths to the served model id in the response body.
    pub response_model_paths: Vec<String>,
    pub usage: UsageRules,
    pub finish_reason_paths: Vec<String>,
    /// Wildcard paths to response text, concatenated.
    pub content_paths: Vec<String>,
    /// Wildcard paths to tool names invoked by the response.
    pub tool_name_paths: Vec<String>,
    pub request_text: RequestTextFormat,
    pub stream: StreamRules,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            request_model_paths: strings(&["model"]),
            model_path_param: None,
            response_model_paths: strings(&["model"]),
            usage: UsageRules::default(),
            finish_reason_paths: strings(&["choices.0.finish_reason"]),
            content_paths: strings(&["choices.0.message.content", "choices.0.text"]),
            tool_name_paths: strings(&["choices.0.message.tool_calls.*.function.name"]),
            request_text: RequestTextFormat::Messages,
            stream: StreamRules::default(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
