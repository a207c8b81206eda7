//! Canonical field extraction from provider payloads.
//!
//! Every function here is a pure mapping over a provider's
//! [`ExtractionRules`]. Unknown providers yield `None` or empty results
//! rather than errors, and missing fields stay missing.

use serde::Serialize;
use serde_json::Value;

use crate::extraction::json_path::{
    concat_strings, first_string, resolve_json_path_all, value_to_bool,
};
use crate::extraction::rules::{ExtractionRules, RequestTextFormat};
use crate::extraction::usage::UsageRecord;
use crate::fingerprint::path::match_path_template;
use crate::registry::models::ProviderRecord;
use crate::registry::snapshot::RegistrySnapshot;

/// Where a model id was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSource {
    RequestBody,
    UrlPath,
    ResponseBody,
}

/// The model a request was made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelIdentity {
    pub id: String,
    pub provider: String,
    pub source: ModelSource,
}

fn rules<'a>(registry: &'a RegistrySnapshot, provider: &str) -> Option<&'a ExtractionRules> {
    registry.provider(provider).map(|p| &p.extraction)
}

/// Resolve the model id. The request body is authoritative, then the URL
/// path (Gemini, Bedrock, Azure deployments), then the response body.
pub fn extract_model(
    registry: &RegistrySnapshot,
    provider: &str,
    request_body: Option<&Value>,
    response_body: Option<&Value>,
    url_path: Option<&str>,
) -> Option<ModelIdentity> {
    let record = registry.provider(provider)?;
    let rules = &record.extraction;

    let identity = |id: String, source: ModelSource| ModelIdentity {
        id: clean_model_id(&id),
        provider: record.id.clone(),
        source,
    };

    if let Some(id) = request_body
        .and_then(|body| first_string(body, &rules.request_model_paths))
        .filter(|id| !id.is_empty())
    {
        return Some(identity(id, ModelSource::RequestBody));
    }

    if let Some(id) = url_path.and_then(|path| model_from_path(record, path)) {
        return Some(identity(id, ModelSource::UrlPath));
    }

    if let Some(id) = response_body
        .and_then(|body| first_string(body, &rules.response_model_paths))
        .filter(|id| !id.is_empty())
    {
        return Some(identity(id, ModelSource::ResponseBody));
    }

    log::debug!("MODEL_NOT_FOUND provider={}", provider);
    None
}

fn model_from_path(record: &ProviderRecord, path: &str) -> Option<String> {
    let param = record.extraction.model_path_param.as_deref()?;
    record
        .endpoints
        .iter()
        .filter_map(|endpoint| match_path_template(&endpoint.path, path))
        .find_map(|mut params| params.remove(param))
        .filter(|id| !id.is_empty())
}

/// Drop resource-name prefixes some APIs echo back (`models/gemini-1.5-pro`).
fn clean_model_id(id: &str) -> String {
    id.trim().trim_start_matches("models/").to_string()
}

/// Token usage from a complete (non-streamed) response body.
pub fn extract_usage(registry: &RegistrySnapshot, provider: &str, response_body: &Value) -> UsageRecord {
    match rules(registry, provider) {
        Some(rules) => UsageRecord::from_payload(response_body, &rules.usage),
        None => UsageRecord::default(),
    }
}

pub fn extract_finish_reason(
    registry: &RegistrySnapshot,
    provider: &str,
    response_body: &Value,
) -> Option<String> {
    first_string(response_body, &rules(registry, provider)?.finish_reason_paths)
}

/// Assistant text of a complete response.
pub fn extract_response_text(
    registry: &RegistrySnapshot,
    provider: &str,
    response_body: &Value,
) -> Option<String> {
    concat_strings(response_body, &rules(registry, provider)?.content_paths)
}

/// Names of tools the response asks to invoke, in order, without duplicates.
pub fn extract_tool_names(registry: &RegistrySnapshot, provider: &str, response_body: &Value) -> Vec<String> {
    let Some(rules) = rules(registry, provider) else {
        return Vec::new();
    };
    let mut names: Vec<String> = Vec::new();
    for path in &rules.tool_name_paths {
        for value in resolve_json_path_all(response_body, path) {
            if let Some(name) = value.as_str() {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
    }
    names
}

/// Prompt text of a request, joined with newlines.
pub fn extract_request_text(
    registry: &RegistrySnapshot,
    provider: &str,
    request_body: &Value,
) -> Option<String> {
    let format = rules(registry, provider)?.request_text;
    request_text_with_format(request_body, format)
}

pub fn request_text_with_format(body: &Value, format: RequestTextFormat) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    match format {
        RequestTextFormat::Messages => {
            collect_text(body.get("system"), &mut parts);
            for message in resolve_json_path_all(body, "messages.*") {
                collect_text(message.get("content"), &mut parts);
            }
        }
        RequestTextFormat::Contents => {
            for text in resolve_json_path_all(body, "systemInstruction.parts.*.text")
                .into_iter()
                .chain(resolve_json_path_all(body, "contents.*.parts.*.text"))
            {
                if let Some(text) = text.as_str() {
                    parts.push(text);
                }
            }
        }
        RequestTextFormat::Prompt => collect_text(body.get("prompt"), &mut parts),
        RequestTextFormat::Input => collect_text(body.get("input"), &mut parts),
        RequestTextFormat::None => return None,
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n"))
    }
}

/// Strings, arrays of strings, content blocks (`{"type": "text", "text": ..}`)
/// and message-shaped items (`{"content": ..}`).
fn collect_text<'a>(value: Option<&'a Value>, out: &mut Vec<&'a str>) {
    match value {
        Some(Value::String(s)) => out.push(s),
        Some(Value::Array(items)) => {
            for item in items {
                match item {
                    Value::String(s) => out.push(s),
                    Value::Object(obj) => {
                        if let Some(text) = obj.get("text").and_then(Value::as_str) {
                            out.push(text);
                        } else if obj.contains_key("content") {
                            collect_text(obj.get("content"), out);
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }
}

/// Whether the client asked for a streamed response.
pub fn is_streaming_request(request_body: Option<&Value>, url_path: &str) -> bool {
    if let Some(stream) = request_body.and_then(|b| b.get("stream")).and_then(value_to_bool) {
        return stream;
    }
    let (path, query) = url_path.split_once('?').unwrap_or((url_path, ""));
    path.ends_with(":streamGenerateContent")
        || path.ends_with("/invoke-with-response-stream")
        || path.ends_with("/converse-stream")
        || query.split('&').any(|kv| kv == "alt=sse")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> RegistrySnapshot {
        RegistrySnapshot::builtin().unwrap()
    }

    #[test]
    fn test_model_from_request_body() {
        let reg = registry();
        let req = json!({"model": "gpt-4o", "messages": []});
        let resp = json!({"model": "gpt-4o-2024-08-06"});
        let model = extract_model(&reg, "openai", Some(&req), Some(&resp), None).unwrap();
        assert_eq!(model.id, "gpt-4o");
        assert_eq!(model.source, ModelSource::RequestBody);
    }

    #[test]
    fn test_model_from_url_path() {
        let reg = registry();
        let req = json!({"contents": [{"parts": [{"text": "hi"}]}]});
        let model = extract_model(
            &reg,
            "google",
            Some(&req),
            None,
            Some("/v1beta/models/gemini-1.5-pro:generateContent"),
        )
        .unwrap();
        assert_eq!(model.id, "gemini-1.5-pro");
        assert_eq!(model.source, ModelSource::UrlPath);

        let model = extract_model(
            &reg,
            "azure_openai",
            Some(&json!({"messages": []})),
            None,
            Some("/openai/deployments/gpt4o-prod/chat/completions?api-version=2024-06-01"),
        )
        .unwrap();
        assert_eq!(model.id, "gpt4o-prod");
    }

    #[test]
    fn test_model_from_response_body() {
        let reg = registry();
        let resp = json!({"modelVersion": "models/gemini-2.0-flash"});
        let model = extract_model(&reg, "google", None, Some(&resp), Some("/v1beta/unknown")).unwrap();
        assert_eq!(model.id, "gemini-2.0-flash");
        assert_eq!(model.source, ModelSource::ResponseBody);
    }

    #[test]
    fn test_unknown_provider_yields_nothing() {
        let reg = registry();
        let body = json!({"model": "x", "usage": {"prompt_tokens": 1}});
        assert!(extract_model(&reg, "nobody", Some(&body), None, None).is_none());
        assert!(extract_usage(&reg, "nobody", &body).is_empty());
        assert!(extract_finish_reason(&reg, "nobody", &body).is_none());
        assert!(extract_tool_names(&reg, "nobody", &body).is_empty());
    }

    #[test]
    fn test_anthropic_usage_and_text() {
        let reg = registry();
        let resp = json!({
            "model": "claude-3-5-sonnet-20241022",
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 30, "output_tokens": 12, "cache_read_input_tokens": 20, "cache_creation_input_tokens": 5}
        });
        let usage = extract_usage(&reg, "anthropic", &resp);
        assert_eq!(usage.prompt_tokens, Some(30));
        assert_eq!(usage.completion_tokens, Some(12));
        assert_eq!(usage.cached_tokens, Some(20));
        assert_eq!(usage.cache_write_tokens, Some(5));
        assert_eq!(usage.reasoning_tokens, None);
        assert_eq!(extract_finish_reason(&reg, "anthropic", &resp).as_deref(), Some("tool_use"));
        assert_eq!(extract_response_text(&reg, "anthropic", &resp).as_deref(), Some("Let me check."));
        assert_eq!(extract_tool_names(&reg, "anthropic", &resp), vec!["get_weather"]);
    }

    #[test]
    fn test_gemini_usage_metadata() {
        let reg = registry();
        let resp = json!({
            "candidates": [{"content": {"parts": [{"text": "Hello"}, {"text": " there"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 8, "candidatesTokenCount": 2, "totalTokenCount": 10}
        });
        let usage = extract_usage(&reg, "google", &resp);
        assert_eq!(usage.prompt_tokens, Some(8));
        assert_eq!(usage.completion_tokens, Some(2));
        assert_eq!(extract_response_text(&reg, "google", &resp).as_deref(), Some("Hello there"));
        assert_eq!(extract_finish_reason(&reg, "google", &resp).as_deref(), Some("STOP"));
    }

    #[test]
    fn test_openai_tool_names() {
        let reg = registry();
        let resp = json!({
            "choices": [{"message": {"tool_calls": [
                {"function": {"name": "search"}},
                {"function": {"name": "lookup"}},
                {"function": {"name": "search"}}
            ]}, "finish_reason": "tool_calls"}]
        });
        assert_eq!(extract_tool_names(&reg, "openai", &resp), vec!["search", "lookup"]);
    }

    #[test]
    fn test_request_text_formats() {
        let body = json!({
            "system": "Be brief.",
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "user", "content": [{"type": "text", "text": "What is 2+2?"}, {"type": "image"}]}
            ]
        });
        assert_eq!(
            request_text_with_format(&body, RequestTextFormat::Messages).as_deref(),
            Some("Be brief.\nHi\nWhat is 2+2?")
        );

        let body = json!({"contents": [{"role": "user", "parts": [{"text": "Hello"}]}]});
        assert_eq!(
            request_text_with_format(&body, RequestTextFormat::Contents).as_deref(),
            Some("Hello")
        );

        let body = json!({"input": ["a", "b"]});
        assert_eq!(request_text_with_format(&body, RequestTextFormat::Input).as_deref(), Some("a\nb"));
        assert!(request_text_with_format(&body, RequestTextFormat::None).is_none());
        assert!(request_text_with_format(&json!({}), RequestTextFormat::Prompt).is_none());
    }

    #[test]
    fn test_is_streaming_request() {
        assert!(is_streaming_request(Some(&json!({"stream": true})), "/v1/chat/completions"));
        assert!(!is_streaming_request(Some(&json!({"stream": false})), "/v1/chat/completions"));
        assert!(!is_streaming_request(Some(&json!({})), "/v1/chat/completions"));
        assert!(is_streaming_request(Some(&json!({"stream": "true"})), "/v1/chat/completions"));
        assert!(!is_streaming_request(Some(&json!({"stream": 0})), "/api/chat"));
        assert!(is_streaming_request(None, "/v1beta/models/gemini-1.5-pro:streamGenerateContent?alt=sse"));
        assert!(is_streaming_request(None, "/model/m/invoke-with-response-stream"));
    }

    #[test]
    fn test_extraction_is_idempotent() {
        let reg = registry();
        let resp = json!({"model": "gpt-4o", "usage": {"prompt_tokens": 3, "completion_tokens": 4}});
        let a = (extract_model(&reg, "openai", None, Some(&resp), None), extract_usage(&reg, "openai", &resp));
        let b = (extract_model(&reg, "openai", None, Some(&resp), None), extract_usage(&reg, "openai", &resp));
        assert_eq!(a, b);
    }
}
