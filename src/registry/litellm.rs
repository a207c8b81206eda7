//! Import of LiteLLM's model pricing catalog
//! (`model_prices_and_context_window.json`).
//!
//! LiteLLM prices per token; the registry prices per 1000 tokens.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::registry::models::{Capability, ModelMode, ModelPricing, ModelRecord};

/// LiteLLM capability flag -> registry capability.
const CAPABILITY_FLAGS: &[(&str, Capability)] = &[
    ("supports_vision", Capability::Vision),
    ("supports_function_calling", Capability::FunctionCalling),
    ("supports_parallel_function_calling", Capability::ParallelFunctionCalling),
    ("supports_system_messages", Capability::SystemMessages),
    ("supports_response_schema", Capability::JsonMode),
    ("supports_prompt_caching", Capability::PromptCaching),
    ("supports_reasoning", Capability::Reasoning),
    ("supports_web_search", Capability::WebSearch),
    ("supports_audio_input", Capability::AudioInput),
    ("supports_audio_output", Capability::AudioOutput),
];

/// Image size variants such as `1024-x-1024/dall-e-2`.
const SIZE_VARIANT_PREFIXES: &[&str] = &["1024-x-", "512-x-", "256-x-"];

/// Map a `litellm_provider` value onto a canonical provider id.
pub fn map_provider(litellm_provider: &str) -> String {
    let mapped = match litellm_provider {
        "gemini" => "google",
        p if p.starts_with("vertex_ai") => "google",
        p if p.starts_with("azure") => "azure_openai",
        "bedrock" | "bedrock_converse" => "aws_bedrock",
        "sagemaker" => "aws_sagemaker",
        "cohere_chat" => "cohere",
        "together_ai" => "together",
        "fireworks_ai" => "fireworks",
        "ollama_chat" => "ollama",
        "lm_studio" => "lmstudio",
        "text-completion-openai" => "openai",
        other => other,
    };
    mapped.to_string()
}

fn map_mode(mode: &str) -> Option<ModelMode> {
    match mode {
        "chat" | "responses" => Some(ModelMode::Chat),
        "completion" => Some(ModelMode::Completion),
        "embedding" => Some(ModelMode::Embedding),
        "image_generation" => Some(ModelMode::Image),
        "audio_transcription" => Some(ModelMode::AudioTranscription),
        "audio_speech" => Some(ModelMode::AudioSpeech),
        "moderation" | "moderations" => Some(ModelMode::Moderation),
        "rerank" => Some(ModelMode::Rerank),
        _ => None,
    }
}

fn per_1k(entry: &Value, field: &str) -> Option<f64> {
    entry
        .get(field)
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|per_token| (per_token * 1000.0 * 1e8).round() / 1e8)
}

/// Convert one catalog entry. Returns `None` for entries that are not
/// models or whose mode has no registry counterpart.
pub fn parse_model_entry(key: &str, entry: &Value) -> Option<ModelRecord> {
    if key == "sample_spec" || SIZE_VARIANT_PREFIXES.iter().any(|p| key.starts_with(p)) {
        return None;
    }

    let litellm_provider = entry.get("litellm_provider")?.as_str()?;
    if litellm_provider.is_empty() {
        return None;
    }
    let provider = map_provider(litellm_provider);

    let mut id = key;
    for prefix in [format!("{}/", litellm_provider), format!("{}/", provider)] {
        if let Some(stripped) = id.strip_prefix(prefix.as_str()) {
            id = stripped;
        }
    }

    let mode = match entry.get("mode").and_then(Value::as_str) {
        Some(mode) => map_mode(mode)?,
        None => ModelMode::Chat,
    };

    let max_input_tokens = entry
        .get("max_input_tokens")
        .and_then(Value::as_u64)
        .or_else(|| entry.get("max_tokens").and_then(Value::as_u64));

    let capabilities: BTreeSet<Capability> = CAPABILITY_FLAGS
        .iter()
        .filter(|(flag, _)| entry.get(*flag).and_then(Value::as_bool) == Some(true))
        .map(|(_, capability)| *capability)
        .collect();

    let deprecation_date = entry
        .get("deprecation_date")
        .and_then(Value::as_str)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    Some(ModelRecord {
        id: id.to_string(),
        provider,
        mode,
        max_input_tokens,
        max_output_tokens: entry.get("max_output_tokens").and_then(Value::as_u64),
        pricing: ModelPricing {
            input_cost_per_1k: per_1k(entry, "input_cost_per_token"),
            output_cost_per_1k: per_1k(entry, "output_cost_per_token"),
            cache_read_cost_per_1k: per_1k(entry, "cache_read_input_token_cost"),
            cache_write_cost_per_1k: per_1k(entry, "cache_creation_input_token_cost"),
            reasoning_cost_per_1k: per_1k(entry, "output_cost_per_reasoning_token"),
        },
        capabilities,
        deprecated: deprecation_date.is_some(),
        deprecation_date,
        litellm_id: Some(key.to_string()),
    })
}

/// Convert a whole catalog. Entries that fail to parse are skipped.
pub fn parse_catalog(catalog: &Value) -> Vec<ModelRecord> {
    let Some(entries) = catalog.as_object() else {
        log::warn!("LITELLM_CATALOG_INVALID reason=not_an_object");
        return Vec::new();
    };

    let models: Vec<ModelRecord> = entries
        .iter()
        .filter_map(|(key, entry)| parse_model_entry(key, entry))
        .collect();

    log::info!(
        "LITELLM_CATALOG_PARSED entries={} models={} skipped={}",
        entries.len(),
        models.len(),
        entries.len() - models.len()
    );
    models
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_entry() {
        let entry = json!({
            "litellm_provider": "openai",
            "mode": "chat",
            "max_input_tokens": 128000,
            "max_output_tokens": 16384,
            "input_cost_per_token": 0.0000025,
            "output_cost_per_token": 0.00001,
            "cache_read_input_token_cost": 0.00000125,
            "supports_vision": true,
            "supports_function_calling": true,
            "supports_reasoning": false
        });
        let model = parse_model_entry("gpt-4o", &entry).unwrap();
        assert_eq!(model.key(), "openai/gpt-4o");
        assert_eq!(model.pricing.input_cost_per_1k, Some(0.0025));
        assert_eq!(model.pricing.output_cost_per_1k, Some(0.01));
        assert_eq!(model.pricing.cache_read_cost_per_1k, Some(0.00125));
        assert_eq!(model.pricing.cache_write_cost_per_1k, None);
        assert!(model.has_capability(Capability::Vision));
        assert!(!model.has_capability(Capability::Reasoning));
        assert!(!model.deprecated);
    }

    #[test]
    fn test_provider_prefix_stripped_and_mapped() {
        let entry = json!({"litellm_provider": "gemini", "mode": "chat", "max_tokens": 8192});
        let model = parse_model_entry("gemini/gemini-1.5-pro", &entry).unwrap();
        assert_eq!(model.provider, "google");
        assert_eq!(model.id, "gemini-1.5-pro");
        assert_eq!(model.max_input_tokens, Some(8192));
        assert_eq!(model.litellm_id.as_deref(), Some("gemini/gemini-1.5-pro"));

        let entry = json!({"litellm_provider": "vertex_ai-anthropic_models"});
        assert_eq!(parse_model_entry("claude", &entry).unwrap().provider, "google");
        let entry = json!({"litellm_provider": "azure"});
        assert_eq!(
            parse_model_entry("azure/gpt-4o", &entry).unwrap().key(),
            "azure_openai/gpt-4o"
        );
    }

    #[test]
    fn test_skipped_entries() {
        let entry = json!({"litellm_provider": "openai", "mode": "image_generation"});
        assert!(parse_model_entry("sample_spec", &entry).is_none());
        assert!(parse_model_entry("1024-x-1024/dall-e-2", &entry).is_none());
        assert!(parse_model_entry("orphan", &json!({"mode": "chat"})).is_none());
        assert!(parse_model_entry(
            "video",
            &json!({"litellm_provider": "openai", "mode": "video_generation"})
        )
        .is_none());
    }

    #[test]
    fn test_image_mode_and_deprecation() {
        let entry = json!({
            "litellm_provider": "openai",
            "mode": "image_generation",
            "deprecation_date": "2025-06-01"
        });
        let model = parse_model_entry("dall-e-3", &entry).unwrap();
        assert_eq!(model.mode, ModelMode::Image);
        assert!(model.deprecated);
        assert_eq!(model.deprecation_date.as_deref(), Some("2025-06-01"));
    }

    #[test]
    fn test_parse_catalog() {
        let catalog = json!({
            "sample_spec": {"litellm_provider": "openai"},
            "gpt-4o": {"litellm_provider": "openai", "input_cost_per_token": 0.0000025},
            "claude-3-opus-20240229": {"litellm_provider": "anthropic"}
        });
        let models = parse_catalog(&catalog);
        assert_eq!(models.len(), 2);
        assert!(parse_catalog(&json!([])).is_empty());
    }
}
