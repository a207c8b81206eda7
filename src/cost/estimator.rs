//! Token usage to USD cost.
//!
//! Each dimension is priced independently. A missing price or token count
//! leaves that dimension out; it is treated as zero only when summing.

use serde::{Deserialize, Serialize};

use crate::extraction::rules::UsageRules;
use crate::extraction::usage::UsageRecord;
use crate::registry::models::ModelRecord;

pub const COST_DECIMALS: i32 = 6;
pub const CURRENCY_USD: &str = "USD";

/// How the provider's token counts overlap, and whether the pricing is fresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EstimateOptions {
    /// `cached_tokens` is a subset of `prompt_tokens`.
    pub cached_included_in_prompt: bool,
    /// `reasoning_tokens` is a subset of `completion_tokens`.
    pub reasoning_included_in_completion: bool,
    /// Pricing came from a registry snapshot older than its max age.
    pub pricing_stale: bool,
}

impl EstimateOptions {
    pub fn from_rules(rules: &UsageRules) -> Self {
        Self {
            cached_included_in_prompt: rules.cached_included_in_prompt,
            reasoning_included_in_completion: rules.reasoning_included_in_completion,
            pricing_stale: false,
        }
    }

    pub fn stale(mut self, pricing_stale: bool) -> Self {
        self.pricing_stale = pricing_stale;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<f64>,
    pub total: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub best_effort: bool,
}

/// Round to [`COST_DECIMALS`] places.
pub fn round_cost(value: f64) -> f64 {
    let factor = 10f64.powi(COST_DECIMALS);
    (value * factor).round() / factor
}

fn tokens_cost(tokens: u64, per_1k: f64) -> f64 {
    tokens as f64 * per_1k / 1000.0
}

/// Estimate the cost of `usage` on `model`.
///
/// Returns `None` when the model lacks an input or an output price, or when
/// neither prompt nor completion tokens are known.
pub fn estimate(
    model: &ModelRecord,
    usage: &UsageRecord,
    options: &EstimateOptions,
) -> Option<CostBreakdown> {
    let pricing = &model.pricing;
    let input_price = pricing.input_cost_per_1k?;
    let output_price = pricing.output_cost_per_1k?;
    if usage.prompt_tokens.is_none() && usage.completion_tokens.is_none() {
        return None;
    }

    let prompt = usage.prompt_tokens.unwrap_or(0);
    let completion = usage.completion_tokens.unwrap_or(0);
    let cached_tokens = usage.cached_tokens.unwrap_or(0);
    let reasoning_tokens = usage.reasoning_tokens.unwrap_or(0);

    let mut billable_prompt = prompt;
    let cached_raw = pricing.cache_read_cost_per_1k.map(|price| {
        if options.cached_included_in_prompt {
            billable_prompt = prompt.saturating_sub(cached_tokens);
        }
        tokens_cost(cached_tokens, price)
    });

    let mut billable_completion = completion;
    let reasoning_raw = pricing.reasoning_cost_per_1k.map(|price| {
        if options.reasoning_included_in_completion {
            billable_completion = completion.saturating_sub(reasoning_tokens);
        }
        tokens_cost(reasoning_tokens, price)
    });

    let cache_write_raw = match (pricing.cache_write_cost_per_1k, usage.cache_write_tokens) {
        (Some(price), Some(tokens)) => Some(tokens_cost(tokens, price)),
        _ => None,
    };

    let input_raw = tokens_cost(billable_prompt, input_price);
    let output_raw = tokens_cost(billable_completion, output_price);

    let total_raw = input_raw
        + output_raw
        + cached_raw.unwrap_or(0.0)
        + reasoning_raw.unwrap_or(0.0)
        + cache_write_raw.unwrap_or(0.0);

    let positive = |raw: Option<f64>| raw.map(round_cost).filter(|cost| *cost > 0.0);

    Some(CostBreakdown {
        input: round_cost(input_raw),
        output: round_cost(output_raw),
        cached: positive(cached_raw),
        reasoning: positive(reasoning_raw),
        cache_write: positive(cache_write_raw),
        total: round_cost(total_raw),
        currency: CURRENCY_USD.to_string(),
        best_effort: options.pricing_stale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn model(pricing: serde_json::Value) -> ModelRecord {
        let mut value = json!({"id": "m", "provider": "p"});
        if let (Some(obj), Some(extra)) = (value.as_object_mut(), pricing.as_object()) {
            obj.extend(extra.clone());
        }
        serde_json::from_value(value).unwrap()
    }

    fn usage(prompt: u64, completion: u64) -> UsageRecord {
        UsageRecord {
            prompt_tokens: Some(prompt),
            completion_tokens: Some(completion),
            ..Default::default()
        }
    }

    #[test]
    fn test_gpt4o_reference_values() {
        let gpt4o = model(json!({"input_cost_per_1k": 0.0025, "output_cost_per_1k": 0.01}));
        let cost = estimate(&gpt4o, &usage(1250, 89), &EstimateOptions::default()).unwrap();
        assert_eq!(cost.input, 0.003125);
        assert_eq!(cost.output, 0.00089);
        assert_eq!(cost.total, 0.004015);
        assert!(cost.cached.is_none());
        assert!(cost.reasoning.is_none());
        assert!(!cost.best_effort);
        assert_eq!(cost.currency, "USD");
    }

    #[test]
    fn test_missing_price_yields_none() {
        let embedding = model(json!({"input_cost_per_1k": 0.00002}));
        assert!(estimate(&embedding, &usage(10, 0), &EstimateOptions::default()).is_none());
        let unpriced = model(json!({}));
        assert!(estimate(&unpriced, &usage(10, 10), &EstimateOptions::default()).is_none());
    }

    #[test]
    fn test_unknown_usage_yields_none() {
        let priced = model(json!({"input_cost_per_1k": 1.0, "output_cost_per_1k": 1.0}));
        assert!(estimate(&priced, &UsageRecord::default(), &EstimateOptions::default()).is_none());
    }

    #[test]
    fn test_cached_tokens_included_in_prompt() {
        let gpt4o = model(json!({
            "input_cost_per_1k": 0.0025,
            "output_cost_per_1k": 0.01,
            "cache_read_cost_per_1k": 0.00125
        }));
        let mut record = usage(1000, 0);
        record.cached_tokens = Some(400);
        let options = EstimateOptions {
            cached_included_in_prompt: true,
            ..Default::default()
        };
        let cost = estimate(&gpt4o, &record, &options).unwrap();
        assert_eq!(cost.input, 0.0015);
        assert_eq!(cost.cached, Some(0.0005));
        assert_eq!(cost.output, 0.0);
        assert_eq!(cost.total, 0.002);
    }

    #[test]
    fn test_anthropic_cache_billing() {
        let sonnet = model(json!({
            "input_cost_per_1k": 0.003,
            "output_cost_per_1k": 0.015,
            "cache_read_cost_per_1k": 0.0003,
            "cache_write_cost_per_1k": 0.00375
        }));
        let record = UsageRecord {
            prompt_tokens: Some(100),
            completion_tokens: Some(50),
            cached_tokens: Some(1000),
            cache_write_tokens: Some(200),
            ..Default::default()
        };
        let cost = estimate(&sonnet, &record, &EstimateOptions::default()).unwrap();
        assert_eq!(cost.input, 0.0003);
        assert_eq!(cost.output, 0.00075);
        assert_eq!(cost.cached, Some(0.0003));
        assert_eq!(cost.cache_write, Some(0.00075));
        assert_eq!(cost.total, 0.0021);
    }

    #[test]
    fn test_reasoning_billed_separately_when_priced() {
        let reasoner = model(json!({
            "input_cost_per_1k": 0.001,
            "output_cost_per_1k": 0.004,
            "reasoning_cost_per_1k": 0.002
        }));
        let mut record = usage(0, 1000);
        record.reasoning_tokens = Some(500);
        let options = EstimateOptions {
            reasoning_included_in_completion: true,
            ..Default::default()
        };
        let cost = estimate(&reasoner, &record, &options).unwrap();
        assert_eq!(cost.output, 0.002);
        assert_eq!(cost.reasoning, Some(0.001));
        assert_eq!(cost.total, 0.003);
    }

    #[test]
    fn test_stale_pricing_marks_best_effort() {
        let priced = model(json!({"input_cost_per_1k": 0.001, "output_cost_per_1k": 0.002}));
        let cost = estimate(&priced, &usage(1, 1), &EstimateOptions::default().stale(true)).unwrap();
        assert!(cost.best_effort);
        let json = serde_json::to_value(&cost).unwrap();
        assert_eq!(json["best_effort"], json!(true));
    }

    #[test]
    fn test_zero_optional_costs_are_omitted() {
        let priced = model(json!({
            "input_cost_per_1k": 0.001,
            "output_cost_per_1k": 0.002,
            "cache_read_cost_per_1k": 0.0005
        }));
        let cost = estimate(&priced, &usage(10, 10), &EstimateOptions::default()).unwrap();
        assert!(cost.cached.is_none());
        let json = serde_json::to_value(&cost).unwrap();
        assert!(json.get("cached").is_none());
        assert!(json.get("best_effort").is_none());
    }
}
