//! Canonical token usage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extraction::json_path::{first_u64, resolve_json_path};
use crate::extraction::rules::UsageRules;

/// Token counts reported by a provider. `None` means the provider did not
/// report the field, which is different from reporting zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
}

impl UsageRecord {
    pub fn is_empty(&self) -> bool {
        self.prompt_tokens.is_none()
            && self.completion_tokens.is_none()
            && self.cached_tokens.is_none()
            && self.reasoning_tokens.is_none()
            && self.cache_write_tokens.is_none()
    }

    /// Prompt plus completion, only when both are known.
    pub fn total(&self) -> Option<u64> {
        Some(self.prompt_tokens?.saturating_add(self.completion_tokens?))
    }

    /// Field-wise merge; fields present in `later` win.
    pub fn merge(&mut self, later: &UsageRecord) {
        self.prompt_tokens = later.prompt_tokens.or(self.prompt_tokens);
        self.completion_tokens = later.completion_tokens.or(self.completion_tokens);
        self.cached_tokens = later.cached_tokens.or(self.cached_tokens);
        self.reasoning_tokens = later.reasoning_tokens.or(self.reasoning_tokens);
        self.cache_write_tokens = later.cache_write_tokens.or(self.cache_write_tokens);
    }

    /// Read usage out of a payload. The first root that yields any field wins.
    pub fn from_payload(payload: &Value, rules: &UsageRules) -> UsageRecord {
        for root in &rules.roots {
            let Some(usage) = resolve_json_path(payload, root).filter(|v| v.is_object()) else {
                continue;
            };
            let record = UsageRecord {
                prompt_tokens: first_u64(usage, &rules.prompt_tokens),
                completion_tokens: first_u64(usage, &rules.completion_tokens),
                cached_tokens: first_u64(usage, &rules.cached_tokens),
                reasoning_tokens: first_u64(usage, &rules.reasoning_tokens),
                cache_write_tokens: first_u64(usage, &rules.cache_write_tokens),
            };
            if !record.is_empty() {
                return record;
            }
        }
        UsageRecord::default()
    }
}
