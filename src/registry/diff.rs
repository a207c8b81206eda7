//! Model-level differences between two registries.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::registry::models::{ModelPricing, ModelRecord};

const MAX_LISTED_ADDED: usize = 30;
const MAX_LISTED_REMOVED: usize = 20;
const MAX_LISTED_PRICING: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingChange {
    pub model: String,
    pub old: ModelPricing,
    pub new: ModelPricing,
}

/// Added, removed and repriced model keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub pricing_changes: Vec<PricingChange>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.pricing_changes.is_empty()
    }
}

/// Compare two model maps keyed by `"provider/id"`.
pub fn compare(
    old: &BTreeMap<String, ModelRecord>,
    new: &BTreeMap<String, ModelRecord>,
) -> RegistryDiff {
    let added = new
        .keys()
        .filter(|k| !old.contains_key(*k))
        .cloned()
        .collect();
    let removed = old
        .keys()
        .filter(|k| !new.contains_key(*k))
        .cloned()
        .collect();
    let pricing_changes = old
        .iter()
        .filter_map(|(key, before)| {
            let after = new.get(key)?;
            (before.pricing != after.pricing).then(|| PricingChange {
                model: key.clone(),
                old: before.pricing,
                new: after.pricing,
            })
        })
        .collect();

    RegistryDiff {
        added,
        removed,
        pricing_changes,
    }
}

fn price(value: Option<f64>) -> String {
    value
        .map(|v| format!("${:.6}", v))
        .unwrap_or_else(|| "-".to_string())
}

/// Markdown drift report.
impl fmt::Display for RegistryDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Model Registry Drift Report")?;
        if self.is_empty() {
            return writeln!(f, "\nNo changes.");
        }

        if !self.added.is_empty() {
            writeln!(f, "\n## New Models ({})\n", self.added.len())?;
            for model in self.added.iter().take(MAX_LISTED_ADDED) {
                writeln!(f, "- `{}`", model)?;
            }
            if self.added.len() > MAX_LISTED_ADDED {
                writeln!(f, "\n... and {} more models", self.added.len() - MAX_LISTED_ADDED)?;
            }
        }

        if !self.removed.is_empty() {
            writeln!(f, "\n## Removed Models ({})\n", self.removed.len())?;
            for model in self.removed.iter().take(MAX_LISTED_REMOVED) {
                writeln!(f, "- `{}`", model)?;
            }
            if self.removed.len() > MAX_LISTED_REMOVED {
                writeln!(f, "\n... and {} more models", self.removed.len() - MAX_LISTED_REMOVED)?;
            }
        }

        if !self.pricing_changes.is_empty() {
            writeln!(f, "\n## Pricing Changes ({})\n", self.pricing_changes.len())?;
            writeln!(f, "| Model | Old Input | New Input | Old Output | New Output |")?;
            writeln!(f, "|-------|-----------|-----------|------------|------------|")?;
            for change in self.pricing_changes.iter().take(MAX_LISTED_PRICING) {
                writeln!(
                    f,
                    "| `{}` | {} | {} | {} | {} |",
                    change.model,
                    price(change.old.input_cost_per_1k),
                    price(change.new.input_cost_per_1k),
                    price(change.old.output_cost_per_1k),
                    price(change.new.output_cost_per_1k)
                )?;
            }
            if self.pricing_changes.len() > MAX_LISTED_PRICING {
                writeln!(
                    f,
                    "\n... and {} more pricing changes",
                    self.pricing_changes.len() - MAX_LISTED_PRICING
                )?;
            }
        }
        Ok(())
    }
}
