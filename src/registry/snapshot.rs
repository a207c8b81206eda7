//! Immutable, indexed registry snapshot.
//!
//! A snapshot is built once from a bundle and never mutated. Refreshing the
//! registry means building a new snapshot and swapping it in whole (see
//! [`super::handle::RegistryHandle`]).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::fingerprint::domain::{DomainCandidate, DomainIndex};
use crate::registry::models::{model_key, ModelRecord, ProviderRecord};

/// Registry bundle embedded at compile time.
const BUILTIN_BUNDLE_JSON: &str = include_str!("../../data/registry-bundle.json");

lazy_static! {
    /// Trailing release dates: -2024-08-06 or -20241022
    static ref DATE_SUFFIX: Regex = Regex::new(r"-(\d{4}-\d{2}-\d{2}|\d{8})$").unwrap();
}

/// On-disk / over-the-wire registry layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryBundle {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub bundle_version: Option<String>,
    #[serde(default)]
    pub generated_at: Option<String>,
    /// Array order is registration order.
    #[serde(default)]
    pub providers: Vec<ProviderRecord>,
    #[serde(default)]
    pub models: BTreeMap<String, ModelRecord>,
}

fn default_version() -> String {
    "0.1".to_string()
}

impl RegistryBundle {
    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Validated registry with lookup indexes.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    version: String,
    bundle_version: Option<String>,
    providers: Vec<ProviderRecord>,
    provider_index: HashMap<String, usize>,
    models: BTreeMap<String, ModelRecord>,
    domains: DomainIndex,
    loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    /// Validate and index a bundle.
    pub fn from_bundle(bundle: RegistryBundle) -> Result<Self, RegistryError> {
        let mut provider_index = HashMap::new();
        for (idx, provider) in bundle.providers.iter().enumerate() {
            if provider_index.insert(provider.id.clone(), idx).is_some() {
                return Err(RegistryError::DuplicateProvider(provider.id.clone()));
            }
        }

        for (key, model) in &bundle.models {
            if !provider_index.contains_key(&model.provider) {
                return Err(RegistryError::UnknownProvider {
                    model: key.clone(),
                    provider: model.provider.clone(),
                });
            }
            let expected = model.key();
            if *key != expected {
                return Err(RegistryError::KeyMismatch {
                    key: key.clone(),
                    expected,
                });
            }
        }

        let domains = DomainIndex::build(&bundle.providers)?;

        log::info!(
            "REGISTRY_LOADED version={} bundle_version={} providers={} models={} domain_patterns={}",
            bundle.version,
            bundle.bundle_version.as_deref().unwrap_or("none"),
            bundle.providers.len(),
            bundle.models.len(),
            domains.pattern_count()
        );

        Ok(Self {
            version: bundle.version,
            bundle_version: bundle.bundle_version,
            providers: bundle.providers,
            provider_index,
            models: bundle.models,
            domains,
            loaded_at: Utc::now(),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, RegistryError> {
        Self::from_bundle(RegistryBundle::from_json(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// The registry bundle shipped with the crate.
    pub fn builtin() -> Result<Self, RegistryError> {
        Self::from_json(BUILTIN_BUNDLE_JSON)
    }

    /// A copy of this snapshot's data with `models` merged in (overriding
    /// entries with the same key). Models for unknown providers are dropped.
    pub fn with_models<I>(&self, models: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = ModelRecord>,
    {
        let mut bundle = self.to_bundle();
        let mut dropped = 0usize;
        for model in models {
            if self.provider_index.contains_key(&model.provider) {
                bundle.models.insert(model.key(), model);
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            log::debug!("REGISTRY_MERGE_DROPPED reason=unknown_provider count={}", dropped);
        }
        Self::from_bundle(bundle)
    }

    pub fn to_bundle(&self) -> RegistryBundle {
        RegistryBundle {
            version: self.version.clone(),
            bundle_version: self.bundle_version.clone(),
            generated_at: Some(self.loaded_at.to_rfc3339()),
            providers: self.providers.clone(),
            models: self.models.clone(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn bundle_version(&self) -> Option<&str> {
        self.bundle_version.as_deref()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    /// Providers in registration order.
    pub fn providers(&self) -> &[ProviderRecord] {
        &self.providers
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderRecord> {
        self.provider_index.get(id).map(|idx| &self.providers[*idx])
    }

    pub(crate) fn provider_at(&self, idx: usize) -> Option<&ProviderRecord> {
        self.providers.get(idx)
    }

    pub(crate) fn domain_candidates(&self, host: &str) -> Vec<DomainCandidate> {
        self.domains.candidates(host)
    }

    pub fn models(&self) -> &BTreeMap<String, ModelRecord> {
        &self.models
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Look up a model: exact key, then with a trailing release date
    /// stripped, then with a `-latest` suffix stripped.
    pub fn lookup_model(&self, provider: &str, model_id: &str) -> Option<&ModelRecord> {
        if let Some(model) = self.models.get(&model_key(provider, model_id)) {
            return Some(model);
        }

        let undated = DATE_SUFFIX.replace(model_id, "");
        if undated != model_id {
            if let Some(model) = self.models.get(&model_key(provider, &undated)) {
                return Some(model);
            }
        }

        model_id
            .strip_suffix("-latest")
            .and_then(|base| self.models.get(&model_key(provider, base)))
    }

    /// Providers that list `model_id`, in registration order.
    pub fn providers_for_model(&self, model_id: &str) -> Vec<&str> {
        let owners: HashSet<&str> = self
            .models
            .values()
            .filter(|m| m.id == model_id)
            .map(|m| m.provider.as_str())
            .collect();
        self.providers
            .iter()
            .filter(|p| owners.contains(p.id.as_str()))
            .map(|p| p.id.as_str())
            .collect()
    }
}
