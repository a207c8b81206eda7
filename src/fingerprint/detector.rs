//! Provider detection from connection metadata.
//!
//! Priority order:
//! 1. Domain match (most specific pattern first, then registration order)
//! 2. Path + method match among the domain candidates
//! 3. Domain-only match with an unknown request type
//! 4. Provider-unique header signals when no domain matched

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

use crate::extraction::json_path::first_string;
use crate::fingerprint::confidence::{ConfidenceLevel, Signal};
use crate::fingerprint::path::match_path_template;
use crate::registry::models::{ProviderRecord, RequestType};
use crate::registry::snapshot::RegistrySnapshot;

/// HTTP headers in capture order. Lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Headers(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// The declared endpoint a request matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointMatch {
    pub template: String,
    pub method: String,
    pub request_type: RequestType,
    pub streaming_capable: bool,
    /// Values captured by `{name}` placeholders in the template.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

/// Outcome of provider detection. Confidence is always derived from
/// `signals` and never stored separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionResult {
    pub provider: Option<String>,
    pub endpoint: Option<EndpointMatch>,
    pub signals: BTreeSet<Signal>,
}

impl DetectionResult {
    /// No provider detected.
    pub fn none() -> Self {
        Self {
            provider: None,
            endpoint: None,
            signals: BTreeSet::new(),
        }
    }

    pub fn confidence(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_signals(&self.signals)
    }

    pub fn request_type(&self) -> RequestType {
        self.endpoint
            .as_ref()
            .map(|e| e.request_type)
            .unwrap_or(RequestType::Unknown)
    }

    pub fn streaming_capable(&self) -> bool {
        self.endpoint.as_ref().is_some_and(|e| e.streaming_capable)
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.endpoint
            .as_ref()
            .and_then(|e| e.params.get(name))
            .map(String::as_str)
    }

    pub fn signal_names(&self) -> Vec<&'static str> {
        self.signals.iter().map(Signal::as_str).collect()
    }
}

/// Detect the provider for a request from connection metadata alone.
pub fn detect(
    registry: &RegistrySnapshot,
    domain: &str,
    path: &str,
    method: &str,
    headers: &Headers,
) -> DetectionResult {
    detect_request(registry, domain, path, method, headers, None)
}

/// Detect the provider, also checking the request body for a model field.
pub fn detect_request(
    registry: &RegistrySnapshot,
    domain: &str,
    path: &str,
    method: &str,
    headers: &Headers,
    body: Option<&Value>,
) -> DetectionResult {
    let mut result = match detect_by_domain(registry, domain, path, method) {
        Some(result) => result,
        None => match detect_by_header(registry, path, method, headers) {
            Some(result) => result,
            None => {
                log::debug!(
                    "PROVIDER_NOT_DETECTED host={} path={} method={}",
                    domain,
                    path,
                    method
                );
                return DetectionResult::none();
            }
        },
    };

    if let (Some(body), Some(provider)) = (
        body,
        result.provider.as_deref().and_then(|id| registry.provider(id)),
    ) {
        if first_string(body, &provider.extraction.request_model_paths).is_some() {
            result.signals.insert(Signal::PayloadModelField);
        }
    }

    log::debug!(
        "PROVIDER_DETECTED host={} provider={} request_type={:?} confidence={} signals={:?}",
        domain,
        result.provider.as_deref().unwrap_or("none"),
        result.request_type(),
        result.confidence(),
        result.signal_names()
    );

    result
}

fn detect_by_domain(
    registry: &RegistrySnapshot,
    domain: &str,
    path: &str,
    method: &str,
) -> Option<DetectionResult> {
    let candidates = registry.domain_candidates(domain);
    let top = candidates.first()?;

    for candidate in &candidates {
        if let Some(provider) = registry.provider_at(candidate.provider_idx) {
            if let Some(endpoint) = match_endpoint(provider, path, method) {
                return Some(DetectionResult {
                    provider: Some(provider.id.clone()),
                    endpoint: Some(endpoint),
                    signals: [Signal::Domain, Signal::Path].into_iter().collect(),
                });
            }
        }
    }

    let provider = registry.provider_at(top.provider_idx)?;
    Some(DetectionResult {
        provider: Some(provider.id.clone()),
        endpoint: None,
        signals: [Signal::Domain].into_iter().collect(),
    })
}

fn detect_by_header(
    registry: &RegistrySnapshot,
    path: &str,
    method: &str,
    headers: &Headers,
) -> Option<DetectionResult> {
    if headers.is_empty() {
        return None;
    }

    let provider = registry.providers().iter().find(|provider| {
        provider.header_signals.iter().any(|signal| {
            headers
                .get(&signal.name)
                .is_some_and(|value| signal.matches(value))
        })
    })?;

    let mut signals: BTreeSet<Signal> = [Signal::Header].into_iter().collect();
    let endpoint = match_endpoint(provider, path, method);
    if endpoint.is_some() {
        signals.insert(Signal::Path);
    }

    Some(DetectionResult {
        provider: Some(provider.id.clone()),
        endpoint,
        signals,
    })
}

/// First declared endpoint of `provider` matching path and method.
fn match_endpoint(provider: &ProviderRecord, path: &str, method: &str) -> Option<EndpointMatch> {
    provider.endpoints.iter().find_map(|endpoint| {
        if !endpoint.method.eq_ignore_ascii_case(method) {
            return None;
        }
        match_path_template(&endpoint.path, path).map(|params| EndpointMatch {
            template: endpoint.path.clone(),
            method: endpoint.method.clone(),
            request_type: endpoint.request_type,
            streaming_capable: endpoint.streaming_capable,
            params,
        })
    })
}
