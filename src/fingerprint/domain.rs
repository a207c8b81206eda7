//! Hostname matching against provider domain patterns.
//!
//! Patterns are either exact hostnames or globs where `*` stands for one or
//! more characters (`*.openai.azure.com`, `bedrock-runtime.*.amazonaws.com`).
//! When several patterns match, the one with the most literal characters
//! wins; equal specificity falls back to provider registration order.

use std::collections::HashMap;

use regex::Regex;

use crate::error::RegistryError;
use crate::registry::models::ProviderRecord;

/// One compiled glob pattern.
#[derive(Debug, Clone)]
struct GlobPattern {
    pattern: String,
    provider_idx: usize,
    literal_len: usize,
    regex: Regex,
}

/// A provider whose domain set matched a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainCandidate {
    pub provider_idx: usize,
    /// Number of literal (non-wildcard) characters in the matching pattern.
    pub specificity: usize,
}

/// Lookup structure built once per registry snapshot.
#[derive(Debug, Clone, Default)]
pub struct DomainIndex {
    exact: HashMap<String, Vec<usize>>,
    globs: Vec<GlobPattern>,
}

impl DomainIndex {
    pub fn build(providers: &[ProviderRecord]) -> Result<Self, RegistryError> {
        let mut index = DomainIndex::default();

        for (provider_idx, provider) in providers.iter().enumerate() {
            for domain in &provider.domains {
                let pattern = normalize_host(domain);
                if pattern.contains('*') {
                    let regex = Regex::new(&glob_to_regex(&pattern)).map_err(|source| {
                        RegistryError::InvalidPattern {
                            provider: provider.id.clone(),
                            pattern: domain.clone(),
                            source,
                        }
                    })?;
                    index.globs.push(GlobPattern {
                        literal_len: pattern.chars().filter(|c| *c != '*').count(),
                        pattern,
                        provider_idx,
                        regex,
                    });
                } else {
                    let owners = index.exact.entry(pattern).or_default();
                    if !owners.contains(&provider_idx) {
                        owners.push(provider_idx);
                    }
                }
            }
        }

        Ok(index)
    }

    /// All providers whose domain set matches `host`, most specific first,
    /// ties in registration order. Each provider appears at most once.
    pub fn candidates(&self, host: &str) -> Vec<DomainCandidate> {
        let host = normalize_host(host);
        if host.is_empty() {
            return Vec::new();
        }

        let mut best: HashMap<usize, usize> = HashMap::new();

        if let Some(owners) = self.exact.get(&host) {
            for idx in owners {
                best.insert(*idx, host.chars().count());
            }
        }

        for glob in &self.globs {
            if glob.regex.is_match(&host) {
                let entry = best.entry(glob.provider_idx).or_insert(0);
                if glob.literal_len > *entry {
                    *entry = glob.literal_len;
                }
                log::trace!(
                    "DOMAIN_GLOB_MATCH host={} pattern={} specificity={}",
                    host,
                    glob.pattern,
                    glob.literal_len
                );
            }
        }

        let mut candidates: Vec<DomainCandidate> = best
            .into_iter()
            .map(|(provider_idx, specificity)| DomainCandidate {
                provider_idx,
                specificity,
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.specificity
                .cmp(&a.specificity)
                .then(a.provider_idx.cmp(&b.provider_idx))
        });
        candidates
    }

    pub fn pattern_count(&self) -> usize {
        self.exact.len() + self.globs.len()
    }
}

/// Lowercase, drop a trailing dot and any port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();

    // Bracketed IPv6 literal, optionally with a port
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default().to_string();
    }

    let without_port = match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            name
        }
        _ => host.as_str(),
    };
    without_port.trim_end_matches('.').to_string()
}

/// Convert a glob pattern to an anchored regex.
fn glob_to_regex(pattern: &str) -> String {
    let escaped: Vec<String> = pattern.split('*').map(regex::escape).collect();
    format!("^{}$", escaped.join(".+"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(id: &str, domains: &[&str]) -> ProviderRecord {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "domains": domains,
        }))
        .unwrap()
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("API.OpenAI.com"), "api.openai.com");
        assert_eq!(normalize_host("api.openai.com:443"), "api.openai.com");
        assert_eq!(normalize_host("api.openai.com."), "api.openai.com");
        assert_eq!(normalize_host("[::1]:8080"), "::1");
        assert_eq!(normalize_host("localhost:11434"), "localhost");
    }

    #[test]
    fn test_glob_to_regex() {
        assert_eq!(glob_to_regex("*.example.com"), r"^.+\.example\.com$");
    }

    #[test]
    fn test_exact_and_glob_matching() {
        let providers = vec![
            provider("openai", &["api.openai.com"]),
            provider("azure_openai", &["*.openai.azure.com"]),
        ];
        let index = DomainIndex::build(&providers).unwrap();

        let c = index.candidates("api.openai.com");
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].provider_idx, 0);

        let c = index.candidates("myco.openai.azure.com");
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].provider_idx, 1);

        // The wildcard needs at least one character
        assert!(index.candidates("openai.azure.com").is_empty());
        assert!(index.candidates("unknown.example").is_empty());
    }

    #[test]
    fn test_longest_literal_wins() {
        let providers = vec![
            provider("generic_gateway", &["*.example.com"]),
            provider("specific", &["*.ai.example.com"]),
        ];
        let index = DomainIndex::build(&providers).unwrap();

        let c = index.candidates("tenant.ai.example.com");
        assert_eq!(c.len(), 2);
        assert_eq!(c[0].provider_idx, 1);
        assert_eq!(c[1].provider_idx, 0);
    }

    #[test]
    fn test_equal_specificity_keeps_registration_order() {
        let providers = vec![
            provider("first", &["*.shared.io"]),
            provider("second", &["*.shared.io"]),
        ];
        let index = DomainIndex::build(&providers).unwrap();
        let c = index.candidates("x.shared.io");
        assert_eq!(c[0].provider_idx, 0);
        assert_eq!(c[1].provider_idx, 1);
    }

    #[test]
    fn test_middle_wildcard() {
        let providers = vec![provider("aws_bedrock", &["bedrock-runtime.*.amazonaws.com"])];
        let index = DomainIndex::build(&providers).unwrap();
        assert_eq!(index.candidates("bedrock-runtime.us-east-1.amazonaws.com").len(), 1);
        assert!(index.candidates("s3.us-east-1.amazonaws.com").is_empty());
    }
}
