//! Content redaction.
//!
//! Replaces captured prompt and completion text with a [`RedactionMarker`]
//! before an event leaves the process. The marker carries a truncated
//! SHA-256 of the content, its length and PII finding counts. A short
//! preview is included only when both the preview itself and the
//! corresponding region of the full content scan clean.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::security::pii::{scan_pii, PiiFinding};

/// Hex characters kept from the SHA-256 digest.
pub const CONTENT_HASH_LEN: usize = 16;

/// Upper bound for preview length in characters.
pub const MAX_PREVIEW_CHARS: usize = 50;

pub const PII_DETECTOR_ID: &str = "oisp-regex-pii";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionReason {
    UserOptOut,
    SizeLimit,
    PiiDetected,
    DefaultSafe,
}

impl RedactionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedactionReason::UserOptOut => "user_opt_out",
            RedactionReason::SizeLimit => "size_limit",
            RedactionReason::PiiDetected => "pii_detected",
            RedactionReason::DefaultSafe => "default_safe",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionPolicy {
    pub include_preview: bool,
    pub preview_chars: usize,
    /// Content larger than this is not scanned.
    pub max_content_bytes: usize,
    pub scan_pii: bool,
    pub user_opt_out: bool,
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self {
            include_preview: false,
            preview_chars: MAX_PREVIEW_CHARS,
            max_content_bytes: 1024 * 1024,
            scan_pii: true,
            user_opt_out: false,
        }
    }
}

/// Placeholder emitted in place of a content field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionMarker {
    pub redacted: bool,
    pub reason: RedactionReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detector_id: Option<String>,
    /// Length in characters.
    pub original_length: usize,
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<Vec<PiiFinding>>,
}

impl RedactionMarker {
    pub fn has_findings(&self) -> bool {
        self.findings.as_ref().is_some_and(|f| !f.is_empty())
    }
}

/// Truncated lowercase hex SHA-256 of `content`.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hash = hex::encode(digest);
    hash.truncate(CONTENT_HASH_LEN);
    hash
}

/// Redact `content` under `policy`.
pub fn redact(content: &str, policy: &RedactionPolicy) -> RedactionMarker {
    let original_length = content.chars().count();
    let content_hash = content_hash(content);

    let oversized = content.len() > policy.max_content_bytes;
    let scan = if oversized || policy.user_opt_out {
        None
    } else if policy.scan_pii || policy.include_preview {
        Some(scan_pii(content))
    } else {
        None
    };

    let findings = if policy.scan_pii {
        scan.as_ref()
            .map(|s| s.findings())
            .filter(|f| !f.is_empty())
    } else {
        None
    };

    let reason = if policy.user_opt_out {
        RedactionReason::UserOptOut
    } else if oversized {
        RedactionReason::SizeLimit
    } else if findings.is_some() {
        RedactionReason::PiiDetected
    } else {
        RedactionReason::DefaultSafe
    };

    let preview = match (&scan, policy.include_preview) {
        (Some(full_scan), true) => safe_preview(content, policy.preview_chars, |end| {
            full_scan.any_starts_before(end)
        }),
        _ => None,
    };

    log::debug!(
        "CONTENT_REDACTED reason={} length={} findings={} preview={}",
        reason.as_str(),
        original_length,
        findings.as_ref().map(|f| f.len()).unwrap_or(0),
        preview.is_some()
    );

    RedactionMarker {
        redacted: true,
        reason,
        detector_id: scan
            .as_ref()
            .filter(|_| policy.scan_pii)
            .map(|_| PII_DETECTOR_ID.to_string()),
        original_length,
        content_hash,
        preview,
        findings,
    }
}

fn safe_preview(
    content: &str,
    preview_chars: usize,
    full_match_starts_before: impl Fn(usize) -> bool,
) -> Option<String> {
    let limit = preview_chars.min(MAX_PREVIEW_CHARS);
    if limit == 0 {
        return None;
    }
    let end = content
        .char_indices()
        .nth(limit)
        .map(|(idx, _)| idx)
        .unwrap_or(content.len());
    let candidate = &content[..end];

    if candidate.trim().is_empty() {
        return None;
    }
    if !scan_pii(candidate).is_clean() || full_match_starts_before(end) {
        return None;
    }
    Some(candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn preview_policy() -> RedactionPolicy {
        RedactionPolicy {
            include_preview: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_hash_is_truncated_sha256() {
        let hash = content_hash("hello");
        assert_eq!(hash.len(), CONTENT_HASH_LEN);
        assert_eq!(hash, "2cf24dba5fb0a30e");
        assert_eq!(content_hash("hello"), hash);
    }

    #[test]
    fn test_default_safe_without_preview() {
        let marker = redact("Just a harmless prompt", &RedactionPolicy::default());
        assert_eq!(marker.reason, RedactionReason::DefaultSafe);
        assert_eq!(marker.original_length, 22);
        assert!(marker.preview.is_none());
        assert!(marker.findings.is_none());
        assert_eq!(marker.detector_id.as_deref(), Some(PII_DETECTOR_ID));
    }

    #[test]
    fn test_pii_detected_with_counts() {
        let marker = redact(
            "email me at jane@example.org or call 555-123-4567",
            &RedactionPolicy::default(),
        );
        assert_eq!(marker.reason, RedactionReason::PiiDetected);
        let json = serde_json::to_string(&marker).unwrap();
        assert!(!json.contains("jane@example.org"));
        assert!(!json.contains("555-123-4567"));
        assert!(marker.has_findings());
    }

    #[test]
    fn test_preview_included_when_clean() {
        let content = "Explain the borrow checker in two sentences, please, with an example.";
        let marker = redact(content, &preview_policy());
        let preview = marker.preview.unwrap();
        assert_eq!(preview.chars().count(), MAX_PREVIEW_CHARS);
        assert!(content.starts_with(&preview));
    }

    #[test]
    fn test_preview_omitted_when_credential_straddles_boundary() {
        let content = format!("{}sk-proj-abcdefghijklmnopqrstuvwxyz", "x".repeat(45));
        let marker = redact(&content, &preview_policy());
        assert!(marker.preview.is_none());
        assert_eq!(marker.reason, RedactionReason::PiiDetected);
    }

    #[test]
    fn test_short_content_with_pii_has_no_preview() {
        let marker = redact("hi bob@x.io", &preview_policy());
        assert!(marker.preview.is_none());
    }

    #[test]
    fn test_pii_after_window_keeps_preview() {
        let content = format!("{} contact bob@example.com", "a".repeat(60));
        let marker = redact(&content, &preview_policy());
        assert_eq!(marker.preview, Some("a".repeat(50)));
        assert_eq!(marker.reason, RedactionReason::PiiDetected);
    }

    #[test]
    fn test_size_limit_skips_scan() {
        let policy = RedactionPolicy {
            max_content_bytes: 8,
            include_preview: true,
            ..Default::default()
        };
        let marker = redact("bob@example.com is long", &policy);
        assert_eq!(marker.reason, RedactionReason::SizeLimit);
        assert!(marker.preview.is_none());
        assert!(marker.findings.is_none());
    }

    #[test]
    fn test_opt_out_takes_precedence() {
        let policy = RedactionPolicy {
            user_opt_out: true,
            max_content_bytes: 1,
            ..Default::default()
        };
        let marker = redact("bob@example.com", &policy);
        assert_eq!(marker.reason, RedactionReason::UserOptOut);
        assert!(marker.detector_id.is_none());
    }

    #[test]
    fn test_length_counts_characters() {
        let marker = redact("héllo wörld", &RedactionPolicy::default());
        assert_eq!(marker.original_length, 11);
    }

    #[test]
    fn test_preview_respects_multibyte_boundaries() {
        let content = "é".repeat(80);
        let marker = redact(&content, &preview_policy());
        assert_eq!(marker.preview.map(|p| p.chars().count()), Some(50));
    }
}
