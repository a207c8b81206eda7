//! Confidence levels and the signals they are derived from.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared certainty of a detection. Ordered `Inferred < Low < Medium < High`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    #[default]
    Inferred,
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Inferred => "inferred",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }

    /// Derive the level from a signal set.
    pub fn from_signals(signals: &BTreeSet<Signal>) -> Self {
        let domain = signals.contains(&Signal::Domain);
        let path = signals.contains(&Signal::Path);
        let payload = signals.contains(&Signal::PayloadModelField);

        match (domain, path, payload) {
            (true, true, true) => ConfidenceLevel::High,
            (true, true, false) => ConfidenceLevel::Medium,
            (true, false, _) => ConfidenceLevel::Low,
            _ => ConfidenceLevel::Inferred,
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable evidence that contributed to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Domain,
    Path,
    Header,
    PayloadModelField,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Domain => "domain",
            Signal::Path => "path",
            Signal::Header => "header",
            Signal::PayloadModelField => "payload_model_field",
        }
    }
}
