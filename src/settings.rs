//! Runtime settings.
//!
//! Loaded from an optional JSON file and `OISP_*` environment variables,
//! nested sections separated by `__`:
//!
//! ```text
//! OISP_STREAMING__IDLE_TIMEOUT_MS=30000
//! OISP_REDACTION__INCLUDE_PREVIEW=true
//! OISP_REGISTRY__BUNDLE_PATH=/etc/oisp/registry-bundle.json
//! ```
//!
//! Every field has a default, so an empty environment yields a working
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::events::Source;
use crate::security::{RedactionPolicy, MAX_PREVIEW_CHARS};

pub const ENV_PREFIX: &str = "OISP";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub streaming: StreamingSettings,
    pub registry: RegistrySettings,
    pub redaction: RedactionSettings,
    pub source: SourceSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    pub idle_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    /// Emit an `ai.streaming_chunk` event per decoded chunk.
    pub emit_chunk_events: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30_000,
            sweep_interval_ms: 1_000,
            emit_chunk_events: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Bundle to load instead of the built-in one.
    pub bundle_path: Option<PathBuf>,
    pub refresh_interval_secs: u64,
    /// Pricing older than this is reported as best-effort.
    pub max_age_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            bundle_path: None,
            refresh_interval_secs: 3_600,
            max_age_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RedactionSettings {
    pub include_preview: bool,
    pub preview_chars: usize,
    pub max_content_bytes: usize,
    pub scan_pii: bool,
    pub user_opt_out: bool,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        let policy = RedactionPolicy::default();
        Self {
            include_preview: policy.include_preview,
            preview_chars: policy.preview_chars,
            max_content_bytes: policy.max_content_bytes,
            scan_pii: policy.scan_pii,
            user_opt_out: policy.user_opt_out,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub collector: String,
    pub capture_method: String,
}

impl Default for SourceSettings {
    fn default() -> Self {
        let source = Source::default();
        Self {
            collector: source.collector,
            capture_method: source.capture_method,
        }
    }
}

impl Settings {
    /// Load from the environment only.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load from `path` (JSON) overlaid by the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Json).required(true));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        log::info!(
            "SETTINGS_LOADED idle_timeout_ms={} emit_chunk_events={} bundle_path={} include_preview={}",
            settings.streaming.idle_timeout_ms,
            settings.streaming.emit_chunk_events,
            settings
                .registry
                .bundle_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "builtin".to_string()),
            settings.redaction.include_preview
        );
        Ok(settings)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.streaming.sweep_interval_ms.max(1))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.registry.refresh_interval_secs.max(1))
    }

    pub fn registry_max_age(&self) -> Duration {
        Duration::from_secs(self.registry.max_age_secs)
    }

    /// Redaction policy. The preview length is capped at the fixed maximum.
    pub fn to_redaction_policy(&self) -> RedactionPolicy {
        RedactionPolicy {
            include_preview: self.redaction.include_preview,
            preview_chars: self.redaction.preview_chars.min(MAX_PREVIEW_CHARS),
            max_content_bytes: self.redaction.max_content_bytes,
            scan_pii: self.redaction.scan_pii,
            user_opt_out: self.redaction.user_opt_out,
        }
    }

    pub fn to_source(&self) -> Source {
        Source {
            collector: self.source.collector.clone(),
            capture_method: self.source.capture_method.clone(),
            sensor_version: crate::NORMALIZER_VERSION.to_string(),
        }
    }
}
