//! OISP Normalize - AI-API traffic normalization and enrichment
//!
//! This crate turns captured AI-API traffic (decoded request/response
//! payloads plus connection and process context) into canonical OISP
//! events. The implementation prioritizes:
//!
//! 1. **Privacy** - Content leaves only as redaction markers; PII is counted, never copied
//! 2. **Logging** - Every decision point logged with correlation context
//! 3. **Isolation** - A failure affects one event, never the process
//!
//! ## Architecture
//!
//! The crate is organized into modules:
//! - `registry` - Versioned provider/model registry with atomic swap
//! - `fingerprint` - Provider detection and confidence scoring
//! - `extraction` - Rule-driven model, usage and text extraction
//! - `streaming` - SSE/NDJSON decoding and stream reassembly
//! - `security` - PII detection and content redaction
//! - `cost` - Token usage to USD cost
//! - `events` - Canonical envelope and event payloads
//! - `validation` - Envelope validation
//! - `pipeline` - Orchestration and background tasks
//! - `logging` - Structured logging with correlation context
//!
//! ## Example
//!
//! ```no_run
//! use oisp_normalize::pipeline::{CapturedRequest, Normalizer};
//! use oisp_normalize::settings::Settings;
//!
//! let settings = Settings::load()?;
//! let normalizer = Normalizer::from_settings(&settings)?;
//! let request = CapturedRequest::new(
//!     "req-1",
//!     chrono::Utc::now(),
//!     "api.openai.com",
//!     "POST",
//!     "/v1/chat/completions",
//! )
//! .with_body(serde_json::json!({"model": "gpt-4o", "messages": []}));
//! let event = normalizer.on_request(&request)?;
//! println!("{}", event.to_json()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cost;
pub mod error;
pub mod events;
pub mod extraction;
pub mod fingerprint;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod security;
pub mod settings;
pub mod streaming;
pub mod validation;

/// OISP schema version stamped into every envelope.
pub const OISP_VERSION: &str = "0.1";

/// Version of this normalizer, reported as `source.sensor_version`.
pub const NORMALIZER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the default logger. Safe to call more than once.
pub fn init_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_millis()
        .parse_default_env()
        .try_init();
}
