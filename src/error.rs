//! Error types.
//!
//! One enum per failure domain. None of these are fatal to the process:
//! the pipeline reports them per event and keeps going.

use thiserror::Error;

use crate::streaming::StreamState;

/// Failures while loading or refreshing the provider/model registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("failed to read registry bundle: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse registry bundle: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid domain pattern '{pattern}' for provider '{provider}': {source}")]
    InvalidPattern {
        provider: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("duplicate provider id '{0}'")]
    DuplicateProvider(String),
    #[error("model '{model}' references unknown provider '{provider}'")]
    UnknownProvider { model: String, provider: String },
    #[error("model key '{key}' does not match '{{provider}}/{{id}}' ({expected})")]
    KeyMismatch { key: String, expected: String },
    #[error("registry source unavailable: {0}")]
    Unavailable(String),
}

/// Failures in the per-stream lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("no open stream for correlation id '{0}'")]
    UnknownStream(String),
    #[error("stream '{0}' is already open")]
    AlreadyOpen(String),
    #[error("stream '{id}' is {state:?}, not open")]
    NotOpen { id: String, state: StreamState },
}

/// An emitted envelope failed validation.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("event failed validation: {}", violations.join("; "))]
pub struct ValidationError {
    pub violations: Vec<String>,
}

/// Per-event pipeline failure.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to serialize event data: {0}")]
    Serialize(#[from] serde_json::Error),
}
