//! Pipeline inputs.
//!
//! Decoded request and response payloads plus connection and process
//! context, as handed over by the capture layer.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::events::{ActorInfo, ExtensionMap, HostInfo, ProcessInfo};
use crate::fingerprint::Headers;
use crate::logging::structured::LogContext;

/// Process, host and actor attribution for an exchange.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CaptureContext {
    pub process: Option<ProcessInfo>,
    pub host: Option<HostInfo>,
    pub actor: Option<ActorInfo>,
    /// Free-form attributes copied to the envelope `attrs`.
    pub attrs: ExtensionMap,
}

/// One captured outbound request.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub path: String,
    pub method: String,
    pub headers: Headers,
    pub body: Option<Value>,
    pub context: CaptureContext,
}

impl CapturedRequest {
    pub fn new(
        correlation_id: &str,
        timestamp: DateTime<Utc>,
        host: &str,
        method: &str,
        path: &str,
    ) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            timestamp,
            host: host.to_string(),
            path: path.to_string(),
            method: method.to_string(),
            headers: Headers::new(),
            body: None,
            context: CaptureContext::default(),
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_context(mut self, context: CaptureContext) -> Self {
        self.context = context;
        self
    }

    pub fn log_context(&self) -> LogContext {
        LogContext::new(&self.correlation_id)
    }
}

/// One captured non-streamed response.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub body: Option<Value>,
}

impl CapturedResponse {
    pub fn new(correlation_id: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            timestamp,
            status_code: None,
            body: None,
        }
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capture_context_from_json() {
        let context: CaptureContext = serde_json::from_value(json!({
            "process": {"pid": 4242, "name": "node"},
            "actor": {"user": "dev"},
            "attrs": {"team": "ml"}
        }))
        .unwrap();
        assert_eq!(context.process.and_then(|p| p.pid), Some(4242));
        assert!(context.host.is_none());
        assert_eq!(context.attrs["team"], json!("ml"));
    }

    #[test]
    fn test_request_builder() {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let request = CapturedRequest::new("r1", ts, "api.openai.com", "POST", "/v1/chat/completions")
            .with_header("OpenAI-Organization", "org-1")
            .with_body(json!({"model": "gpt-4o"}));
        assert_eq!(request.headers.get("openai-organization"), Some("org-1"));
        assert_eq!(request.log_context().to_string(), "[corr=r1]");
    }
}
