//! Structured logging utilities.
//!
//! Provides context-aware logging with the correlation id included
//! in every log message.

use std::fmt;

/// Logging context for one logical request/response exchange.
#[derive(Debug, Clone)]
pub struct LogContext {
    pub correlation_id: String,
    pub provider: Option<String>,
}

impl LogContext {
    pub fn new(correlation_id: &str) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            provider: None,
        }
    }

    pub fn with_provider(&self, provider: &str) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            provider: Some(provider.to_string()),
        }
    }
}

impl fmt::Display for LogContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.provider {
            Some(provider) => write!(f, "[corr={}] [provider={}]", self.correlation_id, provider),
            None => write!(f, "[corr={}]", self.correlation_id),
        }
    }
}

/// Log an info message with context.
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::info!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

/// Log a warning message with context.
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::warn!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

/// Log a debug message with context.
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $event:expr, $($key:ident = $value:expr),* $(,)?) => {
        log::debug!(
            "{} {} {}",
            $ctx,
            $event,
            format_args!(concat!($(stringify!($key), "={:?} "),*), $($value),*)
        );
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_display() {
        let ctx = LogContext::new("req-123");
        assert_eq!(format!("{}", ctx), "[corr=req-123]");

        let ctx_with_provider = ctx.with_provider("openai");
        assert_eq!(
            format!("{}", ctx_with_provider),
            "[corr=req-123] [provider=openai]"
        );
    }

    #[test]
    fn test_macros_expand() {
        let ctx = LogContext::new("req-456");
        crate::log_info!(ctx, "TEST_EVENT", count = 3, name = "x");
        crate::log_warn!(ctx, "TEST_WARN", reason = "none");
        crate::log_debug!(ctx, "TEST_DEBUG", ok = true);
    }
}
