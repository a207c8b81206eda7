//! Security module.
//!
//! PII detection and content redaction for prompt and completion text.

pub mod pii;
pub mod redactor;

pub use pii::*;
pub use redactor::*;
