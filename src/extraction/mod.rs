//! Field extraction.
//!
//! Rule-driven extraction of model, usage, finish reason and text from
//! provider payloads. Provider differences live in registry data as JSON
//! paths; there is one code path for all providers.

pub mod extractor;
pub mod json_path;
pub mod rules;
pub mod usage;

pub use extractor::*;
pub use json_path::*;
pub use rules::*;
pub use usage::*;
