//! Structured logging with correlation context.
//!
//! Provides logging macros and utilities that include the correlation id
//! (and, once known, the detected provider) in every log message.

pub mod structured;

pub use structured::*;
