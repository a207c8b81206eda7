//! Cost estimation from token usage and per-model pricing.

pub mod estimator;

pub use estimator::*;
