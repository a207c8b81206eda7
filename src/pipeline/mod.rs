//! Normalization pipeline.
//!
//! - `context` - captured request/response inputs and attribution
//! - `normalizer` - detection through emission for one exchange
//! - `tasks` - idle sweeper and registry refresher

pub mod context;
pub mod normalizer;
pub mod tasks;

pub use context::*;
pub use normalizer::*;
pub use tasks::*;
