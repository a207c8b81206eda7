//! Provider and model registry.
//!
//! Immutable snapshots of provider/domain/endpoint/model metadata, shared
//! read-only across the pipeline and replaced whole on refresh.

pub mod diff;
pub mod handle;
pub mod litellm;
pub mod models;
pub mod snapshot;

pub use diff::{compare, PricingChange, RegistryDiff};
pub use handle::*;
pub use models::*;
pub use snapshot::*;
