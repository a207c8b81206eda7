//! Canonical OISP events.
//!
//! - `envelope` - the outer envelope, confidence and context blocks
//! - `data` - per-event-type payloads
//! - `emitter` - stamps ids and timestamps and validates before returning

pub mod data;
pub mod emitter;
pub mod envelope;

pub use data::*;
pub use emitter::*;
pub use envelope::*;
