//! Envelope validation.
//!
//! Every event is validated before it is returned to the caller. The
//! built-in [`EventValidator`] can be replaced by any [`SchemaValidator`].

pub mod schema;

pub use schema::*;
