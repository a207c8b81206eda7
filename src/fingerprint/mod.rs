//! Provider fingerprinting.
//!
//! Maps (domain, path, method, headers) to a provider, endpoint and a
//! confidence level derived from the signals that matched.

pub mod confidence;
pub mod detector;
pub mod domain;
pub mod path;

pub use confidence::*;
pub use detector::*;
pub use domain::normalize_host;
pub use path::{match_path_template, strip_query};
