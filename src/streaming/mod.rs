//! Streaming response reassembly.
//!
//! Decodes SSE / NDJSON framing, accumulates chunks per correlation id and
//! merges them into one logical response when the stream completes or is
//! abandoned.

pub mod accumulator;
pub mod manager;
pub mod sse;

pub use accumulator::*;
pub use manager::*;
pub use sse::{Frame, FrameDecoder};
