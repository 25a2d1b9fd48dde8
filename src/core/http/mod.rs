//! HTTP transport helpers (C2, spec.md §4.2): a unary JSON round-trip and a
//! line-oriented SSE reader shared by every adapter, so adapters only
//! implement vendor-specific translation (spec.md §9 "Adapter composition").

pub mod sse;
pub mod unary;

pub use sse::{SseLineReader, UpstreamError};
pub use unary::send_unary;
