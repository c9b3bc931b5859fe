//! Lumen Protocol - types shared between the relay server and its clients
//!
//! This crate defines the client-facing side of the streaming pipeline:
//! conversation turns, the newline-delimited `RelayFrame` protocol, the
//! derived generation statistics, and the line framer used on both ends of
//! every NDJSON connection.

pub mod api;
pub mod frame;
pub mod framing;
pub mod stats;
pub mod turn;

#[cfg(test)]
mod tests;

// Re-exports
pub use api::{ChatRelayRequest, ErrorBody, ModelSummary, ModelsResponse};
pub use frame::RelayFrame;
pub use framing::{DEFAULT_MAX_LINE_BYTES, FrameError, LineFramer};
pub use stats::{CompletionCounters, GenerationStats};
pub use turn::{ConversationTurn, Role};
