//! Ollama client for Lumen
//!
//! This crate talks to a locally running Ollama-compatible inference server:
//! it lists installed models and opens streaming chat completions, turning the
//! server's newline-delimited JSON records into typed [`UpstreamEvent`]s.

mod client;
pub mod decoder;
mod models;
mod stream;

pub use client::OllamaClient;
pub use decoder::{UpstreamEvent, decode_line};
pub use models::{ChatMessage, ChatRequest, TagsResponse};
pub use stream::{EventStream, upstream_events};

use lumen_protocol::FrameError;

/// Default Ollama server URL
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Error types for Ollama operations
#[derive(Debug, thiserror::Error)]
pub enum OllamaError {
    #[error(
        "Ollama is not responding at {url}. Install from https://ollama.com/download and run 'ollama serve'."
    )]
    ConnectionError { url: String },

    #[error("Server returned error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("Stream interrupted: {0}")]
    StreamError(String),
}

/// Result type for Ollama operations
pub type Result<T> = std::result::Result<T, OllamaError>;
