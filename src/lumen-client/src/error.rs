//! Error types for the chat client.

use thiserror::Error;

use crate::storage::StoreError;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The relay could not be reached.
    #[error("Cannot reach the Lumen relay at {url}")]
    ConnectionRefused { url: String },

    /// The relay rejected the request before streaming.
    #[error("Relay returned {status}: {message}")]
    RelayHttp { status: u16, message: String },

    /// The relay could not list models.
    #[error("Model list unavailable (relay returned {status})")]
    ModelsUnavailable { status: u16 },

    /// The stream ended without any content.
    #[error("The model returned an empty response")]
    EmptyCompletion,

    /// The stream broke after it started.
    #[error("Stream interrupted after {partial_len} bytes: {message}")]
    MidStream { partial_len: usize, message: String },

    /// A generation is already in flight.
    #[error("A response is already being generated")]
    Busy,

    /// The user cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// No model has been chosen for the session.
    #[error("No model selected")]
    NoModelSelected,

    /// Turn index out of range.
    #[error("No turn at index {index} (conversation has {len})")]
    InvalidTurn { index: usize, len: usize },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl ClientError {
    /// Text suitable for showing to the user, with a hint where one helps.
    pub fn user_message(&self) -> String {
        match self {
            Self::ConnectionRefused { url } => format!(
                "Cannot reach the Lumen relay at {url}. Start it with `lumen-server` and check that Ollama is running."
            ),
            Self::RelayHttp { status: 503, message } => {
                format!("The inference server is unavailable: {message}")
            }
            Self::RelayHttp { message, .. } => message.clone(),
            Self::ModelsUnavailable { .. } => {
                "Could not load models. Is Ollama running? Try `ollama list`.".to_string()
            }
            Self::EmptyCompletion => {
                "The model returned an empty response. Try rephrasing or another model.".to_string()
            }
            Self::NoModelSelected => "Choose a model first (e.g. /model llama3.1:8b).".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
