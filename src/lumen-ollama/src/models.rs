//! Request and response types for the Ollama API

use lumen_protocol::{ConversationTurn, ModelSummary};
use serde::{Deserialize, Serialize};

/// Chat message sent upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author (system, user, assistant)
    pub role: String,
    /// Message content
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: turn.content.clone(),
        }
    }
}

/// Chat completion request (`POST /api/chat`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model to use for completion
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<ChatMessage>,
    /// Whether to stream the response
    pub stream: bool,
}

impl ChatRequest {
    /// Create a new streaming chat request
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }

    /// Build the upstream request for a conversation.
    ///
    /// A system prompt becomes a leading `system` message; the conversation
    /// itself is only read.
    pub fn from_conversation(
        model: impl Into<String>,
        system_prompt: Option<&str>,
        conversation: &[ConversationTurn],
    ) -> Self {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if let Some(prompt) = system_prompt {
            messages.push(ChatMessage::system(prompt));
        }
        messages.extend(conversation.iter().map(ChatMessage::from));
        Self::new(model, messages)
    }
}

/// Installed models response (`GET /api/tags`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagsResponse {
    /// List of models
    #[serde(default)]
    pub models: Vec<ModelSummary>,
}
