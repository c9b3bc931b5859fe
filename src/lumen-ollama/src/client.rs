//! Ollama client implementation

use std::time::Duration;

use lumen_protocol::ModelSummary;

use crate::models::{ChatRequest, TagsResponse};
use crate::stream::{EventStream, upstream_events};
use crate::{OllamaError, Result};

/// Client for interacting with a local Ollama server
#[derive(Clone, Debug)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaClient {
    /// Create a new Ollama client with the given base URL
    ///
    /// No request is made; an unreachable server surfaces on first use.
    /// Only the connect phase is bounded by a timeout since a generation may
    /// legitimately stream for a long time.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the Ollama server (e.g., "http://localhost:11434")
    /// * `connect_timeout` - Timeout for establishing the TCP connection
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Check if the server is reachable
    pub async fn check_server(&self) -> Result<()> {
        let url = self.endpoint("api/tags");
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(OllamaError::ServerError {
                status: resp.status().as_u16(),
                message: "Ollama is not responding".to_string(),
            }),
            Err(_) => Err(OllamaError::ConnectionError {
                url: self.base_url.clone(),
            }),
        }
    }

    /// Fetch the list of installed models from the server
    pub async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        let url = self.endpoint("api/tags");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if response.status().is_success() {
            let tags: TagsResponse = response.json().await?;
            Ok(tags.models)
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(OllamaError::ServerError {
                status,
                message: format!("Failed to fetch models: {}", error_message(&body)),
            })
        }
    }

    /// Open a streaming chat completion.
    ///
    /// Fails before any event is produced when the server cannot be reached
    /// or answers with a non-success status. Dropping the returned stream
    /// closes the upstream connection.
    pub async fn chat_stream(
        &self,
        request: &ChatRequest,
        max_line_bytes: usize,
    ) -> Result<EventStream> {
        let url = self.endpoint("api/chat");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(OllamaError::ServerError {
                status,
                message: format!("Chat completion failed: {}", error_message(&body)),
            });
        }

        tracing::debug!(model = %request.model, "Upstream chat stream opened");
        Ok(upstream_events(response.bytes_stream(), max_line_bytes))
    }

    fn send_error(&self, error: reqwest::Error) -> OllamaError {
        if error.is_connect() {
            OllamaError::ConnectionError {
                url: self.base_url.clone(),
            }
        } else {
            OllamaError::RequestError(error)
        }
    }
}

/// Ollama reports failures as `{"error": "..."}`; fall back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::UpstreamEvent;
    use crate::models::ChatMessage;
    use futures::StreamExt;
    use lumen_protocol::DEFAULT_MAX_LINE_BYTES;

    fn client_for(server: &wiremock::MockServer) -> OllamaClient {
        OllamaClient::new(server.uri(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn test_list_models_happy_path() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/tags"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_raw(
                    serde_json::json!({
                        "models": [
                            {"name": "llama3.1:8b", "size": 4920753328u64, "modified_at": "2024-08-01T10:00:00Z", "digest": "x"}
                        ]
                    })
                    .to_string(),
                    "application/json",
                ),
            )
            .mount(&server)
            .await;

        let models = client_for(&server).list_models().await.expect("list models");
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "llama3.1:8b");
    }

    #[tokio::test]
    async fn test_list_models_server_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/api/tags"))
            .respond_with(wiremock::ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = client_for(&server).list_models().await;
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to fetch models")
        );
    }

    #[tokio::test]
    async fn test_chat_stream_yields_events() {
        let server = wiremock::MockServer::start().await;
        let body = concat!(
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n",
            "{\"done\":true,\"eval_count\":5,\"eval_duration\":2000000000}\n",
        );
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/chat"))
            .and(wiremock::matchers::body_partial_json(serde_json::json!({
                "model": "llama3.1:8b",
                "stream": true
            })))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_raw(body, "application/x-ndjson"),
            )
            .mount(&server)
            .await;

        let request = ChatRequest::new("llama3.1:8b", vec![ChatMessage::user("hi")]);
        let stream = client_for(&server)
            .chat_stream(&request, DEFAULT_MAX_LINE_BYTES)
            .await
            .expect("stream opened");
        let events: Vec<_> = stream.collect().await;

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], Ok(UpstreamEvent::ContentDelta { text }) if text == "Hel"));
        assert!(matches!(&events[2], Ok(UpstreamEvent::Completion { .. })));
    }

    #[tokio::test]
    async fn test_chat_stream_error_status_fails_before_streaming() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .and(wiremock::matchers::path("/api/chat"))
            .respond_with(wiremock::ResponseTemplate::new(404).set_body_raw(
                "{\"error\":\"model 'nope' not found\"}",
                "application/json",
            ))
            .mount(&server)
            .await;

        let request = ChatRequest::new("nope", vec![ChatMessage::user("hi")]);
        let err = client_for(&server)
            .chat_stream(&request, DEFAULT_MAX_LINE_BYTES)
            .await
            .err()
            .expect("should fail");

        match err {
            OllamaError::ServerError { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("model 'nope' not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_connection_error() {
        // Port 9 (discard) is not expected to accept HTTP connections.
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let request = ChatRequest::new("m", vec![ChatMessage::user("hi")]);
        let err = client
            .chat_stream(&request, DEFAULT_MAX_LINE_BYTES)
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, OllamaError::ConnectionError { .. }));
    }

    #[test]
    fn test_from_conversation_injects_system_prompt() {
        let conversation = vec![
            lumen_protocol::ConversationTurn::user("hi"),
            lumen_protocol::ConversationTurn::assistant("hello"),
        ];
        let request = ChatRequest::from_conversation("m", Some("Be brief."), &conversation);

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0], ChatMessage::system("Be brief."));
        assert_eq!(request.messages[1], ChatMessage::user("hi"));
        assert_eq!(request.messages[2], ChatMessage::assistant("hello"));
        assert!(request.stream);
        assert_eq!(conversation.len(), 2);
    }

    #[test]
    fn test_chat_request_wire_shape() {
        let request = ChatRequest::from_conversation(
            "m",
            None,
            &[lumen_protocol::ConversationTurn::user("hi")],
        );
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "model": "m",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            })
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message("{\"error\":\"boom\"}"), "boom");
        assert_eq!(error_message(" plain text "), "plain text");
    }

    #[test]
    fn test_base_url() {
        let client = OllamaClient::new("http://localhost:11434/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434/");
        assert_eq!(client.endpoint("api/chat"), "http://localhost:11434/api/chat");
    }
}
