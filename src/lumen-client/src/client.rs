//! HTTP client for the Lumen relay.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use lumen_protocol::{ChatRelayRequest, ErrorBody, ModelSummary, ModelsResponse};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ClientError, Result};

/// Default relay URL.
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:3001";

/// Raw body of a relay chat response.
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>;

/// Client for the relay's HTTP surface.
#[derive(Clone, Debug)]
pub struct RelayClient {
    http: reqwest::Client,
    base_url: String,
}

impl RelayClient {
    /// Create a client for the relay at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Start a chat generation and return its body stream.
    ///
    /// Fails with [`ClientError::Cancelled`] if `token` fires before the
    /// response headers arrive.
    pub async fn open_chat(
        &self,
        request: &ChatRelayRequest,
        token: &CancellationToken,
    ) -> Result<ByteStream> {
        let send = self.http.post(self.endpoint("chat")).json(request).send();

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(ClientError::Cancelled),
            result = send => result.map_err(|e| self.send_error(e))?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(ClientError::Cancelled),
                body = response.text() => body.unwrap_or_default(),
            };
            return Err(ClientError::RelayHttp {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        debug!(model = %request.model, "Relay stream opened");
        Ok(response.bytes_stream().boxed())
    }

    /// List the models installed behind the relay.
    pub async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        let response = self
            .http
            .get(self.endpoint("models"))
            .send()
            .await
            .map_err(|e| self.send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::ModelsUnavailable {
                status: status.as_u16(),
            });
        }

        let body: ModelsResponse = response.json().await?;
        Ok(body.models)
    }

    fn send_error(&self, error: reqwest::Error) -> ClientError {
        if error.is_connect() {
            ClientError::ConnectionRefused {
                url: self.base_url.clone(),
            }
        } else {
            ClientError::Request(error)
        }
    }
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => "no details".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_protocol::ConversationTurn;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> ChatRelayRequest {
        ChatRelayRequest::new("m", vec![ConversationTurn::user("hi")])
    }

    #[tokio::test]
    async fn test_relay_http_error_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(502).set_body_json(serde_json::json!({
                "error": "Upstream error: model 'm' not found",
                "code": "upstream_error"
            })))
            .mount(&server)
            .await;

        let client = RelayClient::new(server.uri()).unwrap();
        let err = client
            .open_chat(&request(), &CancellationToken::new())
            .await
            .err()
            .expect("should fail");

        match err {
            ClientError::RelayHttp { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "Upstream error: model 'm' not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_before_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let client = RelayClient::new(server.uri()).unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = client.open_chat(&request(), &token).await.err().expect("cancelled");
        assert!(matches!(err, ClientError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_while_reading_error_body() {
        use axum::body::Body;
        use axum::http::StatusCode;
        use axum::response::IntoResponse;
        use axum::routing::post;

        // Headers arrive at once; the error body never finishes.
        async fn stalled_error() -> impl IntoResponse {
            let body = futures::stream::pending::<std::result::Result<Bytes, std::io::Error>>();
            (StatusCode::BAD_GATEWAY, Body::from_stream(body))
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, axum::Router::new().route("/chat", post(stalled_error)))
                .await
                .unwrap();
        });

        let client = RelayClient::new(format!("http://{addr}")).unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            client.open_chat(&request(), &token),
        )
        .await
        .expect("cancel should interrupt the error body read");
        assert!(matches!(result.err(), Some(ClientError::Cancelled)));
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let client = RelayClient::new("http://127.0.0.1:9").unwrap();
        let err = client
            .open_chat(&request(), &CancellationToken::new())
            .await
            .err()
            .expect("should fail");
        assert!(matches!(err, ClientError::ConnectionRefused { .. }));
    }

    #[tokio::test]
    async fn test_list_models() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "llama3.1:8b", "size": 1, "modified_at": "2024-08-01T10:00:00Z"}]
            })))
            .mount(&server)
            .await;

        let models = RelayClient::new(server.uri()).unwrap().list_models().await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].name, "llama3.1:8b");
    }

    #[tokio::test]
    async fn test_list_models_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(
                ResponseTemplate::new(502).set_body_json(serde_json::json!({"models": []})),
            )
            .mount(&server)
            .await;

        let err = RelayClient::new(server.uri())
            .unwrap()
            .list_models()
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::ModelsUnavailable { status: 502 }));
    }

    #[test]
    fn test_error_message() {
        assert_eq!(error_message(r#"{"error":"boom","code":"x"}"#), "boom");
        assert_eq!(error_message(""), "no details");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }
}
