//! Error types for the relay server.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lumen_ollama::OllamaError;
use lumen_protocol::ErrorBody;
use thiserror::Error;

/// Application error type.
///
/// Every variant is rendered before a stream starts, as a single
/// `{"error": ..., "code": ...}` body.
#[derive(Debug, Error)]
pub enum AppError {
    /// Validation error.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The inference server could not be reached.
    #[error("{0}")]
    UpstreamUnavailable(String),

    /// The inference server answered with a failure.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code string.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Upstream(_) => "upstream_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
            code: Some(self.error_code().to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for the relay server.
pub type AppResult<T> = Result<T, AppError>;

impl From<OllamaError> for AppError {
    fn from(error: OllamaError) -> Self {
        match &error {
            OllamaError::ConnectionError { .. } => Self::UpstreamUnavailable(error.to_string()),
            OllamaError::RequestError(e) if e.is_timeout() || e.is_connect() => {
                Self::UpstreamUnavailable(error.to_string())
            }
            OllamaError::ServerError { .. }
            | OllamaError::RequestError(_)
            | OllamaError::JsonError(_) => Self::Upstream(error.to_string()),
            OllamaError::Frame(_) | OllamaError::StreamError(_) => {
                Self::Internal(error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::Validation("test".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::UpstreamUnavailable("down".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::Upstream("500".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::Validation("test".into()).error_code(),
            "validation_error"
        );
        assert_eq!(
            AppError::UpstreamUnavailable("x".into()).error_code(),
            "upstream_unavailable"
        );
    }

    #[test]
    fn test_from_ollama_error() {
        let unavailable = AppError::from(OllamaError::ConnectionError {
            url: "http://localhost:11434".into(),
        });
        assert!(matches!(unavailable, AppError::UpstreamUnavailable(_)));
        assert!(unavailable.to_string().contains("ollama serve"));

        let upstream = AppError::from(OllamaError::ServerError {
            status: 404,
            message: "model not found".into(),
        });
        assert!(matches!(upstream, AppError::Upstream(_)));
        assert!(upstream.to_string().contains("404"));
    }
}
