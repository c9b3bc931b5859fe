//! Streaming chat endpoint.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{State, rejection::JsonRejection},
    response::Response,
};
use lumen_protocol::ChatRelayRequest;

use crate::error::{AppError, AppResult};
use crate::middleware::RequestId;
use crate::relay;
use crate::state::AppState;

/// Relay one chat generation as an NDJSON stream.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: Result<Json<ChatRelayRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(request) = body.map_err(|e| AppError::Validation(e.body_text()))?;
    relay::open_relay(&state, &request_id, request).await
}
