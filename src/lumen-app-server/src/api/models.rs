//! Installed model listing.

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use lumen_protocol::ModelsResponse;
use tracing::warn;

use crate::state::AppState;

/// List models installed on the inference server.
///
/// Any upstream failure yields an empty list with status 502 so clients can
/// always decode the body the same way.
pub async fn list_models(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ModelsResponse>) {
    match state.ollama.list_models().await {
        Ok(models) => (StatusCode::OK, Json(ModelsResponse { models })),
        Err(e) => {
            warn!(error = %e, "Failed to list upstream models");
            (StatusCode::BAD_GATEWAY, Json(ModelsResponse::default()))
        }
    }
}
