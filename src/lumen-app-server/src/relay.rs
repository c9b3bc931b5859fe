//! Streaming chat relay.
//!
//! A chat request opens one upstream generation, then a forwarding task
//! moves frames from the upstream event stream into a bounded channel that
//! backs the HTTP response body. The task owns the upstream stream, so when
//! it returns the upstream connection is closed, whether the generation
//! finished, failed, or the client went away.

use std::io;

use axum::body::Body;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use lumen_ollama::{ChatRequest, EventStream};
use lumen_protocol::ChatRelayRequest;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::{AppError, AppResult};
use crate::reframe::Reframer;
use crate::state::AppState;

/// Content type of a relay response.
pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Item type of the response body channel.
pub type BodyChunk = Result<Bytes, io::Error>;

/// How a forwarding task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The terminal frame was delivered.
    Completed,
    /// The upstream ended without a completion record.
    UpstreamClosed,
    /// The client disconnected.
    ClientGone,
    /// The upstream failed mid-stream; the body was aborted.
    Failed,
}

/// Check a chat request before anything is sent upstream.
pub fn validate(request: &ChatRelayRequest) -> AppResult<()> {
    if request.model.trim().is_empty() {
        return Err(AppError::Validation("model must not be empty".to_string()));
    }
    if request.messages.is_empty() {
        return Err(AppError::Validation(
            "messages must contain at least one turn".to_string(),
        ));
    }
    Ok(())
}

/// Open an upstream generation and stream it back as NDJSON frames.
///
/// Errors returned here happen before the stream starts and are rendered as
/// a plain error body; later failures abort the response body instead.
pub async fn open_relay(
    state: &AppState,
    request_id: &str,
    request: ChatRelayRequest,
) -> AppResult<Response> {
    validate(&request)?;

    let upstream_request = ChatRequest::from_conversation(
        &request.model,
        request.effective_system_prompt(),
        &request.messages,
    );

    info!(
        request_id,
        model = %request.model,
        turns = request.messages.len(),
        system_prompt = request.effective_system_prompt().is_some(),
        "Opening relay"
    );

    let events = state
        .ollama
        .chat_stream(&upstream_request, state.config.relay.max_line_bytes)
        .await
        .inspect_err(|e| warn!(request_id, error = %e, "Upstream refused chat request"))?;

    let (tx, rx) = mpsc::channel::<BodyChunk>(state.config.relay.channel_capacity.max(1));

    let span = info_span!("relay", request_id = %request_id, model = %request.model);
    tokio::spawn(
        async move {
            let outcome = forward_events(events, tx).await;
            debug!(?outcome, "Relay finished");
        }
        .instrument(span),
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

/// Forward upstream events into the response body channel.
///
/// Returns once the terminal frame is sent, the upstream ends or fails, or
/// the receiving side is dropped. Dropping `events` on return closes the
/// upstream connection.
pub async fn forward_events(mut events: EventStream, tx: mpsc::Sender<BodyChunk>) -> RelayOutcome {
    let mut reframer = Reframer::new();
    let mut frames_sent = 0usize;

    loop {
        let next = tokio::select! {
            _ = tx.closed() => {
                info!(frames_sent, "Client disconnected, closing upstream");
                return RelayOutcome::ClientGone;
            }
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(frames_sent, error = %e, "Upstream stream failed");
                let _ = tx.send(Err(io::Error::other(e.to_string()))).await;
                return RelayOutcome::Failed;
            }
            None => {
                warn!(frames_sent, "Upstream closed without a completion record");
                return RelayOutcome::UpstreamClosed;
            }
        };

        for frame in reframer.translate(event) {
            let line = match frame.to_line() {
                Ok(line) => line,
                Err(e) => {
                    warn!(error = %e, "Failed to encode frame");
                    let _ = tx.send(Err(io::Error::other(e))).await;
                    return RelayOutcome::Failed;
                }
            };

            if tx.send(Ok(Bytes::from(line))).await.is_err() {
                info!(frames_sent, "Client disconnected, closing upstream");
                return RelayOutcome::ClientGone;
            }
            frames_sent += 1;
        }

        if reframer.is_complete() {
            debug!(frames_sent, "Generation complete");
            return RelayOutcome::Completed;
        }
    }
}
