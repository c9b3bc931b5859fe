//! Upstream byte stream to typed events.

use std::fmt::Display;

use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use lumen_protocol::LineFramer;
use tracing::debug;

use crate::decoder::{UpstreamEvent, decode_line};
use crate::{OllamaError, Result};

/// Boxed stream of decoded upstream events.
pub type EventStream = BoxStream<'static, Result<UpstreamEvent>>;

/// Frame and decode a raw NDJSON byte stream.
///
/// Undecodable lines are skipped. A transport error or a framing overflow is
/// yielded once and ends the stream.
pub fn upstream_events<S, E>(bytes: S, max_line_bytes: usize) -> EventStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let events = async_stream::stream! {
        let mut framer = LineFramer::with_max_line_bytes(max_line_bytes);
        let mut bytes = std::pin::pin!(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(OllamaError::StreamError(e.to_string()));
                    return;
                }
            };

            let lines = match framer.push(&chunk) {
                Ok(lines) => lines,
                Err(e) => {
                    yield Err(OllamaError::Frame(e));
                    return;
                }
            };

            for line in lines {
                if let Some(event) = decode_line(&line) {
                    yield Ok(event);
                }
            }
        }

        if let Some(line) = framer.finish() {
            debug!("Upstream closed without trailing newline");
            if let Some(event) = decode_line(&line) {
                yield Ok(event);
            }
        }
    };

    events.boxed()
}
