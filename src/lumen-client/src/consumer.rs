//! Reads a relay response stream into the live view.

use std::fmt::Display;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use lumen_protocol::{GenerationStats, LineFramer, RelayFrame};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::notify::{Notice, Notifier};
use crate::watchdog::IdleWatchdog;

/// Where a session's generation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl Phase {
    /// Whether a generation is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

/// Content streamed so far, for display while generating.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveView {
    pub content: String,
    pub stats: Option<GenerationStats>,
}

/// How a stream ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// The relay closed the stream normally.
    Completed {
        content: String,
        stats: Option<GenerationStats>,
    },
    /// The cancellation token fired.
    Cancelled {
        content: String,
        stats: Option<GenerationStats>,
    },
    /// Reading failed after the request was accepted.
    Failed {
        content: String,
        stats: Option<GenerationStats>,
        message: String,
    },
}

/// Accumulates frames of one generation and publishes progress.
pub struct StreamConsumer<'a> {
    phase: &'a watch::Sender<Phase>,
    live: &'a watch::Sender<LiveView>,
    notifier: &'a dyn Notifier,
    watchdog: IdleWatchdog,
    framer: LineFramer,
    content: String,
    stats: Option<GenerationStats>,
}

impl<'a> StreamConsumer<'a> {
    pub fn new(
        phase: &'a watch::Sender<Phase>,
        live: &'a watch::Sender<LiveView>,
        notifier: &'a dyn Notifier,
        watchdog: IdleWatchdog,
        max_line_bytes: usize,
    ) -> Self {
        Self {
            phase,
            live,
            notifier,
            watchdog,
            framer: LineFramer::with_max_line_bytes(max_line_bytes),
            content: String::new(),
            stats: None,
        }
    }

    /// Read `stream` to its end, a failure, or cancellation.
    pub async fn run<S, E>(mut self, stream: S, token: &CancellationToken) -> StreamOutcome
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let mut stream = std::pin::pin!(stream);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(received = self.content.len(), "Stream cancelled");
                    return self.cancelled();
                }
                chunk = stream.next() => match chunk {
                    Some(Ok(bytes)) => {
                        if let Err(message) = self.on_chunk(&bytes) {
                            return self.failed(message);
                        }
                    }
                    Some(Err(e)) => {
                        warn!(received = self.content.len(), error = %e, "Stream read failed");
                        return self.failed(e.to_string());
                    }
                    None => {
                        if let Some(line) = self.framer.finish() {
                            self.on_line(&line);
                        }
                        return StreamOutcome::Completed {
                            content: self.content,
                            stats: self.stats,
                        };
                    }
                },
                _ = self.watchdog.elapsed() => {
                    self.notifier.notify(Notice::Warning(
                        "slow response: still waiting for the model".to_string(),
                    ));
                }
            }
        }
    }

    fn on_chunk(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.watchdog.reset();
        self.phase.send_if_modified(|phase| {
            if *phase == Phase::Sending {
                *phase = Phase::Streaming;
                true
            } else {
                false
            }
        });

        let lines = self.framer.push(bytes).map_err(|e| e.to_string())?;
        for line in lines {
            self.on_line(&line);
        }
        Ok(())
    }

    fn on_line(&mut self, line: &str) {
        let frame = match RelayFrame::from_line(line) {
            Ok(frame) => frame,
            Err(e) => {
                trace!(error = %e, "Skipping unparseable relay line");
                return;
            }
        };

        let mut changed = false;
        if !frame.content.is_empty() {
            self.content.push_str(&frame.content);
            changed = true;
        }
        if let Some(stats) = frame.stats {
            self.stats = Some(stats);
            changed = true;
        }

        if changed {
            self.live.send_replace(LiveView {
                content: self.content.clone(),
                stats: self.stats.clone(),
            });
        }
    }

    fn cancelled(self) -> StreamOutcome {
        StreamOutcome::Cancelled {
            content: self.content,
            stats: self.stats,
        }
    }

    fn failed(self, message: String) -> StreamOutcome {
        StreamOutcome::Failed {
            content: self.content,
            stats: self.stats,
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::CollectingNotifier;
    use lumen_protocol::DEFAULT_MAX_LINE_BYTES;
    use pretty_assertions::assert_eq;
    use std::io;
    use std::time::Duration;

    struct Harness {
        phase: watch::Sender<Phase>,
        live: watch::Sender<LiveView>,
        notifier: CollectingNotifier,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                phase: watch::Sender::new(Phase::Sending),
                live: watch::Sender::new(LiveView::default()),
                notifier: CollectingNotifier::new(),
            }
        }

        fn consumer(&self, slow_after: Option<Duration>) -> StreamConsumer<'_> {
            StreamConsumer::new(
                &self.phase,
                &self.live,
                &self.notifier,
                IdleWatchdog::new(slow_after),
                DEFAULT_MAX_LINE_BYTES,
            )
        }
    }

    fn chunks(parts: &[&'static str]) -> Vec<Result<Bytes, io::Error>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn test_accumulates_split_frames() {
        let harness = Harness::new();
        let body = chunks(&[
            "{\"content\":\"He",
            "l\"}\n{\"content\":\"lo\"}\n{\"content\":\"\",\"stats\":{\"tokensPer",
            "Second\":2.5,\"totalTokens\":5}}\n",
        ]);

        let outcome = harness
            .consumer(None)
            .run(futures::stream::iter(body), &CancellationToken::new())
            .await;

        let StreamOutcome::Completed { content, stats } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(content, "Hello");
        assert_eq!(stats.unwrap().tokens_per_second, Some(2.5));
        assert_eq!(*harness.phase.borrow(), Phase::Streaming);
        assert_eq!(harness.live.borrow().content, "Hello");
    }

    #[tokio::test]
    async fn test_skips_unparseable_lines() {
        let harness = Harness::new();
        let body = chunks(&["not json\n{\"content\":\"ok\"}\n\n"]);
        let outcome = harness
            .consumer(None)
            .run(futures::stream::iter(body), &CancellationToken::new())
            .await;
        assert!(matches!(outcome, StreamOutcome::Completed { content, .. } if content == "ok"));
    }

    #[tokio::test]
    async fn test_read_error_keeps_partial_content() {
        let harness = Harness::new();
        let body = vec![
            Ok(Bytes::from_static(b"{\"content\":\"par\"}\n")),
            Err(io::Error::other("connection reset")),
        ];
        let outcome = harness
            .consumer(None)
            .run(futures::stream::iter(body), &CancellationToken::new())
            .await;

        match outcome {
            StreamOutcome::Failed { content, message, .. } => {
                assert_eq!(content, "par");
                assert!(message.contains("connection reset"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_pending_read() {
        let harness = Harness::new();
        let token = CancellationToken::new();
        let body = futures::stream::iter(chunks(&["{\"content\":\"Hal\"}\n"]))
            .chain(futures::stream::pending());

        let canceller = token.clone();
        let mut live = harness.live.subscribe();
        let watcher = async move {
            live.wait_for(|v| v.content == "Hal").await.unwrap();
            canceller.cancel();
        };

        let (outcome, ()) = tokio::join!(harness.consumer(None).run(body, &token), watcher);
        assert_eq!(
            outcome,
            StreamOutcome::Cancelled {
                content: "Hal".to_string(),
                stats: None
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_response_warns_once() {
        let harness = Harness::new();
        let token = CancellationToken::new();
        let body = futures::stream::pending::<Result<Bytes, io::Error>>();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            canceller.cancel();
        });

        let outcome = harness
            .consumer(Some(Duration::from_secs(5)))
            .run(body, &token)
            .await;

        assert!(matches!(outcome, StreamOutcome::Cancelled { .. }));
        let notices = harness.notifier.notices();
        assert_eq!(notices.len(), 1);
        assert!(matches!(&notices[0], Notice::Warning(m) if m.contains("slow response")));
    }
}
