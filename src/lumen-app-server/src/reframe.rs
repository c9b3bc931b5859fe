//! Translation of upstream events into client-facing frames.

use lumen_ollama::UpstreamEvent;
use lumen_protocol::{GenerationStats, RelayFrame};

/// Turns decoded upstream events into [`RelayFrame`]s.
///
/// Emits at most one terminal frame; anything after completion is dropped.
#[derive(Debug, Default)]
pub struct Reframer {
    completed: bool,
}

impl Reframer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal frame has been produced.
    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Frames to send for one upstream event, in order.
    pub fn translate(&mut self, event: UpstreamEvent) -> Vec<RelayFrame> {
        if self.completed {
            return Vec::new();
        }

        match event {
            UpstreamEvent::ContentDelta { text } => vec![RelayFrame::content(text)],
            UpstreamEvent::Completion {
                counters,
                trailing_text,
            } => {
                self.completed = true;
                let stats = GenerationStats::from_counters(&counters);

                let mut frames = Vec::with_capacity(2);
                if let Some(text) = trailing_text.filter(|t| !t.is_empty()) {
                    frames.push(RelayFrame::content(text));
                }
                frames.push(RelayFrame::terminal(stats));
                frames
            }
            UpstreamEvent::Unrecognized => Vec::new(),
        }
    }
}
