//! The relay's client-facing frame protocol.
//!
//! A relay response is a sequence of NDJSON objects of the form
//! `{"content": "...", "stats": {...}}`. Content frames carry non-empty text
//! and no stats; the single terminal frame carries empty text and the stats.

use serde::{Deserialize, Serialize};

use crate::stats::GenerationStats;

/// One line of a relay response stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayFrame {
    /// Incremental text, possibly empty.
    #[serde(default)]
    pub content: String,
    /// Final statistics, present only on the terminal frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<GenerationStats>,
}

impl RelayFrame {
    /// A frame carrying incremental text.
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            stats: None,
        }
    }

    /// The terminal frame carrying the generation statistics.
    pub fn terminal(stats: GenerationStats) -> Self {
        Self {
            content: String::new(),
            stats: Some(stats),
        }
    }

    /// Whether this frame ends the generation.
    pub fn is_terminal(&self) -> bool {
        self.stats.is_some()
    }

    /// Encode as a single newline-terminated JSON line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one line of a relay stream.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}
