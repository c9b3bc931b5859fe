//! Newline framing for NDJSON byte streams.
//!
//! Network reads do not respect record boundaries: one read may carry several
//! records, half a record, or half of a multi-byte UTF-8 character. The framer
//! buffers raw bytes and only decodes a line once its terminating `\n` has
//! arrived. A `\n` byte never occurs inside a multi-byte UTF-8 sequence, so
//! splitting at the byte level never tears a character apart.

use thiserror::Error;

/// Default cap on a single line (1 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Framing failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// A line grew past the configured cap without a newline.
    #[error("line exceeded framing limit (len={len}, limit={limit})")]
    LineTooLong { len: usize, limit: usize },
}

/// Incremental line splitter.
#[derive(Debug, Clone)]
pub struct LineFramer {
    pending: Vec<u8>,
    max_line_bytes: usize,
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl LineFramer {
    /// Create a framer with the default line cap.
    pub fn new() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }

    /// Create a framer with a custom line cap.
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line_bytes: max_line_bytes.max(1),
        }
    }

    /// Bytes currently held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feed one chunk and collect every line it completes.
    ///
    /// Lines are trimmed and empty lines are skipped. On error the buffer is
    /// discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, FrameError> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(index) = rest.iter().position(|byte| *byte == b'\n') {
            let (segment, tail) = rest.split_at(index);
            rest = &tail[1..];

            let line = if self.pending.is_empty() {
                self.check_len(segment.len())?;
                decode_line(segment)
            } else {
                self.check_len(self.pending.len() + segment.len())?;
                self.pending.extend_from_slice(segment);
                let line = decode_line(&self.pending);
                self.pending.clear();
                line
            };

            if let Some(line) = line {
                lines.push(line);
            }
        }

        self.check_len(self.pending.len() + rest.len())?;
        self.pending.extend_from_slice(rest);
        Ok(lines)
    }

    /// Flush the trailing fragment once the stream has ended.
    ///
    /// Upstreams may close without a newline after their last record.
    pub fn finish(&mut self) -> Option<String> {
        let pending = std::mem::take(&mut self.pending);
        decode_line(&pending)
    }

    fn check_len(&mut self, len: usize) -> Result<(), FrameError> {
        if len > self.max_line_bytes {
            self.pending.clear();
            return Err(FrameError::LineTooLong {
                len,
                limit: self.max_line_bytes,
            });
        }
        Ok(())
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
