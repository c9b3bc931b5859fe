//! Slow-response detection.

use std::time::Duration;

use tokio::time::Instant;

/// Fires once when no chunk has arrived within the window.
///
/// Never cancels anything; the caller decides what to do when it fires.
#[derive(Debug)]
pub struct IdleWatchdog {
    window: Option<Duration>,
    deadline: Instant,
    fired: bool,
}

impl IdleWatchdog {
    /// A watchdog with the given window, or a disabled one for `None`.
    pub fn new(window: Option<Duration>) -> Self {
        Self {
            window,
            deadline: Instant::now() + window.unwrap_or_default(),
            fired: false,
        }
    }

    /// Restart the window, typically on every received chunk.
    pub fn reset(&mut self) {
        if let Some(window) = self.window {
            self.deadline = Instant::now() + window;
        }
        self.fired = false;
    }

    /// Resolves when the window elapses. Pending forever once fired or when
    /// disabled, until the next [`reset`](Self::reset).
    pub async fn elapsed(&mut self) {
        if self.window.is_none() || self.fired {
            return std::future::pending().await;
        }
        tokio::time::sleep_until(self.deadline).await;
        self.fired = true;
    }
}
