//! User-facing notices.

use std::sync::Mutex;

/// A notice raised by a chat session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Warning(String),
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Self::Info(m) | Self::Warning(m) | Self::Error(m) => m,
        }
    }
}

/// Sink for notices.
pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Logs notices through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice {
            Notice::Info(m) => tracing::info!(notice = %m),
            Notice::Warning(m) => tracing::warn!(notice = %m),
            Notice::Error(m) => tracing::error!(notice = %m),
        }
    }
}

/// Records notices so a caller can drain and display them.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the recorded notices.
    pub fn notices(&self) -> Vec<Notice> {
        self.notices
            .lock()
            .map(|n| n.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Remove and return the recorded notices.
    pub fn take(&self) -> Vec<Notice> {
        match self.notices.lock() {
            Ok(mut n) => std::mem::take(&mut *n),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notice: Notice) {
        match self.notices.lock() {
            Ok(mut n) => n.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_notifier_drains() {
        let notifier = CollectingNotifier::new();
        notifier.notify(Notice::Warning("slow response".to_string()));
        notifier.notify(Notice::Error("relay down".to_string()));

        let messages: Vec<_> = notifier.take().iter().map(|n| n.message().to_string()).collect();
        assert_eq!(messages, vec!["slow response", "relay down"]);
        assert!(notifier.notices().is_empty());
    }
}
