//! Cooperative cancellation of the in-flight generation.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;

type Slot = Arc<Mutex<Option<CancellationToken>>>;

fn lock(slot: &Slot) -> MutexGuard<'_, Option<CancellationToken>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Owns the cancellation token of the current generation, if any.
///
/// Each generation gets a fresh token; a cancelled token is never reused.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    current: Slot,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a fresh token for a new generation.
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *lock(&self.current) = Some(token.clone());
        token
    }

    /// Cancel the current generation. Returns false when none is active.
    pub fn cancel(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Unbind the token once the generation has been finalized.
    pub fn finish(&self) {
        lock(&self.current).take();
    }

    /// A handle other tasks can use to cancel.
    pub fn handle(&self) -> CancelHandle {
        CancelHandle {
            current: Arc::clone(&self.current),
        }
    }
}

/// Cloneable cancel-only view of a [`CancellationController`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    current: Slot,
}

impl CancelHandle {
    /// Cancel the current generation. Returns false when none is active.
    pub fn cancel(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_without_session_is_noop() {
        let controller = CancellationController::new();
        assert!(!controller.cancel());
        assert!(!controller.handle().cancel());
    }

    #[test]
    fn test_begin_cancel_finish() {
        let controller = CancellationController::new();
        let token = controller.begin();

        assert!(controller.handle().cancel());
        assert!(token.is_cancelled());

        controller.finish();
        assert!(!controller.cancel());
        assert!(!controller.handle().cancel());
    }

    #[test]
    fn test_tokens_are_single_shot() {
        let controller = CancellationController::new();
        let first = controller.begin();
        controller.cancel();
        controller.finish();

        let second = controller.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
