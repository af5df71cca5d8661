//! Cooperative cancellation and progress reporting.
//!
//! Cancellation is polled, never forced: long operations call
//! [`CancellationToken::check`] at safe points and unwind with a
//! cancellation error. Thread interruption is deliberately not used.

use crate::core::error::{Result, WorkspaceTrackerError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag shared between a caller and a running
/// operation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Returns the cancellation error if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(WorkspaceTrackerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receiver for coarse progress messages from long operations.
pub trait ProgressSink {
    fn report(&mut self, message: &str);
}

/// Progress sink that drops everything.
#[derive(Debug, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_live() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
    }

    #[test]
    fn test_cancel_is_shared_across_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();

        assert!(token.is_cancelled());
        let err = token.check().unwrap_err();
        assert!(err.is_cancellation());
    }
}
