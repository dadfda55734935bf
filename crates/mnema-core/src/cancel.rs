//! Cooperative cancellation for long write operations.
//!
//! Every write path accepts a `CancelToken` and checks it between stages:
//! once before staging and once immediately before commit. A cancelled
//! operation rolls back (nothing staged reaches the store) and emits no
//! event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::MnemaError;

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Bail out with `MnemaError::Cancelled` if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), MnemaError> {
        if self.is_cancelled() {
            Err(MnemaError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_passes_checkpoint() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn cancelled_token_fails_checkpoint_on_all_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(matches!(clone.checkpoint(), Err(MnemaError::Cancelled)));
    }
}
