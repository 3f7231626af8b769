//! Cooperative cancellation for load operations.
//!
//! A token is cloned into an async call chain and checked before and after
//! each I/O suspension point.  Cancellation never unwinds mid-operation;
//! sub-steps observe the token and stop cleanly before mutating shared
//! state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::VaultError;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Bail out of the current operation if cancellation was requested.
    pub fn check(&self) -> Result<(), VaultError> {
        if self.is_cancelled() {
            Err(VaultError::Cancelled)
        } else {
            Ok(())
        }
    }
}
