//! Cooperative cancellation for blocking accept and connect

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag that aborts a pending accept or serving loop
///
/// Clones share the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create an untriggered token
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
