//! Caller-driven cancellation
//!
//! A `CancelToken` is handed into every blocking operation. Cancellation
//! is level-triggered: once set, every subsequent wait fails with
//! `Error::Cancelled`. The token is separate from timeouts so callers can
//! tell "you asked me to stop" apart from "the peer was too slow".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheaply clonable cancellation handle
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe the request.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
