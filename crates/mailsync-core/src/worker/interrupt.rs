//! Cooperative interrupt flag.

use std::sync::{Arc, Mutex, PoisonError};

/// Request to stop the current rescan early.
///
/// Any holder may raise it; the worker clears it once it has stopped. The
/// index receives a clone with every scan and should poll it between
/// messages.
#[derive(Debug, Clone, Default)]
pub struct InterruptSignal(Arc<Mutex<Option<String>>>);

impl InterruptSignal {
    /// Create a lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal. A later reason replaces an earlier one.
    pub fn raise(&self, reason: impl Into<String>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Whether the signal is raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Reason given when the signal was raised.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Lower the signal, returning the reason it carried.
    pub fn clear(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
