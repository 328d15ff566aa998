//! Per-worker serialization lock with an activity label.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::MutexGuard;

const IDLE: &str = "Idle";

/// The lock every mutating worker operation runs under, plus a label
/// describing what the holder is doing.
///
/// Labels form a stack. Each section or scope removes exactly its own entry
/// when dropped, so a section abandoned while it had the lock released
/// cannot clobber the label of whoever holds the lock now.
#[derive(Debug, Default)]
pub struct ExclusiveState {
    lock: tokio::sync::Mutex<()>,
    labels: Mutex<Vec<(u64, String)>>,
    next_id: AtomicU64,
}

impl ExclusiveState {
    /// Create an idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the lock and label the section.
    ///
    /// The label goes away when the section is dropped.
    pub async fn enter(&self, label: impl Into<String>) -> ExclusiveSection<'_> {
        let guard = self.lock.lock().await;
        let id = self.push_label(label.into());
        ExclusiveSection {
            state: self,
            guard: Some(guard),
            id,
        }
    }

    /// What the worker is currently doing.
    #[must_use]
    pub fn label(&self) -> String {
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map_or_else(|| IDLE.to_string(), |(_, label)| label.clone())
    }

    /// Whether some task holds the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    fn push_label(&self, label: String) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.labels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, label));
        id
    }

    fn remove_label(&self, id: u64) {
        let mut labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = labels.iter().rposition(|(entry, _)| *entry == id) {
            labels.remove(pos);
        }
    }
}

/// A held [`ExclusiveState`].
#[derive(Debug)]
pub struct ExclusiveSection<'a> {
    state: &'a ExclusiveState,
    guard: Option<MutexGuard<'a, ()>>,
    id: u64,
}

impl<'a> ExclusiveSection<'a> {
    /// Change the label until the returned scope is dropped.
    pub fn relabel(&self, label: impl Into<String>) -> LabelScope<'a> {
        LabelScope {
            state: self.state,
            id: self.state.push_label(label.into()),
        }
    }

    /// Run `fut` with the lock released, then take it back.
    ///
    /// The label stays as it is, so observers still see what the worker is
    /// waiting on.
    pub async fn unlocked<F: Future>(&mut self, fut: F) -> F::Output {
        self.guard = None;
        let output = fut.await;
        self.guard = Some(self.state.lock.lock().await);
        output
    }
}

impl Drop for ExclusiveSection<'_> {
    fn drop(&mut self) {
        self.state.remove_label(self.id);
        self.guard = None;
    }
}

/// Temporary label inside an [`ExclusiveSection`].
#[derive(Debug)]
pub struct LabelScope<'a> {
    state: &'a ExclusiveState,
    id: u64,
}

impl Drop for LabelScope<'_> {
    fn drop(&mut self) {
        self.state.remove_label(self.id);
    }
}
