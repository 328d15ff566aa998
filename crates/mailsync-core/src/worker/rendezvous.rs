//! Hand-off between a foreground caller of `rescan_now` and the worker.
//!
//! Each request is a pair of one-shot signals. The worker fires every queued
//! "started" signal when it begins a cycle and every "finished" signal when
//! the cycle is over, however it ended. Dropping a [`RescanBatch`] sends the
//! "finished" signals, so a panicking cycle cannot strand a caller.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::InterruptSignal;
use crate::index::Session;

const USER_ABORTED: &str = "User aborted";

/// A queued on-demand rescan.
#[derive(Debug)]
pub(crate) struct RescanRequest {
    started: oneshot::Sender<()>,
    finished: oneshot::Sender<()>,
    session: Option<Arc<Session>>,
}

/// Caller side of a [`RescanRequest`].
#[derive(Debug)]
pub(crate) struct RescanTicket {
    started: oneshot::Receiver<()>,
    finished: oneshot::Receiver<()>,
}

/// Create a request and the ticket to wait on it.
pub(crate) fn request(session: Option<Arc<Session>>) -> (RescanRequest, RescanTicket) {
    let (started_tx, started_rx) = oneshot::channel();
    let (finished_tx, finished_rx) = oneshot::channel();
    (
        RescanRequest {
            started: started_tx,
            finished: finished_tx,
            session,
        },
        RescanTicket {
            started: started_rx,
            finished: finished_rx,
        },
    )
}

/// Pending requests of one worker.
#[derive(Debug, Default)]
pub(crate) struct RescanQueue(Mutex<Vec<RescanRequest>>);

impl RescanQueue {
    pub(crate) fn push(&self, request: RescanRequest) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Take every pending request, signalling "started" on each.
    pub(crate) fn drain(&self) -> RescanBatch {
        let pending =
            std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        let mut batch = RescanBatch::default();
        for request in pending {
            // The caller may have given up already.
            let _ = request.started.send(());
            if request.session.is_some() {
                batch.session = request.session;
            }
            batch.finished.push(request.finished);
        }
        batch
    }
}

/// Requests whose cycle is running.
#[derive(Debug, Default)]
pub(crate) struct RescanBatch {
    finished: Vec<oneshot::Sender<()>>,
    session: Option<Arc<Session>>,
}

impl RescanBatch {
    /// The session supplied last, if any caller supplied one.
    pub(crate) fn session(&self) -> Option<Arc<Session>> {
        self.session.clone()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.finished.is_empty()
    }

    /// Signal "finished" to every caller.
    pub(crate) fn finish(self) {
        drop(self);
    }
}

impl Drop for RescanBatch {
    fn drop(&mut self) {
        for finished in self.finished.drain(..) {
            let _ = finished.send(());
        }
    }
}

/// Raises the interrupt if a caller stops waiting before its rescan is done.
struct AbortOnDrop {
    interrupt: Option<InterruptSignal>,
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(interrupt) = self.interrupt.take() {
            interrupt.raise(USER_ABORTED);
        }
    }
}

impl RescanTicket {
    /// Wait for the rescan to start, run `on_started`, then wait for it to
    /// finish.
    ///
    /// Returns `false` if the worker shut down or went away first.
    pub(crate) async fn wait<F, Fut>(
        self,
        cancel: &CancellationToken,
        interrupt: &InterruptSignal,
        on_started: F,
    ) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut guard = AbortOnDrop {
            interrupt: Some(interrupt.clone()),
        };

        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            res = self.started => res.is_ok(),
        };
        if !started {
            guard.interrupt = None;
            return false;
        }

        on_started().await;

        let finished = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            res = self.finished => res.is_ok(),
        };
        guard.interrupt = None;
        finished
    }
}
