//! The background loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::PoisonError;
use std::time::Duration;

use futures::FutureExt;
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Inner, SHUT_DOWN};
use crate::Result;
use crate::status::StatusFlag;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic".to_string()
    }
}

impl Inner {
    pub(super) async fn run(&self) {
        info!(source = %self.source_id, "Mail source starting");
        {
            let _section = self.exclusive.enter("LoadState").await;
            if let Err(e) = self.load_state_locked().await {
                warn!(source = %self.source_id, "Failed to load status: {e}");
            }
        }
        self.status.lock().await.flag = StatusFlag::Running;
        self.save_state().await;

        let mut requested = false;
        loop {
            if requested {
                requested = false;
                if self.cancel.is_cancelled() {
                    break;
                }
            } else {
                let interval = self.config.read().await.interval();
                if !self.sleep(self.jitter(interval)).await {
                    break;
                }
            }
            if !self.index.is_ready() {
                debug!(source = %self.source_id, "Index not ready, skipping");
                continue;
            }

            let batch = self.rescans.drain();
            if let Some(session) = batch.session() {
                self.set_session(session);
            }
            if !batch.is_empty() {
                debug!(source = %self.source_id, "Running requested rescan");
            }
            self.status.lock().await.data.traceback = None;

            let failure = match AssertUnwindSafe(self.cycle()).catch_unwind().await {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{e:?}")),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };

            self.set_session(self.default_session.clone());
            batch.finish();

            if let Some(traceback) = failure {
                error!(source = %self.source_id, %traceback, "Internal error in sync cycle");
                self.status.lock().await.data.traceback = Some(traceback);
                self.log_status("Internal error!  Sleeping...").await;
                self.sleep(self.settings.internal_error_sleep).await;
                // A rescan_now during the back-off already spent its wake.
                requested = !self.rescans.is_empty();
            }
        }

        // Release anyone who queued a rescan after the last cycle.
        self.rescans.drain().finish();
        self.status.lock().await.flag = StatusFlag::Complete;
        self.log_status(SHUT_DOWN).await;
        info!(source = %self.source_id, "Mail source shut down");
    }

    async fn cycle(&self) -> Result<()> {
        let opened = {
            let _section = self.exclusive.enter("Open").await;
            self.backend.open().await?
        };
        if opened {
            let mut section = self.exclusive.enter("SyncMail").await;
            self.sync_mail_locked(&mut section).await?;
        } else {
            debug!(source = %self.source_id, "Source not available");
        }

        let last_saved = *self.last_saved.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.cancel.is_cancelled() && last_saved.elapsed() >= self.settings.save_state_interval
        {
            self.save_state().await;
        }
        Ok(())
    }

    fn jitter(&self, interval: Duration) -> Duration {
        let max = self.settings.jitter.as_secs();
        if max == 0 {
            return interval;
        }
        let extra = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..=max);
        interval + Duration::from_secs(extra)
    }

    /// Sleep unless woken or cancelled. Returns whether the worker should
    /// keep going.
    async fn sleep(&self, duration: Duration) -> bool {
        let duration = self.settings.scale_sleep(duration);
        *self
            .sleeping_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + duration);

        tokio::select! {
            () = self.cancel.cancelled() => {}
            () = self.wake.notified() => {}
            () = tokio::time::sleep(duration) => {}
        }

        *self
            .sleeping_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
        !self.cancel.is_cancelled()
    }
}
