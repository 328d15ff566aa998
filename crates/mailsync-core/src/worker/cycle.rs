//! One sync cycle: probe mailboxes, rescan the changed ones, then look for
//! new mailboxes if there is budget left.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, error, info, warn};

use super::{ExclusiveSection, Inner, RescanOutcome};
use crate::backend::ProbeState;
use crate::config::{MailboxEntry, MailboxKey};
use crate::index::{MailboxOpener, ProcessNew, ScanRequest, UnreadTagger};
use crate::{Error, Result};

const QUITTING: &str = "Quitting";

/// Clears the `rescanning` flag on every exit path.
struct Rescanning<'a>(&'a AtomicBool);

impl Drop for Rescanning<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn rescan_label(key: &MailboxKey, stop_after: Option<usize>) -> String {
    match stop_after {
        Some(n) => format!("Rescan({key}, {n})"),
        None => format!("Rescan({key}, None)"),
    }
}

fn summary(rescanned: usize, errors: usize) -> String {
    if errors > 0 {
        format!("Rescanned {rescanned} mailboxes, failed to rescan {errors}")
    } else {
        format!("Rescanned {rescanned} mailboxes")
    }
}

impl Inner {
    pub(super) async fn sync_mail_locked(
        &self,
        section: &mut ExclusiveSection<'_>,
    ) -> Result<usize> {
        self.last_rescan_count.store(0, Ordering::Release);
        self.interrupt.clear();

        let mut budget = self.settings.batch_size();
        let mut mailboxes: Vec<MailboxEntry> =
            self.config.read().await.mailboxes.values().cloned().collect();
        mailboxes.shuffle(&mut *self.rng.lock().unwrap_or_else(PoisonError::into_inner));

        let mut rescanned = 0;
        let mut errors = 0;
        let mut interrupted = None;

        for mailbox in &mailboxes {
            interrupted = self.take_interrupt().await;
            if interrupted.is_some() {
                break;
            }

            match self.sync_one(section, mailbox, &mut budget).await {
                Ok(Some(true)) => rescanned += 1,
                Ok(Some(false) | None) => {}
                Err(e) if e.is_per_mailbox() => {
                    warn!(source = %self.source_id, key = %mailbox.key, "Rescan failed: {e}");
                    errors += 1;
                }
                Err(e) => {
                    error!(source = %self.source_id, key = %mailbox.key, "Internal error: {e}");
                    self.log_status("Internal error").await;
                    return Err(e);
                }
            }
        }

        if interrupted.is_none() {
            interrupted = self.take_interrupt().await;
        }
        if interrupted.is_none() && budget > 0 && errors == 0 {
            self.log_status("Checking for new mailboxes").await;
            let paths = self.config.read().await.discovery.paths.clone();
            if !self.discover_mailboxes_locked(&paths).await? {
                warn!(source = %self.source_id, "Too many paths, discovery abandoned");
            }
        }

        let message = match &interrupted {
            Some(reason) => format!("Interrupted: {reason}. {}", summary(rescanned, errors)),
            None => summary(rescanned, errors),
        };
        info!(source = %self.source_id, rescanned, errors, "{message}");
        self.log_status(message).await;
        self.last_rescan_count.store(rescanned, Ordering::Release);
        Ok(rescanned)
    }

    /// If shutdown or an interrupt is pending, lower the interrupt and
    /// return its reason.
    async fn take_interrupt(&self) -> Option<String> {
        if !self.cancel.is_cancelled() && !self.interrupt.is_raised() {
            return None;
        }
        let reason = self
            .interrupt
            .clear()
            .unwrap_or_else(|| QUITTING.to_string());
        self.log_status(format!("Interrupted: {reason}")).await;
        Some(reason)
    }

    /// Probe one mailbox and rescan it if needed.
    ///
    /// `Ok(None)` means the mailbox was not looked at, `Ok(Some(true))` that
    /// it was rescanned and its baseline moved. An unavailable mailbox is
    /// reported as [`Error::NoSuchMailbox`].
    async fn sync_one(
        &self,
        section: &mut ExclusiveSection<'_>,
        mailbox: &MailboxEntry,
        budget: &mut usize,
    ) -> Result<Option<bool>> {
        if *budget == 0 || !mailbox.policy.is_scannable() {
            return Ok(None);
        }
        let path = match self.registry.resolve_source(&mailbox.path).await {
            Ok(Some(path)) => path,
            Ok(None) => return Ok(None),
            Err(Error::InvalidMailbox(reason)) => {
                debug!(key = %mailbox.key, "Cannot probe: {reason}");
                return Err(Error::NoSuchMailbox(mailbox.key.clone()));
            }
            Err(e) => return Err(e),
        };

        let mut probe = ProbeState::default();
        let changed = self.backend.has_changed(mailbox, &path, &mut probe).await?;
        if !changed && !self.forced_probe() {
            return Ok(None);
        }

        match self
            .rescan_mailbox_locked(section, &mailbox.key, Some(*budget))
            .await?
        {
            RescanOutcome::Processed(count) => {
                *budget = budget.saturating_sub(count);
                if count > 0
                    && *budget > 0
                    && !self.interrupt.is_raised()
                    && !self.cancel.is_cancelled()
                {
                    self.backend.mark_rescanned(mailbox, &probe).await;
                    Ok(Some(true))
                } else {
                    Ok(Some(false))
                }
            }
            RescanOutcome::Unavailable => Err(Error::NoSuchMailbox(mailbox.key.clone())),
        }
    }

    /// Whether to rescan an unchanged mailbox anyway.
    fn forced_probe(&self) -> bool {
        let odds = self.settings.forced_probe_odds;
        odds > 0
            && self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_ratio(1, odds)
    }

    pub(super) async fn rescan_mailbox_locked(
        &self,
        section: &mut ExclusiveSection<'_>,
        key: &MailboxKey,
        stop_after: Option<usize>,
    ) -> Result<RescanOutcome> {
        if self.rescanning.swap(true, Ordering::AcqRel) {
            return Ok(RescanOutcome::Unavailable);
        }
        let _rescanning = Rescanning(&self.rescanning);
        let _label = section.relabel(rescan_label(key, stop_after));

        match self.rescan_unguarded(section, key, stop_after).await {
            Err(Error::InvalidMailbox(reason)) => {
                debug!(source = %self.source_id, %key, "Invalid mailbox: {reason}");
                Ok(RescanOutcome::Unavailable)
            }
            other => other,
        }
    }

    async fn rescan_unguarded(
        &self,
        section: &mut ExclusiveSection<'_>,
        key: &MailboxKey,
        stop_after: Option<usize>,
    ) -> Result<RescanOutcome> {
        let mailbox = self
            .config
            .read()
            .await
            .mailbox(key)
            .cloned()
            .ok_or_else(|| Error::NoSuchMailbox(key.clone()))?;
        if !mailbox.policy.is_scannable() {
            return Ok(RescanOutcome::Processed(0));
        }
        let Some(path) = self.registry.resolve(&mailbox).await? else {
            return Ok(RescanOutcome::Processed(0));
        };

        self.log_status(format!("Rescanning: {}", path.display()))
            .await;

        let process_new: Option<Arc<dyn ProcessNew>> = if mailbox.process_new {
            match &self.process_new {
                Some(hook) => Some(hook.clone()),
                None => Some(Arc::new(UnreadTagger::from_store(self.tags.as_ref()).await?)),
            }
        } else {
            None
        };
        let opener: Arc<dyn MailboxOpener> = self.backend.clone();

        let request = ScanRequest {
            session: self.session(),
            key: key.clone(),
            path,
            opener,
            process_new,
            apply_tags: mailbox.effective_tags(),
            stop_after,
            interrupt: self.interrupt.clone(),
        };
        let count = section.unlocked(self.index.scan(request)).await?;
        debug!(source = %self.source_id, %key, count, "Rescanned");
        Ok(RescanOutcome::Processed(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_summaries() {
        let key = MailboxKey::from_index(36);
        assert_eq!(rescan_label(&key, Some(2500)), "Rescan(0010, 2500)");
        assert_eq!(rescan_label(&key, None), "Rescan(0010, None)");
        assert_eq!(summary(3, 0), "Rescanned 3 mailboxes");
        assert_eq!(summary(0, 2), "Rescanned 0 mailboxes, failed to rescan 2");
    }
}
