//! Local maildir folders.

use std::path::Path;
use std::time::SystemTime;

use async_trait::async_trait;

use super::{Baselines, Fingerprint, MailboxBackend, ProbeState, missing_as_no_such};
use crate::Result;
use crate::config::{MailboxEntry, MailboxKey, Protocol};
use crate::index::MailboxOpener;

const SUBDIRS: [&str; 3] = ["cur", "new", "tmp"];

/// Backend for maildir folders.
#[derive(Debug, Default)]
pub struct MaildirBackend {
    baselines: Baselines,
}

impl MaildirBackend {
    /// Create a new backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

async fn modified(key: &MailboxKey, dir: &Path) -> Result<Option<SystemTime>> {
    let meta = tokio::fs::metadata(dir)
        .await
        .map_err(|e| missing_as_no_such(key, e))?;
    Ok(meta.modified().ok())
}

impl MailboxOpener for MaildirBackend {}

#[async_trait]
impl MailboxBackend for MaildirBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Maildir
    }

    async fn open(&self) -> Result<bool> {
        Ok(true)
    }

    async fn is_mailbox(&self, path: &Path) -> bool {
        for sub in SUBDIRS {
            if !tokio::fs::metadata(path.join(sub))
                .await
                .is_ok_and(|m| m.is_dir())
            {
                return false;
            }
        }
        true
    }

    async fn has_changed(
        &self,
        mailbox: &MailboxEntry,
        path: &Path,
        probe: &mut ProbeState,
    ) -> Result<bool> {
        let fingerprint = Fingerprint::Maildir {
            new: modified(&mailbox.key, &path.join("new")).await?,
            cur: modified(&mailbox.key, &path.join("cur")).await?,
        };
        let changed = self.baselines.differs(&mailbox.key, &fingerprint).await;
        probe.fingerprint = Some(fingerprint);
        Ok(changed)
    }

    async fn mark_rescanned(&self, mailbox: &MailboxEntry, probe: &ProbeState) {
        self.baselines.commit(&mailbox.key, probe).await;
    }
}
