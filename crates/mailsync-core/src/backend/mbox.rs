//! Local Unix mbox files.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;

use super::{Baselines, Fingerprint, MailboxBackend, ProbeState, missing_as_no_such};
use crate::Result;
use crate::config::{MailboxEntry, Protocol};
use crate::index::MailboxOpener;

const FROM_LINE: &[u8] = b"From ";

/// Backend for mbox files.
#[derive(Debug, Default)]
pub struct MboxBackend {
    baselines: Baselines,
}

impl MboxBackend {
    /// Create a new backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MailboxOpener for MboxBackend {}

#[async_trait]
impl MailboxBackend for MboxBackend {
    fn protocol(&self) -> Protocol {
        Protocol::Mbox
    }

    async fn open(&self) -> Result<bool> {
        Ok(true)
    }

    async fn is_mailbox(&self, path: &Path) -> bool {
        let Ok(mut file) = tokio::fs::File::open(path).await else {
            return false;
        };
        if !file.metadata().await.is_ok_and(|m| m.is_file()) {
            return false;
        }
        let mut head = [0u8; FROM_LINE.len()];
        file.read_exact(&mut head).await.is_ok() && head == FROM_LINE
    }

    async fn has_changed(
        &self,
        mailbox: &MailboxEntry,
        path: &Path,
        probe: &mut ProbeState,
    ) -> Result<bool> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| missing_as_no_such(&mailbox.key, e))?;
        let fingerprint = Fingerprint::File {
            len: meta.len(),
            modified: meta.modified().ok(),
        };
        let changed = self.baselines.differs(&mailbox.key, &fingerprint).await;
        probe.fingerprint = Some(fingerprint);
        Ok(changed)
    }

    async fn mark_rescanned(&self, mailbox: &MailboxEntry, probe: &ProbeState) {
        self.baselines.commit(&mailbox.key, probe).await;
    }
}
