//! Remote (IMAP) folders.
//!
//! The engine does not speak IMAP itself. A [`RemoteFolderProbe`] supplied by
//! the embedding application connects to the server and reports `STATUS`
//! counters; a folder changed when any of them moved.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Baselines, Fingerprint, MailboxBackend, ProbeState};
use crate::config::{MailboxEntry, Protocol};
use crate::index::MailboxOpener;
use crate::{Error, Result};

/// Counters reported by a `STATUS` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FolderStatus {
    /// UIDVALIDITY; a new value means every UID was reassigned.
    pub uid_validity: u32,
    /// Next UID the server will assign.
    pub uid_next: u32,
    /// Number of messages in the folder.
    pub exists: u32,
}

/// Connection to a mail server, as far as change detection needs one.
#[async_trait]
pub trait RemoteFolderProbe: Send + Sync {
    /// Connect and log in. Called again after a failure.
    async fn connect(&self) -> Result<()>;

    /// Status counters of a folder.
    ///
    /// [`Error::Remote`] here is taken to concern this folder only.
    async fn folder_status(&self, folder: &str) -> Result<FolderStatus>;
}

/// Backend for IMAP sources.
pub struct RemoteBackend {
    protocol: Protocol,
    probe: Arc<dyn RemoteFolderProbe>,
    connected: AtomicBool,
    baselines: Baselines,
}

impl RemoteBackend {
    /// Create a backend talking to the server through `probe`.
    #[must_use]
    pub fn new(protocol: Protocol, probe: Arc<dyn RemoteFolderProbe>) -> Self {
        Self {
            protocol,
            probe,
            connected: AtomicBool::new(false),
            baselines: Baselines::default(),
        }
    }

    async fn ensure_connected(&self) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            self.probe.connect().await?;
            self.connected.store(true, Ordering::Release);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("protocol", &self.protocol)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MailboxOpener for RemoteBackend {}

#[async_trait]
impl MailboxBackend for RemoteBackend {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    async fn open(&self) -> Result<bool> {
        match self.ensure_connected().await {
            Ok(()) => Ok(true),
            Err(Error::Remote(reason)) => {
                warn!(protocol = self.protocol.as_str(), %reason, "Cannot connect");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn has_changed(
        &self,
        mailbox: &MailboxEntry,
        path: &Path,
        probe: &mut ProbeState,
    ) -> Result<bool> {
        self.ensure_connected().await?;
        let folder = path.to_string_lossy();
        let status = match self.probe.folder_status(&folder).await {
            Ok(status) => status,
            Err(Error::Remote(reason)) => {
                // Reconnect next time.
                self.connected.store(false, Ordering::Release);
                warn!(key = %mailbox.key, %folder, %reason, "Folder status failed");
                return Err(Error::NoSuchMailbox(mailbox.key.clone()));
            }
            Err(e) => {
                self.connected.store(false, Ordering::Release);
                return Err(e);
            }
        };
        debug!(key = %mailbox.key, %folder, ?status, "Folder status");
        let fingerprint = Fingerprint::Remote(status);
        let changed = self.baselines.differs(&mailbox.key, &fingerprint).await;
        probe.fingerprint = Some(fingerprint);
        Ok(changed)
    }

    async fn mark_rescanned(&self, mailbox: &MailboxEntry, probe: &ProbeState) {
        self.baselines.commit(&mailbox.key, probe).await;
    }
}
