//! Mailbox backends.
//!
//! A backend knows how to recognise its kind of mailbox on disk and how to
//! tell cheaply whether a mailbox changed since it was last rescanned. The
//! engine never reads messages through a backend; the index does that.
//!
//! | Protocol            | Backend            | Change probe                 |
//! |---------------------|--------------------|------------------------------|
//! | `mbox`              | [`MboxBackend`]    | file size and mtime          |
//! | `maildir`           | [`MaildirBackend`] | mtimes of `new/` and `cur/`  |
//! | `imap`, `imap_ssl`  | [`RemoteBackend`]  | UIDVALIDITY, UIDNEXT, EXISTS |

mod maildir;
mod mbox;
mod remote;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::sync::Mutex;

pub use maildir::MaildirBackend;
pub use mbox::MboxBackend;
pub use remote::{FolderStatus, RemoteBackend, RemoteFolderProbe};

use crate::config::{MailboxEntry, MailboxKey, Protocol};
use crate::index::MailboxOpener;
use crate::{Error, Result};

/// Snapshot of a mailbox taken by a change probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fingerprint {
    /// A single file.
    File {
        /// Size in bytes.
        len: u64,
        /// Last modification time.
        modified: Option<SystemTime>,
    },
    /// A maildir.
    Maildir {
        /// Modification time of `new/`.
        new: Option<SystemTime>,
        /// Modification time of `cur/`.
        cur: Option<SystemTime>,
    },
    /// A remote folder.
    Remote(FolderStatus),
}

/// Scratch space filled by [`MailboxBackend::has_changed`] and consumed by
/// [`MailboxBackend::mark_rescanned`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeState {
    /// What the probe saw.
    pub fingerprint: Option<Fingerprint>,
}

/// Capabilities every mailbox backend provides.
#[async_trait]
pub trait MailboxBackend: MailboxOpener {
    /// Protocol this backend serves.
    fn protocol(&self) -> Protocol;

    /// Open local handles or connect to the server. Idempotent.
    ///
    /// Returns `false` if the source is not usable right now.
    async fn open(&self) -> Result<bool>;

    /// Whether `path` looks like a mailbox of this kind.
    async fn is_mailbox(&self, path: &Path) -> bool {
        let _ = path;
        false
    }

    /// Cheap check whether `mailbox` (found at `path`) changed since its
    /// last rescan. Records what it saw in `probe`.
    ///
    /// Backends that cannot tell always report a change.
    async fn has_changed(
        &self,
        mailbox: &MailboxEntry,
        path: &Path,
        probe: &mut ProbeState,
    ) -> Result<bool> {
        let _ = (mailbox, path, probe);
        Ok(true)
    }

    /// Remember the state recorded in `probe` as the new baseline.
    async fn mark_rescanned(&self, mailbox: &MailboxEntry, probe: &ProbeState) {
        let _ = (mailbox, probe);
    }
}

/// Last committed fingerprint per mailbox.
#[derive(Debug, Default)]
pub(crate) struct Baselines(Mutex<HashMap<MailboxKey, Fingerprint>>);

impl Baselines {
    /// Whether `fingerprint` differs from the committed baseline.
    pub(crate) async fn differs(&self, key: &MailboxKey, fingerprint: &Fingerprint) -> bool {
        self.0.lock().await.get(key) != Some(fingerprint)
    }

    /// Commit the fingerprint recorded in `probe`, if any.
    pub(crate) async fn commit(&self, key: &MailboxKey, probe: &ProbeState) {
        if let Some(fingerprint) = &probe.fingerprint {
            self.0.lock().await.insert(key.clone(), fingerprint.clone());
        }
    }
}

/// Map a missing file to [`Error::NoSuchMailbox`].
pub(crate) fn missing_as_no_such(key: &MailboxKey, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::NoSuchMailbox(key.clone())
    } else {
        Error::Io(err)
    }
}

/// Create the backend for a protocol.
///
/// Remote protocols need a `remote` probe to talk to the server.
///
/// # Errors
///
/// Returns [`Error::Config`] if a remote protocol has no probe.
pub fn for_protocol(
    protocol: Protocol,
    remote: Option<Arc<dyn RemoteFolderProbe>>,
) -> Result<Arc<dyn MailboxBackend>> {
    match protocol {
        Protocol::Mbox => Ok(Arc::new(MboxBackend::new())),
        Protocol::Maildir => Ok(Arc::new(MaildirBackend::new())),
        Protocol::Imap | Protocol::ImapSsl => {
            let probe = remote.ok_or_else(|| {
                Error::Config(format!("{} source needs a remote probe", protocol.as_str()))
            })?;
            Ok(Arc::new(RemoteBackend::new(protocol, probe)))
        }
    }
}

/// Create the backend for a protocol given by name.
///
/// # Errors
///
/// Returns [`Error::UnknownProtocol`] for unsupported names.
pub fn from_name(
    name: &str,
    remote: Option<Arc<dyn RemoteFolderProbe>>,
) -> Result<Arc<dyn MailboxBackend>> {
    for_protocol(name.parse()?, remote)
}
