//! Contract with the message index.
//!
//! The index does the real work of a rescan: it opens a mailbox, parses the
//! messages it has not seen yet and records them. The sync engine only
//! decides when to call it and with which mailbox, budget and tags.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::Result;
use crate::config::MailboxKey;
use crate::tags::{TagId, TagStore, TagType};
use crate::worker::InterruptSignal;

/// Execution context a scan runs on behalf of.
///
/// Workers scan with their own background session; a foreground caller of
/// [`MailSource::rescan_now`](crate::MailSource::rescan_now) may substitute
/// its own for one cycle, e.g. to get progress reported to a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Name used in logs.
    pub name: String,
    /// Whether a user is waiting on the result.
    pub interactive: bool,
}

impl Session {
    /// Session of a background worker.
    #[must_use]
    pub fn background(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interactive: false,
        }
    }

    /// Session of a user waiting in the foreground.
    #[must_use]
    pub fn interactive(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            interactive: true,
        }
    }
}

/// Lets a backend take over how the index opens a mailbox.
pub trait MailboxOpener: Send + Sync {
    /// Return an alternative location for the index to read `path` from.
    ///
    /// Returning `None` declines; the index then opens `path` itself.
    fn open_mailbox(&self, key: &MailboxKey, path: &Path) -> Option<PathBuf> {
        let _ = (key, path);
        None
    }
}

/// A message the index has not seen before.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewMessage {
    /// Value of the `Status:` header (`RO` means read), if any.
    pub status: Option<String>,
    /// Whether the message is flagged as deleted in its mailbox.
    pub deleted: bool,
}

/// Hook deciding what happens to newly found messages.
pub trait ProcessNew: Send + Sync {
    /// Return whether the message should be treated as new, adding any
    /// keywords it should be indexed with.
    fn process_new(
        &self,
        message: &NewMessage,
        timestamp: DateTime<Utc>,
        keywords: &mut HashSet<String>,
        snippet: &str,
    ) -> bool;
}

/// Default [`ProcessNew`]: unread, non-deleted mail gets every unread tag.
#[derive(Debug, Clone, Default)]
pub struct UnreadTagger {
    unread_tags: Vec<TagId>,
}

impl UnreadTagger {
    /// Create a tagger applying the given tags.
    #[must_use]
    pub const fn new(unread_tags: Vec<TagId>) -> Self {
        Self { unread_tags }
    }

    /// Create a tagger applying every unread-type tag in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag store lookup fails.
    pub async fn from_store(tags: &dyn TagStore) -> Result<Self> {
        let unread = tags.tags_of_type(TagType::Unread).await?;
        Ok(Self::new(unread.into_iter().map(|t| t.id).collect()))
    }
}

impl ProcessNew for UnreadTagger {
    fn process_new(
        &self,
        message: &NewMessage,
        _timestamp: DateTime<Utc>,
        keywords: &mut HashSet<String>,
        _snippet: &str,
    ) -> bool {
        let read = message
            .status
            .as_deref()
            .is_some_and(|s| s.to_lowercase().contains('r'));
        if read || message.deleted {
            return false;
        }
        keywords.extend(self.unread_tags.iter().map(|id| format!("{id}:in")));
        true
    }
}

/// Everything the index needs to rescan one mailbox.
#[derive(Clone)]
pub struct ScanRequest {
    /// Session the scan runs for.
    pub session: Arc<Session>,
    /// Mailbox being scanned.
    pub key: MailboxKey,
    /// Resolved location (local copy if there is one).
    pub path: PathBuf,
    /// Backend hook for opening the mailbox.
    pub opener: Arc<dyn MailboxOpener>,
    /// Hook for new messages; `None` indexes them without special handling.
    pub process_new: Option<Arc<dyn ProcessNew>>,
    /// Tags applied to every message found.
    pub apply_tags: Vec<String>,
    /// Stop after this many messages.
    pub stop_after: Option<usize>,
    /// Raised when the scan should stop early; check it between messages.
    pub interrupt: InterruptSignal,
}

impl std::fmt::Debug for ScanRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanRequest")
            .field("session", &self.session.name)
            .field("key", &self.key)
            .field("path", &self.path)
            .field("process_new", &self.process_new.is_some())
            .field("apply_tags", &self.apply_tags)
            .field("stop_after", &self.stop_after)
            .finish_non_exhaustive()
    }
}

/// The message index.
#[async_trait]
pub trait MessageIndex: Send + Sync {
    /// Whether the index is loaded and can accept scans.
    fn is_ready(&self) -> bool {
        true
    }

    /// Scan a mailbox, returning how many messages were processed.
    ///
    /// Should fail with [`Error::NoSuchMailbox`](crate::Error::NoSuchMailbox)
    /// or [`Error::Io`](crate::Error::Io) for problems confined to this
    /// mailbox, and [`Error::InvalidMailbox`](crate::Error::InvalidMailbox)
    /// for malformed mailbox metadata.
    async fn scan(&self, request: ScanRequest) -> Result<usize>;
}
