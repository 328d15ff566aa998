//! Error types for the sync engine.

use thiserror::Error;

use crate::config::MailboxKey;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The mailbox is not tracked, or vanished from disk.
    #[error("No such mailbox: {0}")]
    NoSuchMailbox(MailboxKey),

    /// I/O error while probing or reading a mailbox.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Mailbox metadata is malformed (bad path reference, bad state).
    #[error("Invalid mailbox: {0}")]
    InvalidMailbox(String),

    /// A tag name matches more than one existing tag.
    #[error("Tag name matches multiple tags: {0}")]
    AmbiguousTag(String),

    /// No backend exists for the configured protocol.
    #[error("Unknown mail source protocol: {0}")]
    UnknownProtocol(String),

    /// The message index reported a failure.
    #[error("Index error: {0}")]
    Index(String),

    /// Remote mail source failure.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error only affects a single mailbox.
    ///
    /// Such failures are counted by the sync cycle, which then moves on to
    /// the next mailbox. Everything else aborts the cycle.
    #[must_use]
    pub const fn is_per_mailbox(&self) -> bool {
        matches!(self, Self::NoSuchMailbox(_) | Self::Io(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
