//! # mailsync-core
//!
//! Background mail-source synchronization engine.
//!
//! This crate provides:
//! - **Mail source workers** - one background task per account that
//!   rescans changed mailboxes within a per-cycle message budget
//! - **Mailbox discovery** - bounded crawl of configured paths, with
//!   automatic take-over and tag creation for new mailboxes
//! - **On-demand rescans** - `rescan_now` blocks a foreground caller until
//!   the worker has run a full cycle
//! - **Backends** - mbox, maildir and remote (IMAP) change detection
//! - **Status records** - persisted worker status (`SQLite` or in-memory)
//!
//! The message index that does the actual parsing is supplied by the
//! embedding application through [`MessageIndex`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
mod error;
pub mod index;
pub mod status;
pub mod tags;
pub mod worker;

pub use backend::{
    FolderStatus, MailboxBackend, MaildirBackend, MboxBackend, ProbeState, RemoteBackend,
    RemoteFolderProbe,
};
pub use config::{
    DiscoveryConfig, MailSourceConfig, MailboxEntry, MailboxKey, MailboxPath, MailboxPolicy,
    MailboxRegistry, Protocol, SharedConfig, SourceId, SyncSettings,
};
pub use error::{Error, Result};
pub use index::{
    MailboxOpener, MessageIndex, NewMessage, ProcessNew, ScanRequest, Session, UnreadTagger,
};
pub use status::{
    MemoryStatusStore, SqliteStatusStore, StatusData, StatusFlag, StatusStore, WorkerStatus,
};
pub use tags::{MemoryTagStore, SqliteTagStore, Tag, TagId, TagStore, TagType};
pub use worker::{
    Collaborators, InterruptSignal, MailSource, MailSourceOptions, RescanOutcome,
};
