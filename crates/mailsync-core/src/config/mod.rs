//! Mail source configuration and the global mailbox registry.

mod model;
mod registry;

use std::sync::Arc;

use tokio::sync::RwLock;

pub use model::{
    DiscoveryConfig, MailSourceConfig, MailboxEntry, MailboxKey, MailboxPath, MailboxPolicy,
    Protocol, SourceId, SyncSettings,
};
pub use registry::MailboxRegistry;

/// Configuration shared between a worker and the rest of the application.
pub type SharedConfig = Arc<RwLock<MailSourceConfig>>;
