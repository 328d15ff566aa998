//! Global mailbox registry shared by all mail sources.

use std::path::{Path, PathBuf};

use tokio::sync::RwLock;
use tracing::debug;

use super::model::{MailboxEntry, MailboxKey, MailboxPath};
use crate::{Error, Result};

/// Application-wide table of known mailbox paths.
///
/// The position of a path in the table is its [`MailboxKey`]. Entries are
/// only ever appended, so keys stay stable for the life of the registry.
#[derive(Debug)]
pub struct MailboxRegistry {
    paths: RwLock<Vec<PathBuf>>,
    local_root: PathBuf,
}

impl MailboxRegistry {
    /// Create an empty registry that allocates local mailstores under
    /// `local_root`.
    #[must_use]
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            paths: RwLock::new(Vec::new()),
            local_root: local_root.into(),
        }
    }

    /// Create a registry using the platform data directory for local copies.
    ///
    /// # Errors
    ///
    /// Returns an error if the platform has no data directory.
    pub fn with_default_root() -> Result<Self> {
        let root = dirs::data_local_dir()
            .ok_or_else(|| Error::Config("no local data directory".to_string()))?
            .join("mailsync")
            .join("mailstore");
        Ok(Self::new(root))
    }

    /// Append a path and return its key.
    pub async fn register(&self, path: impl Into<PathBuf>) -> MailboxKey {
        let mut paths = self.paths.write().await;
        paths.push(path.into());
        MailboxKey::from_index(paths.len() - 1)
    }

    /// Path registered under `key`.
    pub async fn get(&self, key: &MailboxKey) -> Option<PathBuf> {
        let index = key.index()?;
        self.paths.read().await.get(index).cloned()
    }

    /// All registered paths.
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.paths.read().await.clone()
    }

    /// Resolve where a mailbox entry really lives.
    ///
    /// A local copy takes precedence. Returns `None` for null paths.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMailbox`] if an `@key` reference is dangling.
    pub async fn resolve(&self, entry: &MailboxEntry) -> Result<Option<PathBuf>> {
        if let Some(local) = &entry.local {
            return Ok(Some(local.clone()));
        }
        self.resolve_source(&entry.path).await
    }

    /// Resolve a mailbox path without considering local copies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMailbox`] if an `@key` reference is dangling.
    pub async fn resolve_source(&self, path: &MailboxPath) -> Result<Option<PathBuf>> {
        let resolved = match path {
            MailboxPath::Direct(p) => p.clone(),
            MailboxPath::Registry(key) => self
                .get(key)
                .await
                .ok_or_else(|| Error::InvalidMailbox(format!("dangling reference @{key}")))?,
        };
        if MailboxPath::is_null(&resolved) {
            Ok(None)
        } else {
            Ok(Some(resolved))
        }
    }

    /// Allocate a fresh local maildir, register it and return its path.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub async fn create_local_mailstore(&self) -> Result<PathBuf> {
        let mut paths = self.paths.write().await;
        let key = MailboxKey::from_index(paths.len());
        let path = self.local_root.join(key.as_str());
        create_maildir(&path).await?;
        paths.push(path.clone());
        debug!("Created local mailstore {} at {}", key, path.display());
        Ok(path)
    }
}

async fn create_maildir(path: &Path) -> Result<()> {
    for sub in ["cur", "new", "tmp"] {
        tokio::fs::create_dir_all(path.join(sub)).await?;
    }
    Ok(())
}
