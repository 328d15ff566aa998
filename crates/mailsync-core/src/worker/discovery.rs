//! Mailbox discovery and take-over.

use std::collections::{HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};

use super::Inner;
use crate::config::{MailboxEntry, MailboxKey, MailboxPath, MailboxPolicy};
use crate::tags::create_tag_name;
use crate::{Error, Result};

/// Expand `~`, make absolute and fold away `.` and `..`.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let expanded = PathBuf::from(shellexpand::tilde(&raw).as_ref());
    let absolute = std::path::absolute(&expanded).unwrap_or(expanded);

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

impl Inner {
    /// Paths that already belong to some mailbox.
    async fn known_paths(&self) -> HashSet<PathBuf> {
        let mut known: HashSet<PathBuf> = self.registry.paths().await.into_iter().collect();
        known.extend(
            self.config
                .read()
                .await
                .mailboxes
                .values()
                .filter_map(|m| m.local.clone()),
        );
        known
    }

    pub(super) async fn discover_mailboxes_locked(&self, paths: &[String]) -> Result<bool> {
        let known = self.known_paths().await;
        let max_paths = self.settings.max_discovery_paths;
        let mut queue: VecDeque<PathBuf> = paths.iter().map(PathBuf::from).collect();
        let mut seen = HashSet::new();
        let mut adding = Vec::new();

        while let Some(raw) = queue.pop_front() {
            let path = normalize(&raw);
            if known.contains(&raw) || known.contains(&path) || !seen.insert(path.clone()) {
                continue;
            }
            let Ok(meta) = tokio::fs::metadata(&path).await else {
                continue;
            };
            if self.backend.is_mailbox(&path).await {
                adding.push(path.clone());
            }
            if !meta.is_dir() {
                continue;
            }
            let mut entries = match tokio::fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(path = %path.display(), "Cannot list: {e}");
                    continue;
                }
            };
            loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        queue.push_back(entry.path());
                        if queue.len() > max_paths {
                            warn!(
                                source = %self.source_id,
                                max_paths,
                                "Discovery queue overflow, giving up"
                            );
                            return Ok(false);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!(path = %path.display(), "Cannot list: {e}");
                        break;
                    }
                }
            }
        }

        let mut have_unknown = false;
        for path in adding {
            info!(source = %self.source_id, path = %path.display(), "Discovered mailbox");
            let key = self.registry.register(path).await;
            let entry = self.take_over_mailbox_locked(&key).await?;
            have_unknown |= entry.policy == MailboxPolicy::Unknown;
        }
        if have_unknown {
            self.status.lock().await.data.have_unknown = true;
        }
        Ok(true)
    }

    pub(super) async fn take_over_mailbox_locked(&self, key: &MailboxKey) -> Result<MailboxEntry> {
        let (discovery, previous) = {
            let config = self.config.read().await;
            (config.discovery.clone(), config.mailbox(key).cloned())
        };

        let mut entry = MailboxEntry::new(key.clone(), MailboxPath::Registry(key.clone()))
            .with_policy(discovery.policy);
        entry.process_new = discovery.process_new;
        entry.apply_tags = discovery.apply_tags;
        if let Some(previous) = previous {
            entry.primary_tag = previous.primary_tag;
            entry.local = previous.local;
        }

        if discovery.create_tag {
            let name_or_id = match entry.primary_tag.take() {
                Some(existing) => existing,
                None => {
                    let source = self
                        .registry
                        .resolve_source(&entry.path)
                        .await?
                        .unwrap_or_else(|| PathBuf::from(key.as_str()));
                    create_tag_name(&source.to_string_lossy(), self.tags.as_ref()).await?
                }
            };
            let primary = if discovery.policy == MailboxPolicy::Unknown {
                name_or_id
            } else {
                match self.tags.resolve_or_create(&name_or_id).await {
                    Ok(id) => id.0,
                    Err(Error::AmbiguousTag(name)) => {
                        warn!(source = %self.source_id, %key, "Ambiguous tag {name}, keeping name");
                        name
                    }
                    Err(e) => return Err(e),
                }
            };
            entry.primary_tag = Some(primary);
        }

        if discovery.local_copy && entry.local.is_none() {
            entry.local = Some(self.registry.create_local_mailstore().await?);
        }

        debug!(source = %self.source_id, %key, policy = ?entry.policy, "Took over mailbox");
        self.config.write().await.insert_mailbox(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(
            normalize(Path::new("/var/mail/../spool/./bre")),
            PathBuf::from("/var/spool/bre")
        );
    }

    #[test]
    fn normalize_expands_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(normalize(Path::new("~/Mail")), home.join("Mail"));
        }
    }

    #[test]
    fn normalize_makes_absolute() {
        assert!(normalize(Path::new("relative/dir")).is_absolute());
    }
}
