//! Tags: the store the engine creates mailbox tags in, and tag naming.

mod model;
mod naming;
mod repository;

use async_trait::async_trait;

pub use model::{Tag, TagId, TagType};
pub use naming::{create_tag_name, path_to_tag_name, unique_tag_name};
pub use repository::{MemoryTagStore, SqliteTagStore};

use crate::{Error, Result};

/// Storage for tags.
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Tags whose ID or name (case-insensitively) equals `name_or_id`.
    async fn find(&self, name_or_id: &str) -> Result<Vec<Tag>>;

    /// Create a tag.
    async fn create(&self, name: &str, tag_type: TagType) -> Result<Tag>;

    /// All tags of a given type.
    async fn tags_of_type(&self, tag_type: TagType) -> Result<Vec<Tag>>;

    /// Resolve a tag by name or ID, creating it if nothing matches.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousTag`] if more than one tag matches.
    async fn resolve_or_create(&self, name_or_id: &str) -> Result<TagId> {
        let mut found = self.find(name_or_id).await?;
        match found.len() {
            0 => Ok(self.create(name_or_id, TagType::Tag).await?.id),
            1 => Ok(found.remove(0).id),
            _ => Err(Error::AmbiguousTag(name_or_id.to_string())),
        }
    }
}
