//! Tag storage repositories.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::debug;

use super::TagStore;
use super::model::{Tag, TagId, TagType};
use crate::Result;

/// Tag store backed by `SQLite`.
pub struct SqliteTagStore {
    pool: SqlitePool,
}

impl SqliteTagStore {
    /// Create a new repository with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        let url = format!("sqlite:{database_path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Create an in-memory repository for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let repo = Self { pool };
        repo.initialize().await?;
        Ok(repo)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL COLLATE NOCASE,
                tag_type TEXT NOT NULL DEFAULT 'tag',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_tags_name ON tags(name)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_tag(row: &sqlx::sqlite::SqliteRow) -> Tag {
    Tag {
        id: TagId(row.get::<i64, _>("id").to_string()),
        name: row.get("name"),
        tag_type: TagType::from_str_lossy(&row.get::<String, _>("tag_type")),
    }
}

#[async_trait]
impl TagStore for SqliteTagStore {
    async fn find(&self, name_or_id: &str) -> Result<Vec<Tag>> {
        let id = name_or_id.parse::<i64>().unwrap_or(-1);
        let rows = sqlx::query(
            r"
            SELECT id, name, tag_type
            FROM tags
            WHERE id = ? OR name = ?
            ORDER BY id
            ",
        )
        .bind(id)
        .bind(name_or_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_tag).collect())
    }

    async fn create(&self, name: &str, tag_type: TagType) -> Result<Tag> {
        let result = sqlx::query(
            r"
            INSERT INTO tags (name, tag_type) VALUES (?, ?)
            ",
        )
        .bind(name)
        .bind(tag_type.as_str())
        .execute(&self.pool)
        .await?;

        let tag = Tag {
            id: TagId(result.last_insert_rowid().to_string()),
            name: name.to_string(),
            tag_type,
        };
        debug!("Created tag {} ({})", tag.name, tag.id);
        Ok(tag)
    }

    async fn tags_of_type(&self, tag_type: TagType) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            r"
            SELECT id, name, tag_type
            FROM tags
            WHERE tag_type = ?
            ORDER BY id
            ",
        )
        .bind(tag_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_tag).collect())
    }
}

/// Tag store that keeps tags in memory.
///
/// Counts lookups and creations, which makes it handy in tests.
#[derive(Debug, Default)]
pub struct MemoryTagStore {
    tags: Mutex<Vec<Tag>>,
    finds: AtomicUsize,
    creates: AtomicUsize,
}

impl MemoryTagStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `find` calls so far.
    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    /// Number of `create` calls so far.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Snapshot of all tags.
    pub async fn all(&self) -> Vec<Tag> {
        self.tags.lock().await.clone()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    async fn find(&self, name_or_id: &str) -> Result<Vec<Tag>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .tags
            .lock()
            .await
            .iter()
            .filter(|t| t.matches(name_or_id))
            .cloned()
            .collect())
    }

    async fn create(&self, name: &str, tag_type: TagType) -> Result<Tag> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let mut tags = self.tags.lock().await;
        let tag = Tag {
            id: TagId(format!("{}", tags.len() + 1)),
            name: name.to_string(),
            tag_type,
        };
        tags.push(tag.clone());
        Ok(tag)
    }

    async fn tags_of_type(&self, tag_type: TagType) -> Result<Vec<Tag>> {
        Ok(self
            .tags
            .lock()
            .await
            .iter()
            .filter(|t| t.tag_type == tag_type)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn test_create_and_find() {
        let repo = SqliteTagStore::in_memory().await.unwrap();
        let tag = repo.create("Work", TagType::Tag).await.unwrap();

        let by_name = repo.find("work").await.unwrap();
        assert_eq!(by_name, vec![tag.clone()]);

        let by_id = repo.find(&tag.id.0).await.unwrap();
        assert_eq!(by_id, vec![tag]);

        assert!(repo.find("Home").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tags_of_type() {
        let repo = SqliteTagStore::in_memory().await.unwrap();
        repo.create("New", TagType::Unread).await.unwrap();
        repo.create("Work", TagType::Tag).await.unwrap();

        let unread = repo.tags_of_type(TagType::Unread).await.unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].name, "New");
    }

    #[tokio::test]
    async fn test_resolve_or_create() {
        let repo = SqliteTagStore::in_memory().await.unwrap();
        let created = repo.resolve_or_create("Lists").await.unwrap();
        let resolved = repo.resolve_or_create("lists").await.unwrap();
        assert_eq!(created, resolved);

        repo.create("Dupe", TagType::Tag).await.unwrap();
        repo.create("Dupe", TagType::Tag).await.unwrap();
        assert!(matches!(
            repo.resolve_or_create("Dupe").await,
            Err(Error::AmbiguousTag(name)) if name == "Dupe"
        ));
    }

    #[tokio::test]
    async fn test_memory_store_counts() {
        let store = MemoryTagStore::new();
        let id = store.resolve_or_create("Inbox").await.unwrap();
        assert_eq!(store.resolve_or_create("Inbox").await.unwrap(), id);
        assert_eq!(store.create_count(), 1);
        assert_eq!(store.find_count(), 2);
        assert_eq!(store.all().await.len(), 1);
    }
}
