//! Status storage repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::warn;

use super::StatusStore;
use super::model::{StatusData, StatusFlag, WorkerStatus};
use crate::Result;
use crate::config::SourceId;

/// Status store backed by `SQLite`.
///
/// Keeps one record per mail source; persisting overwrites it.
pub struct SqliteStatusStore {
    pool: SqlitePool,
}

impl SqliteStatusStore {
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
            CREATE TABLE IF NOT EXISTS worker_status (
                source_id TEXT PRIMARY KEY,
                flag TEXT NOT NULL,
                message TEXT NOT NULL DEFAULT '',
                data_json TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl StatusStore for SqliteStatusStore {
    async fn load_incomplete(&self, source_id: &SourceId) -> Result<Option<WorkerStatus>> {
        let row = sqlx::query(
            r"
            SELECT source_id, flag, message, data_json, updated_at
            FROM worker_status
            WHERE source_id = ? AND flag = ?
            ",
        )
        .bind(&source_id.0)
        .bind(StatusFlag::Running.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let data_json: String = row.get("data_json");
        let data: StatusData = serde_json::from_str(&data_json).unwrap_or_else(|e| {
            warn!("Discarding unreadable status data for {}: {e}", source_id);
            StatusData::default()
        });
        let updated_at_str: String = row.get("updated_at");
        let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
            .map_or_else(|_| Utc::now(), |t| t.with_timezone(&Utc));

        Ok(Some(WorkerStatus {
            source_id: SourceId(row.get("source_id")),
            flag: StatusFlag::from_str_lossy(&row.get::<String, _>("flag")),
            message: row.get("message"),
            data,
            updated_at,
        }))
    }

    async fn persist(&self, status: &WorkerStatus) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO worker_status (source_id, flag, message, data_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                flag = excluded.flag,
                message = excluded.message,
                data_json = excluded.data_json,
                updated_at = excluded.updated_at
            ",
        )
        .bind(&status.source_id.0)
        .bind(status.flag.as_str())
        .bind(&status.message)
        .bind(serde_json::to_string(&status.data)?)
        .bind(status.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Status store that keeps records in memory.
#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<SourceId, WorkerStatus>>,
    persist_count: Mutex<usize>,
}

impl MemoryStatusStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last persisted record for a source, complete or not.
    pub async fn get(&self, source_id: &SourceId) -> Option<WorkerStatus> {
        self.records.lock().await.get(source_id).cloned()
    }

    /// Number of times `persist` has been called.
    pub async fn persist_count(&self) -> usize {
        *self.persist_count.lock().await
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn load_incomplete(&self, source_id: &SourceId) -> Result<Option<WorkerStatus>> {
        Ok(self
            .records
            .lock()
            .await
            .get(source_id)
            .filter(|status| status.is_running())
            .cloned())
    }

    async fn persist(&self, status: &WorkerStatus) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(status.source_id.clone(), status.clone());
        *self.persist_count.lock().await += 1;
        Ok(())
    }
}
