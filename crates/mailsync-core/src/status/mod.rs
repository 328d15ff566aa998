//! Worker status records and where they are kept.
//!
//! Every mail source worker owns one [`WorkerStatus`]. It is the only
//! channel through which failures become visible to the rest of the
//! application: the worker never propagates errors out of its loop.

mod model;
mod repository;

use async_trait::async_trait;

pub use model::{StatusData, StatusFlag, WorkerStatus};
pub use repository::{MemoryStatusStore, SqliteStatusStore};

use crate::Result;
use crate::config::SourceId;

/// Storage for worker status records.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// The record of a worker that never reached `complete`, if any.
    async fn load_incomplete(&self, source_id: &SourceId) -> Result<Option<WorkerStatus>>;

    /// Save a record, replacing the previous one for the same source.
    async fn persist(&self, status: &WorkerStatus) -> Result<()>;
}
