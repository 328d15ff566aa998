//! Worker status model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SourceId;

/// Lifecycle flag of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusFlag {
    /// The worker is (or was, if it crashed) running.
    #[default]
    Running,
    /// The worker shut down cleanly.
    Complete,
}

impl StatusFlag {
    /// Flag name as stored.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Complete => "complete",
        }
    }

    /// Parse a stored flag name. Anything unrecognized counts as running.
    #[must_use]
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "complete" => Self::Complete,
            _ => Self::Running,
        }
    }
}

/// Extra data attached to a status record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusData {
    /// Trace of the last internal error, cleared on the next cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    /// Discovery found mailboxes that still need a policy.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub have_unknown: bool,
}

/// Status record of one mail source worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Mail source this record belongs to.
    pub source_id: SourceId,
    /// Lifecycle flag.
    pub flag: StatusFlag,
    /// Human-readable description of the last thing attempted.
    pub message: String,
    /// Error and discovery details.
    pub data: StatusData,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl WorkerStatus {
    /// Fresh record for a starting worker.
    #[must_use]
    pub fn starting(source_id: SourceId) -> Self {
        Self {
            source_id,
            flag: StatusFlag::Running,
            message: "Starting up".to_string(),
            data: StatusData::default(),
            updated_at: Utc::now(),
        }
    }

    /// Replace the message and bump the timestamp.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    /// Whether the worker is still considered running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.flag == StatusFlag::Running
    }
}
