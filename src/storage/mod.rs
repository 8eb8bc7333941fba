//! Storage module for recoverable run state
//!
//! This module handles persistence of everything needed to resume a run:
//! - The append-only journal of frontier, in-flight and retry mutations
//! - Periodic snapshots that let the journal prefix be truncated
//! - The dead-letter archive
//! - Run tracking and resumption support
//!
//! [`replay`] rebuilds state from a snapshot plus later journal records
//! without touching any storage.

mod events;
mod memory;
pub mod replay;
mod schema;
mod sqlite;
mod traits;

pub use events::{
    FrontierEvent, FrontierSnapshot, InFlightEvent, InFlightSnapshot, JournalEvent,
    JournalRecord, RetryEvent, RetryRecord, RetrySnapshot, RunSnapshot, SeenSnapshot,
};
pub use memory::MemoryStore;
pub use replay::{apply_event, RecoveredState};
pub use sqlite::SqliteStore;
pub use traits::{StateStore, StorageError, StorageResult};

use crate::LoomError;
use std::path::Path;
use uuid::Uuid;

/// Opens (or creates) the SQLite store at `path`
pub fn open_storage(path: &Path) -> Result<SqliteStore, LoomError> {
    Ok(SqliteStore::open(path)?)
}

/// Represents a crawl run in storage
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: Uuid,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Whether a run in this status can be resumed
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Running | Self::Cancelled | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trip() {
        for status in [
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Cancelled,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::from_db_string(status.to_db_string()), Some(status));
        }
        assert_eq!(RunStatus::from_db_string("bogus"), None);
    }

    #[test]
    fn test_only_completed_runs_are_final() {
        assert!(!RunStatus::Completed.is_resumable());
        assert!(RunStatus::Running.is_resumable());
        assert!(RunStatus::Cancelled.is_resumable());
    }
}
