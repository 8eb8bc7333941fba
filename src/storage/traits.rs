//! Storage traits and error types
//!
//! This module defines the persistence boundary of a run: an append-only
//! journal, periodic snapshots, the dead-letter archive and run bookkeeping.

use crate::state::DeadLetterEntry;
use crate::storage::{JournalEvent, JournalRecord, RunRecord, RunSnapshot, RunStatus};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Persistence backend for a run's recoverable state
///
/// Implementations are shared between the scheduler and runner workers
/// and must serialize their own writes. `append` must be durable by the
/// time it returns: callers apply the in-memory mutation right after.
pub trait StateStore: Send + Sync {
    // ===== Journal =====

    /// Appends an event and returns its sequence number
    ///
    /// Sequence numbers strictly increase for the lifetime of the store.
    fn append(&self, event: &JournalEvent) -> StorageResult<u64>;

    /// Sequence number of the last appended event (0 if none)
    fn last_sequence(&self) -> StorageResult<u64>;

    /// Events with a sequence number greater than `seq`, in append order
    fn events_after(&self, seq: u64) -> StorageResult<Vec<JournalRecord>>;

    // ===== Snapshots =====

    /// Stores a snapshot and drops journal records it covers
    fn save_snapshot(&self, snapshot: &RunSnapshot) -> StorageResult<()>;

    /// Most recent snapshot, if any
    fn latest_snapshot(&self) -> StorageResult<Option<RunSnapshot>>;

    // ===== Dead letters =====

    fn record_dead_letter(&self, entry: &DeadLetterEntry) -> StorageResult<()>;

    /// All dead letters in the order they were recorded
    fn dead_letters(&self) -> StorageResult<Vec<DeadLetterEntry>>;

    // ===== Runs =====

    fn begin_run(&self, run_id: Uuid, config_hash: &str) -> StorageResult<()>;

    fn finish_run(&self, run_id: Uuid, status: RunStatus) -> StorageResult<()>;

    fn latest_run(&self) -> StorageResult<Option<RunRecord>>;

    /// Deletes journal, snapshots, dead letters and runs
    fn reset(&self) -> StorageResult<()>;
}
