//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the StateStore trait.
//! Journal payloads and snapshots are stored as JSON documents.

use crate::state::DeadLetterEntry;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{StateStore, StorageError, StorageResult};
use crate::storage::{JournalEvent, JournalRecord, RunRecord, RunSnapshot, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

/// SQLite storage backend
///
/// The connection sits behind a mutex so the store can be shared between
/// the scheduler and runner workers.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens or creates a SqliteStore
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn to_seq(value: i64) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| StorageError::Database(format!("negative sequence {}", value)))
}

fn from_seq(value: u64) -> StorageResult<i64> {
    i64::try_from(value).map_err(|_| StorageError::Database(format!("sequence {} out of range", value)))
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, Option<String>, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

impl StateStore for SqliteStore {
    // ===== Journal =====

    fn append(&self, event: &JournalEvent) -> StorageResult<u64> {
        let payload = serde_json::to_string(event)?;
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO events (stream, op, task_id, payload, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.stream(),
                event.op(),
                event.task_id().to_string(),
                payload,
                now
            ],
        )?;
        to_seq(conn.last_insert_rowid())
    }

    fn last_sequence(&self) -> StorageResult<u64> {
        // sqlite_sequence survives truncation, MAX(seq) does not.
        let seq: Option<i64> = self
            .conn()
            .query_row(
                "SELECT seq FROM sqlite_sequence WHERE name = 'events'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        to_seq(seq.unwrap_or(0))
    }

    fn events_after(&self, seq: u64) -> StorageResult<Vec<JournalRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT seq, payload FROM events WHERE seq > ?1 ORDER BY seq")?;

        let rows = stmt
            .query_map(params![from_seq(seq)?], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(seq, payload)| {
                Ok(JournalRecord {
                    seq: to_seq(seq)?,
                    event: serde_json::from_str(&payload)?,
                })
            })
            .collect()
    }

    // ===== Snapshots =====

    fn save_snapshot(&self, snapshot: &RunSnapshot) -> StorageResult<()> {
        let payload = serde_json::to_string(snapshot)?;
        let last_seq = from_seq(snapshot.last_seq)?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO snapshots (run_id, last_seq, taken_at, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                snapshot.run_id.to_string(),
                last_seq,
                snapshot.taken_at.to_rfc3339(),
                payload
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();
        tx.execute("DELETE FROM snapshots WHERE id < ?1", params![snapshot_id])?;
        tx.execute("DELETE FROM events WHERE seq <= ?1", params![last_seq])?;
        tx.commit()?;

        Ok(())
    }

    fn latest_snapshot(&self) -> StorageResult<Option<RunSnapshot>> {
        let payload: Option<String> = self
            .conn()
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    // ===== Dead letters =====

    fn record_dead_letter(&self, entry: &DeadLetterEntry) -> StorageResult<()> {
        let payload = serde_json::to_string(entry)?;
        self.conn().execute(
            "INSERT INTO dead_letters (task_id, url, failed_at, reason, stage_id, route_id, attempt, error, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.task.id.to_string(),
                entry.task.url,
                entry.item.failed_at.to_rfc3339(),
                entry.item.reason,
                entry.item.stage_id,
                entry.item.route_id,
                entry.item.attempt,
                entry.item.error,
                payload
            ],
        )?;
        Ok(())
    }

    fn dead_letters(&self) -> StorageResult<Vec<DeadLetterEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT payload FROM dead_letters ORDER BY id")?;
        let payloads = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        payloads
            .iter()
            .map(|payload| Ok(serde_json::from_str(payload)?))
            .collect()
    }

    // ===== Runs =====

    fn begin_run(&self, run_id: Uuid, config_hash: &str) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "INSERT INTO runs (id, started_at, config_hash, status) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET status = excluded.status, finished_at = NULL",
            params![
                run_id.to_string(),
                now,
                config_hash,
                RunStatus::Running.to_db_string()
            ],
        )?;
        Ok(())
    }

    fn finish_run(&self, run_id: Uuid, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        self.conn().execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id.to_string()],
        )?;
        Ok(())
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM runs ORDER BY rowid DESC LIMIT 1",
                [],
                run_from_row,
            )
            .optional()?;

        let Some((id, started_at, finished_at, config_hash, status)) = row else {
            return Ok(None);
        };

        let id = Uuid::parse_str(&id)
            .map_err(|e| StorageError::Database(format!("invalid run id {}: {}", id, e)))?;

        Ok(Some(RunRecord {
            id,
            started_at,
            finished_at,
            config_hash,
            status: RunStatus::from_db_string(&status).unwrap_or(RunStatus::Running),
        }))
    }

    fn reset(&self) -> StorageResult<()> {
        self.conn().execute_batch(
            "
            DELETE FROM events;
            DELETE FROM snapshots;
            DELETE FROM dead_letters;
            DELETE FROM runs;
            DELETE FROM sqlite_sequence WHERE name = 'events';
        ",
        )?;
        Ok(())
    }
}
