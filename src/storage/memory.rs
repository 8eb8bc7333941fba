//! In-memory state store
//!
//! Used by tests and by runs that do not need to survive a restart. It
//! follows the same contract as the SQLite backend, including journal
//! truncation on snapshot.

use crate::state::DeadLetterEntry;
use crate::storage::traits::{StateStore, StorageError, StorageResult};
use crate::storage::{JournalEvent, JournalRecord, RunRecord, RunSnapshot, RunStatus};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    events: Vec<JournalRecord>,
    snapshot: Option<RunSnapshot>,
    dead_letters: Vec<DeadLetterEntry>,
    runs: Vec<RunRecord>,
}

/// Thread-safe in-memory [`StateStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with [`StorageError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Journal records still held (for test assertions)
    pub fn events(&self) -> Vec<JournalRecord> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }
}

impl StateStore for MemoryStore {
    fn append(&self, event: &JournalEvent) -> StorageResult<u64> {
        self.check_available()?;
        let mut inner = self.lock();
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.events.push(JournalRecord {
            seq,
            event: event.clone(),
        });
        Ok(seq)
    }

    fn last_sequence(&self) -> StorageResult<u64> {
        Ok(self.lock().next_seq)
    }

    fn events_after(&self, seq: u64) -> StorageResult<Vec<JournalRecord>> {
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|record| record.seq > seq)
            .cloned()
            .collect())
    }

    fn save_snapshot(&self, snapshot: &RunSnapshot) -> StorageResult<()> {
        self.check_available()?;
        let mut inner = self.lock();
        inner.events.retain(|record| record.seq > snapshot.last_seq);
        inner.snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn latest_snapshot(&self) -> StorageResult<Option<RunSnapshot>> {
        Ok(self.lock().snapshot.clone())
    }

    fn record_dead_letter(&self, entry: &DeadLetterEntry) -> StorageResult<()> {
        self.check_available()?;
        self.lock().dead_letters.push(entry.clone());
        Ok(())
    }

    fn dead_letters(&self) -> StorageResult<Vec<DeadLetterEntry>> {
        Ok(self.lock().dead_letters.clone())
    }

    fn begin_run(&self, run_id: Uuid, config_hash: &str) -> StorageResult<()> {
        self.check_available()?;
        let mut inner = self.lock();
        if inner.runs.iter().any(|run| run.id == run_id) {
            for run in inner.runs.iter_mut().filter(|run| run.id == run_id) {
                run.status = RunStatus::Running;
                run.finished_at = None;
            }
        } else {
            inner.runs.push(RunRecord {
                id: run_id,
                started_at: Utc::now().to_rfc3339(),
                finished_at: None,
                config_hash: config_hash.to_string(),
                status: RunStatus::Running,
            });
        }
        Ok(())
    }

    fn finish_run(&self, run_id: Uuid, status: RunStatus) -> StorageResult<()> {
        self.check_available()?;
        let now = Utc::now().to_rfc3339();
        for run in self.lock().runs.iter_mut().filter(|run| run.id == run_id) {
            run.status = status;
            run.finished_at = Some(now.clone());
        }
        Ok(())
    }

    fn latest_run(&self) -> StorageResult<Option<RunRecord>> {
        Ok(self.lock().runs.last().cloned())
    }

    fn reset(&self) -> StorageResult<()> {
        self.check_available()?;
        let mut inner = self.lock();
        *inner = Inner::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FrontierEvent, FrontierSnapshot, InFlightSnapshot, RetrySnapshot, SeenSnapshot};
    use crate::task::{ProcessingTask, TaskOrigin};

    fn offer(path: &str) -> JournalEvent {
        FrontierEvent::Offer {
            task: ProcessingTask::new(format!("https://example.com{}", path), TaskOrigin::seed("t")),
        }
        .into()
    }

    fn empty_snapshot(last_seq: u64) -> RunSnapshot {
        RunSnapshot {
            run_id: Uuid::new_v4(),
            last_seq,
            taken_at: Utc::now(),
            frontier: FrontierSnapshot::default(),
            in_flight: InFlightSnapshot::default(),
            retry: RetrySnapshot::default(),
            seen: SeenSnapshot::default(),
        }
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let store = MemoryStore::new();
        assert_eq!(store.append(&offer("/a")).unwrap(), 1);
        assert_eq!(store.append(&offer("/b")).unwrap(), 2);
        assert_eq!(store.last_sequence().unwrap(), 2);
        assert_eq!(store.events_after(1).unwrap().len(), 1);
    }

    #[test]
    fn test_snapshot_truncates_covered_prefix() {
        let store = MemoryStore::new();
        for path in ["/a", "/b", "/c"] {
            store.append(&offer(path)).unwrap();
        }
        store.save_snapshot(&empty_snapshot(2)).unwrap();

        let remaining = store.events();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].seq, 3);
        // Sequence numbers continue after truncation.
        assert_eq!(store.append(&offer("/d")).unwrap(), 4);
    }

    #[test]
    fn test_unavailable_store_rejects_writes() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.append(&offer("/a")),
            Err(StorageError::Unavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.append(&offer("/a")).is_ok());
    }

    #[test]
    fn test_run_bookkeeping() {
        let store = MemoryStore::new();
        let run_id = Uuid::new_v4();
        store.begin_run(run_id, "hash").unwrap();
        assert_eq!(store.latest_run().unwrap().unwrap().status, RunStatus::Running);

        store.finish_run(run_id, RunStatus::Completed).unwrap();
        let run = store.latest_run().unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.finished_at.is_some());
    }
}
