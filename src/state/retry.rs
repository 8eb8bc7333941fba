//! Tasks waiting for a future retry attempt

use crate::storage::RetryRecord;
use crate::task::{ProcessingTask, TaskId};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;
use std::time::Instant;

/// A task scheduled for another attempt
#[derive(Debug, Clone)]
pub struct RetryEntry {
    pub eligible_at: Instant,
    pub task: ProcessingTask,
    /// Why the task is being retried
    pub reason: String,
}

impl RetryEntry {
    /// Converts to the wall-clock form used by snapshots and the journal
    pub fn to_record(&self, now: Instant, now_utc: DateTime<Utc>) -> RetryRecord {
        let remaining = self.eligible_at.saturating_duration_since(now);
        let eligible_at = chrono::Duration::from_std(remaining)
            .map(|d| now_utc + d)
            .unwrap_or(now_utc);
        RetryRecord {
            task: self.task.clone(),
            reason: self.reason.clone(),
            eligible_at,
        }
    }

    /// Rebuilds an entry from its wall-clock form
    ///
    /// Records whose time has already passed become due immediately.
    pub fn from_record(record: RetryRecord, now: Instant, now_utc: DateTime<Utc>) -> Self {
        let remaining = (record.eligible_at - now_utc).to_std().unwrap_or_default();
        Self {
            eligible_at: now + remaining,
            task: record.task,
            reason: record.reason,
        }
    }
}

#[derive(Debug)]
struct Scheduled {
    seq: u64,
    entry: RetryEntry,
}

// Max-heap ordering: earliest eligible_at is the greatest, then earliest seq.
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .entry
            .eligible_at
            .cmp(&self.entry.eligible_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Scheduled {}

#[derive(Debug, Default)]
struct RetryInner {
    heap: BinaryHeap<Scheduled>,
    next_seq: u64,
}

/// Holding area for tasks scheduled for a future retry attempt
#[derive(Debug, Default)]
pub struct RetryBuffer {
    inner: Mutex<RetryInner>,
}

impl RetryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&self, entry: RetryEntry) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Scheduled { seq, entry });
    }

    /// Removes and returns up to `max_batch` entries due at `now`
    ///
    /// Entries come back in ascending `eligible_at` order. Entries that are
    /// not yet due are left untouched.
    pub fn drain_due(&self, now: Instant, max_batch: usize) -> Vec<RetryEntry> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut due = Vec::new();
        while due.len() < max_batch {
            match inner.heap.peek() {
                Some(top) if top.entry.eligible_at <= now => {}
                _ => break,
            }
            if let Some(scheduled) = inner.heap.pop() {
                due.push(scheduled.entry);
            }
        }
        due
    }

    /// Instant at which the next entry becomes due
    pub fn next_eligible_at(&self) -> Option<Instant> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .peek()
            .map(|s| s.entry.eligible_at)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .iter()
            .any(|s| s.entry.task.id == id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current entries in due order
    pub fn snapshot(&self) -> Vec<RetryEntry> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<&Scheduled> = inner.heap.iter().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|s| s.entry.clone()).collect()
    }
}
