//! Pure reconstruction of run state from a snapshot and journal records
//!
//! Nothing here performs I/O. [`load`] is the only function that reads a
//! store, and it does so before handing plain values to [`replay`].

use crate::storage::{
    FrontierEvent, InFlightEvent, JournalEvent, JournalRecord, RetryEvent, RetryRecord,
    RunSnapshot, StateStore, StorageResult,
};
use crate::task::{ProcessingTask, TaskId};
use crate::url::dedup_key;
use std::collections::BTreeSet;

/// State rebuilt from persistence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveredState {
    /// Frontier contents in offer order
    pub frontier: Vec<ProcessingTask>,
    /// In-flight tasks in put order
    pub in_flight: Vec<ProcessingTask>,
    pub retry: Vec<RetryRecord>,
    pub discovered: BTreeSet<String>,
    pub processed: BTreeSet<String>,
    /// Last journal sequence number applied
    pub last_seq: u64,
}

impl RecoveredState {
    pub fn from_snapshot(snapshot: &RunSnapshot) -> Self {
        Self {
            frontier: snapshot.frontier.tasks.clone(),
            in_flight: snapshot.in_flight.tasks.clone(),
            retry: snapshot.retry.entries.clone(),
            discovered: snapshot.seen.discovered.iter().cloned().collect(),
            processed: snapshot.seen.processed.iter().cloned().collect(),
            last_seq: snapshot.last_seq,
        }
    }

    /// Moves every in-flight task back to the end of the frontier
    ///
    /// Nothing confirms that a recovered in-flight task finished, so it is
    /// executed again (at-least-once). Tasks in `settled` already reached a
    /// terminal outcome (a stored dead letter) and are dropped instead, as
    /// are tasks already queued or awaiting retry.
    pub fn requeue_in_flight(mut self, settled: &BTreeSet<TaskId>) -> Self {
        let in_flight = std::mem::take(&mut self.in_flight);
        for task in in_flight {
            let queued = self.frontier.iter().any(|queued| queued.id == task.id)
                || self.retry.iter().any(|record| record.task.id == task.id);
            if !queued && !settled.contains(&task.id) {
                self.frontier.push(task);
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.frontier.is_empty() && self.in_flight.is_empty() && self.retry.is_empty()
    }
}

/// Applies one journal event to `state`, returning the new state
pub fn apply_event(mut state: RecoveredState, event: &JournalEvent) -> RecoveredState {
    match event {
        JournalEvent::Frontier(FrontierEvent::Offer { task }) => {
            state.discovered.insert(dedup_key(&task.url));
            state.frontier.push(task.clone());
        }
        JournalEvent::Frontier(FrontierEvent::Poll { task_id }) => {
            if let Some(pos) = state.frontier.iter().position(|t| t.id == *task_id) {
                state.frontier.remove(pos);
            }
        }
        JournalEvent::InFlight(InFlightEvent::Put { task }) => {
            state.in_flight.retain(|t| t.id != task.id);
            state.in_flight.push(task.clone());
        }
        JournalEvent::InFlight(InFlightEvent::Remove { task_id }) => {
            state.in_flight.retain(|t| t.id != *task_id);
        }
        JournalEvent::Retry(RetryEvent::Scheduled { record }) => {
            state.retry.push(record.clone());
        }
        JournalEvent::Retry(RetryEvent::Released { task_id }) => {
            if let Some(pos) = state.retry.iter().position(|r| r.task.id == *task_id) {
                state.retry.remove(pos);
            }
        }
    }
    state
}

/// Replays `records` on top of `snapshot`
///
/// Records already covered by the snapshot are skipped, so callers may pass
/// the whole journal.
pub fn replay<I>(snapshot: Option<&RunSnapshot>, records: I) -> RecoveredState
where
    I: IntoIterator<Item = JournalRecord>,
{
    let base = snapshot.map(RecoveredState::from_snapshot).unwrap_or_default();
    let covered = base.last_seq;

    records
        .into_iter()
        .filter(|record| record.seq > covered)
        .fold(base, |state, record| {
            let mut next = apply_event(state, &record.event);
            next.last_seq = record.seq;
            next
        })
}

/// Loads the latest snapshot and the journal after it from `store`
pub fn load(store: &dyn StateStore) -> StorageResult<RecoveredState> {
    let snapshot = store.latest_snapshot()?;
    let after = snapshot.as_ref().map_or(0, |s| s.last_seq);
    let records = store.events_after(after)?;
    Ok(replay(snapshot.as_ref(), records))
}
