//! Journaled run state
//!
//! Every frontier, in-flight and retry mutation is appended to the
//! [`StateStore`] before it is applied in memory. If the append fails the
//! in-memory state is left as it was and the error is returned, which the
//! scheduler treats as run-fatal.

use crate::state::{
    DeadLetterEntry, DeadLetterQueue, Frontier, InFlightBuffer, RetryBuffer, RetryEntry,
    SeenStore,
};
use crate::storage::{
    replay, FrontierEvent, FrontierSnapshot, InFlightEvent, InFlightSnapshot, JournalEvent,
    RetryEvent, RetrySnapshot, RunSnapshot, SeenSnapshot, StateStore, StorageResult,
};
use crate::task::{ProcessingTask, TaskId};
use chrono::Utc;
use std::collections::BTreeSet;
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Instant;
use uuid::Uuid;

/// All mutable state of one run
///
/// Mutations hold the read side of `barrier` across append and apply;
/// [`RunState::checkpoint`] takes the write side so a snapshot never sees
/// an event that is journaled but not yet applied.
pub struct RunState {
    run_id: Uuid,
    seen: SeenStore,
    frontier: Box<dyn Frontier>,
    retry: RetryBuffer,
    dead_letters: DeadLetterQueue,
    in_flight: InFlightBuffer,
    store: Arc<dyn StateStore>,
    barrier: RwLock<()>,
}

impl RunState {
    /// Creates empty state for a fresh run
    pub fn new(run_id: Uuid, frontier: Box<dyn Frontier>, store: Arc<dyn StateStore>) -> Self {
        Self {
            run_id,
            seen: SeenStore::new(),
            frontier,
            retry: RetryBuffer::new(),
            dead_letters: DeadLetterQueue::new(),
            in_flight: InFlightBuffer::new(),
            store,
            barrier: RwLock::new(()),
        }
    }

    /// Rebuilds state from the latest snapshot and the journal after it
    ///
    /// Tasks that were in flight when the previous process stopped are
    /// re-offered at the back of the frontier. A fresh snapshot is written
    /// afterwards so the replayed journal prefix can be dropped.
    ///
    /// # Arguments
    ///
    /// * `run_id` - Identifier of the run being resumed
    /// * `frontier` - Empty frontier to fill with recovered tasks
    /// * `store` - Store holding the previous run's journal
    pub fn recover(
        run_id: Uuid,
        frontier: Box<dyn Frontier>,
        store: Arc<dyn StateStore>,
    ) -> StorageResult<Self> {
        let stored_dead = store.dead_letters()?;
        let settled: BTreeSet<TaskId> = stored_dead.iter().map(|entry| entry.task.id).collect();
        let recovered = replay::load(store.as_ref())?.requeue_in_flight(&settled);
        let dead_letters = DeadLetterQueue::new();
        for entry in stored_dead {
            dead_letters.put(entry);
        }

        let now = Instant::now();
        let now_utc = Utc::now();
        let retry = RetryBuffer::new();
        for record in recovered.retry {
            retry.schedule(RetryEntry::from_record(record, now, now_utc));
        }
        for task in recovered.frontier {
            frontier.offer(task);
        }

        let state = Self {
            run_id,
            seen: SeenStore::restore(recovered.discovered, recovered.processed),
            frontier,
            retry,
            dead_letters,
            in_flight: InFlightBuffer::new(),
            store,
            barrier: RwLock::new(()),
        };

        tracing::info!(
            "Recovered run {}: {} queued, {} awaiting retry, {} dead-lettered",
            run_id,
            state.frontier.len(),
            state.retry.len(),
            state.dead_letters.len()
        );

        state.checkpoint()?;
        Ok(state)
    }

    fn read_barrier(&self) -> RwLockReadGuard<'_, ()> {
        self.barrier.read().unwrap_or_else(|e| e.into_inner())
    }

    fn append(&self, event: impl Into<JournalEvent>) -> StorageResult<u64> {
        self.store.append(&event.into())
    }

    // ===== Frontier =====

    /// Offers a newly discovered task unless its URL was already discovered
    ///
    /// Returns `Ok(false)` for duplicates, which are not journaled.
    pub fn submit(&self, task: ProcessingTask) -> StorageResult<bool> {
        if !self.seen.mark_discovered(&task.url) {
            return Ok(false);
        }
        self.offer(task)?;
        Ok(true)
    }

    /// Journals and offers a task without consulting the seen store
    pub fn offer(&self, task: ProcessingTask) -> StorageResult<()> {
        let _guard = self.read_barrier();
        self.append(FrontierEvent::Offer { task: task.clone() })?;
        self.frontier.offer(task);
        Ok(())
    }

    /// Takes the next task from the frontier
    ///
    /// The task is popped before the poll is journaled; if journaling fails
    /// it is offered back in memory so no task is lost.
    pub fn poll(&self) -> StorageResult<Option<ProcessingTask>> {
        let _guard = self.read_barrier();
        let Some(task) = self.frontier.poll() else {
            return Ok(None);
        };
        if let Err(e) = self.append(FrontierEvent::Poll { task_id: task.id }) {
            self.frontier.offer(task);
            return Err(e);
        }
        Ok(Some(task))
    }

    /// Moves the next frontier task into the in-flight buffer
    ///
    /// The in-flight put is journaled before the poll. If the process dies
    /// between the two appends, recovery finds the task in both places and
    /// keeps one copy.
    pub fn claim(&self) -> StorageResult<Option<ProcessingTask>> {
        let _guard = self.read_barrier();
        let Some(task) = self.frontier.poll() else {
            return Ok(None);
        };
        if let Err(e) = self.append(InFlightEvent::Put { task: task.clone() }) {
            self.frontier.offer(task);
            return Err(e);
        }
        self.in_flight.put(task.clone());
        self.append(FrontierEvent::Poll { task_id: task.id })?;
        Ok(Some(task))
    }

    // ===== In-flight =====

    /// Records that `task` is about to execute
    pub fn begin(&self, task: &ProcessingTask) -> StorageResult<()> {
        let _guard = self.read_barrier();
        self.append(InFlightEvent::Put { task: task.clone() })?;
        self.in_flight.put(task.clone());
        Ok(())
    }

    /// Records that the task with `id` has left execution
    pub fn finish(&self, id: TaskId) -> StorageResult<Option<ProcessingTask>> {
        let _guard = self.read_barrier();
        self.append(InFlightEvent::Remove { task_id: id })?;
        Ok(self.in_flight.remove(id))
    }

    // ===== Retries =====

    pub fn schedule_retry(&self, entry: RetryEntry) -> StorageResult<()> {
        let _guard = self.read_barrier();
        let record = entry.to_record(Instant::now(), Utc::now());
        self.append(RetryEvent::Scheduled { record })?;
        self.retry.schedule(entry);
        Ok(())
    }

    /// Moves up to `max_batch` due retries into the frontier
    ///
    /// Returns how many tasks were released. On a journal failure the
    /// entries not yet moved are put back in the retry buffer.
    pub fn release_due_retries(&self, now: Instant, max_batch: usize) -> StorageResult<usize> {
        let _guard = self.read_barrier();
        let mut due = self.retry.drain_due(now, max_batch).into_iter();
        let mut released = 0;

        while let Some(entry) = due.next() {
            // Offer first: a crash in between leaves a duplicate, never a gap.
            let result = self
                .append(FrontierEvent::Offer {
                    task: entry.task.clone(),
                })
                .and_then(|_| {
                    self.append(RetryEvent::Released {
                        task_id: entry.task.id,
                    })
                });

            if let Err(e) = result {
                self.retry.schedule(entry);
                for rest in due {
                    self.retry.schedule(rest);
                }
                return Err(e);
            }

            self.frontier.offer(entry.task);
            released += 1;
        }

        Ok(released)
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.retry.next_eligible_at()
    }

    // ===== Dead letters =====

    /// Persists a dead-lettered task and adds it to the queue
    pub fn dead_letter(&self, entry: DeadLetterEntry) -> StorageResult<()> {
        self.store.record_dead_letter(&entry)?;
        self.dead_letters.put(entry);
        Ok(())
    }

    // ===== Snapshots =====

    /// Writes a snapshot of the current state and truncates the journal
    pub fn checkpoint(&self) -> StorageResult<RunSnapshot> {
        let _guard = self.barrier.write().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let now_utc = Utc::now();

        let snapshot = RunSnapshot {
            run_id: self.run_id,
            last_seq: self.store.last_sequence()?,
            taken_at: now_utc,
            frontier: FrontierSnapshot {
                tasks: self.frontier.snapshot(),
            },
            in_flight: InFlightSnapshot {
                tasks: self.in_flight.snapshot(),
            },
            retry: RetrySnapshot {
                entries: self
                    .retry
                    .snapshot()
                    .iter()
                    .map(|entry| entry.to_record(now, now_utc))
                    .collect(),
            },
            seen: SeenSnapshot {
                discovered: self.seen.discovered_keys(),
                processed: self.seen.processed_keys(),
            },
        };

        self.store.save_snapshot(&snapshot)?;
        tracing::debug!("Snapshot at sequence {}", snapshot.last_seq);
        Ok(snapshot)
    }

    // ===== Accessors =====

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn seen(&self) -> &SeenStore {
        &self.seen
    }

    pub fn dead_letters(&self) -> &DeadLetterQueue {
        &self.dead_letters
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn frontier_len(&self) -> usize {
        self.frontier.len()
    }

    pub fn retry_len(&self) -> usize {
        self.retry.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.size()
    }

    pub fn is_in_flight(&self, id: TaskId) -> bool {
        self.in_flight.contains(id)
    }

    /// True when nothing is queued, awaiting retry or executing
    ///
    /// Workers enqueue children and retries before leaving the in-flight
    /// buffer, and only the dispatcher adds to it, so in-flight is read
    /// first: once it is empty every enqueue it could hide is visible.
    pub fn is_drained(&self) -> bool {
        self.in_flight.size() == 0 && self.frontier.is_empty() && self.retry.is_empty()
    }
}
