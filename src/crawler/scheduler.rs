//! Scheduler control loop
//!
//! One scheduler drives a run. Each iteration it:
//! 1. Moves due retries into the frontier (`DRAINING_RETRIES`)
//! 2. Parks while the in-flight limit is reached (`PARKED`)
//! 3. Claims the next frontier task, or parks until the next retry is due
//! 4. Reserves the task's politeness slot and hands it to the runner
//!    (`DISPATCHING`)
//!
//! The loop never waits on a politeness reservation itself; the reserved
//! instant travels with the task. It ends when nothing is queued, awaiting
//! retry or executing, or when the run is cancelled.

use crate::config::SchedulerConfig;
use crate::crawler::control::{RunControl, RunCounters};
use crate::crawler::runner::{Dispatch, Runner};
use crate::events::{CrawlEventName, EventBus, RunPayload, TaskPayload};
use crate::politeness::PolitenessPolicy;
use crate::state::RunState;
use crate::storage::RunStatus;
use crate::task::TraceContext;
use crate::LoomError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Scheduler loop phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Dispatching = 1,
    DrainingRetries = 2,
    Parked = 3,
}

impl SchedulerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Dispatching,
            2 => Self::DrainingRetries,
            3 => Self::Parked,
            _ => Self::Idle,
        }
    }
}

/// Tuning knobs for the loop
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub retry_drain_batch: usize,
    pub max_park: Duration,
    pub max_in_flight: usize,
    /// Finished tasks between snapshots
    pub snapshot_every: u64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            retry_drain_batch: 32,
            max_park: Duration::from_millis(250),
            max_in_flight: 8,
            snapshot_every: 100,
        }
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            retry_drain_batch: config.retry_drain_batch,
            max_park: config.max_park(),
            max_in_flight: config.max_in_flight,
            snapshot_every: config.snapshot_every,
        }
    }
}

/// Totals reported when a run ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub dispatched: u64,
    pub completed: u64,
    pub stopped: u64,
    pub discarded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    fn collect(run_id: Uuid, status: RunStatus, counters: &RunCounters, elapsed: Duration) -> Self {
        let load = |counter: &std::sync::atomic::AtomicU64| counter.load(Ordering::Relaxed);
        Self {
            run_id,
            status,
            dispatched: load(&counters.dispatched),
            completed: load(&counters.completed),
            stopped: load(&counters.stopped),
            discarded: load(&counters.discarded),
            retried: load(&counters.retried),
            dead_lettered: load(&counters.dead_lettered),
            elapsed,
        }
    }
}

/// Why the loop stopped
enum Exit {
    Drained,
    Cancelled,
    Fatal(String),
}

/// Drives one run from its frontier to completion
pub struct Scheduler {
    state: Arc<RunState>,
    politeness: Arc<dyn PolitenessPolicy>,
    runner: Box<dyn Runner>,
    control: Arc<RunControl>,
    bus: EventBus,
    options: SchedulerOptions,
    phase: AtomicU8,
}

impl Scheduler {
    pub fn new(
        state: Arc<RunState>,
        politeness: Arc<dyn PolitenessPolicy>,
        runner: Box<dyn Runner>,
        control: Arc<RunControl>,
        bus: EventBus,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            state,
            politeness,
            runner,
            control,
            bus,
            options,
            phase: AtomicU8::new(SchedulerState::Idle as u8),
        }
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn enter(&self, state: SchedulerState) {
        self.phase.store(state as u8, Ordering::Release);
    }

    /// Runs the loop until the run drains, is cancelled, or hits a fatal error
    ///
    /// # Returns
    ///
    /// * `Ok(RunSummary)` - The run drained or was cancelled
    /// * `Err(LoomError::Fatal)` - Persistence failed; state up to the failure
    ///   is preserved for recovery
    pub async fn run(&self) -> Result<RunSummary, LoomError> {
        let run_id = self.state.run_id();
        let started = Instant::now();
        let root_trace = TraceContext::root(run_id);

        tracing::info!("Starting crawl run {}", run_id);
        self.bus.publish(
            CrawlEventName::RunStarted,
            RunPayload {
                run_id,
                detail: None,
            },
        );

        let exit = self.dispatch_loop(&root_trace).await;

        // Tasks not yet started stay in the in-flight buffer when cancelled.
        self.runner.shutdown().await;
        self.enter(SchedulerState::Idle);

        let exit = match exit {
            Exit::Fatal(message) => Exit::Fatal(message),
            other => match self.control.fatal() {
                Some(message) => Exit::Fatal(message),
                None => other,
            },
        };

        match self.state.checkpoint() {
            Ok(snapshot) => tracing::debug!("Final snapshot at sequence {}", snapshot.last_seq),
            Err(e) => tracing::warn!("Failed to write final snapshot: {}", e),
        }

        let (status, name, detail) = match &exit {
            Exit::Drained => (RunStatus::Completed, CrawlEventName::RunCompleted, None),
            Exit::Cancelled => (RunStatus::Cancelled, CrawlEventName::RunCancelled, None),
            Exit::Fatal(message) => (
                RunStatus::Failed,
                CrawlEventName::RunFailed,
                Some(message.clone()),
            ),
        };
        self.bus.publish(name, RunPayload { run_id, detail });

        let summary =
            RunSummary::collect(run_id, status, self.control.counters(), started.elapsed());
        tracing::info!(
            "Crawl {}: {} dispatched, {} completed, {} dead-lettered in {:?}",
            status.to_db_string(),
            summary.dispatched,
            summary.completed,
            summary.dead_lettered,
            summary.elapsed
        );

        match exit {
            Exit::Fatal(message) => Err(LoomError::Fatal(message)),
            _ => Ok(summary),
        }
    }

    async fn dispatch_loop(&self, root_trace: &TraceContext) -> Exit {
        let counters = self.control.counters();
        let mut snapshot_mark = counters.finished();

        loop {
            if let Some(message) = self.control.fatal() {
                return Exit::Fatal(message);
            }
            if self.control.is_cancelled() {
                tracing::info!("Run cancelled; dispatch stopped");
                return Exit::Cancelled;
            }

            self.enter(SchedulerState::DrainingRetries);
            match self
                .state
                .release_due_retries(Instant::now(), self.options.retry_drain_batch)
            {
                Ok(0) => {}
                Ok(released) => tracing::debug!("Released {} due retries", released),
                Err(e) => return self.fatal(format!("releasing retries: {}", e)),
            }

            let finished = counters.finished();
            if finished.saturating_sub(snapshot_mark) >= self.options.snapshot_every {
                if let Err(e) = self.state.checkpoint() {
                    return self.fatal(format!("writing snapshot: {}", e));
                }
                snapshot_mark = finished;
            }

            if self.state.in_flight_len() >= self.options.max_in_flight {
                self.park(None).await;
                continue;
            }

            match self.state.claim() {
                Ok(Some(task)) => {
                    self.enter(SchedulerState::Dispatching);
                    let now = Instant::now();
                    let not_before = self.politeness.eligible_at(&task, now);
                    let mut trace = root_trace.child();
                    trace.depth = task.depth;

                    tracing::trace!(
                        "Dispatching {} to {} in {:?}",
                        task.url,
                        self.politeness.key_label(&task),
                        not_before.saturating_duration_since(now)
                    );
                    self.bus.publish(
                        CrawlEventName::TaskSubmitted,
                        TaskPayload::from_task(&task).with_trace(&trace),
                    );
                    RunCounters::bump(&counters.dispatched);

                    self.runner
                        .submit(Dispatch {
                            task,
                            not_before,
                            trace,
                        })
                        .await;
                }
                Ok(None) => {
                    if self.state.is_drained() {
                        tracing::info!("Frontier, retries and in-flight are empty");
                        return Exit::Drained;
                    }
                    self.park(self.state.next_retry_at()).await;
                }
                Err(e) => return self.fatal(format!("claiming next task: {}", e)),
            }
        }
    }

    /// Sleeps until woken, cancelled, the next retry is due, or `max_park`
    async fn park(&self, next_retry: Option<Instant>) {
        self.enter(SchedulerState::Parked);
        let now = Instant::now();
        let wait = next_retry
            .map(|at| at.saturating_duration_since(now))
            .map_or(self.options.max_park, |d| d.min(self.options.max_park));

        let token = self.control.token();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = self.control.woken() => {}
            _ = token.cancelled() => {}
        }
    }

    fn fatal(&self, message: String) -> Exit {
        self.control.fail(message.clone());
        Exit::Fatal(message)
    }
}
