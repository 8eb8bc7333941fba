//! Run-wide cancellation, fatal error slot, wake-ups and counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Outcome counters for one run
#[derive(Debug, Default)]
pub struct RunCounters {
    pub dispatched: AtomicU64,
    pub completed: AtomicU64,
    pub stopped: AtomicU64,
    pub discarded: AtomicU64,
    pub retried: AtomicU64,
    pub dead_lettered: AtomicU64,
}

impl RunCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Executions that reached a decision
    pub fn finished(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
            + self.stopped.load(Ordering::Relaxed)
            + self.retried.load(Ordering::Relaxed)
            + self.dead_lettered.load(Ordering::Relaxed)
    }
}

/// Shared control surface of a run
///
/// Cancelling stops the scheduler from polling and the runners from
/// starting tasks that have not begun executing. A fatal error cancels as
/// well and is reported as the run's failure.
#[derive(Debug, Default)]
pub struct RunControl {
    cancel: CancellationToken,
    fatal: Mutex<Option<String>>,
    wake: Notify,
    counters: RunCounters,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token for tasks that should stop when the run is cancelled
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Records a run-fatal error; only the first one is kept
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        {
            let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
            if fatal.is_none() {
                tracing::error!("Run-fatal error: {}", message);
                *fatal = Some(message);
            }
        }
        self.cancel();
    }

    pub fn fatal(&self) -> Option<String> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Wakes a parked scheduler
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    pub(crate) async fn woken(&self) {
        self.wake.notified().await;
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }
}
