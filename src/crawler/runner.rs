//! Concurrency strategies for executing dispatched tasks
//!
//! - [`SingleThreadRunner`] executes each task inline, fully serial
//! - [`PooledRunner`] executes on a bounded worker pool
//!
//! Both wait for the task's politeness reservation before fetching. The
//! pooled runner waits before taking a worker, so a delayed origin never
//! occupies one.

use crate::crawler::executor::TaskExecutor;
use crate::task::{ProcessingTask, TraceContext};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

/// A task handed from the scheduler to a runner
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub task: ProcessingTask,
    /// Reserved politeness slot; the fetch must not start earlier
    pub not_before: Instant,
    pub trace: TraceContext,
}

impl Dispatch {
    /// Sleeps until the reserved slot
    pub async fn wait_until_eligible(&self) {
        if self.not_before > Instant::now() {
            tokio::time::sleep_until(self.not_before.into()).await;
        }
    }
}

/// Executes dispatched tasks
#[async_trait]
pub trait Runner: Send + Sync {
    /// Accepts a task for execution
    ///
    /// Returns once the runner has taken the task; a serial runner returns
    /// after executing it.
    async fn submit(&self, dispatch: Dispatch);

    /// Stops accepting tasks and waits for accepted ones to finish
    async fn shutdown(&self);
}

/// Executes every task inline on the caller
pub struct SingleThreadRunner {
    executor: Arc<TaskExecutor>,
}

impl SingleThreadRunner {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Runner for SingleThreadRunner {
    async fn submit(&self, dispatch: Dispatch) {
        let token = self.executor.control().token();
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Cancelled before {} started; left in flight", dispatch.task.url);
                return;
            }
            _ = dispatch.wait_until_eligible() => {}
        }
        self.executor.execute(dispatch).await;
    }

    async fn shutdown(&self) {}
}

/// Executes tasks on up to `workers` concurrent workers
pub struct PooledRunner {
    executor: Arc<TaskExecutor>,
    workers: Arc<Semaphore>,
    tracker: TaskTracker,
}

impl PooledRunner {
    pub fn new(executor: Arc<TaskExecutor>, workers: usize) -> Self {
        Self {
            executor,
            workers: Arc::new(Semaphore::new(workers.max(1))),
            tracker: TaskTracker::new(),
        }
    }

    /// Tasks accepted and not yet finished
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }
}

#[async_trait]
impl Runner for PooledRunner {
    async fn submit(&self, dispatch: Dispatch) {
        if self.tracker.is_closed() {
            tracing::warn!("Runner is shut down; {} left in flight", dispatch.task.url);
            return;
        }

        let executor = Arc::clone(&self.executor);
        let workers = Arc::clone(&self.workers);
        let token = executor.control().token();

        self.tracker.spawn(async move {
            let permit = tokio::select! {
                _ = token.cancelled() => None,
                permit = async {
                    dispatch.wait_until_eligible().await;
                    workers.acquire_owned().await.ok()
                } => permit,
            };

            let Some(_permit) = permit else {
                tracing::debug!("Cancelled before {} started; left in flight", dispatch.task.url);
                return;
            };
            executor.execute(dispatch).await;
        });
    }

    async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}
