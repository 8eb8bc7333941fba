//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sumi_loom::crawler::{
    default_routes, FetchError, FetchRequest, FetchResult, Fetcher, PooledRunner, RetryPolicy,
    RunControl, Runner, Scheduler, SchedulerOptions, SingleThreadRunner, TaskExecutor,
};
use sumi_loom::events::EventBus;
use sumi_loom::politeness::{PolitenessPolicy, Unrestricted};
use sumi_loom::state::{FifoFrontier, Frontier};
use sumi_loom::storage::{MemoryStore, StateStore};
use sumi_loom::task::{ProcessingTask, TaskOrigin};
use sumi_loom::RunState;
use uuid::Uuid;

/// In-memory site: every URL is an HTML page, some with links, some failing
#[derive(Default)]
pub struct SiteFetcher {
    links: HashMap<String, Vec<String>>,
    /// Remaining failures per URL
    failures: Mutex<HashMap<String, u32>>,
    delay: Duration,
    log: Mutex<Vec<(String, Instant)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SiteFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, links: &[&str]) -> Self {
        self.links
            .insert(url.to_string(), links.iter().map(|l| l.to_string()).collect());
        self
    }

    /// Fails the first `times` fetches of `url`
    pub fn flaky(self, url: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    pub fn failing(self, url: &str) -> Self {
        self.flaky(url, u32::MAX)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Start instants of every fetch, in order
    pub fn fetches(&self) -> Vec<(String, Instant)> {
        self.log.lock().unwrap().clone()
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|(u, _)| u == url).count()
    }

    pub fn fetch_times(&self, prefix: &str) -> Vec<Instant> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u.starts_with(prefix))
            .map(|(_, at)| *at)
            .collect()
    }

    /// Highest number of fetches that ran at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn body(&self, url: &str) -> String {
        let anchors: String = self
            .links
            .get(url)
            .map(|links| {
                links
                    .iter()
                    .map(|l| format!("<a href=\"{}\">link</a>", l))
                    .collect()
            })
            .unwrap_or_default();
        format!(
            "<html><head><title>{}</title></head><body>{}</body></html>",
            url, anchors
        )
    }

    fn should_fail(&self, url: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(url) {
            Some(0) | None => false,
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                true
            }
        }
    }
}

#[async_trait]
impl Fetcher for SiteFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResult, FetchError> {
        self.log
            .lock()
            .unwrap()
            .push((request.url.clone(), Instant::now()));

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.should_fail(&request.url) {
            return Err(FetchError::Status {
                code: 503,
                url: request.url,
            });
        }

        Ok(FetchResult {
            body: self.body(&request.url),
            uri: request.url,
            status_code: 200,
            headers: Vec::new(),
            content_type: Some("text/html; charset=utf-8".to_string()),
        })
    }
}

/// Everything needed to drive one scheduler over a shared store
pub struct TestRun {
    pub store: Arc<MemoryStore>,
    pub state: Arc<RunState>,
    pub fetcher: Arc<SiteFetcher>,
    pub control: Arc<RunControl>,
    pub bus: EventBus,
    pub options: SchedulerOptions,
    pub retry: RetryPolicy,
    pub politeness: Arc<dyn PolitenessPolicy>,
    /// `None` runs tasks inline on the scheduler
    pub workers: Option<usize>,
}

impl TestRun {
    pub fn new(fetcher: SiteFetcher) -> Self {
        Self::with_frontier(fetcher, Box::new(FifoFrontier::new()))
    }

    pub fn with_frontier(fetcher: SiteFetcher, frontier: Box<dyn Frontier>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(RunState::new(
            Uuid::new_v4(),
            frontier,
            store.clone() as Arc<dyn StateStore>,
        ));
        Self {
            store,
            state,
            fetcher: Arc::new(fetcher),
            control: Arc::new(RunControl::new()),
            bus: EventBus::new(),
            options: SchedulerOptions {
                max_park: Duration::from_millis(20),
                ..SchedulerOptions::default()
            },
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
                multiplier: 2.0,
            },
            politeness: Arc::new(Unrestricted),
            workers: Some(4),
        }
    }

    pub fn seed(&self, url: &str) {
        self.state
            .submit(ProcessingTask::new(url, TaskOrigin::seed("test")))
            .unwrap();
    }

    pub fn executor(&self) -> Arc<TaskExecutor> {
        Arc::new(TaskExecutor::new(
            Arc::clone(&self.state),
            self.fetcher.clone() as Arc<dyn Fetcher>,
            Arc::new(default_routes()),
            self.retry.clone(),
            self.bus.clone(),
            Arc::clone(&self.control),
        ))
    }

    pub fn scheduler(&self) -> Scheduler {
        let executor = self.executor();
        let runner: Box<dyn Runner> = match self.workers {
            Some(workers) => Box::new(PooledRunner::new(executor, workers)),
            None => Box::new(SingleThreadRunner::new(executor)),
        };
        Scheduler::new(
            Arc::clone(&self.state),
            Arc::clone(&self.politeness),
            runner,
            Arc::clone(&self.control),
            self.bus.clone(),
            self.options.clone(),
        )
    }
}

/// Records the largest in-flight buffer size seen until stopped
pub struct InFlightSampler {
    peak: Arc<AtomicUsize>,
    stop: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

impl InFlightSampler {
    pub fn start(state: Arc<RunState>) -> Self {
        let peak = Arc::new(AtomicUsize::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn({
            let peak = Arc::clone(&peak);
            let stop = Arc::clone(&stop);
            async move {
                while !stop.load(Ordering::SeqCst) {
                    peak.fetch_max(state.in_flight_len(), Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
        });
        Self { peak, stop, handle }
    }

    pub async fn finish(self) -> usize {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.await.unwrap();
        self.peak.load(Ordering::SeqCst)
    }
}

/// FIFO frontier whose length reads stall, widening the window between
/// the scheduler's emptiness checks
#[derive(Default)]
pub struct StallingFrontier {
    inner: FifoFrontier,
    stall: Duration,
}

impl StallingFrontier {
    pub fn new(stall: Duration) -> Self {
        Self {
            inner: FifoFrontier::new(),
            stall,
        }
    }
}

impl Frontier for StallingFrontier {
    fn offer(&self, task: ProcessingTask) {
        self.inner.offer(task);
    }

    fn poll(&self) -> Option<ProcessingTask> {
        self.inner.poll()
    }

    fn len(&self) -> usize {
        let len = self.inner.len();
        std::thread::sleep(self.stall);
        len
    }

    fn snapshot(&self) -> Vec<ProcessingTask> {
        self.inner.snapshot()
    }
}
