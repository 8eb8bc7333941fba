//! Executes one dispatched task and applies the decision
//!
//! Flow: fetch, run the route's steps, then one of
//! - offer discovered tasks (continue) and mark the task processed
//! - mark the task processed without enqueuing (stop)
//! - schedule a retry or dead-letter the task (failure)
//!
//! The decision is recorded before the task leaves the in-flight buffer,
//! so a crash in between re-executes the task rather than losing it.

use crate::crawler::backoff::RetryPolicy;
use crate::crawler::control::{RunControl, RunCounters};
use crate::crawler::fetcher::{FetchRequest, Fetcher};
use crate::crawler::pipeline::{Discovery, PipelineResult, ProcessingContext, Routes};
use crate::crawler::runner::Dispatch;
use crate::events::{
    CrawlEventName, DecisionPayload, EventBus, StepPayload, TaskFailedPayload, TaskPayload,
};
use crate::state::{DeadLetterEntry, DeadLetterItem, RetryEntry, RunState};
use crate::storage::StorageResult;
use crate::task::{DecisionSnapshot, ProcessingTask, TraceContext};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;

/// How one execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Completed {
        route_id: String,
        discovered: Vec<Discovery>,
    },
    Stopped {
        reason: String,
    },
    Failed(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Failure {
    stage_id: String,
    route_id: Option<String>,
    error: String,
    permanent: bool,
    decisions: DecisionSnapshot,
}

/// Runs tasks for a runner
pub struct TaskExecutor {
    state: Arc<RunState>,
    fetcher: Arc<dyn Fetcher>,
    routes: Arc<Routes>,
    retry: RetryPolicy,
    bus: EventBus,
    control: Arc<RunControl>,
    max_depth: Option<u32>,
}

impl TaskExecutor {
    pub fn new(
        state: Arc<RunState>,
        fetcher: Arc<dyn Fetcher>,
        routes: Arc<Routes>,
        retry: RetryPolicy,
        bus: EventBus,
        control: Arc<RunControl>,
    ) -> Self {
        Self {
            state,
            fetcher,
            routes,
            retry,
            bus,
            control,
            max_depth: None,
        }
    }

    /// Discards discoveries deeper than `max_depth`
    pub fn with_max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn control(&self) -> &Arc<RunControl> {
        &self.control
    }

    /// Executes `dispatch` to a terminal decision
    ///
    /// Task failures are handled here and never returned. Persistence
    /// failures are run-fatal and are reported through [`RunControl::fail`].
    pub async fn execute(&self, dispatch: Dispatch) {
        let Dispatch { task, trace, .. } = dispatch;

        self.bus.publish(
            CrawlEventName::TaskStarted,
            TaskPayload::from_task(&task).with_trace(&trace),
        );
        tracing::debug!("Executing {} (attempt {})", task.url, task.attempt);

        let outcome = self.run_pipeline(&task, &trace).await;

        if let Err(e) = self.apply(&task, &trace, outcome) {
            self.control.fail(format!("persisting decision for {}: {}", task.url, e));
        }
        self.control.notify();
    }

    async fn run_pipeline(&self, task: &ProcessingTask, trace: &TraceContext) -> Outcome {
        let fetch = match self.fetcher.fetch(FetchRequest::for_task(task)).await {
            Ok(fetch) => fetch,
            Err(e) => {
                return Outcome::Failed(Failure {
                    stage_id: "fetch".to_string(),
                    route_id: None,
                    error: e.to_string(),
                    permanent: false,
                    decisions: DecisionSnapshot::default(),
                })
            }
        };

        let mut route = self.routes.resolve(task.hint.as_deref());
        let mut ctx = ProcessingContext::new(task, &fetch, trace, route.id());
        let mut hops = 0;
        let mut index = 0;

        while let Some(step) = route.steps().get(index) {
            let stage_id = step.id().to_string();
            let step_payload = || StepPayload {
                task_id: task.id,
                stage_id: stage_id.clone(),
                route_id: route.id().to_string(),
            };

            self.bus.publish(CrawlEventName::StepStarted, step_payload());
            ctx.decisions().enter_stage(&stage_id);
            let recorded_before = ctx.recorder().len();

            let result = step.execute(&mut ctx).await;

            for entry in ctx.recorder().entries_since(recorded_before) {
                self.bus.publish(
                    CrawlEventName::DecisionRecorded,
                    DecisionPayload {
                        task_id: task.id,
                        entry: entry.clone(),
                    },
                );
            }

            match result {
                Err(e) => {
                    return Outcome::Failed(Failure {
                        stage_id,
                        route_id: Some(route.id().to_string()),
                        error: e.to_string(),
                        permanent: e.is_permanent(),
                        decisions: ctx.recorder().snapshot(),
                    });
                }
                Ok(Some(PipelineResult::Stop { reason })) => {
                    self.bus.publish(CrawlEventName::StepCompleted, step_payload());
                    return Outcome::Stopped { reason };
                }
                Ok(Some(PipelineResult::Continue {
                    route_id: Some(next),
                })) if next != route.id() => {
                    self.bus.publish(CrawlEventName::StepCompleted, step_payload());
                    hops += 1;
                    let target = match self.routes.get(&next) {
                        Some(target) if hops <= self.routes.route_count() => target,
                        Some(_) => {
                            return Outcome::Failed(Failure {
                                stage_id,
                                route_id: Some(route.id().to_string()),
                                error: format!("route cycle through '{}'", next),
                                permanent: true,
                                decisions: ctx.recorder().snapshot(),
                            })
                        }
                        None => {
                            return Outcome::Failed(Failure {
                                stage_id,
                                route_id: Some(route.id().to_string()),
                                error: format!("unknown route '{}'", next),
                                permanent: true,
                                decisions: ctx.recorder().snapshot(),
                            })
                        }
                    };
                    route = target;
                    ctx.set_route(route.id());
                    index = 0;
                }
                Ok(_) => {
                    self.bus.publish(CrawlEventName::StepCompleted, step_payload());
                    index += 1;
                }
            }
        }

        let route_id = ctx.route_id().to_string();
        let (_, discovered) = ctx.into_parts();
        Outcome::Completed {
            route_id,
            discovered,
        }
    }

    fn apply(
        &self,
        task: &ProcessingTask,
        trace: &TraceContext,
        outcome: Outcome,
    ) -> StorageResult<()> {
        let counters = self.control.counters();

        match outcome {
            Outcome::Completed {
                route_id,
                discovered,
            } => {
                for discovery in discovered {
                    self.offer_discovery(task, trace, &route_id, discovery)?;
                }
                self.state.seen().mark_processed(&task.url);
                self.state.finish(task.id)?;
                RunCounters::bump(&counters.completed);
                self.bus.publish(
                    CrawlEventName::TaskCompleted,
                    TaskPayload::from_task(task).with_trace(trace),
                );
            }
            Outcome::Stopped { reason } => {
                self.state.seen().mark_processed(&task.url);
                self.state.finish(task.id)?;
                RunCounters::bump(&counters.stopped);
                self.bus.publish(
                    CrawlEventName::TaskStopped,
                    TaskPayload::from_task(task)
                        .with_reason(reason)
                        .with_trace(trace),
                );
            }
            Outcome::Failed(failure) => {
                self.fail(task, trace, failure)?;
            }
        }

        Ok(())
    }

    fn offer_discovery(
        &self,
        parent: &ProcessingTask,
        trace: &TraceContext,
        route_id: &str,
        discovery: Discovery,
    ) -> StorageResult<()> {
        let child = parent.child(discovery.uri, discovery.hint, Some(route_id));
        let counters = self.control.counters();

        if let Some(max_depth) = self.max_depth {
            if child.depth > max_depth {
                RunCounters::bump(&counters.discarded);
                self.bus.publish(
                    CrawlEventName::TaskDiscarded,
                    TaskPayload::from_task(&child)
                        .with_reason("depth-exceeded")
                        .with_trace(&trace.child()),
                );
                return Ok(());
            }
        }

        if !self.state.submit(child.clone())? {
            RunCounters::bump(&counters.discarded);
            self.bus.publish(
                CrawlEventName::TaskDiscarded,
                TaskPayload::from_task(&child)
                    .with_reason("duplicate")
                    .with_trace(&trace.child()),
            );
        }
        Ok(())
    }

    fn fail(
        &self,
        task: &ProcessingTask,
        trace: &TraceContext,
        failure: Failure,
    ) -> StorageResult<()> {
        let counters = self.control.counters();
        let attempts_made = task.attempt + 1;
        let retry = !failure.permanent && self.retry.should_retry(task.attempt);
        let delay = retry.then(|| self.retry.delay_for(attempts_made));

        let payload = TaskFailedPayload {
            task: TaskPayload::from_task(task).with_trace(trace),
            stage_id: failure.stage_id.clone(),
            route_id: failure.route_id.clone(),
            error: failure.error.clone(),
            retry_in_ms: delay.map(|d| d.as_millis() as u64),
            decisions: failure.decisions.clone(),
        };
        self.bus.publish(CrawlEventName::TaskFailed, payload.clone());

        match delay {
            Some(delay) => {
                let scheduled_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
                self.state.schedule_retry(RetryEntry {
                    eligible_at: Instant::now() + delay,
                    task: task.next_attempt(scheduled_at),
                    reason: failure.error,
                })?;
                self.state.finish(task.id)?;
                RunCounters::bump(&counters.retried);
                tracing::debug!("Retrying {} in {:?}", task.url, delay);
                self.bus.publish(CrawlEventName::TaskRetryScheduled, payload);
            }
            None => {
                let reason = if failure.permanent {
                    "rejected"
                } else {
                    "retries-exhausted"
                };
                self.state.dead_letter(DeadLetterEntry {
                    task: task.clone(),
                    item: DeadLetterItem {
                        failed_at: Utc::now(),
                        reason: reason.to_string(),
                        stage_id: failure.stage_id,
                        route_id: failure.route_id,
                        attempt: attempts_made,
                        error: failure.error,
                    },
                    decisions: failure.decisions,
                })?;
                self.state.finish(task.id)?;
                RunCounters::bump(&counters.dead_lettered);
                self.bus.publish(CrawlEventName::TaskDeadLettered, payload);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::fetcher::{FetchError, FetchResult};
    use crate::crawler::pipeline::{PipelineStep, Route, StepError};
    use crate::events::{CrawlEvent, EventPayload};
    use crate::state::FifoFrontier;
    use crate::storage::MemoryStore;
    use crate::storage::StateStore;
    use crate::task::TaskOrigin;
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use uuid::Uuid;

    /// Fetcher that fails for URLs containing "fail"
    struct StubFetcher;

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResult, FetchError> {
            if request.url.contains("fail") {
                return Err(FetchError::Status {
                    code: 503,
                    url: request.url,
                });
            }
            Ok(FetchResult {
                uri: request.url,
                status_code: 200,
                headers: Vec::new(),
                body: String::new(),
                content_type: Some("text/html".to_string()),
            })
        }
    }

    /// Step driven by a fixed script
    enum Script {
        Enqueue(Vec<&'static str>),
        StopAfterEnqueue(&'static str),
        Reject,
        Route(&'static str),
        Record(&'static str),
    }

    struct ScriptedStep(Script);

    #[async_trait]
    impl PipelineStep for ScriptedStep {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn execute(
            &self,
            ctx: &mut ProcessingContext<'_>,
        ) -> Result<Option<PipelineResult>, StepError> {
            match &self.0 {
                Script::Enqueue(urls) => {
                    for url in urls {
                        ctx.enqueue(*url, None);
                    }
                    Ok(None)
                }
                Script::StopAfterEnqueue(url) => {
                    ctx.enqueue(*url, None);
                    Ok(Some(PipelineResult::stop("nothing to see")))
                }
                Script::Reject => {
                    ctx.decisions().reject("blocked", "page is blocked");
                    Err(StepError::rejected("blocked", "page is blocked"))
                }
                Script::Route(route) => Ok(Some(PipelineResult::route(*route))),
                Script::Record(code) => {
                    ctx.decisions().accept(*code, "ran");
                    Ok(None)
                }
            }
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        state: Arc<RunState>,
        control: Arc<RunControl>,
        executor: TaskExecutor,
        events: broadcast::Receiver<Arc<CrawlEvent>>,
    }

    fn create_test_fixture(routes: Routes) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(RunState::new(
            Uuid::new_v4(),
            Box::new(FifoFrontier::new()),
            store.clone(),
        ));
        let bus = EventBus::new();
        let events = bus.subscribe();
        let control = Arc::new(RunControl::new());
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 2.0,
        };
        let executor = TaskExecutor::new(
            Arc::clone(&state),
            Arc::new(StubFetcher),
            Arc::new(routes),
            retry,
            bus,
            Arc::clone(&control),
        );
        Fixture {
            store,
            state,
            control,
            executor,
            events,
        }
    }

    fn single_route(script: Script) -> Routes {
        Routes::new(Route::new("default").step(ScriptedStep(script)))
    }

    /// Submits and claims `task`, returning the dispatch the scheduler would build
    fn claimed(state: &RunState, task: ProcessingTask) -> Dispatch {
        state.submit(task).unwrap();
        let task = state.claim().unwrap().unwrap();
        Dispatch {
            task,
            not_before: Instant::now(),
            trace: TraceContext::root(state.run_id()),
        }
    }

    fn drain(events: &mut broadcast::Receiver<Arc<CrawlEvent>>) -> Vec<Arc<CrawlEvent>> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn names(events: &[Arc<CrawlEvent>]) -> Vec<CrawlEventName> {
        events.iter().map(|e| e.name).collect()
    }

    fn seed(url: &str) -> ProcessingTask {
        ProcessingTask::new(url, TaskOrigin::seed("test"))
    }

    #[tokio::test]
    async fn test_completed_task_offers_new_discoveries() {
        let mut fx = create_test_fixture(single_route(Script::Enqueue(vec![
            "https://example.com/a",
            "https://example.com/",
        ])));
        let dispatch = claimed(&fx.state, seed("https://example.com/"));
        let parent_id = dispatch.task.id;

        fx.executor.execute(dispatch).await;

        assert!(!fx.state.is_in_flight(parent_id));
        assert_eq!(fx.state.frontier_len(), 1);
        assert!(fx.state.seen().is_processed("https://example.com/"));

        let counters = fx.control.counters();
        assert_eq!(counters.completed.load(Ordering::Relaxed), 1);
        assert_eq!(counters.discarded.load(Ordering::Relaxed), 1);

        let events = drain(&mut fx.events);
        assert_eq!(
            names(&events),
            vec![
                CrawlEventName::TaskStarted,
                CrawlEventName::StepStarted,
                CrawlEventName::StepCompleted,
                CrawlEventName::TaskDiscarded,
                CrawlEventName::TaskCompleted,
            ]
        );
        match &events[3].payload {
            EventPayload::Task(payload) => assert_eq!(payload.reason.as_deref(), Some("duplicate")),
            other => panic!("unexpected payload {:?}", other),
        }

        let child = fx.state.poll().unwrap().unwrap();
        assert_eq!(child.depth, 1);
        assert_eq!(child.origin.parent_task_id, Some(parent_id));
        assert_eq!(child.origin.route_id.as_deref(), Some("default"));
    }

    #[tokio::test]
    async fn test_transient_failure_schedules_retry_with_same_id() {
        let mut fx = create_test_fixture(single_route(Script::Enqueue(vec![])));
        let dispatch = claimed(&fx.state, seed("https://example.com/fail"));
        let id = dispatch.task.id;

        fx.executor.execute(dispatch).await;

        assert_eq!(fx.state.retry_len(), 1);
        assert_eq!(fx.state.in_flight_len(), 0);
        assert_eq!(
            names(&drain(&mut fx.events)),
            vec![
                CrawlEventName::TaskStarted,
                CrawlEventName::TaskFailed,
                CrawlEventName::TaskRetryScheduled,
            ]
        );

        assert_eq!(fx.state.release_due_retries(Instant::now(), 10).unwrap(), 1);
        let retried = fx.state.poll().unwrap().unwrap();
        assert_eq!(retried.id, id);
        assert_eq!(retried.attempt, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_dead_letter() {
        let mut fx = create_test_fixture(single_route(Script::Enqueue(vec![])));
        let mut task = seed("https://example.com/fail");
        task.attempt = 3;
        let dispatch = claimed(&fx.state, task);

        fx.executor.execute(dispatch).await;

        assert_eq!(fx.state.retry_len(), 0);
        let letters = fx.store.dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].item.reason, "retries-exhausted");
        assert_eq!(letters[0].item.stage_id, "fetch");
        assert_eq!(letters[0].item.attempt, 4);
        assert!(fx.state.dead_letters().contains(letters[0].task.id));

        let events = drain(&mut fx.events);
        assert_eq!(
            names(&events)[1..],
            [CrawlEventName::TaskFailed, CrawlEventName::TaskDeadLettered]
        );
        match &events[1].payload {
            EventPayload::TaskFailed(payload) => {
                assert_eq!(payload.stage_id, "fetch");
                assert!(payload.retry_in_ms.is_none());
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejection_dead_letters_on_first_attempt() {
        let fx = create_test_fixture(single_route(Script::Reject));
        let dispatch = claimed(&fx.state, seed("https://example.com/"));

        fx.executor.execute(dispatch).await;

        let letters = fx.store.dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].item.reason, "rejected");
        assert_eq!(letters[0].item.stage_id, "scripted");
        assert_eq!(letters[0].item.route_id.as_deref(), Some("default"));
        assert_eq!(letters[0].decisions.rejections().count(), 1);
        assert_eq!(fx.state.retry_len(), 0);
    }

    #[tokio::test]
    async fn test_stop_discards_discoveries() {
        let mut fx =
            create_test_fixture(single_route(Script::StopAfterEnqueue("https://example.com/a")));
        let dispatch = claimed(&fx.state, seed("https://example.com/"));

        fx.executor.execute(dispatch).await;

        assert_eq!(fx.state.frontier_len(), 0);
        assert!(fx.state.is_drained());
        assert_eq!(fx.control.counters().stopped.load(Ordering::Relaxed), 1);
        let events = drain(&mut fx.events);
        let stopped = events.last().unwrap();
        assert_eq!(stopped.name, CrawlEventName::TaskStopped);
        match &stopped.payload {
            EventPayload::Task(payload) => {
                assert_eq!(payload.reason.as_deref(), Some("nothing to see"))
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_handoff_runs_target_route() {
        let routes = Routes::new(
            Route::new("default")
                .step(ScriptedStep(Script::Route("docs")))
                .step(ScriptedStep(Script::Record("skipped"))),
        )
        .with_route(
            Route::new("docs")
                .step(ScriptedStep(Script::Record("docs")))
                .step(ScriptedStep(Script::Enqueue(vec!["https://example.com/doc"]))),
        );
        let mut fx = create_test_fixture(routes);
        let dispatch = claimed(&fx.state, seed("https://example.com/"));

        fx.executor.execute(dispatch).await;

        let events = drain(&mut fx.events);
        let decisions: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::Decision(d) => Some(d.entry.code.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(decisions, vec!["docs".to_string()]);

        let child = fx.state.poll().unwrap().unwrap();
        assert_eq!(child.origin.route_id.as_deref(), Some("docs"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_permanent() {
        let fx = create_test_fixture(single_route(Script::Route("missing")));
        let dispatch = claimed(&fx.state, seed("https://example.com/"));

        fx.executor.execute(dispatch).await;

        let letters = fx.store.dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].item.reason, "rejected");
        assert!(letters[0].item.error.contains("missing"));
    }

    #[tokio::test]
    async fn test_route_cycle_is_permanent() {
        let routes = Routes::new(Route::new("default").step(ScriptedStep(Script::Route("b"))))
            .with_route(Route::new("b").step(ScriptedStep(Script::Route("default"))));
        let fx = create_test_fixture(routes);
        let dispatch = claimed(&fx.state, seed("https://example.com/"));

        fx.executor.execute(dispatch).await;

        let letters = fx.store.dead_letters().unwrap();
        assert_eq!(letters.len(), 1);
        assert!(letters[0].item.error.contains("cycle"));
    }

    #[tokio::test]
    async fn test_depth_limit_discards_deep_discoveries() {
        let mut fx = create_test_fixture(single_route(Script::Enqueue(vec![
            "https://example.com/deep",
        ])));
        fx.executor = fx.executor.with_max_depth(Some(0));
        let dispatch = claimed(&fx.state, seed("https://example.com/"));

        fx.executor.execute(dispatch).await;

        assert_eq!(fx.state.frontier_len(), 0);
        assert!(!fx.state.seen().is_discovered("https://example.com/deep"));
        let discarded = drain(&mut fx.events)
            .into_iter()
            .find(|e| e.name == CrawlEventName::TaskDiscarded)
            .unwrap();
        match &discarded.payload {
            EventPayload::Task(payload) => {
                assert_eq!(payload.reason.as_deref(), Some("depth-exceeded"))
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_storage_failure_is_fatal() {
        let fx = create_test_fixture(single_route(Script::Enqueue(vec![])));
        let dispatch = claimed(&fx.state, seed("https://example.com/"));
        let id = dispatch.task.id;
        fx.store.set_unavailable(true);

        fx.executor.execute(dispatch).await;

        assert!(fx.control.fatal().is_some());
        assert!(fx.control.is_cancelled());
        assert!(fx.state.is_in_flight(id));
    }
}
