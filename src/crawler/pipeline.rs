//! Pipeline steps and routing
//!
//! A route is an ordered list of [`PipelineStep`]s. The executor picks the
//! route matching a task's hint (or the default route) and runs its steps
//! against the fetched resource.

use crate::crawler::fetcher::FetchResult;
use crate::task::{DecisionRecorder, ProcessingTask, TraceContext};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Outcome of a single step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineResult {
    /// Run the next step. A route id other than the current one hands the
    /// rest of the execution to that route.
    Continue { route_id: Option<String> },
    /// End the execution; nothing discovered by this task is enqueued
    Stop { reason: String },
}

impl PipelineResult {
    pub fn proceed() -> Self {
        Self::Continue { route_id: None }
    }

    pub fn route(route_id: impl Into<String>) -> Self {
        Self::Continue {
            route_id: Some(route_id.into()),
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self::Stop {
            reason: reason.into(),
        }
    }
}

/// Errors raised by pipeline steps
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// Transient failure; the task is retried while attempts remain
    #[error("{message}")]
    Failed { message: String },

    /// Permanent failure; the task is dead-lettered immediately
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// A URL a step asked to enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub uri: String,
    pub hint: Option<String>,
}

/// What a step sees while processing one task
///
/// Steps never touch scheduler state. Enqueued URLs are collected here and
/// offered by the executor through the seen store once the pipeline ends.
pub struct ProcessingContext<'a> {
    task: &'a ProcessingTask,
    fetch: &'a FetchResult,
    trace: &'a TraceContext,
    route_id: String,
    decisions: DecisionRecorder,
    discovered: Vec<Discovery>,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(
        task: &'a ProcessingTask,
        fetch: &'a FetchResult,
        trace: &'a TraceContext,
        route_id: impl Into<String>,
    ) -> Self {
        Self {
            task,
            fetch,
            trace,
            route_id: route_id.into(),
            decisions: DecisionRecorder::new(),
            discovered: Vec::new(),
        }
    }

    pub fn task(&self) -> &ProcessingTask {
        self.task
    }

    pub fn fetch(&self) -> &FetchResult {
        self.fetch
    }

    pub fn trace(&self) -> &TraceContext {
        self.trace
    }

    /// Route currently executing
    pub fn route_id(&self) -> &str {
        &self.route_id
    }

    pub fn decisions(&mut self) -> &mut DecisionRecorder {
        &mut self.decisions
    }

    /// Asks for `uri` to be crawled; `None` keeps the current task's hint
    pub fn enqueue(&mut self, uri: impl Into<String>, hint: Option<String>) {
        self.discovered.push(Discovery {
            uri: uri.into(),
            hint,
        });
    }

    pub fn discovered(&self) -> &[Discovery] {
        &self.discovered
    }

    pub(crate) fn set_route(&mut self, route_id: &str) {
        self.route_id = route_id.to_string();
    }

    pub(crate) fn recorder(&self) -> &DecisionRecorder {
        &self.decisions
    }

    pub(crate) fn into_parts(self) -> (DecisionRecorder, Vec<Discovery>) {
        (self.decisions, self.discovered)
    }
}

/// One unit of processing applied to a fetched resource
#[async_trait]
pub trait PipelineStep: Send + Sync {
    /// Stable identifier used in events and dead-letter entries
    fn id(&self) -> &str;

    /// Processes the resource; `Ok(None)` means continue
    async fn execute(
        &self,
        ctx: &mut ProcessingContext<'_>,
    ) -> Result<Option<PipelineResult>, StepError>;
}

/// A named sequence of steps
#[derive(Clone)]
pub struct Route {
    id: String,
    steps: Vec<Arc<dyn PipelineStep>>,
}

impl Route {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn steps(&self) -> &[Arc<dyn PipelineStep>] {
        &self.steps
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.id()).collect();
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("steps", &steps)
            .finish()
    }
}

/// Route table keyed by task hint
#[derive(Debug, Clone)]
pub struct Routes {
    default: Route,
    by_hint: HashMap<String, Route>,
}

impl Routes {
    /// Creates a table where every task uses `default`
    pub fn new(default: Route) -> Self {
        Self {
            default,
            by_hint: HashMap::new(),
        }
    }

    /// Registers `route` under its own id
    pub fn with_route(mut self, route: Route) -> Self {
        self.by_hint.insert(route.id.clone(), route);
        self
    }

    /// Route for a task hint; unknown or missing hints get the default
    pub fn resolve(&self, hint: Option<&str>) -> &Route {
        hint.and_then(|h| self.by_hint.get(h))
            .unwrap_or(&self.default)
    }

    /// Route with exactly this id, including the default route
    pub fn get(&self, route_id: &str) -> Option<&Route> {
        if self.default.id == route_id {
            Some(&self.default)
        } else {
            self.by_hint.get(route_id)
        }
    }

    /// Number of routes, counting the default
    pub fn route_count(&self) -> usize {
        self.by_hint.len() + 1
    }
}
