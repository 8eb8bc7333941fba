//! Units of crawl work and the values that travel with them
//!
//! A [`ProcessingTask`] is immutable once built. Retrying a task produces a
//! new value through [`ProcessingTask::next_attempt`], and discovering a link
//! produces a child through [`ProcessingTask::child`].

mod decision;
mod trace;

pub use decision::{Decision, DecisionEntry, DecisionRecorder, DecisionSnapshot};
pub use trace::TraceContext;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque task identifier, unique within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Who produced a task and why
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOrigin {
    /// Tag of the component that published the task (`seed`, `link-follow`, ...)
    pub publisher: String,

    /// Route that was processing the parent when this task was discovered
    pub route_id: Option<String>,

    /// Parent task, if any
    pub parent_task_id: Option<TaskId>,

    /// Free-form reason (`seed`, `discovered`, `recovered`)
    pub reason: String,

    /// Where the task came from (config file, page URL, journal)
    pub source: Option<String>,
}

impl TaskOrigin {
    /// Origin for a task seeded from configuration
    pub fn seed(source: impl Into<String>) -> Self {
        Self {
            publisher: "seed".to_string(),
            route_id: None,
            parent_task_id: None,
            reason: "seed".to_string(),
            source: Some(source.into()),
        }
    }
}

/// A unit of crawl work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTask {
    pub id: TaskId,

    /// Target resource
    pub url: String,

    /// Distance from a seed
    pub depth: u32,

    /// Informational back-reference to the page that linked here
    pub parent_uri: Option<String>,

    pub origin: TaskOrigin,

    /// Dispatch ordering hint; lower values dispatch first
    pub priority: u32,

    /// Earliest intended execution time
    pub scheduled_at: DateTime<Utc>,

    /// Number of execution attempts made so far
    pub attempt: u32,

    /// Routing tag selecting the pipeline that processes this task
    pub hint: Option<String>,
}

impl ProcessingTask {
    /// Creates a depth-0 task with default priority and no hint
    pub fn new(url: impl Into<String>, origin: TaskOrigin) -> Self {
        Self {
            id: TaskId::new(),
            url: url.into(),
            depth: 0,
            parent_uri: None,
            origin,
            priority: 0,
            scheduled_at: Utc::now(),
            attempt: 0,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Builds a task discovered while processing `self`
    ///
    /// The child gets a fresh id, `depth + 1`, and keeps the parent's hint
    /// unless a new one is given.
    pub fn child(&self, url: impl Into<String>, hint: Option<String>, route_id: Option<&str>) -> Self {
        Self {
            id: TaskId::new(),
            url: url.into(),
            depth: self.depth + 1,
            parent_uri: Some(self.url.clone()),
            origin: TaskOrigin {
                publisher: "pipeline".to_string(),
                route_id: route_id.map(str::to_string),
                parent_task_id: Some(self.id),
                reason: "discovered".to_string(),
                source: Some(self.url.clone()),
            },
            priority: self.priority,
            scheduled_at: Utc::now(),
            attempt: 0,
            hint: hint.or_else(|| self.hint.clone()),
        }
    }

    /// Returns the copy of this task used for the next retry
    ///
    /// The id is kept so the retry stays traceable to the original task.
    pub fn next_attempt(&self, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            attempt: self.attempt + 1,
            scheduled_at,
            ..self.clone()
        }
    }
}
