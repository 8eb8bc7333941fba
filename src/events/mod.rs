//! Lifecycle notifications
//!
//! Events describe what happened to a run and its tasks. They are
//! informational: nothing in the scheduler reads them back, and a slow or
//! absent subscriber never affects crawling.

mod bus;

pub use bus::EventBus;

use crate::task::{DecisionEntry, DecisionSnapshot, ProcessingTask, TaskId, TraceContext};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Name of a lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlEventName {
    RunStarted,
    RunCompleted,
    RunCancelled,
    RunFailed,
    TaskSubmitted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskRetryScheduled,
    TaskDeadLettered,
    TaskDiscarded,
    TaskStopped,
    StepStarted,
    StepCompleted,
    DecisionRecorded,
}

impl CrawlEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "RUN_STARTED",
            Self::RunCompleted => "RUN_COMPLETED",
            Self::RunCancelled => "RUN_CANCELLED",
            Self::RunFailed => "RUN_FAILED",
            Self::TaskSubmitted => "TASK_SUBMITTED",
            Self::TaskStarted => "TASK_STARTED",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskFailed => "TASK_FAILED",
            Self::TaskRetryScheduled => "TASK_RETRY_SCHEDULED",
            Self::TaskDeadLettered => "TASK_DEAD_LETTERED",
            Self::TaskDiscarded => "TASK_DISCARDED",
            Self::TaskStopped => "TASK_STOPPED",
            Self::StepStarted => "STEP_STARTED",
            Self::StepCompleted => "STEP_COMPLETED",
            Self::DecisionRecorded => "DECISION_RECORDED",
        }
    }

    /// Whether the event reports a failure (logged at warn level)
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::RunFailed | Self::TaskFailed | Self::TaskDeadLettered
        )
    }
}

impl std::fmt::Display for CrawlEventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level event data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunPayload {
    pub run_id: Uuid,
    /// Free-form detail, e.g. the fatal error of a failed run
    pub detail: Option<String>,
}

/// Task-level event data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPayload {
    pub task_id: TaskId,
    pub url: String,
    pub depth: u32,
    pub attempt: u32,
    pub hint: Option<String>,
    /// Why the event happened (discard reason, stop reason, ...)
    pub reason: Option<String>,
    pub trace: Option<TraceContext>,
}

impl TaskPayload {
    pub fn from_task(task: &ProcessingTask) -> Self {
        Self {
            task_id: task.id,
            url: task.url.clone(),
            depth: task.depth,
            attempt: task.attempt,
            hint: task.hint.clone(),
            reason: None,
            trace: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_trace(mut self, trace: &TraceContext) -> Self {
        self.trace = Some(trace.clone());
        self
    }
}

/// Data for failed, retried and dead-lettered tasks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailedPayload {
    pub task: TaskPayload,
    /// Step (or `fetch`) that failed
    pub stage_id: String,
    pub route_id: Option<String>,
    pub error: String,
    /// Delay before the retry, when one was scheduled
    pub retry_in_ms: Option<u64>,
    pub decisions: DecisionSnapshot,
}

/// Pipeline step event data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepPayload {
    pub task_id: TaskId,
    pub stage_id: String,
    pub route_id: String,
}

/// A decision recorded by a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecisionPayload {
    pub task_id: TaskId,
    pub entry: DecisionEntry,
}

/// Typed payload carried by a [`CrawlEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Run(RunPayload),
    Task(TaskPayload),
    TaskFailed(TaskFailedPayload),
    Step(StepPayload),
    Decision(DecisionPayload),
}

impl EventPayload {
    /// Task the event concerns, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::Run(_) => None,
            Self::Task(p) => Some(p.task_id),
            Self::TaskFailed(p) => Some(p.task.task_id),
            Self::Step(p) => Some(p.task_id),
            Self::Decision(p) => Some(p.task_id),
        }
    }
}

impl From<RunPayload> for EventPayload {
    fn from(payload: RunPayload) -> Self {
        Self::Run(payload)
    }
}

impl From<TaskPayload> for EventPayload {
    fn from(payload: TaskPayload) -> Self {
        Self::Task(payload)
    }
}

impl From<TaskFailedPayload> for EventPayload {
    fn from(payload: TaskFailedPayload) -> Self {
        Self::TaskFailed(payload)
    }
}

impl From<StepPayload> for EventPayload {
    fn from(payload: StepPayload) -> Self {
        Self::Step(payload)
    }
}

impl From<DecisionPayload> for EventPayload {
    fn from(payload: DecisionPayload) -> Self {
        Self::Decision(payload)
    }
}

/// A published lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlEvent {
    pub name: CrawlEventName,
    pub emitted_at: DateTime<Utc>,
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOrigin;

    #[test]
    fn test_names_match_wire_form() {
        let json = serde_json::to_string(&CrawlEventName::TaskRetryScheduled).unwrap();
        assert_eq!(json, "\"TASK_RETRY_SCHEDULED\"");
        assert_eq!(CrawlEventName::TaskRetryScheduled.as_str(), "TASK_RETRY_SCHEDULED");
        assert_eq!(CrawlEventName::RunStarted.to_string(), "RUN_STARTED");
    }

    #[test]
    fn test_task_payload_from_task() {
        let task = ProcessingTask::new("https://example.com/", TaskOrigin::seed("test"))
            .with_hint("docs");
        let payload = TaskPayload::from_task(&task).with_reason("duplicate");

        assert_eq!(payload.task_id, task.id);
        assert_eq!(payload.hint.as_deref(), Some("docs"));
        assert_eq!(payload.reason.as_deref(), Some("duplicate"));
        assert_eq!(EventPayload::from(payload).task_id(), Some(task.id));
    }
}
