//! Journal events and snapshot shapes
//!
//! These are the persisted forms of frontier, in-flight and retry
//! mutations. They are closed enums so replay has to handle every variant.

use crate::task::{ProcessingTask, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frontier mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FrontierEvent {
    Offer { task: ProcessingTask },
    Poll { task_id: TaskId },
}

/// In-flight buffer mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InFlightEvent {
    Put { task: ProcessingTask },
    Remove { task_id: TaskId },
}

/// Retry buffer mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RetryEvent {
    Scheduled { record: RetryRecord },
    Released { task_id: TaskId },
}

/// Any journaled mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "event", rename_all = "snake_case")]
pub enum JournalEvent {
    Frontier(FrontierEvent),
    InFlight(InFlightEvent),
    Retry(RetryEvent),
}

impl JournalEvent {
    /// Stream name used as a storage column
    pub fn stream(&self) -> &'static str {
        match self {
            Self::Frontier(_) => "frontier",
            Self::InFlight(_) => "in_flight",
            Self::Retry(_) => "retry",
        }
    }

    /// Operation name used as a storage column
    pub fn op(&self) -> &'static str {
        match self {
            Self::Frontier(FrontierEvent::Offer { .. }) => "offer",
            Self::Frontier(FrontierEvent::Poll { .. }) => "poll",
            Self::InFlight(InFlightEvent::Put { .. }) => "put",
            Self::InFlight(InFlightEvent::Remove { .. }) => "remove",
            Self::Retry(RetryEvent::Scheduled { .. }) => "scheduled",
            Self::Retry(RetryEvent::Released { .. }) => "released",
        }
    }

    /// Task the event refers to
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Frontier(FrontierEvent::Offer { task })
            | Self::InFlight(InFlightEvent::Put { task }) => task.id,
            Self::Retry(RetryEvent::Scheduled { record }) => record.task.id,
            Self::Frontier(FrontierEvent::Poll { task_id })
            | Self::InFlight(InFlightEvent::Remove { task_id })
            | Self::Retry(RetryEvent::Released { task_id }) => *task_id,
        }
    }
}

impl From<FrontierEvent> for JournalEvent {
    fn from(event: FrontierEvent) -> Self {
        Self::Frontier(event)
    }
}

impl From<InFlightEvent> for JournalEvent {
    fn from(event: InFlightEvent) -> Self {
        Self::InFlight(event)
    }
}

impl From<RetryEvent> for JournalEvent {
    fn from(event: RetryEvent) -> Self {
        Self::Retry(event)
    }
}

/// A journal event with the sequence number the store assigned to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalRecord {
    pub seq: u64,
    pub event: JournalEvent,
}

/// Wall-clock form of a retry buffer entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryRecord {
    pub task: ProcessingTask,
    pub reason: String,
    pub eligible_at: DateTime<Utc>,
}

/// Frontier contents in dispatch order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontierSnapshot {
    pub tasks: Vec<ProcessingTask>,
}

/// Tasks executing when the snapshot was taken
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlightSnapshot {
    pub tasks: Vec<ProcessingTask>,
}

/// Retry buffer contents in due order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySnapshot {
    pub entries: Vec<RetryRecord>,
}

/// Seen store keys
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenSnapshot {
    pub discovered: Vec<String>,
    pub processed: Vec<String>,
}

/// Point-in-time state of a run
///
/// `last_seq` is the last journal sequence number reflected in the
/// snapshot; recovery replays only records after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub last_seq: u64,
    pub taken_at: DateTime<Utc>,
    pub frontier: FrontierSnapshot,
    pub in_flight: InFlightSnapshot,
    pub retry: RetrySnapshot,
    pub seen: SeenSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOrigin;

    #[test]
    fn test_event_json_shape() {
        let task = ProcessingTask::new("https://example.com/", TaskOrigin::seed("test"));
        let event = JournalEvent::from(FrontierEvent::Poll { task_id: task.id });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["stream"], "frontier");
        assert_eq!(json["event"]["op"], "poll");
        assert_eq!(json["event"]["task_id"], task.id.to_string());
    }

    #[test]
    fn test_labels_and_task_id() {
        let task = ProcessingTask::new("https://example.com/", TaskOrigin::seed("test"));
        let put = JournalEvent::from(InFlightEvent::Put { task: task.clone() });
        let released = JournalEvent::from(RetryEvent::Released { task_id: task.id });

        assert_eq!((put.stream(), put.op()), ("in_flight", "put"));
        assert_eq!((released.stream(), released.op()), ("retry", "released"));
        assert_eq!(put.task_id(), task.id);
        assert_eq!(released.task_id(), task.id);
    }
}
