//! Terminal store for tasks that exhausted their retries

use crate::task::{DecisionSnapshot, ProcessingTask, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// Failure context captured when a task is dead-lettered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterItem {
    pub failed_at: DateTime<Utc>,
    pub reason: String,
    /// Step (or `fetch`) that produced the final failure
    pub stage_id: String,
    pub route_id: Option<String>,
    /// Attempts made, including the final one
    pub attempt: u32,
    pub error: String,
}

/// A dead-lettered task together with its failure context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task: ProcessingTask,
    pub item: DeadLetterItem,
    pub decisions: DecisionSnapshot,
}

/// In-memory dead letter queue
///
/// Entries are never removed and never re-enter the frontier.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, entry: DeadLetterEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    /// All entries in the order they were dead-lettered
    pub fn entries(&self) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|entry| entry.task.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOrigin;

    #[test]
    fn test_put_and_enumerate() {
        let queue = DeadLetterQueue::new();
        let task = ProcessingTask::new("https://example.com/", TaskOrigin::seed("test"));
        let id = task.id;

        queue.put(DeadLetterEntry {
            task,
            item: DeadLetterItem {
                failed_at: Utc::now(),
                reason: "retries exhausted".to_string(),
                stage_id: "fetch".to_string(),
                route_id: None,
                attempt: 3,
                error: "connection refused".to_string(),
            },
            decisions: DecisionSnapshot::default(),
        });

        assert_eq!(queue.len(), 1);
        assert!(queue.contains(id));
        assert_eq!(queue.entries()[0].item.attempt, 3);
    }
}
