//! Tasks currently being executed

use crate::task::{ProcessingTask, TaskId};
use dashmap::DashMap;

/// One entry per executing task, keyed by task id
#[derive(Debug, Default)]
pub struct InFlightBuffer {
    tasks: DashMap<TaskId, ProcessingTask>,
}

impl InFlightBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, task: ProcessingTask) {
        self.tasks.insert(task.id, task);
    }

    pub fn remove(&self, id: TaskId) -> Option<ProcessingTask> {
        self.tasks.remove(&id).map(|(_, task)| task)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    /// Removes and returns every entry; used only for snapshot/recovery
    pub fn drain_all(&self) -> Vec<ProcessingTask> {
        let ids: Vec<TaskId> = self.tasks.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Copies the current entries, ordered by task id for stable output
    pub fn snapshot(&self) -> Vec<ProcessingTask> {
        let mut tasks: Vec<ProcessingTask> =
            self.tasks.iter().map(|entry| entry.value().clone()).collect();
        tasks.sort_by_key(|task| task.id);
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOrigin;

    fn task(path: &str) -> ProcessingTask {
        ProcessingTask::new(format!("https://example.com{}", path), TaskOrigin::seed("test"))
    }

    #[test]
    fn test_put_remove_size() {
        let buffer = InFlightBuffer::new();
        let a = task("/a");
        let id = a.id;

        buffer.put(a);
        buffer.put(task("/b"));
        assert_eq!(buffer.size(), 2);
        assert!(buffer.contains(id));

        assert!(buffer.remove(id).is_some());
        assert!(buffer.remove(id).is_none());
        assert_eq!(buffer.size(), 1);
    }

    #[test]
    fn test_drain_all_clears() {
        let buffer = InFlightBuffer::new();
        buffer.put(task("/a"));
        buffer.put(task("/b"));

        let drained = buffer.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(buffer.size(), 0);
    }
}
