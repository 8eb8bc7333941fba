//! Holding areas for tasks awaiting dispatch

use crate::task::ProcessingTask;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Mutex;

/// Ordered holding area for tasks awaiting dispatch
///
/// Implementations must be safe to call from the scheduler and from
/// runner workers at the same time.
pub trait Frontier: Send + Sync {
    fn offer(&self, task: ProcessingTask);

    fn poll(&self) -> Option<ProcessingTask>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current contents in dispatch order
    fn snapshot(&self) -> Vec<ProcessingTask>;
}

/// First-in, first-out frontier
#[derive(Debug, Default)]
pub struct FifoFrontier {
    queue: Mutex<VecDeque<ProcessingTask>>,
}

impl FifoFrontier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Frontier for FifoFrontier {
    fn offer(&self, task: ProcessingTask) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(task);
    }

    fn poll(&self) -> Option<ProcessingTask> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn snapshot(&self) -> Vec<ProcessingTask> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// A task queued with its insertion sequence number
#[derive(Debug)]
struct Queued {
    seq: u64,
    task: ProcessingTask,
}

// BinaryHeap is a max-heap: the "greatest" entry is the lowest priority
// value, and among equal priorities the earliest insertion.
impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .task
            .priority
            .cmp(&self.task.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for Queued {}

#[derive(Debug, Default)]
struct PriorityInner {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
}

/// Frontier ordered by task priority (lower value first), FIFO among equals
#[derive(Debug, Default)]
pub struct PriorityFrontier {
    inner: Mutex<PriorityInner>,
}

impl PriorityFrontier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Frontier for PriorityFrontier {
    fn offer(&self, task: ProcessingTask) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(Queued { seq, task });
    }

    fn poll(&self) -> Option<ProcessingTask> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .heap
            .pop()
            .map(|queued| queued.task)
    }

    fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).heap.len()
    }

    fn snapshot(&self) -> Vec<ProcessingTask> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<&Queued> = inner.heap.iter().collect();
        // Descending by Ord is dispatch order.
        entries.sort_by(|a, b| b.cmp(a));
        entries.into_iter().map(|q| q.task.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskOrigin;
    use std::sync::Arc;

    fn task(path: &str, priority: u32) -> ProcessingTask {
        ProcessingTask::new(format!("https://example.com{}", path), TaskOrigin::seed("test"))
            .with_priority(priority)
    }

    #[test]
    fn test_fifo_order() {
        let frontier = FifoFrontier::new();
        frontier.offer(task("/1", 5));
        frontier.offer(task("/2", 0));

        assert_eq!(frontier.len(), 2);
        assert_eq!(frontier.poll().unwrap().url, "https://example.com/1");
        assert_eq!(frontier.poll().unwrap().url, "https://example.com/2");
        assert!(frontier.poll().is_none());
        assert!(frontier.is_empty());
    }

    #[test]
    fn test_priority_order_with_insertion_tie_break() {
        let frontier = PriorityFrontier::new();
        frontier.offer(task("/low-a", 5));
        frontier.offer(task("/high", 0));
        frontier.offer(task("/low-b", 5));
        frontier.offer(task("/mid", 2));

        let order: Vec<String> = std::iter::from_fn(|| frontier.poll())
            .map(|t| t.url)
            .collect();
        assert_eq!(
            order,
            vec![
                "https://example.com/high",
                "https://example.com/mid",
                "https://example.com/low-a",
                "https://example.com/low-b",
            ]
        );
    }

    #[test]
    fn test_priority_snapshot_matches_poll_order() {
        let frontier = PriorityFrontier::new();
        for (i, p) in [3, 1, 3, 0, 1].iter().enumerate() {
            frontier.offer(task(&format!("/{}", i), *p));
        }

        let snapshot: Vec<String> = frontier.snapshot().into_iter().map(|t| t.url).collect();
        let polled: Vec<String> = std::iter::from_fn(|| frontier.poll())
            .map(|t| t.url)
            .collect();
        assert_eq!(snapshot, polled);
    }

    #[test]
    fn test_concurrent_offers_are_not_lost() {
        let frontier = Arc::new(FifoFrontier::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let frontier = Arc::clone(&frontier);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        frontier.offer(task(&format!("/{}/{}", t, i), 0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(frontier.len(), 400);
    }
}
