//! Broadcast event bus
//!
//! # Guarantees
//!
//! - **Fire-and-forget**: publishing never blocks and never fails
//! - **At-most-once delivery**: slow receivers may miss events
//! - **In-memory only**: durable state lives in the journal, not here

use crate::events::{CrawlEvent, CrawlEventName, EventPayload};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 1024;

/// Fan-out of crawl lifecycle events
///
/// Every published event is also mirrored as a `tracing` event under the
/// `sumi_loom::events` target, so runs are observable without a subscriber.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<CrawlEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus buffering up to `capacity` events per lagging receiver
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers
    ///
    /// Returns the number of receivers that got the event.
    pub fn publish(&self, name: CrawlEventName, payload: impl Into<EventPayload>) -> usize {
        let event = CrawlEvent {
            name,
            emitted_at: Utc::now(),
            payload: payload.into(),
        };

        mirror(&event);
        self.sender.send(Arc::new(event)).unwrap_or(0)
    }

    /// Subscribes to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<CrawlEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

fn mirror(event: &CrawlEvent) {
    let task_id = event.payload.task_id().map(|id| id.to_string());
    let detail = match &event.payload {
        EventPayload::Run(p) => p.detail.clone(),
        EventPayload::Task(p) => Some(p.url.clone()),
        EventPayload::TaskFailed(p) => Some(format!("{} ({}: {})", p.task.url, p.stage_id, p.error)),
        EventPayload::Step(p) => Some(format!("{}/{}", p.route_id, p.stage_id)),
        EventPayload::Decision(p) => Some(format!("{}: {}", p.entry.code, p.entry.message)),
    };
    let detail = detail.unwrap_or_default();

    if event.name.is_failure() {
        tracing::warn!(
            target: "sumi_loom::events",
            event = event.name.as_str(),
            task_id = task_id.as_deref(),
            "{}",
            detail
        );
    } else {
        tracing::debug!(
            target: "sumi_loom::events",
            event = event.name.as_str(),
            task_id = task_id.as_deref(),
            "{}",
            detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RunPayload, TaskPayload};
    use crate::task::{ProcessingTask, TaskOrigin};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        let run_id = Uuid::new_v4();
        let delivered = bus.publish(
            CrawlEventName::RunStarted,
            RunPayload {
                run_id,
                detail: None,
            },
        );
        assert_eq!(delivered, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, CrawlEventName::RunStarted);
        assert!(matches!(&event.payload, EventPayload::Run(p) if p.run_id == run_id));
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::new();
        let task = ProcessingTask::new("https://example.com/", TaskOrigin::seed("test"));
        assert_eq!(
            bus.publish(CrawlEventName::TaskSubmitted, TaskPayload::from_task(&task)),
            0
        );
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_events_in_order() {
        let bus = EventBus::with_capacity(16);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let task = ProcessingTask::new("https://example.com/", TaskOrigin::seed("test"));

        bus.publish(CrawlEventName::TaskSubmitted, TaskPayload::from_task(&task));
        bus.publish(CrawlEventName::TaskCompleted, TaskPayload::from_task(&task));

        for rx in [&mut first, &mut second] {
            assert_eq!(rx.recv().await.unwrap().name, CrawlEventName::TaskSubmitted);
            assert_eq!(rx.recv().await.unwrap().name, CrawlEventName::TaskCompleted);
        }
    }
}
