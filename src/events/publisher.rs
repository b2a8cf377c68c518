use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::constants::system::DEFAULT_EVENT_CHANNEL_CAPACITY;
use crate::state_machine::{EntityKind, Status, StatusChange};

/// A status change on one entity of the forecast hierarchy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub entity: EntityKind,
    pub entity_id: Uuid,
    pub from: Status,
    pub to: Status,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StatusChangeEvent {
    pub fn run(run_id: Uuid, from: Status, to: Status, detail: Option<String>) -> Self {
        Self {
            entity: EntityKind::ModelRun,
            entity_id: run_id,
            from,
            to,
            detail,
            occurred_at: Utc::now(),
        }
    }
}

impl From<StatusChange> for StatusChangeEvent {
    fn from(change: StatusChange) -> Self {
        Self {
            entity: change.entity,
            entity_id: change.id,
            from: change.from,
            to: change.to,
            detail: None,
            occurred_at: Utc::now(),
        }
    }
}

/// Broadcasts status changes to any number of listeners
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<StatusChangeEvent>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish an event; having no subscribers is fine
    pub fn publish(&self, event: StatusChangeEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("No status subscribers, event dropped");
        }
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = StatusChangeEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChangeEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let publisher = EventPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.publish(StatusChangeEvent::run(
            Uuid::new_v4(),
            Status::Pending,
            Status::Dispatched,
            None,
        ));
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let publisher = EventPublisher::new(16);
        let mut receiver = publisher.subscribe();
        let run_id = Uuid::new_v4();

        publisher.publish_all([
            StatusChangeEvent::run(run_id, Status::Pending, Status::Dispatched, None),
            StatusChangeEvent::run(
                run_id,
                Status::Dispatched,
                Status::Error,
                Some("500: worker crashed".into()),
            ),
        ]);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.to, Status::Dispatched);
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.detail.as_deref(), Some("500: worker crashed"));
    }

    #[test]
    fn test_from_status_change() {
        let change = StatusChange {
            entity: EntityKind::Stage,
            id: Uuid::new_v4(),
            from: Status::Running,
            to: Status::Complete,
        };
        let event = StatusChangeEvent::from(change.clone());
        assert_eq!(event.entity, EntityKind::Stage);
        assert_eq!(event.entity_id, change.id);
    }
}
