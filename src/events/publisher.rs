use crate::events::lifecycle;
use crate::transaction::phase::TransactionPhase;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

/// High-throughput publisher for coordination lifecycle events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<PublishedEvent>,
}

/// Event that has been published.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub name: String,
    pub context: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

impl EventPublisher {
    /// Create a new event publisher with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event with the given name and context.
    pub fn publish(&self, event_name: impl Into<String>, context: Value) {
        let event = PublishedEvent {
            name: event_name.into(),
            context,
            published_at: chrono::Utc::now(),
        };

        // A broadcast send fails only when there are no subscribers, which
        // is acceptable: lifecycle events are fire-and-forget.
        let _ = self.sender.send(event);
    }

    /// Publish a transaction phase transition.
    pub fn publish_transaction_phase(&self, tx_id: Uuid, phase: TransactionPhase) {
        let name = match phase {
            TransactionPhase::Prepared => lifecycle::TRANSACTION_PREPARED,
            TransactionPhase::Committed => lifecycle::TRANSACTION_COMMITTED,
            TransactionPhase::Aborted => lifecycle::TRANSACTION_ABORTED,
            TransactionPhase::Indeterminate => lifecycle::TRANSACTION_INDETERMINATE,
            // Intermediate phases are not observable events.
            _ => return,
        };
        self.publish(
            name,
            json!({ "transaction_id": tx_id, "phase": phase.to_string() }),
        );
    }

    /// Publish that a state snapshot was durably saved.
    pub fn publish_state_saved(&self, subject_id: &str, partition: &str, sequence_id: i64) {
        self.publish(
            lifecycle::STATE_SAVED,
            json!({
                "subject_id": subject_id,
                "partition": partition,
                "sequence_id": sequence_id,
            }),
        );
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000) // Default capacity of 1000 events
    }
}
