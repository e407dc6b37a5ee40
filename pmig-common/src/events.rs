//! Migration event types and broadcast bus
//!
//! Progress of a migration run is published as [`MigrationEvent`]s on an
//! [`EventBus`]. Emitting never blocks the pipeline; slow subscribers lose the
//! oldest events once the channel capacity is exceeded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline state
///
/// ANALYZING → CREATING → BATCHING → DONE, or FAILED from the first two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MigrationState {
    /// Streaming the participant dataset, building unique sets
    Analyzing,
    /// Creating shared parent and dependent entities
    Creating,
    /// Replaying rows in batches
    Batching,
    /// All batches processed
    Done,
    /// Analysis or creation aborted the run
    Failed,
}

impl MigrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Done | MigrationState::Failed)
    }
}

/// Events emitted during a migration run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MigrationEvent {
    RunStarted {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    StateChanged {
        run_id: Uuid,
        old_state: MigrationState,
        new_state: MigrationState,
        timestamp: DateTime<Utc>,
    },
    /// One Creation Stage step finished
    CreationStep {
        run_id: Uuid,
        step: String,
        created: usize,
        reused: usize,
        skipped: usize,
        timestamp: DateTime<Utc>,
    },
    BatchProgress {
        run_id: Uuid,
        processed: usize,
        total: usize,
        succeeded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
    RowFailed {
        run_id: Uuid,
        row_number: u64,
        participant_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: Uuid,
        total_records: usize,
        success_count: usize,
        error_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    RunFailed {
        run_id: Uuid,
        state: MigrationState,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl MigrationEvent {
    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            MigrationEvent::RunStarted { .. } => "RunStarted",
            MigrationEvent::StateChanged { .. } => "StateChanged",
            MigrationEvent::CreationStep { .. } => "CreationStep",
            MigrationEvent::BatchProgress { .. } => "BatchProgress",
            MigrationEvent::RowFailed { .. } => "RowFailed",
            MigrationEvent::RunCompleted { .. } => "RunCompleted",
            MigrationEvent::RunFailed { .. } => "RunFailed",
        }
    }
}

/// Broadcast bus for migration events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MigrationEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<MigrationEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: MigrationEvent,
    ) -> Result<usize, broadcast::error::SendError<MigrationEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: MigrationEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit_lossy(MigrationEvent::RunStarted {
            run_id,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            MigrationEvent::RunStarted { run_id: got, .. } => assert_eq!(got, run_id),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_errors_but_lossy_does_not() {
        let bus = EventBus::new(4);
        let event = MigrationEvent::RunStarted {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.capacity(), 4);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = MigrationEvent::StateChanged {
            run_id: Uuid::nil(),
            old_state: MigrationState::Analyzing,
            new_state: MigrationState::Creating,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StateChanged");
        assert_eq!(json["new_state"], "CREATING");
        assert_eq!(event.event_type(), "StateChanged");
    }

    #[test]
    fn test_terminal_states() {
        assert!(MigrationState::Done.is_terminal());
        assert!(MigrationState::Failed.is_terminal());
        assert!(!MigrationState::Batching.is_terminal());
    }
}
