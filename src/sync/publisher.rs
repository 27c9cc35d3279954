use serde::Serialize;
use tokio::sync::broadcast;

use crate::models::{AppliedDelta, TelemetryRecord};

pub const UPDATE_EVENT: &str = "telemetry_update";
pub const DELETE_EVENT: &str = "telemetry_delete";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum TelemetryEvent {
    #[serde(rename = "telemetry_update")]
    Upsert(TelemetryRecord),
    #[serde(rename = "telemetry_delete")]
    Delete(Vec<i64>),
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::Upsert(_) => UPDATE_EVENT,
            TelemetryEvent::Delete(_) => DELETE_EVENT,
        }
    }
}

/// Fire-and-forget fan-out to whoever is subscribed right now. Late
/// subscribers get nothing retroactively; they pull a snapshot instead.
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<TelemetryEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Emits the delete notification first (only when ids were removed),
    /// then one update per upserted record. Returns the number of events
    /// emitted.
    pub fn publish(&self, applied: &AppliedDelta) -> usize {
        let mut emitted = 0;

        if !applied.deleted.is_empty() {
            self.broadcast(TelemetryEvent::Delete(applied.deleted.clone()));
            emitted += 1;
        }

        for record in &applied.upserted {
            self.broadcast(TelemetryEvent::Upsert(record.clone()));
            emitted += 1;
        }

        emitted
    }

    fn broadcast(&self, event: TelemetryEvent) {
        let name = event.name();
        if self.sender.send(event).is_err() {
            log::trace!("{name} had no subscribers");
        }
    }
}
