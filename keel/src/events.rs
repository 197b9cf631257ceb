use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Severity of a structured log entry emitted through an [`EventSink`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Structured logging and business-event emission used by every component.
///
/// Implementations must not block and must never fail the caller: emission
/// is observability only and has no influence on control flow.
/// `attributes` is expected to be a JSON object.
pub trait EventSink: Send + Sync {
    fn log(&self, level: EventLevel, message: &str, attributes: Value);

    fn track_business_event(&self, name: &str, attributes: Value);

    fn info(&self, message: &str, attributes: Value) {
        self.log(EventLevel::Info, message, attributes);
    }

    fn warn(&self, message: &str, attributes: Value) {
        self.log(EventLevel::Warn, message, attributes);
    }

    fn error(&self, message: &str, attributes: Value) {
        self.log(EventLevel::Error, message, attributes);
    }
}

/// Forwards sink events to `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn log(&self, level: EventLevel, message: &str, attributes: Value) {
        match level {
            EventLevel::Info => {
                tracing::info!(target: "keel::events", attributes = %attributes, "{message}")
            }
            EventLevel::Warn => {
                tracing::warn!(target: "keel::events", attributes = %attributes, "{message}")
            }
            EventLevel::Error => {
                tracing::error!(target: "keel::events", attributes = %attributes, "{message}")
            }
        }
    }

    fn track_business_event(&self, name: &str, attributes: Value) {
        tracing::info!(
            target: "keel::business",
            event = %name,
            attributes = %attributes,
            "business event"
        );
    }
}

/// Metadata envelope attached to every broadcast event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new() -> Self {
        Self {
            version: 1,
            event_id: Uuid::now_v7(),
            timestamp: Utc::now(),
        }
    }
}

impl Default for EventMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Event delivered to [`BroadcastEventSink`] subscribers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkEvent {
    Log {
        meta: EventMeta,
        level: EventLevel,
        message: String,
        attributes: Value,
    },
    Business {
        meta: EventMeta,
        name: String,
        attributes: Value,
    },
}

impl SinkEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            SinkEvent::Log { meta, .. } | SinkEvent::Business { meta, .. } => meta,
        }
    }
}

/// In-process fan-out sink backed by a tokio broadcast channel.
///
/// Publishing never waits for slow subscribers. When the buffer is full the
/// oldest events are dropped and lagging receivers get `RecvError::Lagged`.
/// Events published while nobody is subscribed are discarded.
pub struct BroadcastEventSink {
    sender: broadcast::Sender<SinkEvent>,
    capacity: usize,
}

impl std::fmt::Debug for BroadcastEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastEventSink")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn publish(&self, event: SinkEvent) {
        let _ = self.sender.send(event);
    }
}

impl EventSink for BroadcastEventSink {
    fn log(&self, level: EventLevel, message: &str, attributes: Value) {
        self.publish(SinkEvent::Log {
            meta: EventMeta::new(),
            level,
            message: message.to_string(),
            attributes,
        });
    }

    fn track_business_event(&self, name: &str, attributes: Value) {
        self.publish(SinkEvent::Business {
            meta: EventMeta::new(),
            name: name.to_string(),
            attributes,
        });
    }
}
