use keel::{EventLevel, EventSink};
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedEvent {
    Log {
        level: EventLevel,
        message: String,
        attributes: Value,
    },
    Business {
        name: String,
        attributes: Value,
    },
}

/// Event sink that keeps everything it receives.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Messages logged at `level`, in order.
    pub fn messages(&self, level: EventLevel) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Log {
                    level: l, message, ..
                } if *l == level => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Attributes of every business event called `name`.
    pub fn business_events(&self, name: &str) -> Vec<Value> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                RecordedEvent::Business { name: n, attributes } if n == name => {
                    Some(attributes.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn assert_logged(&self, level: EventLevel, message: &str) {
        let messages = self.messages(level);
        assert!(
            messages.iter().any(|m| m == message),
            "Expected {:?} message {:?}, got {:?}",
            level,
            message,
            messages
        );
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn log(&self, level: EventLevel, message: &str, attributes: Value) {
        self.events.lock().push(RecordedEvent::Log {
            level,
            message: message.to_string(),
            attributes,
        });
    }

    fn track_business_event(&self, name: &str, attributes: Value) {
        self.events.lock().push(RecordedEvent::Business {
            name: name.to_string(),
            attributes,
        });
    }
}
