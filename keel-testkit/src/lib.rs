//! Fake collaborators for testing keel.

mod correlation;
mod events;
mod health;
mod operation;

pub use correlation::SequentialCorrelationIds;
pub use events::{RecordedEvent, RecordingEventSink};
pub use health::{HealthCall, HealthMethod, HealthResponse, HealthScript, MockJobHealthService};
pub use operation::FlakyOperation;
