/// Queue health thresholds and report.
pub mod health;
/// Failed-job records, strategies and categories.
pub mod record;
/// The failed-job recovery store.
pub mod store;

pub use health::{HealthCounters, HealthStatus, HealthThresholds, QueueHealth};
pub use record::{
    ErrorCategory, FailedJobMetadata, FailedJobRecord, FailureReport, RecoveryStrategy,
};
pub use store::{
    ArchiveReason, ArchivedJob, FailedJobFilter, FailedJobRecoveryStore, ManualRecoveryOptions,
    ManualRecoveryRequest, RecoveryCommand,
};
