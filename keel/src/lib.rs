//! Keel - in-process job resilience.
//!
//! Three independent components protect unreliable work (scraping, report
//! generation, model calls) running inside one process:
//!
//! # Core Concepts
//!
//! - **Retries**: [`RetryExecutor`] runs an async operation under a
//!   [`RetryPolicy`], classifying each failure with [`classify_error`] and
//!   sleeping with exponential backoff and jitter between attempts.
//!
//! - **Stuck jobs**: [`StuckJobMonitor`] tracks in-flight jobs through start,
//!   heartbeat and completion calls, scans them periodically and drives a
//!   graceful-then-forced recovery through a [`JobHealthService`].
//!
//! - **Failed jobs**: [`FailedJobRecoveryStore`] records tasks that exhausted
//!   their retries, classifies them as `retry`, `manual` or `dead_letter`,
//!   and hands out manual recovery requests for the caller's scheduler.
//!
//! - **Events**: components report through an [`EventSink`];
//!   [`TracingEventSink`] forwards to `tracing` and [`BroadcastEventSink`]
//!   fans events out to subscribers.
//!
//! # Feature Flags
//!
//! - `metrics` - Prometheus metrics support
//!
//! # Example
//!
//! ```no_run
//! use keel::{OperationContext, RetryExecutor, RetryPolicy};
//!
//! # async fn fetch_page() -> anyhow::Result<String> { Ok(String::new()) }
//! # async fn run() -> anyhow::Result<()> {
//! let executor = RetryExecutor::default();
//! let outcome = executor
//!     .execute(fetch_page, &RetryPolicy::product_scraping(), OperationContext::new("fetch_page"))
//!     .await;
//! let page = outcome.into_result()?;
//! # let _ = page;
//! # Ok(())
//! # }
//! ```

/// Error classification.
///
/// The `classify` module maps error text to an [`ErrorKind`] with a
/// retryable flag and a suggested delay.
pub mod classify;

/// Configuration for the three components.
///
/// The `config` module defines [`ResilienceConfig`] and its sections,
/// loadable from JSON or `KEEL_*` environment variables.
pub mod config;

/// Correlation tracking.
///
/// The `correlation` module provides [`CorrelationId`] generation and the
/// [`CorrelationCache`] binding job ids to correlation ids.
pub mod correlation;

/// Errors raised by the resilience layer itself.
pub mod error;

/// Event reporting.
///
/// The `events` module provides the [`EventSink`] trait and its tracing and
/// broadcast implementations.
pub mod events;

/// Job identifiers and priorities for resubmitted work.
pub mod job;

#[cfg(feature = "metrics")]
/// Prometheus collectors, enabled with the `metrics` feature.
pub mod metrics;

/// Stuck-job detection and recovery.
///
/// The `monitor` module provides:
/// - [`StuckJobMonitor`] - the tracking table, scan loop and recovery sequence
/// - [`JobHealthService`] - collaborator performing restarts and terminations
/// - [`TrackedJob`] and [`RunningJobStatus`] - per-job state and snapshots
/// - [`RecoveryReport`] - result of an administrative recover-all pass
pub mod monitor;

/// Failed-job recovery queue.
///
/// The `recovery` module provides:
/// - [`FailedJobRecoveryStore`] - records, filters and manual triggers
/// - [`FailedJobRecord`] and [`RecoveryStrategy`] - the classification
/// - [`QueueHealth`] - aggregate rates and recommendations
pub mod recovery;

/// Classified retries.
///
/// The `retry` module provides [`RetryExecutor`], [`RetryPolicy`] with its
/// builder and presets, and the backoff math.
pub mod retry;

/// Cancellation for background loops.
pub mod shutdown;

/// Tracing spans and metric recorders.
pub mod telemetry;

pub use classify::*;
pub use config::*;
pub use correlation::*;
pub use error::*;
pub use events::*;
pub use job::*;
pub use monitor::{
    JobHealthService, JobRecoveryResult, MonitorStats, MonitoringStatus, RecoverAllOptions,
    RecoveryAction, RecoveryReport, RunningJobStatus, ScanSummary, StuckJobMonitor, TrackedJob,
};
pub use recovery::{
    ArchiveReason, ArchivedJob, ErrorCategory, FailedJobFilter, FailedJobMetadata,
    FailedJobRecord, FailedJobRecoveryStore, FailureReport, HealthCounters, HealthStatus,
    HealthThresholds, ManualRecoveryOptions, ManualRecoveryRequest, QueueHealth,
    RecoveryCommand, RecoveryStrategy,
};
pub use retry::{
    OperationContext, RetryCallback, RetryExecutor, RetryOutcome, RetryPolicy,
    RetryPolicyBuilder, RetryPolicyConfig, RetryPredicate,
};
pub use shutdown::ShutdownToken;
