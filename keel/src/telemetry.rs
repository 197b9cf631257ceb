//! Tracing and telemetry instrumentation for keel.
//!
//! Span constructors for the three resilience components plus `record_*`
//! helpers that log the event and, with the `metrics` feature enabled, update
//! the Prometheus collectors in [`crate::metrics`]. Every helper works with
//! and without the feature.

use tracing::{info_span, Span};

/// Span wrapping one `RetryExecutor::execute` call.
#[must_use]
pub fn retry_execute_span(operation: impl AsRef<str>, correlation_id: impl AsRef<str>) -> Span {
    info_span!(
        "keel.retry",
        operation = %operation.as_ref(),
        correlation_id = %correlation_id.as_ref(),
    )
}

/// Span wrapping one stuck-job scan.
#[must_use]
pub fn monitor_scan_span(tracked_jobs: usize) -> Span {
    info_span!("keel.monitor.scan", tracked_jobs = tracked_jobs)
}

/// Span wrapping the recovery sequence of one stuck job.
#[must_use]
pub fn job_recovery_span(job_id: impl AsRef<str>, correlation_id: impl AsRef<str>) -> Span {
    info_span!(
        "keel.monitor.recover",
        job_id = %job_id.as_ref(),
        correlation_id = %correlation_id.as_ref(),
    )
}

/// Span wrapping a manual recovery trigger.
#[must_use]
pub fn manual_recovery_span(failed_job_id: impl AsRef<str>) -> Span {
    info_span!(
        "keel.recovery.trigger",
        failed_job_id = %failed_job_id.as_ref(),
    )
}

/// Record one failed attempt, labelled by error kind.
pub fn record_retry_attempt(operation: impl AsRef<str>, attempt: u32, error_kind: impl AsRef<str>) {
    tracing::debug!(
        operation = %operation.as_ref(),
        attempt = attempt,
        error_kind = %error_kind.as_ref(),
        "retry attempt failed"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_retry_attempt(operation.as_ref(), error_kind.as_ref());
}

/// Record the final outcome of an `execute` call.
///
/// `status` is one of `success`, `exhausted`, `fallback`.
pub fn record_retry_outcome(operation: impl AsRef<str>, status: impl AsRef<str>, attempts: u32) {
    tracing::info!(
        operation = %operation.as_ref(),
        status = %status.as_ref(),
        attempts = attempts,
        "retry outcome"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_retry_outcome(operation.as_ref(), status.as_ref(), attempts);
}

/// Count a job newly flagged as stuck. The operator-facing warning goes
/// through the monitor's event sink.
pub fn record_stuck_job(job_id: impl AsRef<str>, missed_checks: u32) {
    tracing::debug!(
        job_id = %job_id.as_ref(),
        missed_checks = missed_checks,
        "stuck detection counted"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_stuck_job();
}

/// Record the terminal recovery action applied to a stuck job.
pub fn record_recovery_action(job_id: impl AsRef<str>, action: impl AsRef<str>) {
    tracing::info!(
        job_id = %job_id.as_ref(),
        action = %action.as_ref(),
        "stuck job recovery finished"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_recovery_action(action.as_ref());
}

/// Update the tracked-jobs gauge.
pub fn set_tracked_jobs(count: usize) {
    tracing::trace!(tracked_jobs = count, "tracked jobs updated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_tracked_jobs(count as f64);
}

/// Record a failure registered with the recovery store.
pub fn record_failed_job(job_type: impl AsRef<str>, strategy: impl AsRef<str>) {
    tracing::info!(
        job_type = %job_type.as_ref(),
        strategy = %strategy.as_ref(),
        "failed job recorded"
    );

    #[cfg(feature = "metrics")]
    crate::metrics::record_failed_job(job_type.as_ref(), strategy.as_ref());
}

/// Update the queue health gauge (0 healthy, 1 warning, 2 critical).
pub fn set_queue_health(status: impl AsRef<str>, level: u8) {
    tracing::debug!(status = %status.as_ref(), "queue health evaluated");

    #[cfg(feature = "metrics")]
    crate::metrics::set_queue_health(f64::from(level));
    #[cfg(not(feature = "metrics"))]
    let _ = level;
}
