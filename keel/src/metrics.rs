//! Prometheus metrics instrumentation for keel.
//!
//! All metrics are conditionally compiled behind the `metrics` feature flag.
//!
//! # Metrics
//!
//! ## Counters
//! - `keel_retry_attempts_failed_total` - Failed attempts by error kind
//! - `keel_retry_outcomes_total` - Final `execute` outcomes
//! - `keel_stuck_jobs_total` - Jobs flagged as stuck
//! - `keel_recovery_actions_total` - Recovery actions applied to stuck jobs
//! - `keel_failed_jobs_recorded_total` - Failures registered with the recovery store
//!
//! ## Gauges
//! - `keel_tracked_jobs` - Jobs currently tracked by the stuck-job monitor
//! - `keel_queue_health` - Queue health level (0 healthy, 1 warning, 2 critical)
//!
//! ## Histograms
//! - `keel_retry_attempts_used` - Attempts used per `execute` call
#![cfg(feature = "metrics")]

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, IntCounter, Opts, Registry};
use std::sync::LazyLock;

/// Global Prometheus registry for keel metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `operation`, `error_kind`.
pub static RETRY_ATTEMPTS_FAILED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "keel_retry_attempts_failed_total",
        "Total number of failed attempts by error kind",
    );
    CounterVec::new(opts, &["operation", "error_kind"])
        .expect("keel_retry_attempts_failed_total metric creation failed")
});

/// Labels: `operation`, `status`.
pub static RETRY_OUTCOMES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new("keel_retry_outcomes_total", "Total number of retry outcomes");
    CounterVec::new(opts, &["operation", "status"])
        .expect("keel_retry_outcomes_total metric creation failed")
});

/// Labels: `operation`.
pub static RETRY_ATTEMPTS_USED: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new("keel_retry_attempts_used", "Attempts used per execute call")
        .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 8.0, 13.0]);
    HistogramVec::new(opts, &["operation"])
        .expect("keel_retry_attempts_used metric creation failed")
});

pub static STUCK_JOBS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("keel_stuck_jobs_total", "Total number of jobs flagged as stuck")
        .expect("keel_stuck_jobs_total metric creation failed")
});

/// Labels: `action` (restarted, killed, ignored).
pub static RECOVERY_ACTIONS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "keel_recovery_actions_total",
        "Total number of recovery actions applied to stuck jobs",
    );
    CounterVec::new(opts, &["action"]).expect("keel_recovery_actions_total metric creation failed")
});

/// Labels: `job_type`, `strategy`.
pub static FAILED_JOBS_RECORDED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "keel_failed_jobs_recorded_total",
        "Total number of failures registered with the recovery store",
    );
    CounterVec::new(opts, &["job_type", "strategy"])
        .expect("keel_failed_jobs_recorded_total metric creation failed")
});

pub static TRACKED_JOBS: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new("keel_tracked_jobs", "Jobs currently tracked by the stuck-job monitor")
        .expect("keel_tracked_jobs metric creation failed")
});

pub static QUEUE_HEALTH: LazyLock<Gauge> = LazyLock::new(|| {
    Gauge::new(
        "keel_queue_health",
        "Queue health level (0 healthy, 1 warning, 2 critical)",
    )
    .expect("keel_queue_health metric creation failed")
});

/// Register all metrics with the global registry. Idempotent.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(RETRY_ATTEMPTS_FAILED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(RETRY_OUTCOMES_TOTAL.clone()),
        Box::new(RETRY_ATTEMPTS_USED.clone()),
        Box::new(STUCK_JOBS_TOTAL.clone()),
        Box::new(RECOVERY_ACTIONS_TOTAL.clone()),
        Box::new(FAILED_JOBS_RECORDED_TOTAL.clone()),
        Box::new(TRACKED_JOBS.clone()),
        Box::new(QUEUE_HEALTH.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            let msg = e.to_string();
            if !msg.contains("Duplicate metrics collector registration attempted") {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_retry_attempt(operation: &str, error_kind: &str) {
    RETRY_ATTEMPTS_FAILED_TOTAL
        .with_label_values(&[operation, error_kind])
        .inc();
}

pub fn record_retry_outcome(operation: &str, status: &str, attempts: u32) {
    RETRY_OUTCOMES_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    RETRY_ATTEMPTS_USED
        .with_label_values(&[operation])
        .observe(f64::from(attempts));
}

pub fn record_stuck_job() {
    STUCK_JOBS_TOTAL.inc();
}

pub fn record_recovery_action(action: &str) {
    RECOVERY_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn record_failed_job(job_type: &str, strategy: &str) {
    FAILED_JOBS_RECORDED_TOTAL
        .with_label_values(&[job_type, strategy])
        .inc();
}

pub fn set_tracked_jobs(count: f64) {
    TRACKED_JOBS.set(count);
}

pub fn set_queue_health(level: f64) {
    QUEUE_HEALTH.set(level);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
