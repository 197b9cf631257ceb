//! End-to-end example wiring the three resilience components.
//!
//! A report job is retried through the executor while the stuck-job monitor
//! tracks it; when retries run out the failure goes to the recovery store
//! and an operator-style manual trigger re-queues it.
//!
//! Run with `RUST_LOG=keel=debug,report_pipeline=info cargo run --example report_pipeline`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel::*;
use serde_json::json;
use tracing_subscriber::EnvFilter;

/// Health collaborator that only logs what it is asked to do.
struct LoggingHealthService;

#[async_trait]
impl JobHealthService for LoggingHealthService {
    async fn attempt_graceful_restart(&self, job_id: &str) -> anyhow::Result<bool> {
        tracing::info!(job_id, "graceful restart requested");
        Ok(false)
    }

    async fn force_terminate(&self, job_id: &str) -> anyhow::Result<bool> {
        tracing::info!(job_id, "forced termination requested");
        Ok(true)
    }

    async fn restart(&self, job_id: &str) -> anyhow::Result<bool> {
        tracing::info!(job_id, "resubmission requested");
        Ok(true)
    }
}

async fn generate_report(calls: &AtomicU32) -> anyhow::Result<String> {
    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
    tokio::time::sleep(Duration::from_millis(20)).await;
    match attempt {
        1 => anyhow::bail!("upstream connection reset"),
        2 => anyhow::bail!("503 service unavailable"),
        _ => anyhow::bail!("429 too many requests"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ResilienceConfig::from_env()?;
    config.monitor.check_interval_ms = 50;
    config.monitor.max_execution_time_ms = 100;
    config.monitor.stuck_threshold = 2;
    config.monitor.force_kill_timeout_ms = 150;

    let events = Arc::new(BroadcastEventSink::new(64));
    let mut feed = events.subscribe();
    let dashboard = tokio::spawn(async move {
        while let Ok(event) = feed.recv().await {
            if let SinkEvent::Business { name, attributes, .. } = event {
                tracing::info!(event = %name, %attributes, "dashboard event");
            }
        }
    });

    let executor = RetryExecutor::new(events.clone(), Arc::new(UuidCorrelationIds));
    let monitor = StuckJobMonitor::new(
        Arc::new(LoggingHealthService),
        events.clone(),
        CorrelationCache::default(),
    );
    let store = FailedJobRecoveryStore::with_event_sink(config.store.clone(), events.clone());

    monitor.start_monitoring(config.monitor.clone()).await;

    // a hung job that never heartbeats gets recovered by the loop
    monitor.register_job_start("render-hung", Some("project-7".into())).await;

    let job_id = "report-2026-q3";
    let correlation_id = monitor.register_job_start(job_id, Some("project-7".into())).await;
    let calls = AtomicU32::new(0);
    let policy = RetryPolicy::builder()
        .max_retries(2)
        .base_delay(Duration::from_millis(50))
        .max_delay(Duration::from_millis(500))
        .jitter(true)
        .build()?;

    let outcome = executor
        .execute(
            || {
                let heartbeat = monitor.register_job_heartbeat(job_id);
                let calls = &calls;
                async move {
                    heartbeat.await;
                    generate_report(calls).await
                }
            },
            &policy,
            OperationContext::new("generate_report")
                .with_correlation_id(correlation_id)
                .with_job_id(job_id),
        )
        .await;
    monitor.register_job_completion(job_id, outcome.success).await;

    tracing::info!(
        success = outcome.success,
        attempts = outcome.attempts_used,
        delays = ?outcome.delays,
        "report generation finished"
    );

    if !outcome.success {
        let record = store
            .record_failure(
                FailureReport::from_outcome(job_id, "report_generation", &outcome)
                    .with_project_id("project-7")
                    .with_priority(JobPriority::P1),
            )
            .await;
        tracing::info!(
            failed_job_id = %record.id,
            strategy = %record.recovery_strategy,
            recommended = record.recommended_action(),
            "failure recorded"
        );

        let request = store
            .trigger_manual_recovery(
                &record.id,
                ManualRecoveryOptions {
                    priority: Some(JobPriority::P0),
                    bypass_checks: false,
                    custom_config: json!({ "max_sections": 3 }),
                },
            )
            .await?;
        tracing::info!(job_id = %request.job_id, "resubmission queued");

        store
            .record_recovery_outcome(&record.id, true, Some(Duration::from_secs(3)))
            .await?;
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    let status = monitor.get_monitoring_status().await;
    tracing::info!(
        scans = status.stats.scans_completed,
        killed = status.stats.killed,
        tracked = status.tracked_jobs,
        "monitor status"
    );

    let health = store.get_queue_health().await;
    tracing::info!(
        status = %health.status,
        recovery_rate = health.recovery_rate,
        recommendations = ?health.recommendations,
        "queue health"
    );

    monitor.stop_monitoring().await;
    drop(executor);
    drop(monitor);
    drop(store);
    drop(events);
    let _ = tokio::time::timeout(Duration::from_secs(1), dashboard).await;
    Ok(())
}
