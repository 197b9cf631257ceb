//! Failed-job recovery store integration tests.
//!
//! Tests dead-letter escalation, manual trigger gating, archive/reset
//! lifecycle and queue health evaluation.

use std::sync::Arc;
use std::time::Duration;

use keel::{
    EventLevel, FailedJobFilter, FailedJobRecoveryStore, FailureReport, HealthStatus, JobPriority,
    ManualRecoveryOptions, RecoveryCommand, RecoveryError, RecoveryStoreConfig, RecoveryStrategy,
    ResilienceConfig,
};
use keel_testkit::RecordingEventSink;
use serde_json::json;

fn failure(task_id: &str) -> FailureReport {
    FailureReport::new(task_id, "report_generation", "upstream connection reset")
        .with_project_id("project-1")
        .with_queue_name("reports")
}

#[tokio::test]
async fn test_eleven_failures_dead_letter_the_task() {
    let events = Arc::new(RecordingEventSink::new());
    let store = FailedJobRecoveryStore::with_event_sink(RecoveryStoreConfig::default(), events.clone());

    let mut record = store.record_failure(failure("task-1")).await;
    for _ in 0..10 {
        record = store.record_failure(failure("task-1")).await;
    }

    assert_eq!(record.failure_count, 11);
    assert_eq!(record.recovery_strategy, RecoveryStrategy::DeadLetter);
    assert!(record.is_permanent_failure);
    assert!(!record.is_recoverable);
    assert_eq!(record.recommended_action(), "fix underlying issue before retry");

    // one dead-letter transition, one business event per failure
    assert_eq!(events.messages(EventLevel::Error), vec!["job moved to dead letter"]);
    assert_eq!(events.business_events("failed_job_recorded").len(), 11);

    let only = store.get_failed_jobs(&FailedJobFilter::default()).await;
    assert_eq!(only.len(), 1);
}

#[tokio::test]
async fn test_permanent_failure_requires_bypass() {
    let store = FailedJobRecoveryStore::new(RecoveryStoreConfig {
        dead_letter_ceiling: 2,
        ..Default::default()
    });
    for _ in 0..3 {
        store.record_failure(failure("task-2")).await;
    }
    let record = store
        .get_failed_jobs(&FailedJobFilter::default())
        .await
        .remove(0);
    assert!(record.is_permanent_failure);

    let rejected = store
        .trigger_manual_recovery(&record.id, ManualRecoveryOptions::default())
        .await;
    assert_eq!(
        rejected,
        Err(RecoveryError::PermanentFailure {
            id: record.id.clone()
        })
    );
    assert!(store.pending_triggers().await.is_empty());

    let first = store
        .trigger_manual_recovery(
            &record.id,
            ManualRecoveryOptions {
                priority: Some(JobPriority::P0),
                bypass_checks: true,
                custom_config: json!({ "max_pages": 5 }),
            },
        )
        .await
        .unwrap();
    let second = store
        .trigger_manual_recovery(
            &record.id,
            ManualRecoveryOptions {
                bypass_checks: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_ne!(first.job_id, second.job_id);
    assert!(first.bypassed_checks);
    assert_eq!(first.priority, JobPriority::P0);
    assert_eq!(first.queue_name, "reports");
    assert_eq!(first.custom_config["max_pages"], 5);

    // a newer trigger replaces the pending one
    let pending = store.pending_triggers().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_id, second.job_id);
}

#[tokio::test]
async fn test_archive_and_reset_lifecycle() {
    let store = FailedJobRecoveryStore::default();
    let archived = store.record_failure(failure("task-3")).await;
    let reopened = store
        .record_failure(FailureReport::new("task-4", "scrape", "403 forbidden"))
        .await;
    assert_eq!(reopened.recovery_strategy, RecoveryStrategy::Manual);

    store
        .cancel_or_archive(&archived.id, RecoveryCommand::Archive)
        .await
        .unwrap();
    assert_eq!(
        store
            .cancel_or_archive(&archived.id, RecoveryCommand::Reset)
            .await,
        Err(RecoveryError::Archived {
            id: archived.id.clone()
        })
    );
    assert_eq!(store.archived_jobs().await.len(), 1);

    store
        .cancel_or_archive(&reopened.id, RecoveryCommand::Reset)
        .await
        .unwrap();
    let active = store.get_failed_jobs(&FailedJobFilter::default()).await;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].failure_count, 0);
    assert_eq!(active[0].recovery_strategy, RecoveryStrategy::Retry);

    assert_eq!(
        store
            .cancel_or_archive("fj-missing", RecoveryCommand::Cancel)
            .await,
        Err(RecoveryError::NotFound {
            id: "fj-missing".into()
        })
    );
}

#[tokio::test]
async fn test_queue_health_status() {
    let store = FailedJobRecoveryStore::default();
    let health = store.get_queue_health().await;
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.error_rate, 0.0);
    assert_eq!(health.failure_rate, 0.0);
    assert_eq!(health.success_rate, 0.0);

    for _ in 0..8 {
        store.record_success(Some(Duration::from_secs(2))).await;
    }
    // two immediate dead letters out of ten processed: 20% error rate
    store
        .record_failure(FailureReport::new("task-5", "scrape", "400 bad request"))
        .await;
    store
        .record_failure(FailureReport::new("task-6", "scrape", "page not found"))
        .await;

    let health = store.get_queue_health().await;
    assert_eq!(health.processed, 10);
    assert_eq!(health.status, HealthStatus::Critical);
    assert!((health.error_rate - 0.2).abs() < 1e-9);
    assert!((health.success_rate - 0.8).abs() < 1e-9);
    assert_eq!(health.queue_depth, 2);
    assert!(health
        .recommendations
        .iter()
        .any(|r| r.contains("dead-lettered")));
}

#[tokio::test]
async fn test_store_built_from_config() {
    let config = ResilienceConfig::from_json_str(
        r#"{ "store": { "dead_letter_ceiling": 1, "queue_depth_warning": 0 } }"#,
    )
    .unwrap();
    let store = FailedJobRecoveryStore::new(config.store.clone());

    store.record_failure(failure("task-7")).await;
    let record = store.record_failure(failure("task-7")).await;
    assert!(record.is_permanent_failure);

    for _ in 0..100 {
        store.record_success(None).await;
    }
    // 2 of 102 failures stay under every rate threshold; depth 1 > 0 warns
    let health = store.get_queue_health().await;
    assert_eq!(health.status, HealthStatus::Warning);
}
