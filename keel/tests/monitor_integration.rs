//! Stuck-job monitor integration tests.
//!
//! Tests stuck detection, heartbeat liveness, the graceful-then-forced
//! recovery sequence, recover-all reporting and loop shutdown.

use std::sync::Arc;
use std::time::Duration;

use keel::{
    CorrelationCache, EventLevel, MonitorOptions, RecoverAllOptions, RecoveryAction,
    StuckJobMonitor,
};
use keel_testkit::{
    HealthMethod, HealthScript, MockJobHealthService, RecordedEvent, RecordingEventSink,
    SequentialCorrelationIds,
};
use tokio::time::{sleep, timeout};

struct Harness {
    monitor: StuckJobMonitor,
    health: MockJobHealthService,
    events: Arc<RecordingEventSink>,
}

fn harness(script: HealthScript) -> Harness {
    let health = MockJobHealthService::with_script(script);
    let events = Arc::new(RecordingEventSink::new());
    let monitor = StuckJobMonitor::new(
        Arc::new(health.clone()),
        events.clone(),
        CorrelationCache::new(Arc::new(SequentialCorrelationIds::new())),
    );
    Harness {
        monitor,
        health,
        events,
    }
}

fn options(max_execution_time_ms: u64, stuck_threshold: u32) -> MonitorOptions {
    MonitorOptions {
        max_execution_time_ms,
        check_interval_ms: 10,
        stuck_threshold,
        enable_auto_recovery: true,
        force_kill_timeout_ms: 60_000,
    }
}

async fn wait_until_untracked(monitor: &StuckJobMonitor) {
    timeout(Duration::from_secs(5), async {
        while !monitor.get_running_jobs_status().await.is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job should leave the tracking table");
}

#[tokio::test]
async fn test_silent_job_flagged_after_threshold_scans() {
    let h = harness(HealthScript::graceful_ok());
    h.monitor.configure(options(0, 3)).await;
    h.monitor.register_job_start("report-1", Some("project-1".into())).await;
    sleep(Duration::from_millis(2)).await;

    assert!(h.monitor.scan_now().await.is_empty());
    assert!(h.monitor.scan_now().await.is_empty());
    assert_eq!(h.monitor.scan_now().await, vec!["report-1".to_string()]);

    let jobs = h.monitor.get_running_jobs_status().await;
    assert_eq!(jobs.len(), 1);
    assert!(jobs[0].is_stuck);
    assert_eq!(jobs[0].missed_checks, 3);
    assert_eq!(jobs[0].correlation_key.as_deref(), Some("project-1"));

    // detection alone never calls the collaborator
    assert!(h.health.record().is_empty());
    h.events.assert_logged(EventLevel::Warn, "job flagged as stuck");

    // one warning per flagged job, carrying the miss count
    let flagged: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            RecordedEvent::Log {
                level: EventLevel::Warn,
                message,
                attributes,
            } if message == "job flagged as stuck" => Some(attributes),
            _ => None,
        })
        .collect();
    assert_eq!(flagged.len(), 1);
    assert_eq!(flagged[0]["job_id"], "report-1");
    assert_eq!(flagged[0]["missed_checks"], 3);
}

#[tokio::test]
async fn test_heartbeating_job_survives_past_max_execution_time() {
    let h = harness(HealthScript::graceful_ok());
    h.monitor.configure(options(20, 1)).await;
    h.monitor.register_job_start("slow-1", None).await;

    for _ in 0..5 {
        sleep(Duration::from_millis(30)).await;
        assert!(h.monitor.register_job_heartbeat("slow-1").await);
        assert!(h.monitor.scan_now().await.is_empty());
    }

    let jobs = h.monitor.get_running_jobs_status().await;
    assert!(!jobs[0].is_stuck);
    assert_eq!(jobs[0].heartbeats, 5);
    assert!(jobs[0].execution_time_ms >= 150);
}

#[tokio::test]
async fn test_background_loop_kills_and_resubmits() {
    let h = harness(HealthScript::needs_force());
    let opts = MonitorOptions {
        force_kill_timeout_ms: 0,
        ..options(0, 2)
    };
    let correlation_id = h.monitor.register_job_start("scrape-9", None).await;
    assert_eq!(correlation_id.as_str(), "corr-1");

    assert!(h.monitor.start_monitoring(opts).await);
    wait_until_untracked(&h.monitor).await;
    assert!(h.monitor.stop_monitoring().await);

    h.health.assert_call_count_eq(HealthMethod::GracefulRestart, 1);
    h.health.assert_call_count_eq(HealthMethod::ForceTerminate, 1);
    h.health.assert_call_count_eq(HealthMethod::Restart, 1);

    let recoveries = h.events.business_events("stuck_job_recovery");
    assert_eq!(recoveries.len(), 1);
    assert_eq!(recoveries[0]["action"], "killed");
    assert_eq!(recoveries[0]["resubmitted"], true);

    let status = h.monitor.get_monitoring_status().await;
    assert_eq!(status.stats.killed, 1);
    assert_eq!(status.tracked_jobs, 0);
    assert!(!h.monitor.correlations().contains("scrape-9").await);
}

#[tokio::test]
async fn test_unrecoverable_job_is_ignored_once() {
    let h = harness(HealthScript::unresponsive());
    h.monitor.configure(options(0, 1)).await;
    h.monitor.register_job_start("gen-1", None).await;
    sleep(Duration::from_millis(2)).await;

    let summary = h.monitor.run_check_cycle().await;
    assert_eq!(summary.recoveries.len(), 1);
    assert_eq!(summary.recoveries[0].action, RecoveryAction::Ignored);
    assert!(summary.recoveries[0].errors[0].contains("health check timed out"));

    // execution time is under the force-kill timeout
    h.health.assert_call_count_eq(HealthMethod::ForceTerminate, 0);
    h.events
        .assert_logged(EventLevel::Error, "stuck job requires manual intervention");

    for _ in 0..3 {
        h.monitor.run_check_cycle().await;
    }
    h.health.assert_call_count_eq(HealthMethod::GracefulRestart, 1);

    let jobs = h.monitor.get_running_jobs_status().await;
    assert_eq!(jobs[0].recovery_action, RecoveryAction::Ignored);
}

#[tokio::test]
async fn test_recover_all_reports_each_outcome() {
    let h = harness(HealthScript::graceful_ok());
    h.health.set_script_for("job-2", HealthScript::needs_force());
    h.health.set_script_for("job-3", HealthScript::unresponsive());
    h.monitor
        .configure(MonitorOptions {
            enable_auto_recovery: false,
            ..options(0, 1)
        })
        .await;
    for id in ["job-1", "job-2", "job-3"] {
        h.monitor.register_job_start(id, None).await;
    }
    sleep(Duration::from_millis(2)).await;

    let report = h
        .monitor
        .recover_all_stuck_jobs(RecoverAllOptions {
            force_kill_timeout: Some(Duration::ZERO),
            retry_ignored: false,
        })
        .await;

    assert_eq!(report.total_stuck, 3);
    assert_eq!(report.restarted, 1);
    assert_eq!(report.killed, 1);
    assert_eq!(report.ignored, 1);
    assert_eq!(report.errors.len(), 3);
    assert!(report.errors.iter().all(|e| e.starts_with("job-2") || e.starts_with("job-3")));

    let ids: Vec<_> = report.results.iter().map(|r| r.job_id.as_str()).collect();
    assert_eq!(ids, vec!["job-1", "job-2", "job-3"]);

    let remaining = h.monitor.get_running_jobs_status().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].job_id, "job-3");
}

#[tokio::test]
async fn test_completion_during_stuck_state_stops_tracking() {
    let h = harness(HealthScript::graceful_ok());
    h.monitor
        .configure(MonitorOptions {
            enable_auto_recovery: false,
            ..options(0, 1)
        })
        .await;
    h.monitor.register_job_start("late-1", None).await;
    sleep(Duration::from_millis(2)).await;
    assert_eq!(h.monitor.scan_now().await.len(), 1);

    assert!(h.monitor.register_job_completion("late-1", true).await);
    let report = h
        .monitor
        .recover_all_stuck_jobs(RecoverAllOptions::default())
        .await;
    assert_eq!(report.total_stuck, 0);
    assert!(h.health.record().is_empty());
    h.events.assert_logged(EventLevel::Info, "stuck job completed on its own");
}

#[tokio::test]
async fn test_no_scans_after_stop() {
    let h = harness(HealthScript::graceful_ok());
    assert!(h.monitor.start_monitoring(options(60_000, 3)).await);
    sleep(Duration::from_millis(40)).await;
    assert!(h.monitor.stop_monitoring().await);

    let stopped = h.monitor.get_monitoring_status().await;
    assert!(!stopped.is_running);
    assert!(stopped.stats.scans_completed >= 1);

    sleep(Duration::from_millis(50)).await;
    let later = h.monitor.get_monitoring_status().await;
    assert_eq!(later.stats.scans_completed, stopped.stats.scans_completed);

    // restartable after a stop
    assert!(h.monitor.start_monitoring(options(60_000, 3)).await);
    assert!(h.monitor.stop_monitoring().await);
}
