use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MonitorOptions;

/// What the monitor finally did about a stuck job.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    #[default]
    None,
    Restarted,
    Killed,
    /// Every recovery step failed; needs an operator.
    Ignored,
}

impl RecoveryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryAction::None => "none",
            RecoveryAction::Restarted => "restarted",
            RecoveryAction::Killed => "killed",
            RecoveryAction::Ignored => "ignored",
        }
    }
}

impl Display for RecoveryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One in-flight job as seen by the monitor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackedJob {
    pub job_id: String,
    /// Caller-defined grouping key, e.g. a project id.
    pub correlation_key: Option<String>,
    pub started_at: DateTime<Utc>,
    /// Equals `started_at` until the first heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,
    pub heartbeats: u32,
    pub missed_checks: u32,
    pub is_stuck: bool,
    pub recovery_action: RecoveryAction,
    /// When the scan flagged the job; `None` while healthy.
    pub flagged_at: Option<DateTime<Utc>>,
    pub(crate) heartbeat_since_scan: bool,
    pub(crate) recovering: bool,
    // distinguishes a re-registered job from the entry a recovery claimed
    pub(crate) generation: u64,
}

impl TrackedJob {
    pub fn new(job_id: impl Into<String>, correlation_key: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            correlation_key,
            started_at: now,
            last_heartbeat_at: now,
            heartbeats: 0,
            missed_checks: 0,
            is_stuck: false,
            recovery_action: RecoveryAction::None,
            flagged_at: None,
            heartbeat_since_scan: false,
            recovering: false,
            generation: 0,
        }
    }

    pub fn execution_time(&self, now: DateTime<Utc>) -> Duration {
        (now - self.started_at).to_std().unwrap_or_default()
    }

    pub fn since_heartbeat(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_heartbeat_at).to_std().unwrap_or_default()
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    /// A stuck job that heartbeated after it was flagged is alive again and
    /// is left alone by recovery.
    pub fn heartbeat_after_flag(&self) -> bool {
        self.flagged_at
            .is_some_and(|flagged_at| self.is_stuck && self.last_heartbeat_at >= flagged_at)
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = now;
        self.heartbeats = self.heartbeats.saturating_add(1);
        self.missed_checks = 0;
        self.heartbeat_since_scan = true;
    }

    /// Apply one scan cycle. Returns true when this scan flips the job to stuck.
    ///
    /// An overdue job misses a check on every scan that saw no heartbeat since
    /// the previous one. It becomes stuck once it reaches the threshold, or,
    /// if it heartbeated before, once it has been silent for longer than the
    /// maximum execution time.
    pub fn observe_scan(&mut self, now: DateTime<Utc>, options: &MonitorOptions) -> bool {
        let heartbeat_seen = std::mem::replace(&mut self.heartbeat_since_scan, false);
        if self.is_stuck {
            return false;
        }

        let max_execution_time = options.max_execution_time();
        let overdue = self.execution_time(now) > max_execution_time;
        if !overdue {
            return false;
        }

        if !heartbeat_seen {
            self.missed_checks = self.missed_checks.saturating_add(1);
        }
        let went_silent = self.heartbeats > 0 && self.since_heartbeat(now) > max_execution_time;

        if self.missed_checks >= options.stuck_threshold() || went_silent {
            self.is_stuck = true;
            self.flagged_at = Some(now);
            return true;
        }
        false
    }

    pub fn status(&self, now: DateTime<Utc>) -> RunningJobStatus {
        RunningJobStatus {
            job_id: self.job_id.clone(),
            correlation_key: self.correlation_key.clone(),
            started_at: self.started_at,
            last_heartbeat_at: self.last_heartbeat_at,
            execution_time_ms: self.execution_time(now).as_millis() as u64,
            since_heartbeat_ms: self.since_heartbeat(now).as_millis() as u64,
            heartbeats: self.heartbeats,
            missed_checks: self.missed_checks,
            is_stuck: self.is_stuck,
            heartbeat_after_flag: self.heartbeat_after_flag(),
            recovering: self.recovering,
            recovery_action: self.recovery_action,
        }
    }
}

/// Read-only snapshot of a tracked job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunningJobStatus {
    pub job_id: String,
    pub correlation_key: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
    pub execution_time_ms: u64,
    pub since_heartbeat_ms: u64,
    pub heartbeats: u32,
    pub missed_checks: u32,
    pub is_stuck: bool,
    pub heartbeat_after_flag: bool,
    pub recovering: bool,
    pub recovery_action: RecoveryAction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn options(threshold: u32) -> MonitorOptions {
        MonitorOptions {
            max_execution_time_ms: 60_000,
            check_interval_ms: 10_000,
            stuck_threshold: threshold,
            enable_auto_recovery: true,
            force_kill_timeout_ms: 120_000,
        }
    }

    fn at(start: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        start + ChronoDuration::seconds(secs)
    }

    #[test]
    fn test_silent_job_becomes_stuck_after_threshold_overdue_scans() {
        let start = Utc::now();
        let opts = options(3);
        let mut job = TrackedJob::new("job-1", None, start);

        // within the execution budget nothing is counted
        assert!(!job.observe_scan(at(start, 30), &opts));
        assert_eq!(job.missed_checks, 0);

        assert!(!job.observe_scan(at(start, 70), &opts));
        assert!(!job.observe_scan(at(start, 80), &opts));
        assert!(job.observe_scan(at(start, 90), &opts));
        assert!(job.is_stuck);
        assert_eq!(job.missed_checks, 3);

        // flips exactly once
        assert!(!job.observe_scan(at(start, 100), &opts));
    }

    #[test]
    fn test_heartbeating_job_never_becomes_stuck() {
        let start = Utc::now();
        let opts = options(1);
        let mut job = TrackedJob::new("job-2", None, start);

        for cycle in 1..=50 {
            let now = at(start, cycle * 10);
            job.heartbeat(now);
            assert!(!job.observe_scan(now, &opts), "cycle {cycle}");
        }
        assert!(!job.is_stuck);
        assert_eq!(job.missed_checks, 0);
    }

    #[test]
    fn test_heartbeat_resets_missed_checks() {
        let start = Utc::now();
        let opts = options(3);
        let mut job = TrackedJob::new("job-3", None, start);

        job.observe_scan(at(start, 70), &opts);
        job.observe_scan(at(start, 80), &opts);
        assert_eq!(job.missed_checks, 2);

        job.heartbeat(at(start, 85));
        assert_eq!(job.missed_checks, 0);
        assert!(!job.observe_scan(at(start, 90), &opts));
        assert_eq!(job.missed_checks, 0);

        assert!(!job.observe_scan(at(start, 100), &opts));
        assert_eq!(job.missed_checks, 1);
    }

    #[test]
    fn test_job_that_went_silent_is_escalated() {
        let start = Utc::now();
        let opts = options(10);
        let mut job = TrackedJob::new("job-4", None, start);

        job.heartbeat(at(start, 5));
        // silent for 65s > 60s max execution time
        assert!(job.observe_scan(at(start, 70), &opts));
        assert_eq!(job.missed_checks, 1);
    }

    #[test]
    fn test_heartbeat_after_flag_marks_job_alive() {
        let start = Utc::now();
        let opts = options(1);
        let mut job = TrackedJob::new("job-6", None, start);

        job.heartbeat(at(start, 10));
        assert!(!job.heartbeat_after_flag());

        assert!(job.observe_scan(at(start, 75), &opts));
        assert_eq!(job.flagged_at, Some(at(start, 75)));
        assert!(!job.heartbeat_after_flag());

        job.heartbeat(at(start, 80));
        assert!(job.is_stuck);
        assert!(job.heartbeat_after_flag());
        assert!(job.status(at(start, 81)).heartbeat_after_flag);
    }

    #[test]
    fn test_status_snapshot() {
        let start = Utc::now();
        let mut job = TrackedJob::new("job-5", Some("project-9".into()), start);
        job.heartbeat(at(start, 4));

        let status = job.status(at(start, 10));
        assert_eq!(status.job_id, "job-5");
        assert_eq!(status.correlation_key.as_deref(), Some("project-9"));
        assert_eq!(status.execution_time_ms, 10_000);
        assert_eq!(status.since_heartbeat_ms, 6_000);
        assert_eq!(status.heartbeats, 1);
        assert_eq!(status.recovery_action, RecoveryAction::None);
    }
}
