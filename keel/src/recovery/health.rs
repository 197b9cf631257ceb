use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Qualitative queue health.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }

    /// Numeric level used by the health gauge.
    pub fn level(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Warning => 1,
            HealthStatus::Critical => 2,
        }
    }
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits above which a rate or timing degrades the status.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub critical_error_rate: f64,
    pub critical_failure_rate: f64,
    pub critical_processing_time: Duration,
    pub warning_error_rate: f64,
    pub warning_failure_rate: f64,
    pub warning_processing_time: Duration,
    pub queue_depth_warning: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            critical_error_rate: 0.10,
            critical_failure_rate: 0.20,
            critical_processing_time: Duration::from_secs(180),
            warning_error_rate: 0.05,
            warning_failure_rate: 0.10,
            warning_processing_time: Duration::from_secs(120),
            queue_depth_warning: 100,
        }
    }
}

/// Raw counters the health report is computed from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounters {
    pub successes: u64,
    pub failures: u64,
    pub dead_letter_failures: u64,
    pub recovery_attempts: u64,
    pub recovered: u64,
    pub timed_executions: u64,
    pub total_processing_time: Duration,
    pub active_records: usize,
    pub pending_triggers: usize,
    pub archived_records: usize,
    pub retry_records: usize,
    pub manual_records: usize,
    pub dead_letter_records: usize,
}

/// Health report returned by
/// [`FailedJobRecoveryStore::get_queue_health`](crate::FailedJobRecoveryStore::get_queue_health).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueHealth {
    pub status: HealthStatus,
    pub processed: u64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub error_rate: f64,
    pub recovery_rate: f64,
    pub average_processing_time: Option<Duration>,
    pub queue_depth: usize,
    pub counters: HealthCounters,
    pub recommendations: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn percent(rate: f64) -> String {
    format!("{:.1}%", rate * 100.0)
}

impl QueueHealth {
    pub fn evaluate(counters: HealthCounters, thresholds: &HealthThresholds) -> Self {
        let processed = counters.successes + counters.failures;
        let success_rate = ratio(counters.successes, processed);
        let failure_rate = ratio(counters.failures, processed);
        let error_rate = ratio(counters.dead_letter_failures, processed);
        let recovery_rate = ratio(counters.recovered, counters.recovery_attempts);
        let average_processing_time = (counters.timed_executions > 0).then(|| {
            let nanos = counters.total_processing_time.as_nanos() / u128::from(counters.timed_executions);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        });
        let queue_depth = counters.active_records + counters.pending_triggers;
        let average = average_processing_time.unwrap_or_default();

        let mut status = HealthStatus::Healthy;
        let mut recommendations = Vec::new();
        let mut degrade = |level: HealthStatus, note: String| {
            status = status.max(level);
            recommendations.push(note);
        };

        if error_rate > thresholds.critical_error_rate {
            degrade(
                HealthStatus::Critical,
                format!("error rate {} is critical: review dead-lettered jobs", percent(error_rate)),
            );
        } else if error_rate > thresholds.warning_error_rate {
            degrade(
                HealthStatus::Warning,
                format!("error rate {} is elevated: review dead-lettered jobs", percent(error_rate)),
            );
        }

        if failure_rate > thresholds.critical_failure_rate {
            degrade(
                HealthStatus::Critical,
                format!(
                    "failure rate {} is critical: check upstream dependencies",
                    percent(failure_rate)
                ),
            );
        } else if failure_rate > thresholds.warning_failure_rate {
            degrade(
                HealthStatus::Warning,
                format!(
                    "failure rate {} is elevated: check upstream dependencies",
                    percent(failure_rate)
                ),
            );
        }

        if average > thresholds.critical_processing_time {
            degrade(
                HealthStatus::Critical,
                format!(
                    "average processing time {}s is critical: scale workers or split jobs",
                    average.as_secs()
                ),
            );
        } else if average > thresholds.warning_processing_time {
            degrade(
                HealthStatus::Warning,
                format!(
                    "average processing time {}s is elevated: scale workers or split jobs",
                    average.as_secs()
                ),
            );
        }

        if queue_depth > thresholds.queue_depth_warning {
            degrade(
                HealthStatus::Warning,
                format!(
                    "{queue_depth} failed jobs awaiting recovery: drain the recovery backlog"
                ),
            );
        }

        if counters.dead_letter_records > 0 {
            recommendations.push(format!(
                "{} dead-lettered jobs need manual review",
                counters.dead_letter_records
            ));
        }
        if recommendations.is_empty() {
            recommendations.push("queue operating normally".to_string());
        }

        Self {
            status,
            processed,
            success_rate,
            failure_rate,
            error_rate,
            recovery_rate,
            average_processing_time,
            queue_depth,
            counters,
            recommendations,
            evaluated_at: Utc::now(),
        }
    }
}
