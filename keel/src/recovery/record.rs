use std::fmt::Display;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::{classify_error, ErrorKind};
use crate::job::JobPriority;
use crate::retry::RetryOutcome;

/// How a failed job should be brought back.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    #[default]
    Retry,
    Manual,
    DeadLetter,
}

impl RecoveryStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "retry",
            RecoveryStrategy::Manual => "manual",
            RecoveryStrategy::DeadLetter => "dead_letter",
        }
    }
}

impl Display for RecoveryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure category stored with a record.
///
/// Extends [`ErrorKind`] with the two categories that change the operator
/// recommendation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    RateLimit,
    Server,
    Client,
    Content,
    Authentication,
    ResourceExhaustion,
    #[default]
    Unknown,
}

const AUTHENTICATION_SIGNALS: &[&str] = &[
    "unauthorized",
    "authentication",
    "forbidden",
    "invalid api key",
    "invalid credentials",
    "permission denied",
];

const RESOURCE_SIGNALS: &[&str] = &[
    "out of memory",
    "oomkilled",
    "quota",
    "resource exhausted",
    "resources exhausted",
    "no space left",
    "too many open files",
    "insufficient resources",
    "insufficient memory",
];

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Server => "server",
            ErrorCategory::Client => "client",
            ErrorCategory::Content => "content",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::ResourceExhaustion => "resource_exhaustion",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Categorize a failure reason. Authentication and resource signals win
    /// over the general classification.
    pub fn from_reason(reason: &str) -> Self {
        let lower = reason.to_lowercase();
        if AUTHENTICATION_SIGNALS.iter().any(|s| lower.contains(s)) {
            return ErrorCategory::Authentication;
        }
        if RESOURCE_SIGNALS.iter().any(|s| lower.contains(s)) {
            return ErrorCategory::ResourceExhaustion;
        }
        classify_error(reason).kind.into()
    }

    /// Only client errors are excluded from automatic retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ErrorCategory::Client)
    }
}

impl From<ErrorKind> for ErrorCategory {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Network => ErrorCategory::Network,
            ErrorKind::Timeout => ErrorCategory::Timeout,
            ErrorKind::RateLimit => ErrorCategory::RateLimit,
            ErrorKind::Server => ErrorCategory::Server,
            ErrorKind::Client => ErrorCategory::Client,
            ErrorKind::Content => ErrorCategory::Content,
            ErrorKind::Unknown => ErrorCategory::Unknown,
        }
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJobMetadata {
    pub priority: JobPriority,
    pub error_category: ErrorCategory,
    pub original_queue_name: String,
}

/// A logical task that exhausted its retries, with its recovery classification.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJobRecord {
    pub id: String,
    pub task_id: String,
    pub job_type: String,
    pub project_id: Option<String>,
    /// Reason of the most recent failure.
    pub failure_reason: String,
    pub failure_count: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_failed_at: DateTime<Utc>,
    pub recovery_strategy: RecoveryStrategy,
    pub is_recoverable: bool,
    pub is_permanent_failure: bool,
    pub metadata: FailedJobMetadata,
}

impl FailedJobRecord {
    /// Operator-facing next step for this record.
    pub fn recommended_action(&self) -> &'static str {
        if self.is_permanent_failure {
            "fix underlying issue before retry"
        } else if self.failure_count > 5 {
            "investigate root cause"
        } else if self.recovery_strategy == RecoveryStrategy::DeadLetter {
            "manual review required"
        } else if self.metadata.error_category == ErrorCategory::Authentication {
            "check credentials"
        } else if self.metadata.error_category == ErrorCategory::ResourceExhaustion {
            "wait or scale"
        } else {
            "safe to retry"
        }
    }
}

/// One failed execution handed to
/// [`FailedJobRecoveryStore::record_failure`](crate::FailedJobRecoveryStore::record_failure).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub task_id: String,
    pub job_type: String,
    pub project_id: Option<String>,
    pub failure_reason: String,
    pub priority: JobPriority,
    pub original_queue_name: String,
    /// Derived from `failure_reason` when absent.
    pub error_category: Option<ErrorCategory>,
    pub processing_time: Option<Duration>,
}

impl FailureReport {
    pub fn new(
        task_id: impl Into<String>,
        job_type: impl Into<String>,
        failure_reason: impl Into<String>,
    ) -> Self {
        let job_type = job_type.into();
        Self {
            task_id: task_id.into(),
            original_queue_name: job_type.clone(),
            job_type,
            project_id: None,
            failure_reason: failure_reason.into(),
            priority: JobPriority::default(),
            error_category: None,
            processing_time: None,
        }
    }

    /// Report for an exhausted [`RetryOutcome`].
    pub fn from_outcome<T>(
        task_id: impl Into<String>,
        job_type: impl Into<String>,
        outcome: &RetryOutcome<T>,
    ) -> Self {
        let reason = match &outcome.error {
            Some(err) => format!("{err:#}"),
            None => format!("failed after {} attempts", outcome.attempts_used),
        };
        let mut report = Self::new(task_id, job_type, reason);
        report.processing_time = Some(outcome.total_duration);
        if let Some(kind) = outcome.last_error_kind {
            let derived = ErrorCategory::from_reason(&report.failure_reason);
            // keep the finer-grained categories the classifier does not know about
            report.error_category = Some(match derived {
                ErrorCategory::Authentication | ErrorCategory::ResourceExhaustion => derived,
                _ => kind.into(),
            });
        }
        report
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_queue_name(mut self, queue_name: impl Into<String>) -> Self {
        self.original_queue_name = queue_name.into();
        self
    }

    pub fn with_error_category(mut self, category: ErrorCategory) -> Self {
        self.error_category = Some(category);
        self
    }

    pub fn with_processing_time(mut self, processing_time: Duration) -> Self {
        self.processing_time = Some(processing_time);
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.error_category
            .unwrap_or_else(|| ErrorCategory::from_reason(&self.failure_reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: u32, strategy: RecoveryStrategy, category: ErrorCategory) -> FailedJobRecord {
        let now = Utc::now();
        FailedJobRecord {
            id: "fj-1".into(),
            task_id: "task-1".into(),
            job_type: "report_generation".into(),
            project_id: None,
            failure_reason: "boom".into(),
            failure_count: count,
            first_failed_at: now,
            last_failed_at: now,
            recovery_strategy: strategy,
            is_recoverable: true,
            is_permanent_failure: false,
            metadata: FailedJobMetadata {
                priority: JobPriority::P2,
                error_category: category,
                original_queue_name: "reports".into(),
            },
        }
    }

    #[test]
    fn test_recommended_action_order() {
        let mut permanent = record(11, RecoveryStrategy::DeadLetter, ErrorCategory::Network);
        permanent.is_permanent_failure = true;
        assert_eq!(permanent.recommended_action(), "fix underlying issue before retry");

        let frequent = record(6, RecoveryStrategy::Manual, ErrorCategory::Authentication);
        assert_eq!(frequent.recommended_action(), "investigate root cause");

        let dead = record(1, RecoveryStrategy::DeadLetter, ErrorCategory::Client);
        assert_eq!(dead.recommended_action(), "manual review required");

        let auth = record(2, RecoveryStrategy::Manual, ErrorCategory::Authentication);
        assert_eq!(auth.recommended_action(), "check credentials");

        let exhausted = record(2, RecoveryStrategy::Retry, ErrorCategory::ResourceExhaustion);
        assert_eq!(exhausted.recommended_action(), "wait or scale");

        let plain = record(1, RecoveryStrategy::Retry, ErrorCategory::Network);
        assert_eq!(plain.recommended_action(), "safe to retry");
    }

    #[test]
    fn test_category_from_reason() {
        assert_eq!(
            ErrorCategory::from_reason("401 Unauthorized: invalid api key"),
            ErrorCategory::Authentication
        );
        assert_eq!(
            ErrorCategory::from_reason("monthly quota reached"),
            ErrorCategory::ResourceExhaustion
        );
        assert_eq!(
            ErrorCategory::from_reason("connect ECONNRESET"),
            ErrorCategory::Network
        );
        assert_eq!(
            ErrorCategory::from_reason("404 not found"),
            ErrorCategory::Client
        );
        assert!(!ErrorCategory::Client.is_retryable());
        assert!(ErrorCategory::Authentication.is_retryable());
    }

    #[test]
    fn test_report_defaults_queue_to_job_type() {
        let report = FailureReport::new("task-1", "competitor_scan", "connection reset by peer")
            .with_project_id("p-1")
            .with_priority(JobPriority::P1);
        assert_eq!(report.original_queue_name, "competitor_scan");
        assert_eq!(report.project_id.as_deref(), Some("p-1"));
        assert_eq!(report.category(), ErrorCategory::Network);

        let explicit = report.with_error_category(ErrorCategory::Server);
        assert_eq!(explicit.category(), ErrorCategory::Server);
    }

    #[test]
    fn test_strategy_serializes_snake_case() {
        let value = serde_json::to_value(RecoveryStrategy::DeadLetter).unwrap();
        assert_eq!(value, serde_json::json!("dead_letter"));
        let value = serde_json::to_value(ErrorCategory::ResourceExhaustion).unwrap();
        assert_eq!(value, serde_json::json!("resource_exhaustion"));
    }
}
