use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::RecoveryStoreConfig;
use crate::error::RecoveryError;
use crate::events::{EventSink, TracingEventSink};
use crate::job::{JobId, JobPriority};
use crate::recovery::health::{HealthCounters, HealthThresholds, QueueHealth};
use crate::recovery::record::{
    ErrorCategory, FailedJobMetadata, FailedJobRecord, FailureReport, RecoveryStrategy,
};
use crate::telemetry;

/// Predicate for [`FailedJobRecoveryStore::get_failed_jobs`]. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedJobFilter {
    pub project_id: Option<String>,
    pub job_type: Option<String>,
    pub is_recoverable: Option<bool>,
    pub limit: Option<usize>,
}

impl FailedJobFilter {
    fn matches(&self, record: &FailedJobRecord) -> bool {
        self.project_id
            .as_ref()
            .map_or(true, |p| record.project_id.as_ref() == Some(p))
            && self.job_type.as_ref().map_or(true, |t| &record.job_type == t)
            && self
                .is_recoverable
                .map_or(true, |r| record.is_recoverable == r)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualRecoveryOptions {
    /// Defaults to the priority the job originally ran with.
    pub priority: Option<JobPriority>,
    /// Re-queue even records marked as permanent failures.
    pub bypass_checks: bool,
    /// Overrides carried to the resubmitted execution.
    pub custom_config: Value,
}

/// Acknowledgement of a manual trigger; the caller's scheduler runs `job_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManualRecoveryRequest {
    pub job_id: JobId,
    pub failed_job_id: String,
    pub task_id: String,
    pub job_type: String,
    pub project_id: Option<String>,
    pub priority: JobPriority,
    pub queue_name: String,
    pub custom_config: Value,
    pub bypassed_checks: bool,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryCommand {
    /// Drop the pending manual trigger.
    Cancel,
    /// Remove from active consideration, keeping history.
    Archive,
    /// Clear the failure count and reopen as retryable.
    Reset,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    Archived,
    Recovered,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedJob {
    pub record: FailedJobRecord,
    pub reason: ArchiveReason,
    pub archived_at: DateTime<Utc>,
}

#[derive(Default)]
struct StoreState {
    active: HashMap<String, FailedJobRecord>,
    // task id -> active record id
    by_task: HashMap<String, String>,
    pending: HashMap<String, ManualRecoveryRequest>,
    archived: Vec<ArchivedJob>,
    // record id -> position in `archived`
    archived_index: HashMap<String, usize>,
    counters: HealthCounters,
}

impl StoreState {
    fn time_execution(&mut self, processing_time: Option<Duration>) {
        if let Some(elapsed) = processing_time {
            self.counters.timed_executions += 1;
            self.counters.total_processing_time += elapsed;
        }
    }

    fn archive(&mut self, id: &str, reason: ArchiveReason) -> Option<ArchivedJob> {
        let record = self.active.remove(id)?;
        self.by_task.remove(&record.task_id);
        self.pending.remove(id);
        let archived = ArchivedJob {
            record,
            reason,
            archived_at: Utc::now(),
        };
        self.archived_index
            .insert(archived.record.id.clone(), self.archived.len());
        self.archived.push(archived.clone());
        Some(archived)
    }

    fn archived_record(&self, id: &str) -> Option<&ArchivedJob> {
        self.archived_index
            .get(id)
            .and_then(|&position| self.archived.get(position))
    }

    fn is_archived(&self, id: &str) -> bool {
        self.archived_index.contains_key(id)
    }

    fn missing(&self, id: &str) -> RecoveryError {
        if self.is_archived(id) {
            RecoveryError::Archived { id: id.to_string() }
        } else {
            RecoveryError::NotFound { id: id.to_string() }
        }
    }
}

/// In-memory registry of failed jobs and manual recovery triggers.
///
/// Decides whether and how a failed job is resubmitted; it never runs jobs.
pub struct FailedJobRecoveryStore {
    config: RecoveryStoreConfig,
    thresholds: HealthThresholds,
    state: Mutex<StoreState>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for FailedJobRecoveryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self
            .state
            .try_lock()
            .map(|state| state.active.len())
            .unwrap_or_default();
        f.debug_struct("FailedJobRecoveryStore")
            .field("config", &self.config)
            .field("active_records", &active)
            .finish()
    }
}

impl Default for FailedJobRecoveryStore {
    fn default() -> Self {
        Self::new(RecoveryStoreConfig::default())
    }
}

impl FailedJobRecoveryStore {
    pub fn new(config: RecoveryStoreConfig) -> Self {
        Self::with_event_sink(config, Arc::new(TracingEventSink))
    }

    pub fn with_event_sink(config: RecoveryStoreConfig, events: Arc<dyn EventSink>) -> Self {
        let thresholds = HealthThresholds {
            queue_depth_warning: config.queue_depth_warning,
            ..Default::default()
        };
        Self {
            config,
            thresholds,
            state: Mutex::new(StoreState::default()),
            events,
        }
    }

    pub fn config(&self) -> &RecoveryStoreConfig {
        &self.config
    }

    fn evaluate(&self, record: &mut FailedJobRecord) {
        let category = record.metadata.error_category;
        let (strategy, recoverable, permanent) =
            if record.failure_count > self.config.dead_letter_ceiling {
                (RecoveryStrategy::DeadLetter, false, true)
            } else if !category.is_retryable() {
                (RecoveryStrategy::DeadLetter, true, false)
            } else if record.failure_count > self.config.manual_threshold
                || category == ErrorCategory::Authentication
            {
                (RecoveryStrategy::Manual, true, false)
            } else {
                (RecoveryStrategy::Retry, true, false)
            };
        record.recovery_strategy = strategy;
        record.is_recoverable = recoverable;
        record.is_permanent_failure = permanent;
    }

    /// Register one failure. Repeat failures of a task update its active record.
    pub async fn record_failure(&self, report: FailureReport) -> FailedJobRecord {
        let category = report.category();
        let now = Utc::now();

        let (record, previous) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let existing = state
                .by_task
                .get(&report.task_id)
                .and_then(|id| state.active.get_mut(id));
            let (record, previous) = match existing {
                Some(record) => {
                    let previous = record.recovery_strategy;
                    record.failure_count = record.failure_count.saturating_add(1);
                    record.last_failed_at = now;
                    record.failure_reason = report.failure_reason.clone();
                    record.metadata.error_category = category;
                    if report.project_id.is_some() {
                        record.project_id = report.project_id.clone();
                    }
                    self.evaluate(record);
                    (record.clone(), Some(previous))
                }
                None => {
                    let mut record = FailedJobRecord {
                        id: format!("fj-{}", Uuid::now_v7()),
                        task_id: report.task_id.clone(),
                        job_type: report.job_type.clone(),
                        project_id: report.project_id.clone(),
                        failure_reason: report.failure_reason.clone(),
                        failure_count: 1,
                        first_failed_at: now,
                        last_failed_at: now,
                        recovery_strategy: RecoveryStrategy::Retry,
                        is_recoverable: true,
                        is_permanent_failure: false,
                        metadata: FailedJobMetadata {
                            priority: report.priority,
                            error_category: category,
                            original_queue_name: report.original_queue_name.clone(),
                        },
                    };
                    self.evaluate(&mut record);
                    state
                        .by_task
                        .insert(record.task_id.clone(), record.id.clone());
                    state.active.insert(record.id.clone(), record.clone());
                    (record, None)
                }
            };

            state.counters.failures += 1;
            if record.recovery_strategy == RecoveryStrategy::DeadLetter {
                state.counters.dead_letter_failures += 1;
            }
            state.time_execution(report.processing_time);
            (record, previous)
        };

        telemetry::record_failed_job(&record.job_type, record.recovery_strategy.as_str());
        let attributes = json!({
            "failed_job_id": record.id,
            "task_id": record.task_id,
            "job_type": record.job_type,
            "failure_count": record.failure_count,
            "strategy": record.recovery_strategy.as_str(),
            "error_category": category.as_str(),
        });
        if record.recovery_strategy == RecoveryStrategy::DeadLetter
            && previous != Some(RecoveryStrategy::DeadLetter)
        {
            self.events.error("job moved to dead letter", attributes.clone());
        }
        self.events
            .track_business_event("failed_job_recorded", attributes);
        record
    }

    /// Active records matching `filter`, most recent failure first.
    pub async fn get_failed_jobs(&self, filter: &FailedJobFilter) -> Vec<FailedJobRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<FailedJobRecord> = state
            .active
            .values()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            b.last_failed_at
                .cmp(&a.last_failed_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        records
    }

    /// Active or archived record by id.
    pub async fn get_failed_job(&self, id: &str) -> Option<FailedJobRecord> {
        let state = self.state.lock().await;
        state
            .active
            .get(id)
            .or_else(|| state.archived_record(id).map(|job| &job.record))
            .cloned()
    }

    /// Queue a resubmission of a failed job and return its request.
    pub async fn trigger_manual_recovery(
        &self,
        failed_job_id: &str,
        options: ManualRecoveryOptions,
    ) -> Result<ManualRecoveryRequest, RecoveryError> {
        let mut state = self.state.lock().await;
        let span = telemetry::manual_recovery_span(failed_job_id);
        span.in_scope(|| self.build_trigger(&mut state, failed_job_id, options))
    }

    fn build_trigger(
        &self,
        state: &mut StoreState,
        failed_job_id: &str,
        options: ManualRecoveryOptions,
    ) -> Result<ManualRecoveryRequest, RecoveryError> {
        let Some(record) = state.active.get(failed_job_id) else {
            return Err(state.missing(failed_job_id));
        };
        if record.is_permanent_failure && !options.bypass_checks {
            tracing::warn!(
                failed_job_id = %failed_job_id,
                failure_count = record.failure_count,
                "manual recovery rejected for permanent failure"
            );
            return Err(RecoveryError::PermanentFailure {
                id: failed_job_id.to_string(),
            });
        }

        let request = ManualRecoveryRequest {
            job_id: JobId::new(),
            failed_job_id: record.id.clone(),
            task_id: record.task_id.clone(),
            job_type: record.job_type.clone(),
            project_id: record.project_id.clone(),
            priority: options.priority.unwrap_or(record.metadata.priority),
            queue_name: record.metadata.original_queue_name.clone(),
            custom_config: options.custom_config,
            bypassed_checks: options.bypass_checks && record.is_permanent_failure,
            requested_at: Utc::now(),
        };
        if let Some(replaced) = state
            .pending
            .insert(failed_job_id.to_string(), request.clone())
        {
            tracing::debug!(
                failed_job_id = %failed_job_id,
                replaced_job_id = %replaced.job_id,
                "pending manual recovery replaced"
            );
        }

        tracing::info!(
            failed_job_id = %failed_job_id,
            job_id = %request.job_id,
            priority = %request.priority,
            bypassed_checks = request.bypassed_checks,
            "manual recovery queued"
        );
        self.events.track_business_event(
            "manual_recovery_triggered",
            json!({
                "failed_job_id": failed_job_id,
                "job_id": request.job_id.to_string(),
                "priority": request.priority.as_str(),
                "bypassed_checks": request.bypassed_checks,
            }),
        );
        Ok(request)
    }

    pub async fn cancel_or_archive(
        &self,
        failed_job_id: &str,
        command: RecoveryCommand,
    ) -> Result<(), RecoveryError> {
        let mut state = self.state.lock().await;
        if !state.active.contains_key(failed_job_id) {
            return Err(state.missing(failed_job_id));
        }

        match command {
            RecoveryCommand::Cancel => {
                if state.pending.remove(failed_job_id).is_none() {
                    return Err(RecoveryError::NoPendingTrigger {
                        id: failed_job_id.to_string(),
                    });
                }
            }
            RecoveryCommand::Archive => {
                state.archive(failed_job_id, ArchiveReason::Archived);
            }
            RecoveryCommand::Reset => {
                if let Some(record) = state.active.get_mut(failed_job_id) {
                    record.failure_count = 0;
                    record.recovery_strategy = RecoveryStrategy::Retry;
                    record.is_recoverable = true;
                    record.is_permanent_failure = false;
                }
            }
        }
        drop(state);

        tracing::info!(
            failed_job_id = %failed_job_id,
            command = ?command,
            "failed job updated"
        );
        Ok(())
    }

    /// Count one successful execution toward the health population.
    pub async fn record_success(&self, processing_time: Option<Duration>) {
        let mut state = self.state.lock().await;
        state.counters.successes += 1;
        state.time_execution(processing_time);
    }

    /// Report how a resubmitted job ended. Success archives the record as recovered.
    pub async fn record_recovery_outcome(
        &self,
        failed_job_id: &str,
        success: bool,
        processing_time: Option<Duration>,
    ) -> Result<(), RecoveryError> {
        let mut state = self.state.lock().await;
        if !state.active.contains_key(failed_job_id) {
            return Err(state.missing(failed_job_id));
        }

        state.counters.recovery_attempts += 1;
        state.pending.remove(failed_job_id);
        if success {
            state.counters.recovered += 1;
            state.counters.successes += 1;
            state.time_execution(processing_time);
            state.archive(failed_job_id, ArchiveReason::Recovered);
        }
        drop(state);

        self.events.track_business_event(
            "manual_recovery_finished",
            json!({ "failed_job_id": failed_job_id, "success": success }),
        );
        Ok(())
    }

    /// Requests awaiting execution, oldest first.
    pub async fn pending_triggers(&self) -> Vec<ManualRecoveryRequest> {
        let state = self.state.lock().await;
        let mut pending: Vec<_> = state.pending.values().cloned().collect();
        pending.sort_by(|a, b| a.requested_at.cmp(&b.requested_at));
        pending
    }

    pub async fn archived_jobs(&self) -> Vec<ArchivedJob> {
        self.state.lock().await.archived.clone()
    }

    pub async fn get_queue_health(&self) -> QueueHealth {
        let counters = {
            let state = self.state.lock().await;
            let mut counters = state.counters.clone();
            counters.active_records = state.active.len();
            counters.pending_triggers = state.pending.len();
            counters.archived_records = state.archived.len();
            counters.retry_records = 0;
            counters.manual_records = 0;
            counters.dead_letter_records = 0;
            for record in state.active.values() {
                match record.recovery_strategy {
                    RecoveryStrategy::Retry => counters.retry_records += 1,
                    RecoveryStrategy::Manual => counters.manual_records += 1,
                    RecoveryStrategy::DeadLetter => counters.dead_letter_records += 1,
                }
            }
            counters
        };

        let health = QueueHealth::evaluate(counters, &self.thresholds);
        telemetry::set_queue_health(health.status.as_str(), health.status.level());
        health
    }
}
