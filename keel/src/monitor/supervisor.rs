use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use crate::config::MonitorOptions;
use crate::correlation::{CorrelationCache, CorrelationId};
use crate::events::{EventSink, TracingEventSink};
use crate::monitor::health::JobHealthService;
use crate::monitor::tracked::{RecoveryAction, RunningJobStatus, TrackedJob};
use crate::shutdown::ShutdownToken;
use crate::telemetry;

const STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Cumulative monitor counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub scans_completed: u64,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub stuck_detected: u64,
    pub restarted: u64,
    pub killed: u64,
    pub ignored: u64,
    /// Background ticks dropped because a scan or recovery was still running.
    pub skipped_ticks: u64,
}

/// Snapshot returned by [`StuckJobMonitor::get_monitoring_status`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoringStatus {
    pub is_running: bool,
    pub options: MonitorOptions,
    pub tracked_jobs: usize,
    pub stuck_jobs: usize,
    pub recovering_jobs: usize,
    pub stats: MonitorStats,
}

/// Result of one recovery sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobRecoveryResult {
    pub job_id: String,
    pub correlation_id: CorrelationId,
    pub action: RecoveryAction,
    pub duration: Duration,
    /// Whether the job was resubmitted after a forced termination.
    pub resubmitted: bool,
    pub errors: Vec<String>,
}

/// Result of one check cycle: detection plus automatic recovery.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub newly_stuck: Vec<String>,
    pub recoveries: Vec<JobRecoveryResult>,
}

#[derive(Clone, Debug, Default)]
pub struct RecoverAllOptions {
    /// Overrides the configured force-kill timeout for this invocation.
    pub force_kill_timeout: Option<Duration>,
    /// Also retry jobs whose earlier recovery ended as `ignored`.
    pub retry_ignored: bool,
}

/// Aggregate result of [`StuckJobMonitor::recover_all_stuck_jobs`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub total_stuck: usize,
    pub restarted: usize,
    pub killed: usize,
    pub ignored: usize,
    pub results: Vec<JobRecoveryResult>,
    pub errors: Vec<String>,
    pub duration: Duration,
}

struct MonitorState {
    jobs: HashMap<String, TrackedJob>,
    options: MonitorOptions,
    stats: MonitorStats,
    next_generation: u64,
}

/// A stuck job handed to the recovery sequence.
struct RecoveryClaim {
    job_id: String,
    generation: u64,
    execution_time: Duration,
    correlation_id: CorrelationId,
}

#[derive(Default)]
struct LoopControl {
    token: Option<ShutdownToken>,
    handle: Option<JoinHandle<()>>,
}

impl LoopControl {
    fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

struct MonitorInner {
    state: Mutex<MonitorState>,
    // serializes scans and recovery passes; the loop skips ticks while held
    scan_lock: Mutex<()>,
    control: Mutex<LoopControl>,
    health: Arc<dyn JobHealthService>,
    events: Arc<dyn EventSink>,
    correlations: CorrelationCache,
}

/// Tracks in-flight jobs and recovers the ones that stop making progress.
///
/// Cloning is cheap; clones share the same table and background loop.
#[derive(Clone)]
pub struct StuckJobMonitor {
    inner: Arc<MonitorInner>,
}

impl fmt::Debug for StuckJobMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self
            .inner
            .state
            .try_lock()
            .map(|state| state.jobs.len())
            .unwrap_or_default();
        let running = self
            .inner
            .control
            .try_lock()
            .map(|control| control.is_running())
            .unwrap_or_default();

        f.debug_struct("StuckJobMonitor")
            .field("tracked_jobs", &tracked)
            .field("running", &running)
            .field("correlations", &self.inner.correlations)
            .finish()
    }
}

impl StuckJobMonitor {
    pub fn new(
        health: Arc<dyn JobHealthService>,
        events: Arc<dyn EventSink>,
        correlations: CorrelationCache,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                state: Mutex::new(MonitorState {
                    jobs: HashMap::new(),
                    options: MonitorOptions::default(),
                    stats: MonitorStats::default(),
                    next_generation: 0,
                }),
                scan_lock: Mutex::new(()),
                control: Mutex::new(LoopControl::default()),
                health,
                events,
                correlations,
            }),
        }
    }

    /// Monitor with tracing-backed events and UUID correlation ids.
    pub fn with_health_service(health: Arc<dyn JobHealthService>) -> Self {
        Self::new(
            health,
            Arc::new(TracingEventSink),
            CorrelationCache::default(),
        )
    }

    pub fn correlations(&self) -> CorrelationCache {
        self.inner.correlations.clone()
    }

    /// Replace the options without starting the background loop.
    pub async fn configure(&self, options: MonitorOptions) {
        self.inner.state.lock().await.options = options;
    }

    /// Start periodic scans. Returns false, with a warning, if already running.
    pub async fn start_monitoring(&self, options: MonitorOptions) -> bool {
        let mut control = self.inner.control.lock().await;
        if control.is_running() {
            tracing::warn!("stuck-job monitor already running; start request ignored");
            return false;
        }

        let period = options.check_interval();
        tracing::info!(
            check_interval_ms = period.as_millis() as u64,
            max_execution_time_ms = options.max_execution_time_ms,
            stuck_threshold = options.stuck_threshold(),
            auto_recovery = options.enable_auto_recovery,
            "starting stuck-job monitor"
        );
        self.inner.state.lock().await.options = options;

        let token = ShutdownToken::new();
        let loop_token = token.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.scan_loop(period, loop_token).await;
        });

        control.token = Some(token);
        control.handle = Some(handle);
        true
    }

    /// Stop the background loop. An in-flight scan may finish; no new scan starts.
    ///
    /// Returns false if the monitor was not running.
    pub async fn stop_monitoring(&self) -> bool {
        let (token, handle) = {
            let mut control = self.inner.control.lock().await;
            (control.token.take(), control.handle.take())
        };
        let Some(token) = token else {
            tracing::debug!("stuck-job monitor not running; stop request ignored");
            return false;
        };

        token.cancel();
        if let Some(handle) = handle {
            match tokio::time::timeout(STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("stuck-job monitor task failed: {:?}", e),
                Err(_) => tracing::warn!("stuck-job monitor task timed out during shutdown"),
            }
        }

        tracing::info!("stuck-job monitor stopped");
        true
    }

    /// Track a job. Re-registering an id replaces its entry.
    pub async fn register_job_start(
        &self,
        job_id: impl Into<String>,
        correlation_key: Option<String>,
    ) -> CorrelationId {
        let job_id = job_id.into();

        // correlation entries of tracked jobs only change under the state lock
        let (correlation_id, tracked) = {
            let mut state = self.inner.state.lock().await;
            let correlation_id = self.inner.correlations.fetch_or_generate(&job_id).await;
            state.next_generation += 1;
            let mut job = TrackedJob::new(job_id.clone(), correlation_key, Utc::now());
            job.generation = state.next_generation;
            state.jobs.insert(job_id.clone(), job);
            (correlation_id, state.jobs.len())
        };
        telemetry::set_tracked_jobs(tracked);
        tracing::debug!(
            job_id = %job_id,
            correlation_id = %correlation_id,
            "job registered with stuck-job monitor"
        );
        correlation_id
    }

    /// Returns false for unknown jobs.
    pub async fn register_job_heartbeat(&self, job_id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        match state.jobs.get_mut(job_id) {
            Some(job) => {
                job.heartbeat(Utc::now());
                true
            }
            None => {
                tracing::debug!(job_id = %job_id, "heartbeat for untracked job");
                false
            }
        }
    }

    /// Stop tracking a job. Returns false for unknown jobs.
    pub async fn register_job_completion(&self, job_id: &str, success: bool) -> bool {
        let (job, correlation_id, tracked) = {
            let mut state = self.inner.state.lock().await;
            let Some(job) = state.jobs.remove(job_id) else {
                return false;
            };
            let correlation_id = self.inner.correlations.take_or_generate(job_id).await;
            (job, correlation_id, state.jobs.len())
        };

        telemetry::set_tracked_jobs(tracked);
        tracing::debug!(
            job_id = %job_id,
            correlation_id = %correlation_id,
            success = success,
            "job completed"
        );
        if job.is_stuck {
            self.inner.events.info(
                "stuck job completed on its own",
                json!({ "job_id": job_id, "success": success }),
            );
        }
        true
    }

    /// Run one detection pass without recovering anything. Returns newly stuck ids.
    pub async fn scan_now(&self) -> Vec<String> {
        let _guard = self.inner.scan_lock.lock().await;
        self.inner.scan().await.0
    }

    /// Run one scan followed by automatic recovery when it is enabled.
    pub async fn run_check_cycle(&self) -> ScanSummary {
        let _guard = self.inner.scan_lock.lock().await;
        self.inner.check_cycle().await
    }

    /// Scan immediately, then recover every currently stuck job.
    pub async fn recover_all_stuck_jobs(&self, options: RecoverAllOptions) -> RecoveryReport {
        let started = Instant::now();
        let _guard = self.inner.scan_lock.lock().await;

        let (_, monitor_options) = self.inner.scan().await;
        let force_kill_timeout = options
            .force_kill_timeout
            .unwrap_or_else(|| monitor_options.force_kill_timeout());
        let retry_ignored = options.retry_ignored;

        let claims = self
            .inner
            .claim_for_recovery(None, |job| match job.recovery_action {
                RecoveryAction::None => true,
                RecoveryAction::Ignored => retry_ignored,
                _ => false,
            })
            .await;
        let results = self.inner.recover_jobs(claims, force_kill_timeout).await;

        let mut report = RecoveryReport {
            total_stuck: results.len(),
            ..Default::default()
        };
        for result in &results {
            match result.action {
                RecoveryAction::Restarted => report.restarted += 1,
                RecoveryAction::Killed => report.killed += 1,
                RecoveryAction::Ignored => report.ignored += 1,
                RecoveryAction::None => {}
            }
            report
                .errors
                .extend(result.errors.iter().map(|e| format!("{}: {e}", result.job_id)));
        }
        report.results = results;
        report.duration = started.elapsed();

        tracing::info!(
            total_stuck = report.total_stuck,
            restarted = report.restarted,
            killed = report.killed,
            ignored = report.ignored,
            duration_ms = report.duration.as_millis() as u64,
            "recover-all finished"
        );
        report
    }

    /// Snapshot of every tracked job, oldest first.
    pub async fn get_running_jobs_status(&self) -> Vec<RunningJobStatus> {
        let now = Utc::now();
        let state = self.inner.state.lock().await;
        let mut jobs: Vec<_> = state.jobs.values().map(|job| job.status(now)).collect();
        jobs.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    pub async fn get_monitoring_status(&self) -> MonitoringStatus {
        let is_running = self.inner.control.lock().await.is_running();
        let state = self.inner.state.lock().await;
        MonitoringStatus {
            is_running,
            options: state.options.clone(),
            tracked_jobs: state.jobs.len(),
            stuck_jobs: state.jobs.values().filter(|job| job.is_stuck).count(),
            recovering_jobs: state.jobs.values().filter(|job| job.recovering).count(),
            stats: state.stats.clone(),
        }
    }
}

impl MonitorInner {
    async fn scan_loop(self: Arc<Self>, period: Duration, token: ShutdownToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::info!("stuck-job monitor loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if token.is_cancelled() {
                        break;
                    }
                    let Ok(_guard) = self.scan_lock.try_lock() else {
                        self.state.lock().await.stats.skipped_ticks += 1;
                        tracing::debug!("previous check cycle still running; tick skipped");
                        continue;
                    };
                    self.check_cycle().await;
                }
            }
        }
    }

    /// Caller holds `scan_lock`.
    async fn check_cycle(self: &Arc<Self>) -> ScanSummary {
        let (newly_stuck, options) = self.scan().await;
        if newly_stuck.is_empty() || !options.enable_auto_recovery {
            return ScanSummary {
                newly_stuck,
                recoveries: Vec::new(),
            };
        }

        let claims = self
            .claim_for_recovery(Some(&newly_stuck), |job| {
                job.recovery_action == RecoveryAction::None
            })
            .await;
        let recoveries = self
            .recover_jobs(claims, options.force_kill_timeout())
            .await;
        ScanSummary {
            newly_stuck,
            recoveries,
        }
    }

    /// Caller holds `scan_lock`.
    async fn scan(&self) -> (Vec<String>, MonitorOptions) {
        let (newly_stuck, options, tracked) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let now = Utc::now();
            let options = state.options.clone();
            let span = telemetry::monitor_scan_span(state.jobs.len());

            let mut flagged = span.in_scope(|| {
                let mut flagged = Vec::new();
                for job in state.jobs.values_mut() {
                    if job.recovering {
                        continue;
                    }
                    if job.observe_scan(now, &options) {
                        telemetry::record_stuck_job(&job.job_id, job.missed_checks);
                        flagged.push((job.job_id.clone(), job.missed_checks));
                    }
                }
                flagged
            });
            flagged.sort();

            state.stats.scans_completed += 1;
            state.stats.last_scan_at = Some(now);
            state.stats.stuck_detected += flagged.len() as u64;
            (flagged, options, state.jobs.len())
        };

        telemetry::set_tracked_jobs(tracked);
        for (job_id, missed_checks) in &newly_stuck {
            self.events.warn(
                "job flagged as stuck",
                json!({
                    "job_id": job_id,
                    "missed_checks": missed_checks,
                    "auto_recovery": options.enable_auto_recovery,
                }),
            );
        }
        let newly_stuck: Vec<String> = newly_stuck
            .into_iter()
            .map(|(job_id, _)| job_id)
            .collect();
        (newly_stuck, options)
    }

    /// Mark matching stuck jobs as recovering so no job is recovered twice.
    ///
    /// Stuck jobs that heartbeated after being flagged are skipped.
    async fn claim_for_recovery<F>(
        &self,
        only: Option<&[String]>,
        eligible: F,
    ) -> Vec<RecoveryClaim>
    where
        F: Fn(&TrackedJob) -> bool,
    {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();
        for job in state.jobs.values_mut() {
            if !job.is_stuck || job.recovering || !eligible(&*job) {
                continue;
            }
            if !only.map_or(true, |ids| ids.contains(&job.job_id)) {
                continue;
            }
            if job.heartbeat_after_flag() {
                tracing::debug!(
                    job_id = %job.job_id,
                    "stuck job heartbeated since it was flagged; recovery skipped"
                );
                continue;
            }
            job.recovering = true;
            claimed.push((job.job_id.clone(), job.generation, job.execution_time(now)));
        }

        let mut claims = Vec::with_capacity(claimed.len());
        for (job_id, generation, execution_time) in claimed {
            let correlation_id = self.correlations.fetch_or_generate(&job_id).await;
            claims.push(RecoveryClaim {
                job_id,
                generation,
                execution_time,
                correlation_id,
            });
        }
        drop(state);

        claims.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        claims
    }

    async fn recover_jobs(
        self: &Arc<Self>,
        claims: Vec<RecoveryClaim>,
        force_kill_timeout: Duration,
    ) -> Vec<JobRecoveryResult> {
        let mut set = JoinSet::new();
        for claim in claims {
            let inner = Arc::clone(self);
            set.spawn(async move { inner.recover_job(claim, force_kill_timeout).await });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => tracing::error!(error = %err, "recovery task failed"),
            }
        }
        results.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        results
    }

    async fn recover_job(
        &self,
        claim: RecoveryClaim,
        force_kill_timeout: Duration,
    ) -> JobRecoveryResult {
        let RecoveryClaim {
            job_id,
            generation,
            execution_time,
            correlation_id,
        } = claim;
        let span = telemetry::job_recovery_span(&job_id, correlation_id.as_str());

        async move {
            let started = Instant::now();
            let mut errors = Vec::new();
            let mut resubmitted = false;

            let graceful = self.health.attempt_graceful_restart(&job_id).await;
            let action = match graceful {
                Ok(true) => {
                    self.release_tracking(&job_id, generation).await;
                    RecoveryAction::Restarted
                }
                other => {
                    match other {
                        Err(err) => {
                            tracing::warn!(job_id = %job_id, error = %format!("{err:#}"), "graceful restart failed");
                            errors.push(format!("graceful restart failed: {err:#}"));
                        }
                        _ => errors.push("graceful restart was not accepted".to_string()),
                    }

                    if execution_time > force_kill_timeout {
                        match self.health.force_terminate(&job_id).await {
                            Ok(true) => {
                                // a resubmitted job registers itself again
                                self.release_tracking(&job_id, generation).await;
                                match self.health.restart(&job_id).await {
                                    Ok(true) => resubmitted = true,
                                    Ok(false) => {
                                        errors.push("resubmission was not accepted".to_string())
                                    }
                                    Err(err) => {
                                        tracing::warn!(job_id = %job_id, error = %format!("{err:#}"), "resubmission failed");
                                        errors.push(format!("resubmission failed: {err:#}"));
                                    }
                                }
                                RecoveryAction::Killed
                            }
                            Ok(false) => {
                                errors.push("forced termination was not accepted".to_string());
                                RecoveryAction::Ignored
                            }
                            Err(err) => {
                                errors.push(format!("forced termination failed: {err:#}"));
                                RecoveryAction::Ignored
                            }
                        }
                    } else {
                        RecoveryAction::Ignored
                    }
                }
            };

            self.finish_recovery(&job_id, generation, action).await;

            let duration = started.elapsed();
            telemetry::record_recovery_action(&job_id, action.as_str());
            if action == RecoveryAction::Ignored {
                self.events.error(
                    "stuck job requires manual intervention",
                    json!({
                        "job_id": job_id,
                        "correlation_id": correlation_id.as_str(),
                        "execution_time_ms": execution_time.as_millis() as u64,
                        "errors": errors,
                    }),
                );
            }
            self.events.track_business_event(
                "stuck_job_recovery",
                json!({
                    "job_id": job_id,
                    "action": action.as_str(),
                    "resubmitted": resubmitted,
                    "duration_ms": duration.as_millis() as u64,
                }),
            );

            JobRecoveryResult {
                job_id,
                correlation_id,
                action,
                duration,
                resubmitted,
                errors,
            }
        }
        .instrument(span)
        .await
    }

    /// Drop the claimed entry and its correlation id. An entry registered
    /// again since the claim belongs to the new run and is kept.
    async fn release_tracking(&self, job_id: &str, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        let claimed = state
            .jobs
            .get(job_id)
            .is_some_and(|job| job.generation == generation);
        if claimed {
            state.jobs.remove(job_id);
            self.correlations.take_or_generate(job_id).await;
        }
        let tracked = state.jobs.len();
        drop(state);

        telemetry::set_tracked_jobs(tracked);
        claimed
    }

    async fn finish_recovery(&self, job_id: &str, generation: u64, action: RecoveryAction) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if action == RecoveryAction::Ignored {
            match state.jobs.get_mut(job_id) {
                Some(job) if job.generation == generation => {
                    job.recovery_action = action;
                    job.recovering = false;
                }
                _ => tracing::debug!(job_id = %job_id, "ignored job left the table during recovery"),
            }
        }
        match action {
            RecoveryAction::Restarted => state.stats.restarted += 1,
            RecoveryAction::Killed => state.stats.killed += 1,
            RecoveryAction::Ignored => state.stats.ignored += 1,
            RecoveryAction::None => {}
        }
    }
}
