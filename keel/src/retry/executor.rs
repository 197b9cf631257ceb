use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::json;
use tokio::time::Instant;
use tracing::Instrument;

use crate::classify::{classify_anyhow, ErrorKind};
use crate::correlation::{CorrelationId, CorrelationIdGenerator, UuidCorrelationIds};
use crate::events::{EventSink, TracingEventSink};
use crate::retry::backoff::retry_delay;
use crate::retry::policy::RetryPolicy;
use crate::telemetry;

/// Caller-supplied description of the operation, for logs and metrics.
#[derive(Clone, Debug, Default)]
pub struct OperationContext {
    pub operation: String,
    pub correlation_id: Option<CorrelationId>,
    pub job_id: Option<String>,
}

impl OperationContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            correlation_id: None,
            job_id: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<CorrelationId>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

/// Everything known about one `execute` call once it has finished.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    /// Error of the final failed attempt, when `success` is false.
    pub error: Option<anyhow::Error>,
    /// Always within `1..=max_retries + 1`.
    pub attempts_used: u32,
    pub total_duration: Duration,
    /// One human-readable entry per failed attempt.
    pub retry_log: Vec<String>,
    /// Each inter-attempt sleep actually taken, in order.
    pub delays: Vec<Duration>,
    pub last_error_kind: Option<ErrorKind>,
    pub correlation_id: CorrelationId,
    pub used_fallback: bool,
}

impl<T> RetryOutcome<T> {
    /// Convert into a plain `Result`, discarding the bookkeeping.
    pub fn into_result(self) -> anyhow::Result<T> {
        match (self.value, self.error) {
            (Some(value), _) => Ok(value),
            (None, Some(error)) => Err(error),
            (None, None) => Err(anyhow!(
                "operation finished after {} attempts without a value",
                self.attempts_used
            )),
        }
    }
}

/// Error-classifying retry loop with backoff, jitter and per-attempt timeouts.
///
/// Holds no mutable state; any number of `execute` calls may run concurrently.
#[derive(Clone)]
pub struct RetryExecutor {
    events: Arc<dyn EventSink>,
    correlations: Arc<dyn CorrelationIdGenerator>,
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor").finish_non_exhaustive()
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(Arc::new(TracingEventSink), Arc::new(UuidCorrelationIds))
    }
}

impl RetryExecutor {
    pub fn new(
        events: Arc<dyn EventSink>,
        correlations: Arc<dyn CorrelationIdGenerator>,
    ) -> Self {
        Self {
            events,
            correlations,
        }
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// Never fails: every failure is reported inside the returned outcome.
    /// Each attempt is bounded by `policy.timeout()` when set; the loop as a
    /// whole is bounded by `policy.max_retries()`.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: F,
        policy: &RetryPolicy,
        context: OperationContext,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let correlation_id = context
            .correlation_id
            .clone()
            .unwrap_or_else(|| self.correlations.generate());
        let span = telemetry::retry_execute_span(&context.operation, correlation_id.as_str());

        self.run_attempts(operation, policy, &context, correlation_id)
            .instrument(span)
            .await
    }

    /// Like [`execute`](Self::execute), but runs `fallback` once if the
    /// primary operation ultimately fails.
    pub async fn execute_with_fallback<T, F, Fut, G, GFut>(
        &self,
        primary: F,
        fallback: G,
        policy: &RetryPolicy,
        context: OperationContext,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        G: FnOnce() -> GFut,
        GFut: Future<Output = anyhow::Result<T>>,
    {
        let mut outcome = self.execute(primary, policy, context.clone()).await;
        if outcome.success {
            return outcome;
        }

        let started = Instant::now();
        let result = run_with_timeout(fallback(), policy.timeout()).await;
        outcome.total_duration += started.elapsed();
        outcome.used_fallback = true;

        match result {
            Ok(value) => {
                outcome
                    .retry_log
                    .push("Fallback succeeded after primary failures".to_string());
                outcome.success = true;
                outcome.value = Some(value);
                outcome.error = None;
                telemetry::record_retry_outcome(&context.operation, "fallback", outcome.attempts_used);
                self.events.track_business_event(
                    "retry_fallback_used",
                    json!({
                        "operation": context.operation,
                        "correlation_id": outcome.correlation_id.as_str(),
                        "attempts": outcome.attempts_used,
                    }),
                );
            }
            Err(error) => {
                outcome
                    .retry_log
                    .push(format!("Fallback failed: {error:#}"));
                outcome.error = Some(error);
            }
        }

        outcome
    }

    async fn run_attempts<T, F, Fut>(
        &self,
        mut operation: F,
        policy: &RetryPolicy,
        context: &OperationContext,
        correlation_id: CorrelationId,
    ) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let started = Instant::now();
        let mut retry_log = Vec::new();
        let mut delays = Vec::new();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let error = match run_with_timeout(operation(), policy.timeout()).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "operation succeeded after retries");
                    }
                    telemetry::record_retry_outcome(&context.operation, "success", attempt);
                    return RetryOutcome {
                        success: true,
                        value: Some(value),
                        error: None,
                        attempts_used: attempt,
                        total_duration: started.elapsed(),
                        retry_log,
                        delays,
                        last_error_kind: None,
                        correlation_id,
                        used_fallback: false,
                    };
                }
                Err(error) => error,
            };

            let classified = classify_anyhow(&error);
            retry_log.push(format!(
                "Attempt {attempt} failed ({}): {}",
                classified.kind, classified.message
            ));
            telemetry::record_retry_attempt(&context.operation, attempt, classified.kind.as_str());

            if let Some(on_retry) = policy.on_retry() {
                on_retry(&error, attempt);
            }

            let allowed_by_predicate = policy
                .retry_predicate()
                .map_or(true, |predicate| predicate(&error, attempt));
            let will_retry =
                attempt <= policy.max_retries() && classified.retryable && allowed_by_predicate;

            if !will_retry {
                tracing::warn!(
                    attempt,
                    error_kind = %classified.kind,
                    retryable = classified.retryable,
                    "operation failed; giving up"
                );
                self.events.error(
                    "operation failed after retries",
                    json!({
                        "operation": context.operation,
                        "job_id": context.job_id,
                        "correlation_id": correlation_id.as_str(),
                        "attempts": attempt,
                        "error_kind": classified.kind.as_str(),
                        "error": classified.message,
                    }),
                );
                telemetry::record_retry_outcome(&context.operation, "exhausted", attempt);
                return RetryOutcome {
                    success: false,
                    value: None,
                    error: Some(error),
                    attempts_used: attempt,
                    total_duration: started.elapsed(),
                    retry_log,
                    delays,
                    last_error_kind: Some(classified.kind),
                    correlation_id,
                    used_fallback: false,
                };
            }

            // a zero base delay defers to the delay suggested for the error kind
            let base = if policy.base_delay().is_zero() {
                classified.suggested_delay
            } else {
                policy.base_delay()
            };
            let delay = retry_delay(
                attempt,
                base,
                policy.backoff_multiplier(),
                policy.max_delay(),
                policy.jitter(),
            );

            tracing::debug!(
                attempt,
                error_kind = %classified.kind,
                delay_ms = delay.as_millis() as u64,
                "retrying after delay"
            );
            self.events.warn(
                "attempt failed; retrying",
                json!({
                    "operation": context.operation,
                    "correlation_id": correlation_id.as_str(),
                    "attempt": attempt,
                    "error_kind": classified.kind.as_str(),
                    "delay_ms": delay.as_millis() as u64,
                }),
            );

            delays.push(delay);
            tokio::time::sleep(delay).await;
        }
    }
}

async fn run_with_timeout<T, Fut>(future: Fut, limit: Option<Duration>) -> anyhow::Result<T>
where
    Fut: Future<Output = anyhow::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, future).await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("Operation timed out after {}ms", limit.as_millis())),
        },
        None => future.await,
    }
}
