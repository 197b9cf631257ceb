use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// Upper bound on `max_retries`; anything above it is a configuration mistake.
pub const MAX_RETRIES_LIMIT: u32 = 100;

/// Decides whether a failed attempt may be retried: `(error, attempt)`.
pub type RetryPredicate = Arc<dyn Fn(&anyhow::Error, u32) -> bool + Send + Sync>;

/// Observes each failed attempt: `(error, attempt)`.
pub type RetryCallback = Arc<dyn Fn(&anyhow::Error, u32) + Send + Sync>;

/// Validated retry configuration. Immutable once built.
///
/// Construct via [`RetryPolicy::builder`], [`RetryPolicy::from_config`] or one
/// of the presets. Every constructed policy is valid, so
/// [`RetryExecutor::execute`](crate::RetryExecutor::execute) never has to
/// reject one.
#[derive(Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    timeout: Option<Duration>,
    retry_predicate: Option<RetryPredicate>,
    on_retry: Option<RetryCallback>,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("timeout", &self.timeout)
            .field("has_retry_predicate", &self.retry_predicate.is_some())
            .field("has_on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            jitter: true,
            timeout: None,
            retry_predicate: None,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Build a policy from its serialisable form.
    pub fn from_config(config: &RetryPolicyConfig) -> Result<Self, PolicyError> {
        let mut builder = Self::builder()
            .max_retries(config.max_retries)
            .base_delay(Duration::from_millis(config.base_delay_ms))
            .max_delay(Duration::from_millis(config.max_delay_ms))
            .backoff_multiplier(config.backoff_multiplier)
            .jitter(config.jitter);
        if let Some(ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        builder.build()
    }

    /// Single product page: cheap to retry quickly.
    pub fn product_scraping() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
            jitter: true,
            timeout: Some(Duration::from_secs(30)),
            retry_predicate: None,
            on_retry: None,
        }
    }

    pub fn competitor_scraping() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_millis(8000),
            backoff_multiplier: 2.5,
            jitter: true,
            timeout: None,
            retry_predicate: None,
            on_retry: None,
        }
    }

    /// Multi-source collection pass: tolerates longer backoff.
    pub fn data_collection() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_millis(15_000),
            backoff_multiplier: 1.8,
            jitter: true,
            timeout: Some(Duration::from_secs(45)),
            retry_predicate: None,
            on_retry: None,
        }
    }

    /// Model invocation: slow calls, mostly rate limited when they fail.
    pub fn ai_generation() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_millis(20_000),
            backoff_multiplier: 2.0,
            jitter: true,
            timeout: Some(Duration::from_secs(120)),
            retry_predicate: None,
            on_retry: None,
        }
    }

    /// One attempt, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            jitter: false,
            ..Self::default()
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Configured base delay. Zero means "use the classified delay".
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter(&self) -> bool {
        self.jitter
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn retry_predicate(&self) -> Option<&RetryPredicate> {
        self.retry_predicate.as_ref()
    }

    pub(crate) fn on_retry(&self) -> Option<&RetryCallback> {
        self.on_retry.as_ref()
    }

    /// Derive a builder seeded with this policy, e.g. to attach callbacks to a preset.
    pub fn to_builder(&self) -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: self.clone(),
        }
    }

    pub fn to_config(&self) -> RetryPolicyConfig {
        RetryPolicyConfig {
            max_retries: self.max_retries,
            base_delay_ms: self.base_delay.as_millis() as u64,
            max_delay_ms: self.max_delay.as_millis() as u64,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            timeout_ms: self.timeout.map(|t| t.as_millis() as u64),
        }
    }
}

/// Builder for [`RetryPolicy`]; `build` validates.
#[derive(Clone, Debug, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.policy.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: bool) -> Self {
        self.policy.jitter = jitter;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = Some(timeout);
        self
    }

    pub fn no_timeout(mut self) -> Self {
        self.policy.timeout = None;
        self
    }

    pub fn retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&anyhow::Error, u32) -> bool + Send + Sync + 'static,
    {
        self.policy.retry_predicate = Some(Arc::new(predicate));
        self
    }

    pub fn on_retry<F>(mut self, callback: F) -> Self
    where
        F: Fn(&anyhow::Error, u32) + Send + Sync + 'static,
    {
        self.policy.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> Result<RetryPolicy, PolicyError> {
        let policy = self.policy;

        if policy.max_retries > MAX_RETRIES_LIMIT {
            return Err(PolicyError::TooManyRetries(policy.max_retries));
        }
        if !policy.backoff_multiplier.is_finite() || policy.backoff_multiplier < 1.0 {
            return Err(PolicyError::InvalidMultiplier(policy.backoff_multiplier));
        }
        if policy.max_delay < policy.base_delay {
            return Err(PolicyError::MaxDelayBelowBase {
                base_ms: policy.base_delay.as_millis() as u64,
                max_ms: policy.max_delay.as_millis() as u64,
            });
        }
        if policy.timeout == Some(Duration::ZERO) {
            return Err(PolicyError::ZeroTimeout);
        }

        Ok(policy)
    }
}

/// Serialisable form of a retry policy, used by [`ResilienceConfig`](crate::ResilienceConfig).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub timeout_ms: Option<u64>,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        RetryPolicy::default().to_config()
    }
}
