//! Error types raised by the resilience layer itself.
//!
//! Failures of the work being protected are never reported through these
//! types; they travel as data inside [`RetryOutcome`](crate::RetryOutcome),
//! [`RecoveryReport`](crate::RecoveryReport) and friends.

use thiserror::Error;

/// A retry policy that cannot be executed.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("backoff multiplier must be a finite value >= 1.0 (got {0})")]
    InvalidMultiplier(f64),

    #[error("max delay ({max_ms}ms) is smaller than base delay ({base_ms}ms)")]
    MaxDelayBelowBase { base_ms: u64, max_ms: u64 },

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("max retries {0} exceeds the supported limit of {limit}", limit = crate::retry::MAX_RETRIES_LIMIT)]
    TooManyRetries(u32),
}

/// Rejections from [`FailedJobRecoveryStore`](crate::FailedJobRecoveryStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    #[error("failed job {id} not found")]
    NotFound { id: String },

    #[error("failed job {id} is marked as a permanent failure; pass bypass_checks to re-queue it")]
    PermanentFailure { id: String },

    #[error("failed job {id} is archived")]
    Archived { id: String },

    #[error("failed job {id} has no pending manual recovery")]
    NoPendingTrigger { id: String },
}

/// Errors while loading [`ResilienceConfig`](crate::ResilienceConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },

    #[error(transparent)]
    Policy(#[from] PolicyError),
}
