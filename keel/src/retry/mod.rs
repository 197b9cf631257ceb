/// Exponential backoff and jitter.
pub mod backoff;
/// The attempt loop.
pub mod executor;
/// Validated policies and presets.
pub mod policy;

pub use backoff::{apply_jitter, compute_backoff_delay, retry_delay, JITTER_RATIO};
pub use executor::{OperationContext, RetryExecutor, RetryOutcome};
pub use policy::{
    RetryCallback, RetryPolicy, RetryPolicyBuilder, RetryPolicyConfig, RetryPredicate,
    MAX_RETRIES_LIMIT,
};
