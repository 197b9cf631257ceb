use std::sync::atomic::{AtomicU64, Ordering};

use keel::{CorrelationId, CorrelationIdGenerator};

/// Deterministic correlation ids: `corr-1`, `corr-2`, ...
#[derive(Debug)]
pub struct SequentialCorrelationIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialCorrelationIds {
    pub fn new() -> Self {
        Self::with_prefix("corr")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }

    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::SeqCst) - 1
    }
}

impl Default for SequentialCorrelationIds {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrelationIdGenerator for SequentialCorrelationIds {
    fn generate(&self) -> CorrelationId {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        CorrelationId::new(format!("{}-{n}", self.prefix))
    }
}
