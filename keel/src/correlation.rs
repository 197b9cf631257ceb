use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Opaque identifier grouping the log and metric entries of one operation.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl From<&str> for CorrelationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Source of fresh correlation ids. Purely diagnostic.
pub trait CorrelationIdGenerator: Send + Sync {
    fn generate(&self) -> CorrelationId;
}

/// Generates UUIDv7 correlation ids, so they sort by creation time.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidCorrelationIds;

impl CorrelationIdGenerator for UuidCorrelationIds {
    fn generate(&self) -> CorrelationId {
        CorrelationId::from(Uuid::now_v7())
    }
}

/// Maps tracked job ids to the correlation id their logs are grouped under.
///
/// Thread-safe via `tokio::sync::Mutex`.
#[derive(Clone)]
pub struct CorrelationCache {
    inner: Arc<Mutex<HashMap<String, CorrelationId>>>,
    generator: Arc<dyn CorrelationIdGenerator>,
}

impl std::fmt::Debug for CorrelationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut debug = f.debug_struct("CorrelationCache");
        match self.inner.try_lock() {
            Ok(guard) => debug.field("entries", &guard.len()),
            Err(_) => debug.field("entries", &"<locked>"),
        };
        debug.finish_non_exhaustive()
    }
}

impl Default for CorrelationCache {
    fn default() -> Self {
        Self::new(Arc::new(UuidCorrelationIds))
    }
}

impl CorrelationCache {
    pub fn new(generator: Arc<dyn CorrelationIdGenerator>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            generator,
        }
    }

    pub fn generator(&self) -> Arc<dyn CorrelationIdGenerator> {
        Arc::clone(&self.generator)
    }

    /// Store a mapping, overwriting any existing one.
    pub async fn remember(&self, job_id: &str, correlation_id: CorrelationId) {
        let mut guard = self.inner.lock().await;
        guard.insert(job_id.to_string(), correlation_id);
    }

    pub async fn fetch(&self, job_id: &str) -> Option<CorrelationId> {
        let guard = self.inner.lock().await;
        guard.get(job_id).cloned()
    }

    /// Fetch the existing correlation id or generate and store a new one.
    pub async fn fetch_or_generate(&self, job_id: &str) -> CorrelationId {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.get(job_id) {
            return existing.clone();
        }

        let fresh = self.generator.generate();
        debug!(job_id = %job_id, correlation_id = %fresh, "missing correlation id; generating new one");
        guard.insert(job_id.to_string(), fresh.clone());
        fresh
    }

    /// Remove the mapping for a job, generating an id if none existed so
    /// cleanup logging always has one.
    pub async fn take_or_generate(&self, job_id: &str) -> CorrelationId {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.remove(job_id) {
            return existing;
        }

        let fresh = self.generator.generate();
        warn!(job_id = %job_id, "missing correlation id during cleanup; generating new one");
        fresh
    }

    pub async fn contains(&self, job_id: &str) -> bool {
        let guard = self.inner.lock().await;
        guard.contains_key(job_id)
    }
}
