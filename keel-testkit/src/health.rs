use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use keel::JobHealthService;
use parking_lot::Mutex;

/// How one collaborator call answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthResponse {
    Accept,
    Refuse,
    Fail(String),
}

impl HealthResponse {
    fn answer(&self) -> anyhow::Result<bool> {
        match self {
            HealthResponse::Accept => Ok(true),
            HealthResponse::Refuse => Ok(false),
            HealthResponse::Fail(message) => Err(anyhow::anyhow!(message.clone())),
        }
    }
}

/// Answers for the three collaborator methods.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthScript {
    pub graceful: HealthResponse,
    pub terminate: HealthResponse,
    pub restart: HealthResponse,
}

impl Default for HealthScript {
    fn default() -> Self {
        Self::graceful_ok()
    }
}

impl HealthScript {
    pub fn graceful_ok() -> Self {
        Self {
            graceful: HealthResponse::Accept,
            terminate: HealthResponse::Accept,
            restart: HealthResponse::Accept,
        }
    }

    /// Graceful restart refused, forced termination and resubmission succeed.
    pub fn needs_force() -> Self {
        Self {
            graceful: HealthResponse::Refuse,
            ..Self::graceful_ok()
        }
    }

    pub fn unresponsive() -> Self {
        Self {
            graceful: HealthResponse::Fail("health check timed out".into()),
            terminate: HealthResponse::Fail("process not reachable".into()),
            restart: HealthResponse::Refuse,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum HealthMethod {
    GracefulRestart,
    ForceTerminate,
    Restart,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCall {
    pub method: HealthMethod,
    pub job_id: String,
}

/// Scriptable [`JobHealthService`] recording every call.
#[derive(Clone, Default)]
pub struct MockJobHealthService {
    calls: Arc<Mutex<Vec<HealthCall>>>,
    default_script: Arc<Mutex<HealthScript>>,
    per_job: Arc<Mutex<HashMap<String, HealthScript>>>,
}

impl MockJobHealthService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(script: HealthScript) -> Self {
        let mock = Self::default();
        mock.set_script(script);
        mock
    }

    pub fn set_script(&self, script: HealthScript) {
        *self.default_script.lock() = script;
    }

    pub fn set_script_for(&self, job_id: impl Into<String>, script: HealthScript) {
        self.per_job.lock().insert(job_id.into(), script);
    }

    pub fn record(&self) -> Vec<HealthCall> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, method: HealthMethod) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.method == method)
            .count()
    }

    pub fn assert_call_count_eq(&self, method: HealthMethod, expected: usize) {
        let actual = self.calls_to(method);
        assert_eq!(
            actual, expected,
            "Expected {} {:?} calls, got {}",
            expected, method, actual
        );
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn respond(&self, method: HealthMethod, job_id: &str) -> anyhow::Result<bool> {
        self.calls.lock().push(HealthCall {
            method,
            job_id: job_id.to_string(),
        });
        let script = self
            .per_job
            .lock()
            .get(job_id)
            .cloned()
            .unwrap_or_else(|| self.default_script.lock().clone());
        match method {
            HealthMethod::GracefulRestart => script.graceful.answer(),
            HealthMethod::ForceTerminate => script.terminate.answer(),
            HealthMethod::Restart => script.restart.answer(),
        }
    }
}

#[async_trait]
impl JobHealthService for MockJobHealthService {
    async fn attempt_graceful_restart(&self, job_id: &str) -> anyhow::Result<bool> {
        self.respond(HealthMethod::GracefulRestart, job_id)
    }

    async fn force_terminate(&self, job_id: &str) -> anyhow::Result<bool> {
        self.respond(HealthMethod::ForceTerminate, job_id)
    }

    async fn restart(&self, job_id: &str) -> anyhow::Result<bool> {
        self.respond(HealthMethod::Restart, job_id)
    }
}
