use async_trait::async_trait;

/// Job-health collaborator used by the stuck-job recovery sequence.
///
/// Each method reports whether the request took effect. Errors are logged by
/// the monitor and treated as "did not take effect"; they never abort a scan.
#[async_trait]
pub trait JobHealthService: Send + Sync {
    /// Ask the job to restart cleanly.
    async fn attempt_graceful_restart(&self, job_id: &str) -> anyhow::Result<bool>;

    /// Terminate the job without its cooperation.
    async fn force_terminate(&self, job_id: &str) -> anyhow::Result<bool>;

    /// Resubmit the job after a forced termination.
    async fn restart(&self, job_id: &str) -> anyhow::Result<bool>;
}
