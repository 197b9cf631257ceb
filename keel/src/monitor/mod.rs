/// Job-health collaborator trait.
pub mod health;
/// Stuck-job monitor: scan loop and recovery sequence.
pub mod supervisor;
/// Tracked job state and status snapshots.
pub mod tracked;

pub use health::JobHealthService;
pub use supervisor::{
    JobRecoveryResult, MonitorStats, MonitoringStatus, RecoverAllOptions, RecoveryReport, ScanSummary,
    StuckJobMonitor,
};
pub use tracked::{RecoveryAction, RunningJobStatus, TrackedJob};
