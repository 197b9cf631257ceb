use serde::{Deserialize, Serialize};
use std::fmt::Display;
use uuid::Uuid;

/// Priority a re-queued job is submitted with.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum JobPriority {
    P0 = 0,
    P1 = 1,
    #[default]
    P2 = 2,
    P3 = 3,
}

impl JobPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::P0 => "P0",
            JobPriority::P1 => "P1",
            JobPriority::P2 => "P2",
            JobPriority::P3 => "P3",
        }
    }
}

impl Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier handed to the caller's scheduler for a resubmitted job.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
