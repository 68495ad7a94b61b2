//! Job orchestration: the sequential pipeline that turns confirmed run
//! requests into outputs and reports.

pub mod estimate;
pub mod queue;
pub mod report;
pub mod request;
pub mod runner;
pub mod session;
pub mod tracker;

use serde::{Deserialize, Serialize};

pub use estimate::{dry_run, Estimate};
pub use queue::JobQueue;
pub use report::{RunReport, RunWarning, UnitReport, UnitStatus, WarningKind};
pub use request::{ComputeMode, OutputFormat, RunOptions, RunRequest, RunUnit};
pub use runner::{AdapterFactory, CommandAdapterFactory, JobRunner};
pub use session::{JobSnapshot, SessionStore};
pub use tracker::OutputTracker;

/// Job execution state. `Pending -> Running -> {Succeeded, Failed,
/// Cancelled}`; `Cancelled` is also reachable straight from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}
