use super::context::JobContext;
use std::time::Duration;

/// Trigger label for runs started with the scheduler.
pub const STARTUP_TRIGGER: &str = "startup";

/// When a job runs: every `interval`, and optionally once as soon as the
/// scheduler starts, whatever the persisted next run time says.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    pub interval: Duration,
    pub on_startup: bool,
}

impl JobSchedule {
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            on_startup: false,
        }
    }

    pub fn with_startup_run(self) -> Self {
        Self {
            on_startup: true,
            ..self
        }
    }
}

#[derive(Debug)]
pub enum JobError {
    NotFound,
    AlreadyRunning,
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::AlreadyRunning => write!(f, "Job is already running"),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// A unit of periodic work.
///
/// `execute` runs on the blocking pool. Shutdown cancels `ctx`'s token and
/// waits a bounded time, so long-running jobs should poll
/// `ctx.is_cancelled()` and return `JobError::Cancelled`.
pub trait BackgroundJob: Send + Sync {
    /// Stable identifier, used in run history, metrics and the admin API.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    fn schedule(&self) -> JobSchedule;

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
