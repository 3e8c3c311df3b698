//! Background job scheduling and execution.
//!
//! Runs the newsletter tick on its interval and at startup, plus periodic
//! retention cleanup. Run history and audit entries go to the server store.

mod audit_logger;
mod context;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use audit_logger::JobAuditLogger;
pub use context::JobContext;
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use job::{BackgroundJob, JobError, JobSchedule, STARTUP_TRIGGER};
pub use scheduler::{create_scheduler, JobScheduler};
