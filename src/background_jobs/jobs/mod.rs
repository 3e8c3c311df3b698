//! Concrete background jobs.

pub mod failure_log_cleanup;
pub mod newsletter;

pub use failure_log_cleanup::FailureLogCleanupJob;
pub use newsletter::NewsletterJob;
