//! Job board newsletter notifier
//!
//! This library exposes the internal modules for the binaries and for testing.

pub mod background_jobs;
pub mod board_store;
pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod matcher;
pub mod newsletter;
pub mod server;
pub mod server_store;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use board_store::{PostingStore, SqliteBoardStore, SubscriberStore};
pub use ledger::{NotificationLedger, SqliteNotificationLedger};
pub use newsletter::{NewsletterScanner, TickError, TickReport};
pub use server::{run_server, RequestsLoggingLevel};
pub use server_store::{ServerStore, SqliteServerStore};
