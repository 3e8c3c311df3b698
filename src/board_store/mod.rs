//! Postings and subscribers: the job-board data the notifier reads.

mod models;
mod schema;
mod store;
mod trait_def;

pub use models::{JobPosting, PostingStatus, Subscriber, SubscriptionCriteria};
pub use schema::BOARD_VERSIONED_SCHEMAS;
pub use store::SqliteBoardStore;
pub use trait_def::{PostingStore, SubscriberStore};
