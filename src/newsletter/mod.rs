//! The newsletter tick: scan postings, match them against subscribers and
//! notify each matching pair at most once.

mod report;
mod scanner;

pub use report::{ScanState, TickError, TickReport};
pub use scanner::{NewsletterScanner, SCAN_LEASE_NAME};
