//! Operational surface of the notifier: Prometheus metrics and a small admin
//! API over the job scheduler, scan state and ledger.

mod http_layers;
pub mod metrics;
#[allow(clippy::module_inception)]
mod server;
pub mod state;

pub use http_layers::RequestsLoggingLevel;
pub use server::{make_app, run_server};
pub use state::ServerState;
