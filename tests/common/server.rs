//! Test instance lifecycle management
//!
//! Each test gets an isolated notifier: its own temp databases, a seeded
//! board, a running job scheduler and the admin API on a random port.

use super::constants::*;
use super::fixtures::{seed_board, RecordingGateway};
use jobboard_notifier::background_jobs::jobs::{FailureLogCleanupJob, NewsletterJob};
use jobboard_notifier::background_jobs::{create_scheduler, JobContext, SchedulerHandle};
use jobboard_notifier::board_store::SqliteBoardStore;
use jobboard_notifier::config::NewsletterSettings;
use jobboard_notifier::ledger::{NotificationLedger, SqliteNotificationLedger};
use jobboard_notifier::newsletter::NewsletterScanner;
use jobboard_notifier::server::{make_app, metrics, RequestsLoggingLevel, ServerState};
use jobboard_notifier::server_store::{ServerStore, SqliteServerStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Running notifier with isolated databases.
///
/// When dropped, the scheduler and admin server shut down and temp resources
/// are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// Direct store access for tests
    pub board: Arc<SqliteBoardStore>,
    pub ledger: Arc<SqliteNotificationLedger>,
    pub server_store: Arc<SqliteServerStore>,
    pub gateway: Arc<RecordingGateway>,
    pub scheduler: SchedulerHandle,

    shutdown: CancellationToken,
    _temp_db_dir: TempDir,
}

impl TestServer {
    /// Spawns a notifier whose gateway accepts every address.
    pub async fn spawn() -> Self {
        Self::spawn_with_gateway(Arc::new(RecordingGateway::default())).await
    }

    /// Spawns a notifier using `gateway`. The startup tick begins right away,
    /// so configure the gateway before calling this.
    ///
    /// # Panics
    ///
    /// Panics if any store cannot be created or the server doesn't become
    /// ready within the timeout.
    pub async fn spawn_with_gateway(gateway: Arc<RecordingGateway>) -> Self {
        metrics::init_metrics();

        let temp_db_dir = TempDir::new().expect("Failed to create temp dir");
        let board = Arc::new(
            SqliteBoardStore::new(temp_db_dir.path().join("board.db"))
                .expect("Failed to open board store"),
        );
        seed_board(&board).expect("Failed to seed board");
        let ledger = Arc::new(
            SqliteNotificationLedger::new(temp_db_dir.path().join("ledger.db"))
                .expect("Failed to open ledger"),
        );
        let server_store = Arc::new(
            SqliteServerStore::new(temp_db_dir.path().join("server.db"))
                .expect("Failed to create server store"),
        );

        let settings = NewsletterSettings {
            scan_interval: Duration::from_secs(TEST_SCAN_INTERVAL_SECS),
            ..NewsletterSettings::default()
        };
        let scanner = Arc::new(NewsletterScanner::new(
            board.clone(),
            board.clone(),
            ledger.clone(),
            server_store.clone(),
            gateway.clone(),
            settings.clone(),
        ));

        let shutdown = CancellationToken::new();
        let job_context = JobContext::new(
            shutdown.child_token(),
            server_store.clone(),
            ledger.clone() as Arc<dyn NotificationLedger>,
        );
        let (mut scheduler, scheduler_handle) = create_scheduler(
            server_store.clone() as Arc<dyn ServerStore>,
            shutdown.clone(),
            job_context,
        );
        scheduler
            .register_job(Arc::new(NewsletterJob::new(scanner.clone(), &settings)))
            .await;
        scheduler
            .register_job(Arc::new(FailureLogCleanupJob::from_settings(&settings)))
            .await;
        tokio::spawn(async move { scheduler.run().await });

        let mut state = ServerState::new(
            scheduler_handle.clone(),
            scanner,
            server_store.clone(),
            ledger.clone(),
        );
        state.requests_logging_level = RequestsLoggingLevel::None;
        let app = make_app(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url: format!("http://127.0.0.1:{}", port),
            board,
            ledger,
            server_store,
            gateway,
            scheduler: scheduler_handle,
            shutdown,
            _temp_db_dir: temp_db_dir,
        };
        server.wait_for_ready().await;
        server
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);
        while start.elapsed() < timeout {
            if let Ok(response) = client.get(&self.base_url).send().await {
                if response.status().is_success() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
        panic!("Server did not become ready within {:?}", timeout);
    }

    /// Waits until `job_id` has at least `runs` finished runs and is idle.
    pub async fn wait_for_finished_runs(&self, job_id: &str, runs: usize) {
        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(TICK_WAIT_TIMEOUT_MS);
        while start.elapsed() < timeout {
            let finished = self
                .server_store
                .get_job_history(job_id, 100)
                .expect("Failed to read job history")
                .iter()
                .filter(|run| run.finished_at.is_some())
                .count();
            if finished >= runs && !self.scheduler.is_job_running(job_id).await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }
        panic!(
            "Job {} did not finish {} runs within {:?}",
            job_id, runs, timeout
        );
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
