use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobboard_notifier::background_jobs::jobs::{FailureLogCleanupJob, NewsletterJob};
use jobboard_notifier::background_jobs::{create_scheduler, JobContext};
use jobboard_notifier::board_store::SqliteBoardStore;
use jobboard_notifier::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_GRACE_WINDOW_SECS, DEFAULT_SCAN_INTERVAL_SECS,
};
use jobboard_notifier::dispatch::build_gateway;
use jobboard_notifier::ledger::{NotificationLedger, SqliteNotificationLedger};
use jobboard_notifier::newsletter::NewsletterScanner;
use jobboard_notifier::server::{metrics, run_server, RequestsLoggingLevel, ServerState};
use jobboard_notifier::server_store::{ServerStore, SqliteServerStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version, about = "Job board newsletter notifier")]
struct CliArgs {
    /// Directory holding board.db, ledger.db and server.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Path to a TOML config file. Values in the file override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Port for the admin API and Prometheus metrics. 0 disables it.
    #[clap(long, default_value_t = 9092)]
    pub admin_port: u16,

    /// Seconds between newsletter ticks.
    #[clap(long, default_value_t = DEFAULT_SCAN_INTERVAL_SECS)]
    pub scan_interval_secs: u64,

    /// How far before the scan cursor each tick looks back, in seconds.
    #[clap(long, default_value_t = DEFAULT_GRACE_WINDOW_SECS)]
    pub grace_window_secs: u64,

    /// The level of logging to perform on each admin request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Run a single tick, print its report as JSON and exit.
    #[clap(long)]
    pub run_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    info!(
        "jobboard-notifier {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH")
    );

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        admin_port: cli_args.admin_port,
        scan_interval_secs: cli_args.scan_interval_secs,
        grace_window_secs: cli_args.grace_window_secs,
    };
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!("Opening board database at {:?}", app_config.board_db_path());
    let board = Arc::new(SqliteBoardStore::new(app_config.board_db_path())?);
    info!("Opening ledger at {:?}", app_config.ledger_db_path());
    let ledger: Arc<dyn NotificationLedger> =
        Arc::new(SqliteNotificationLedger::new(app_config.ledger_db_path())?);
    let server_store: Arc<dyn ServerStore> =
        Arc::new(SqliteServerStore::new(app_config.server_db_path())?);

    let gateway = build_gateway(&app_config)?;
    info!("Dispatching notifications via {}", gateway.name());

    let scanner = Arc::new(NewsletterScanner::new(
        board.clone(),
        board,
        ledger.clone(),
        server_store.clone(),
        gateway,
        app_config.newsletter.clone(),
    ));

    let shutdown_token = CancellationToken::new();
    {
        let token = shutdown_token.clone();
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, initiating graceful shutdown");
            token.cancel();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    if cli_args.run_once {
        let result = tokio::select! {
            result = scanner.run_tick() => result,
            _ = shutdown_token.cancelled() => bail!("Interrupted before the tick committed"),
        };
        let report = result.context("Newsletter tick failed")?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let job_context = JobContext::new(
        shutdown_token.child_token(),
        server_store.clone(),
        ledger.clone(),
    );
    let (mut scheduler, scheduler_handle) =
        create_scheduler(server_store.clone(), shutdown_token.clone(), job_context);
    scheduler
        .register_job(Arc::new(NewsletterJob::new(
            scanner.clone(),
            &app_config.newsletter,
        )))
        .await;
    scheduler
        .register_job(Arc::new(FailureLogCleanupJob::from_settings(
            &app_config.newsletter,
        )))
        .await;

    let server_task = if app_config.admin_port != 0 {
        let mut state = ServerState::new(scheduler_handle, scanner, server_store, ledger);
        state.requests_logging_level = cli_args.logging_level;
        let port = app_config.admin_port;
        let token = shutdown_token.clone();
        Some(tokio::spawn(async move {
            let result = run_server(state, port, token.clone()).await;
            if let Err(e) = &result {
                error!("Admin server stopped: {:?}", e);
                token.cancel();
            }
            result
        }))
    } else {
        info!("Admin API disabled");
        None
    };

    info!(
        "Newsletter running every {:?} (grace window {:?})",
        app_config.newsletter.scan_interval, app_config.newsletter.grace_window
    );
    scheduler.run().await;
    info!("Scheduler stopped");

    if let Some(task) = server_task {
        shutdown_token.cancel();
        task.await.context("Admin server task panicked")??;
    }
    Ok(())
}
