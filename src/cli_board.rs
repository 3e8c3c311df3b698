//! Operator CLI for the notifier databases.
//!
//! Seeds and edits the board (postings, subscribers), inspects the ledger and
//! the job audit log, and manages the scan cursor.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobboard_notifier::board_store::{
    JobPosting, PostingStatus, PostingStore, SqliteBoardStore, Subscriber, SubscriberStore,
    SubscriptionCriteria,
};
use jobboard_notifier::ledger::{NotificationLedger, SqliteNotificationLedger};
use jobboard_notifier::server_store::{ServerStore, SqliteServerStore};

fn get_styles() -> Styles {
    Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Expected an RFC 3339 timestamp, got {:?}", s))
}

#[derive(Parser, Debug)]
#[command(styles = get_styles(), version, about = "Manage job board notifier data")]
struct CliArgs {
    /// Directory holding board.db, ledger.db and server.db.
    #[clap(long, value_parser = parse_path)]
    db_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publishes a new open posting.
    AddPosting {
        id: String,
        title: String,
        #[clap(long, default_value = "")]
        description: String,
        #[clap(long)]
        category: Option<String>,
        #[clap(long)]
        location: Option<String>,
        #[clap(long)]
        job_type: Option<String>,
        #[clap(long)]
        company: Option<String>,
        #[clap(long)]
        salary: Option<u64>,
        /// Creation time in RFC 3339. Defaults to now.
        #[clap(long, value_parser = parse_timestamp)]
        created_at: Option<DateTime<Utc>>,
    },

    /// Closes a posting so it is no longer notified.
    ClosePosting { id: String },

    /// Lists postings created at or after the given time (all if omitted).
    Postings {
        #[clap(long, value_parser = parse_timestamp)]
        since: Option<DateTime<Utc>>,
    },

    /// Adds an active subscriber. Criteria are given as a JSON object, e.g.
    /// '{"categories":["eng"],"salary_min":90000}'.
    AddSubscriber {
        id: String,
        name: String,
        email: String,
        #[clap(long)]
        criteria: Option<String>,
    },

    /// Stops notifying a subscriber.
    DeactivateSubscriber { id: String },

    /// Lists active subscribers.
    Subscribers,

    /// Shows the most recent dispatch attempts.
    Ledger {
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },

    /// Shows every dispatch attempt for one (subscriber, posting) pair.
    Pair {
        subscriber_id: String,
        job_id: String,
    },

    /// Lists pairs whose dispatch failed and has not yet succeeded.
    Retries,

    /// Shows the scan cursor.
    Cursor,

    /// Clears the scan cursor so the next tick scans every posting.
    ResetCursor,

    /// Deletes failed dispatch records older than the given number of days.
    PurgeFailures {
        #[clap(long, default_value_t = 30)]
        older_than_days: u64,
    },

    /// Shows the job audit log, optionally for a single job.
    Audit {
        #[clap(long)]
        job: Option<String>,
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    if !args.db_dir.is_dir() {
        bail!("Database directory does not exist: {:?}", args.db_dir);
    }

    run(&args.db_dir, args.command)
}

fn run(db_dir: &std::path::Path, command: Command) -> Result<()> {
    match command {
        Command::AddPosting {
            id,
            title,
            description,
            category,
            location,
            job_type,
            company,
            salary,
            created_at,
        } => {
            let board = SqliteBoardStore::new(db_dir.join("board.db"))?;
            if board.get_posting(&id)?.is_some() {
                bail!("Posting {} already exists", id);
            }
            let posting = JobPosting {
                id,
                title,
                description,
                category,
                location,
                job_type,
                company_name: company,
                salary,
                status: PostingStatus::Open,
                created_at: created_at.unwrap_or_else(Utc::now),
            };
            board.insert_posting(&posting)?;
            println!("Added posting {}", posting.id);
        }
        Command::ClosePosting { id } => {
            let board = SqliteBoardStore::new(db_dir.join("board.db"))?;
            if !board.set_posting_status(&id, PostingStatus::Closed)? {
                bail!("No posting with id {}", id);
            }
            println!("Closed posting {}", id);
        }
        Command::Postings { since } => {
            let board = SqliteBoardStore::new(db_dir.join("board.db"))?;
            for posting in board.list_postings_since(since)? {
                println!(
                    "{}  {:<6}  {}  {}",
                    posting.created_at.to_rfc3339(),
                    posting.status.as_str(),
                    posting.id,
                    posting.title
                );
            }
        }
        Command::AddSubscriber {
            id,
            name,
            email,
            criteria,
        } => {
            let criteria = match criteria {
                Some(json) => serde_json::from_str::<SubscriptionCriteria>(&json)
                    .map_err(|e| anyhow!("Invalid criteria JSON: {}", e))?,
                None => SubscriptionCriteria::default(),
            };
            let board = SqliteBoardStore::new(db_dir.join("board.db"))?;
            if board.get_subscriber(&id)?.is_some() {
                bail!("Subscriber {} already exists", id);
            }
            board.insert_subscriber(&Subscriber {
                id: id.clone(),
                name,
                email,
                criteria,
                active: true,
            })?;
            println!("Added subscriber {}", id);
        }
        Command::DeactivateSubscriber { id } => {
            let board = SqliteBoardStore::new(db_dir.join("board.db"))?;
            if !board.set_subscriber_active(&id, false)? {
                bail!("No subscriber with id {}", id);
            }
            println!("Deactivated subscriber {}", id);
        }
        Command::Subscribers => {
            let board = SqliteBoardStore::new(db_dir.join("board.db"))?;
            for subscriber in board.list_active_subscribers()? {
                println!(
                    "{}  {} <{}>  {}",
                    subscriber.id,
                    subscriber.name,
                    subscriber.email,
                    serde_json::to_string(&subscriber.criteria)?
                );
            }
        }
        Command::Ledger { limit } => {
            let ledger = SqliteNotificationLedger::new(db_dir.join("ledger.db"))?;
            for record in ledger.recent_records(limit)? {
                println!(
                    "{}  {:<6}  {} -> {}{}",
                    record.dispatched_at.to_rfc3339(),
                    record.outcome.as_str(),
                    record.job_id,
                    record.subscriber_id,
                    record
                        .reason
                        .map(|r| format!("  ({})", r))
                        .unwrap_or_default()
                );
            }
        }
        Command::Pair {
            subscriber_id,
            job_id,
        } => {
            let ledger = SqliteNotificationLedger::new(db_dir.join("ledger.db"))?;
            let records = ledger.records_for_pair(&subscriber_id, &job_id)?;
            if records.is_empty() {
                println!("No dispatch attempts for {} / {}", subscriber_id, job_id);
            }
            for record in records {
                println!("{:#?}", record);
            }
        }
        Command::Retries => {
            let ledger = SqliteNotificationLedger::new(db_dir.join("ledger.db"))?;
            for (subscriber_id, job_id) in ledger.pending_retries()? {
                println!("{} -> {}", job_id, subscriber_id);
            }
        }
        Command::Cursor => {
            let server = SqliteServerStore::new(db_dir.join("server.db"))?;
            let cursor = server.load_scan_cursor()?;
            match cursor.last_scan_at {
                Some(ts) => println!(
                    "Last scan at {} (version {})",
                    ts.to_rfc3339(),
                    cursor.version
                ),
                None => println!("No scan has committed yet"),
            }
        }
        Command::ResetCursor => {
            let server = SqliteServerStore::new(db_dir.join("server.db"))?;
            server.reset_scan_cursor()?;
            println!("Scan cursor cleared");
        }
        Command::PurgeFailures { older_than_days } => {
            let ledger = SqliteNotificationLedger::new(db_dir.join("ledger.db"))?;
            let cutoff = i64::try_from(older_than_days)
                .ok()
                .and_then(chrono::Duration::try_days)
                .and_then(|age| Utc::now().checked_sub_signed(age))
                .ok_or_else(|| anyhow!("--older-than-days {} is out of range", older_than_days))?;
            let deleted = ledger.purge_failures_before(cutoff)?;
            println!("Deleted {} failed dispatch records", deleted);
        }
        Command::Audit { job, limit } => {
            let server = SqliteServerStore::new(db_dir.join("server.db"))?;
            let entries = match job {
                Some(job_id) => server.get_job_audit_log_by_job(&job_id, limit, 0)?,
                None => server.get_job_audit_log(limit, 0)?,
            };
            for entry in entries {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }
    Ok(())
}
