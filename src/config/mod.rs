mod file_config;

pub use file_config::{FileConfig, NewsletterConfig, SmtpConfig, WebhookConfig};

use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub admin_port: u16,
    pub scan_interval_secs: u64,
    pub grace_window_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    /// 0 disables the admin listener.
    pub admin_port: u16,

    pub newsletter: NewsletterSettings,

    // Dispatch transports; neither set means log-only
    pub smtp: Option<SmtpSettings>,
    pub webhook: Option<WebhookSettings>,
}

#[derive(Debug, Clone)]
pub struct NewsletterSettings {
    pub scan_interval: Duration,
    /// How far before the cursor each scan reaches back, to catch postings
    /// that became visible late.
    pub grace_window: Duration,
    pub dispatch_concurrency: usize,
    pub tick_timeout: Duration,
    pub failure_retention_days: u64,
    pub cleanup_interval: Duration,
}

impl NewsletterSettings {
    /// Longer than any tick is allowed to run.
    pub fn lease_ttl(&self) -> Duration {
        self.tick_timeout + Duration::from_secs(60)
    }
}

impl Default for NewsletterSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(DEFAULT_SCAN_INTERVAL_SECS),
            grace_window: Duration::from_secs(DEFAULT_GRACE_WINDOW_SECS),
            dispatch_concurrency: 8,
            tick_timeout: Duration::from_secs(600),
            failure_retention_days: 30,
            cleanup_interval: Duration::from_secs(24 * 3600),
        }
    }
}

pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 24 * 3600;
pub const DEFAULT_GRACE_WINDOW_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    /// STARTTLS when true, implicit TLS otherwise.
    pub starttls: bool,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: String,
    pub timeout_secs: u64,
    pub bearer_token: Option<String>,
}

const DAY_SECS: u64 = 24 * 3600;

/// Upper bounds keeping every derived timestamp well inside chrono's range.
pub const MAX_SCAN_INTERVAL_SECS: u64 = 365 * DAY_SECS;
pub const MAX_GRACE_WINDOW_SECS: u64 = 30 * DAY_SECS;
pub const MAX_TICK_TIMEOUT_SECS: u64 = DAY_SECS;
pub const MAX_FAILURE_RETENTION_DAYS: u64 = 10 * 365;
pub const MAX_CLEANUP_INTERVAL_HOURS: u64 = 365 * 24;

fn positive_secs(name: &str, secs: u64) -> Result<Duration> {
    if secs == 0 {
        bail!("{} must be a positive number of seconds", name);
    }
    Ok(Duration::from_secs(secs))
}

fn bounded_secs(name: &str, secs: u64, max_secs: u64) -> Result<Duration> {
    if secs > max_secs {
        bail!("{} must be at most {} seconds, got {}", name, max_secs, secs);
    }
    positive_secs(name, secs)
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let admin_port = file.admin_port.unwrap_or(cli.admin_port);

        let nl_file = file.newsletter.unwrap_or_default();
        let defaults = NewsletterSettings::default();
        let dispatch_concurrency = nl_file
            .dispatch_concurrency
            .unwrap_or(defaults.dispatch_concurrency);
        if dispatch_concurrency == 0 {
            bail!("newsletter.dispatch_concurrency must be at least 1");
        }
        let failure_retention_days = nl_file
            .failure_retention_days
            .unwrap_or(defaults.failure_retention_days);
        if failure_retention_days == 0 {
            bail!("newsletter.failure_retention_days must be at least 1");
        }
        if failure_retention_days > MAX_FAILURE_RETENTION_DAYS {
            bail!(
                "newsletter.failure_retention_days must be at most {}",
                MAX_FAILURE_RETENTION_DAYS
            );
        }
        let cleanup_interval_hours = nl_file
            .cleanup_interval_hours
            .unwrap_or(defaults.cleanup_interval.as_secs() / 3600);
        if cleanup_interval_hours > MAX_CLEANUP_INTERVAL_HOURS {
            bail!(
                "newsletter.cleanup_interval_hours must be at most {}",
                MAX_CLEANUP_INTERVAL_HOURS
            );
        }
        let newsletter = NewsletterSettings {
            scan_interval: bounded_secs(
                "scan interval",
                nl_file.interval_secs.unwrap_or(cli.scan_interval_secs),
                MAX_SCAN_INTERVAL_SECS,
            )?,
            grace_window: bounded_secs(
                "grace window",
                nl_file.grace_window_secs.unwrap_or(cli.grace_window_secs),
                MAX_GRACE_WINDOW_SECS,
            )?,
            dispatch_concurrency,
            tick_timeout: bounded_secs(
                "newsletter.tick_timeout_secs",
                nl_file
                    .tick_timeout_secs
                    .unwrap_or(defaults.tick_timeout.as_secs()),
                MAX_TICK_TIMEOUT_SECS,
            )?,
            failure_retention_days,
            cleanup_interval: positive_secs(
                "newsletter.cleanup_interval_hours",
                cleanup_interval_hours * 3600,
            )?,
        };

        let smtp = match file.smtp {
            None => None,
            Some(smtp) => {
                let host = smtp
                    .host
                    .filter(|h| !h.trim().is_empty())
                    .ok_or_else(|| anyhow!("[smtp] section requires a host"))?;
                let from = smtp
                    .from
                    .filter(|f| !f.trim().is_empty())
                    .ok_or_else(|| anyhow!("[smtp] section requires a sender address (from)"))?;
                if smtp.username.is_some() != smtp.password.is_some() {
                    bail!("[smtp] username and password must be provided together");
                }
                Some(SmtpSettings {
                    host,
                    port: smtp.port.unwrap_or(587),
                    username: smtp.username,
                    password: smtp.password,
                    from,
                    starttls: smtp.starttls.unwrap_or(true),
                    timeout_secs: positive_secs("smtp.timeout_secs", smtp.timeout_secs.unwrap_or(30))?
                        .as_secs(),
                })
            }
        };

        let webhook = match file.webhook {
            None => None,
            Some(webhook) => {
                let url = webhook
                    .url
                    .filter(|u| u.starts_with("http://") || u.starts_with("https://"))
                    .ok_or_else(|| anyhow!("[webhook] section requires an http(s) url"))?;
                Some(WebhookSettings {
                    url,
                    timeout_secs: positive_secs(
                        "webhook.timeout_secs",
                        webhook.timeout_secs.unwrap_or(30),
                    )?
                    .as_secs(),
                    bearer_token: webhook.bearer_token,
                })
            }
        };

        Ok(Self {
            db_dir,
            admin_port,
            newsletter,
            smtp,
            webhook,
        })
    }

    pub fn board_db_path(&self) -> PathBuf {
        self.db_dir.join("board.db")
    }

    pub fn ledger_db_path(&self) -> PathBuf {
        self.db_dir.join("ledger.db")
    }

    pub fn server_db_path(&self) -> PathBuf {
        self.db_dir.join("server.db")
    }
}
