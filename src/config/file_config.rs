use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub admin_port: Option<u16>,

    // Feature configs
    pub newsletter: Option<NewsletterConfig>,
    pub smtp: Option<SmtpConfig>,
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NewsletterConfig {
    pub interval_secs: Option<u64>,
    pub grace_window_secs: Option<u64>,
    pub dispatch_concurrency: Option<usize>,
    pub tick_timeout_secs: Option<u64>,
    pub failure_retention_days: Option<u64>,
    pub cleanup_interval_hours: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Sender mailbox, e.g. "Job Board <jobs@example.com>"
    pub from: Option<String>,
    /// true (default): STARTTLS upgrade, usually port 587.
    /// false: implicit TLS from the first byte, usually port 465.
    /// Plaintext SMTP is not supported.
    pub starttls: Option<bool>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub bearer_token: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
