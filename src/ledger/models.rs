use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Sent,
    Failed,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Sent => "sent",
            DispatchOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DispatchOutcome::Sent),
            "failed" => Some(DispatchOutcome::Failed),
            _ => None,
        }
    }
}

/// One dispatch attempt for a (subscriber, posting) pair. Never mutated once
/// written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
    pub id: i64,
    pub subscriber_id: String,
    pub job_id: String,
    pub outcome: DispatchOutcome,
    /// Gateway failure reason, only set on failed attempts.
    pub reason: Option<String>,
    pub dispatched_at: DateTime<Utc>,
}
