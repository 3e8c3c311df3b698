use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publication status of a posting. The only mutable attribute of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostingStatus {
    Open,
    Closed,
}

impl PostingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostingStatus::Open => "open",
            PostingStatus::Closed => "closed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(PostingStatus::Open),
            "closed" => Some(PostingStatus::Closed),
            _ => None,
        }
    }
}

/// A published job listing.
///
/// Matchable attributes are optional: a posting that lacks one simply never
/// satisfies a criterion on that attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPosting {
    pub id: String,
    pub title: String,
    pub description: String,
    /// The job "niche" subscribers pick from.
    pub category: Option<String>,
    pub location: Option<String>,
    /// e.g. "Full-time", "Part-time".
    pub job_type: Option<String>,
    pub company_name: Option<String>,
    /// Yearly salary.
    pub salary: Option<u64>,
    pub status: PostingStatus,
    pub created_at: DateTime<Utc>,
}

impl JobPosting {
    pub fn is_open(&self) -> bool {
        self.status == PostingStatus::Open
    }
}

/// Standing criteria of a subscriber. Empty/unset fields impose no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionCriteria {
    /// Accepted categories; a posting must be in any one of them.
    pub categories: Vec<String>,
    /// Substring of the posting location.
    pub location: Option<String>,
    /// Whitespace separated keywords, all of which must appear in the title
    /// or description.
    pub keywords: Option<String>,
    pub job_type: Option<String>,
    pub salary_min: Option<u64>,
    pub salary_max: Option<u64>,
}

/// A user with standing notification criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: String,
    pub name: String,
    /// Contact address handed to the dispatch gateway.
    pub email: String,
    pub criteria: SubscriptionCriteria,
    pub active: bool,
}
