//! Seed data and a recording dispatch gateway.

use super::constants::*;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jobboard_notifier::board_store::{
    JobPosting, PostingStatus, PostingStore, SqliteBoardStore, Subscriber, SubscriberStore,
    SubscriptionCriteria,
};
use jobboard_notifier::dispatch::{DispatchError, DispatchGateway, NotificationMessage};
use std::collections::HashSet;
use std::sync::Mutex;

pub fn posting(id: &str, title: &str, category: &str, salary: u64) -> JobPosting {
    JobPosting {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{} wanted", title),
        category: Some(category.to_string()),
        location: Some("Berlin, DE".to_string()),
        job_type: Some("Full-time".to_string()),
        company_name: Some("Acme".to_string()),
        salary: Some(salary),
        status: PostingStatus::Open,
        created_at: Utc::now() - Duration::minutes(1),
    }
}

fn subscriber(id: &str, email: &str, criteria: SubscriptionCriteria, active: bool) -> Subscriber {
    Subscriber {
        id: id.to_string(),
        name: id.to_string(),
        email: email.to_string(),
        criteria,
        active,
    }
}

/// Seeds three postings (one closed) and three subscribers (one inactive),
/// producing [`SEEDED_MATCHES`] matching pairs.
pub fn seed_board(board: &SqliteBoardStore) -> Result<()> {
    board.insert_posting(&posting(JOB_RUST_ID, "Rust Engineer", "eng", 120_000))?;
    board.insert_posting(&JobPosting {
        location: Some("Remote".to_string()),
        ..posting(JOB_DESIGN_ID, "Product Designer", "design", 80_000)
    })?;
    board.insert_posting(&JobPosting {
        status: PostingStatus::Closed,
        ..posting(JOB_CLOSED_ID, "Legacy Rust Role", "eng", 150_000)
    })?;

    board.insert_subscriber(&subscriber(
        SUB_ENG_ID,
        SUB_ENG_EMAIL,
        SubscriptionCriteria {
            categories: vec!["eng".to_string()],
            salary_min: Some(100_000),
            ..SubscriptionCriteria::default()
        },
        true,
    ))?;
    board.insert_subscriber(&subscriber(
        SUB_ANY_ID,
        SUB_ANY_EMAIL,
        SubscriptionCriteria::default(),
        true,
    ))?;
    board.insert_subscriber(&subscriber(
        SUB_INACTIVE_ID,
        SUB_INACTIVE_EMAIL,
        SubscriptionCriteria::default(),
        false,
    ))?;
    Ok(())
}

/// Gateway that records every delivered message and rejects addresses on a
/// configurable blocklist.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<(String, NotificationMessage)>>,
    rejected: Mutex<HashSet<String>>,
}

impl RecordingGateway {
    pub fn reject(&self, address: &str) {
        self.rejected.lock().unwrap().insert(address.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected.lock().unwrap().clear();
    }

    pub fn sent(&self) -> Vec<(String, NotificationMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == address)
            .count()
    }
}

#[async_trait]
impl DispatchGateway for RecordingGateway {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(
        &self,
        address: &str,
        message: &NotificationMessage,
    ) -> Result<(), DispatchError> {
        if self.rejected.lock().unwrap().contains(address) {
            return Err(DispatchError::Rejected(format!("{} bounced", address)));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), message.clone()));
        Ok(())
    }
}
