//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per admin endpoint. When routes change,
//! update only this file.

use super::constants::*;
use reqwest::Response;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    async fn get(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("GET request failed")
    }

    /// GET /
    pub async fn get_status(&self) -> Response {
        self.get("/").await
    }

    /// GET /metrics
    pub async fn get_metrics(&self) -> Response {
        self.get("/metrics").await
    }

    /// GET /v1/jobs
    pub async fn list_jobs(&self) -> Response {
        self.get("/v1/jobs").await
    }

    /// GET /v1/jobs/{id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        self.get(&format!("/v1/jobs/{}", job_id)).await
    }

    /// GET /v1/jobs/{id}/history
    pub async fn get_job_history(&self, job_id: &str) -> Response {
        self.get(&format!("/v1/jobs/{}/history", job_id)).await
    }

    /// POST /v1/jobs/{id}/trigger
    pub async fn trigger_job(&self, job_id: &str) -> Response {
        self.client
            .post(format!("{}/v1/jobs/{}/trigger", self.base_url, job_id))
            .send()
            .await
            .expect("POST request failed")
    }

    /// GET /v1/notifications
    pub async fn recent_notifications(&self, limit: usize) -> Response {
        self.get(&format!("/v1/notifications?limit={}", limit))
            .await
    }

    /// GET /v1/audit
    pub async fn get_audit_log(&self) -> Response {
        self.get("/v1/audit").await
    }
}
