//! End-to-end tests for the admin API
//!
//! Tests the operational endpoints:
//! - Status and scan cursor
//! - Job listing, history and manual triggers
//! - Ledger and audit views
//! - Prometheus metrics

mod common;

use common::*;
use reqwest::StatusCode;

#[tokio::test(flavor = "multi_thread")]
async fn test_status_reports_cursor_after_startup_tick() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    server.wait_for_finished_runs("newsletter", 1).await;

    let response = client.get_status().await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["scan_state"], "idle");
    assert_eq!(body["cursor_version"], 1);
    assert!(body["last_scan_at"].is_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_list_jobs_includes_registered_jobs() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.list_jobs().await;
    assert_eq!(response.status(), StatusCode::OK);

    let jobs: Vec<serde_json::Value> = response.json().await.unwrap();
    let ids: Vec<&str> = jobs.iter().filter_map(|j| j["id"].as_str()).collect();
    assert!(ids.contains(&"newsletter"));
    assert!(ids.contains(&"failure_log_cleanup"));

    let newsletter = jobs.iter().find(|j| j["id"] == "newsletter").unwrap();
    assert_eq!(newsletter["schedule"]["interval_secs"], TEST_SCAN_INTERVAL_SECS);
    assert_eq!(newsletter["schedule"]["on_startup"], true);

    let cleanup = jobs.iter().find(|j| j["id"] == "failure_log_cleanup").unwrap();
    assert_eq!(cleanup["schedule"]["on_startup"], false);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_get_job_and_history() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    server.wait_for_finished_runs("newsletter", 1).await;

    let response = client.get_job("newsletter").await;
    assert_eq!(response.status(), StatusCode::OK);
    let job: serde_json::Value = response.json().await.unwrap();
    assert_eq!(job["is_running"], false);
    assert_eq!(job["last_run"]["status"], "completed");

    let response = client.get_job_history("newsletter").await;
    assert_eq!(response.status(), StatusCode::OK);
    let history: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["triggered_by"], "startup");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_job_returns_not_found() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    assert_eq!(
        client.get_job("nonexistent").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        client.get_job_history("nonexistent").await.status(),
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        client.trigger_job("nonexistent").await.status(),
        StatusCode::NOT_FOUND
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_manual_trigger_is_recorded_in_history() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    server.wait_for_finished_runs("newsletter", 1).await;

    let response = client.trigger_job("newsletter").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    server.wait_for_finished_runs("newsletter", 2).await;

    let history: Vec<serde_json::Value> = client
        .get_job_history("newsletter")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().any(|run| run["triggered_by"] == "manual"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_recent_notifications_lists_ledger_records() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    server.wait_for_finished_runs("newsletter", 1).await;

    let response = client.recent_notifications(10).await;
    assert_eq!(response.status(), StatusCode::OK);

    let records: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(records.len(), SEEDED_MATCHES);
    assert!(records.iter().all(|r| r["outcome"] == "sent"));
    assert!(records
        .iter()
        .any(|r| r["subscriber_id"] == SUB_ENG_ID && r["job_id"] == JOB_RUST_ID));

    let limited: Vec<serde_json::Value> = client
        .recent_notifications(1)
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_audit_log_contains_newsletter_events() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    server.wait_for_finished_runs("newsletter", 1).await;

    let response = client.get_audit_log().await;
    assert_eq!(response.status(), StatusCode::OK);

    let entries: Vec<serde_json::Value> = response.json().await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e["job_id"] == "newsletter" && e["event_type"] == "started"));
    assert!(entries
        .iter()
        .any(|e| e["job_id"] == "newsletter" && e["event_type"] == "completed"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metrics_endpoint_exposes_newsletter_counters() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    server.wait_for_finished_runs("newsletter", 1).await;

    let response = client.get_metrics().await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.text().await.unwrap();
    assert!(body.contains("jobboard_notifier_newsletter_ticks_total"));
    assert!(body.contains("jobboard_notifier_dispatches_total"));
}
