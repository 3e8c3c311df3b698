use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::http_layers::log_requests;
use super::metrics::metrics_handler;
use super::state::{GuardedLedger, GuardedServerStore, ServerState};
use crate::background_jobs::{JobError, SchedulerHandle};
use crate::newsletter::ScanState;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    git_hash: &'static str,
    uptime_secs: u64,
    scan_state: ScanState,
    last_scan_at: Option<String>,
    cursor_version: i64,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

impl PageQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

fn internal_error(context: &str, e: anyhow::Error) -> Response {
    error!("{}: {:#}", context, e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: context.to_string(),
        }),
    )
        .into_response()
}

async fn home(State(state): State<ServerState>) -> Response {
    let cursor = match state.server_store.load_scan_cursor() {
        Ok(cursor) => cursor,
        Err(e) => return internal_error("Failed to load scan cursor", e),
    };
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        git_hash: env!("GIT_HASH"),
        uptime_secs: state.start_time.elapsed().as_secs(),
        scan_state: state.scanner.state(),
        last_scan_at: cursor.last_scan_at.map(|ts| ts.to_rfc3339()),
        cursor_version: cursor.version,
    })
    .into_response()
}

async fn list_jobs(State(scheduler): State<SchedulerHandle>) -> Response {
    match scheduler.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => internal_error("Failed to list jobs", e),
    }
}

async fn get_job(State(scheduler): State<SchedulerHandle>, Path(job_id): Path<String>) -> Response {
    match scheduler.get_job(&job_id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => internal_error("Failed to get job", e),
    }
}

async fn get_job_history(
    State(scheduler): State<SchedulerHandle>,
    Path(job_id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Response {
    if !scheduler.job_exists(&job_id).await {
        return StatusCode::NOT_FOUND.into_response();
    }
    match scheduler.get_job_history(&job_id, page.limit()) {
        Ok(history) => Json(history).into_response(),
        Err(e) => internal_error("Failed to get job history", e),
    }
}

async fn trigger_job(
    State(scheduler): State<SchedulerHandle>,
    Path(job_id): Path<String>,
) -> Response {
    match scheduler.trigger_job(&job_id).await {
        Ok(()) => {
            info!("Job {} triggered via admin API", job_id);
            StatusCode::ACCEPTED.into_response()
        }
        Err(JobError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(e @ JobError::AlreadyRunning) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct AuditQuery {
    job: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

async fn get_job_audit_log(
    State(server_store): State<GuardedServerStore>,
    Query(query): Query<AuditQuery>,
) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = query.offset;
    let entries = match query.job.as_deref() {
        Some(job_id) => server_store.get_job_audit_log_by_job(job_id, limit, offset),
        None => server_store.get_job_audit_log(limit, offset),
    };
    match entries {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => internal_error("Failed to read job audit log", e),
    }
}

async fn recent_notifications(
    State(ledger): State<GuardedLedger>,
    Query(page): Query<PageQuery>,
) -> Response {
    match ledger.recent_records(page.limit()) {
        Ok(records) => Json(records).into_response(),
        Err(e) => internal_error("Failed to read ledger", e),
    }
}

pub fn make_app(state: ServerState) -> Router {
    let job_routes: Router = Router::new()
        .route("/", get(list_jobs))
        .route("/{id}", get(get_job))
        .route("/{id}/history", get(get_job_history))
        .route("/{id}/trigger", post(trigger_job))
        .with_state(state.clone());

    let v1_routes: Router = Router::new()
        .route("/audit", get(get_job_audit_log))
        .route("/notifications", get(recent_notifications))
        .with_state(state.clone())
        .nest("/jobs", job_routes);

    Router::new()
        .route("/", get(home))
        .route("/metrics", get(metrics_handler))
        .with_state(state.clone())
        .nest("/v1", v1_routes)
        .layer(middleware::from_fn_with_state(
            state.requests_logging_level,
            log_requests,
        ))
}

/// Serve the admin API on localhost until `shutdown` is cancelled.
pub async fn run_server(state: ServerState, port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .with_context(|| format!("Failed to bind admin port {}", port))?;
    info!("Admin API listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("Admin server failed")
}
