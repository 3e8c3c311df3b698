//! Request logging middleware

use crate::server::metrics::record_http_request;
use axum::extract::State;
use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{debug, info};

#[derive(PartialEq, PartialOrd, Clone, Copy, Debug, Default, clap::ValueEnum)]
pub enum RequestsLoggingLevel {
    None,
    #[default]
    Path,
    Headers,
}

impl std::fmt::Display for RequestsLoggingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

pub async fn log_requests(
    State(level): State<RequestsLoggingLevel>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let start = Instant::now();
    let method = request.method().to_string();
    let uri = request.uri().to_string();

    if level > RequestsLoggingLevel::None {
        info!(">>> {} {}", method, uri);
    }
    if level >= RequestsLoggingLevel::Headers {
        for (name, value) in request.headers() {
            debug!("  Req {:?}: {:?}", name, value);
        }
    }

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration = start.elapsed();

    if level >= RequestsLoggingLevel::Headers {
        for (name, value) in response.headers() {
            debug!("  Resp {:?}: {:?}", name, value);
        }
    }
    if level > RequestsLoggingLevel::None {
        info!("<<< {} ({}ms)", status, duration.as_millis());
    }

    record_http_request(&method, status, duration);

    response
}
