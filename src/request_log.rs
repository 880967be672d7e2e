//! Per-request access log.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing::{error, info, warn};

/// Log method, path, status and duration of every request. Bodies are never
/// logged since they carry credentials.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms,
            "Request failed"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms,
            "Request rejected"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = status.as_u16(),
            elapsed_ms,
            "Request completed"
        );
    }

    response
}
