//! Health check endpoint.

use axum::http::StatusCode;

/// Liveness probe: 200 whenever the server is up.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
