//! HTTP server for the webhook relay.
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub and GitLab webhook deliveries
//! - `GET /health` - Returns 200 if the server is running

use std::sync::Arc;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::webhook_handler;

use crate::pipeline::Pipeline;

/// Shared application state, passed to handlers via axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pipeline: Pipeline,

    /// Secret for GitHub HMAC-SHA256 signature verification. `None` means
    /// GitHub deliveries are rejected.
    github_secret: Option<Vec<u8>>,

    /// Token GitLab deliveries must carry. `None` means GitLab deliveries
    /// are rejected.
    gitlab_secret: Option<String>,
}

impl AppState {
    pub fn new(
        pipeline: Pipeline,
        github_secret: Option<Vec<u8>>,
        gitlab_secret: Option<String>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                pipeline,
                github_secret,
                gitlab_secret,
            }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn github_secret(&self) -> Option<&[u8]> {
        self.inner.github_secret.as_deref()
    }

    pub fn gitlab_secret(&self) -> Option<&str> {
        self.inner.gitlab_secret.as_deref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
