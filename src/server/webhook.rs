//! Webhook endpoint handler.
//!
//! Accepts deliveries from both providers on one endpoint. The provider is
//! detected by its event-type header; verification happens before any
//! parsing and fails closed: a missing auth header, an unconfigured
//! secret, or a mismatch all yield 401 without constructing an event.
//! Recognized events are handed to the pipeline asynchronously, so the
//! provider gets its 200 without waiting on dispatch.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::webhooks::{
    parse_github, parse_gitlab, verify_gitlab_token, verify_signature, Event, ParseError,
};

/// Header name for the GitHub event type.
const HEADER_GITHUB_EVENT: &str = "x-github-event";
/// Header name for the GitHub signature.
const HEADER_GITHUB_SIGNATURE: &str = "x-hub-signature-256";
/// Header name for the GitLab event type.
const HEADER_GITLAB_EVENT: &str = "x-gitlab-event";
/// Header name for the GitLab token.
const HEADER_GITLAB_TOKEN: &str = "x-gitlab-token";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Neither provider's event-type header is present.
    #[error("no provider event header")]
    UnknownProvider,

    /// The signature or token header, or the configured secret, is missing
    /// or wrong.
    #[error("invalid signature")]
    InvalidSignature,

    /// The payload could not be parsed.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::UnknownProvider => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Webhook handler for `POST /webhook`.
///
/// # Response
///
/// - 200 OK: event accepted, or recognized-but-ignored event type
/// - 400 Bad Request: unknown provider or malformed payload
/// - 401 Unauthorized: failed signature or token verification
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event = if let Some(event_type) = get_header(&headers, HEADER_GITHUB_EVENT) {
        verify_github(&app_state, &headers, &body)?;
        parse_github(&event_type, &body)?
    } else if get_header(&headers, HEADER_GITLAB_EVENT).is_some() {
        verify_gitlab(&app_state, &headers)?;
        parse_gitlab(&body)?
    } else {
        return Err(WebhookError::UnknownProvider);
    };

    dispatch(&app_state, event)
}

fn verify_github(
    app_state: &AppState,
    headers: &HeaderMap,
    body: &Bytes,
) -> Result<(), WebhookError> {
    let Some(signature) = get_header(headers, HEADER_GITHUB_SIGNATURE) else {
        warn!("github webhook without a signature header");
        return Err(WebhookError::InvalidSignature);
    };
    let Some(secret) = app_state.github_secret() else {
        warn!("github webhook received but no github_secret is configured");
        return Err(WebhookError::InvalidSignature);
    };
    if !verify_signature(body, &signature, secret) {
        warn!("invalid github webhook signature");
        return Err(WebhookError::InvalidSignature);
    }
    Ok(())
}

fn verify_gitlab(app_state: &AppState, headers: &HeaderMap) -> Result<(), WebhookError> {
    let Some(token) = get_header(headers, HEADER_GITLAB_TOKEN) else {
        warn!("gitlab webhook without a token header");
        return Err(WebhookError::InvalidSignature);
    };
    let Some(secret) = app_state.gitlab_secret() else {
        warn!("gitlab webhook received but no gitlab_secret is configured");
        return Err(WebhookError::InvalidSignature);
    };
    if !verify_gitlab_token(&token, secret) {
        warn!("invalid gitlab webhook token");
        return Err(WebhookError::InvalidSignature);
    }
    Ok(())
}

fn dispatch(
    app_state: &AppState,
    event: Option<Event>,
) -> Result<(StatusCode, &'static str), WebhookError> {
    match event {
        None => {
            debug!("ignoring unrecognized event type");
            Ok((StatusCode::OK, "Ignored"))
        }
        Some(event) => {
            info!(
                repo = %event.repo,
                hook = %event.hook,
                eventtype = %event.eventtype,
                "accepted webhook"
            );
            let pipeline = app_state.pipeline().clone();
            tokio::spawn(async move { pipeline.handle(event).await });
            Ok((StatusCode::OK, "Accepted"))
        }
    }
}

/// Extracts an optional header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
