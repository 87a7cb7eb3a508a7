//! GitHub webhook payload normalization.
//!
//! Raw payloads are deserialized into minimal `Raw*` structs matching
//! GitHub's JSON schema, then rebuilt as the canonical field tree. Unknown
//! event types return `Ok(None)` (ignored, not an error); malformed
//! payloads for a known event type return `Err`.
//!
//! Normalization is deterministic: the same payload bytes always produce
//! the same canonical [`Event`].

use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use super::events::{Event, HookKind, Provider};

/// Error type for payload normalization failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is missing a field the event type requires.
    #[error("missing field in payload: {0}")]
    MissingField(&'static str),
}

/// Normalizes a GitHub webhook payload.
///
/// `event_type` is the value of the `X-GitHub-Event` header.
pub fn parse_github(event_type: &str, payload: &[u8]) -> Result<Option<Event>, ParseError> {
    match event_type {
        "push" => parse_push(payload).map(Some),
        "create" => parse_create(payload),
        "issues" => parse_issues(payload).map(Some),
        "issue_comment" => parse_issue_comment(payload).map(Some),
        "pull_request" => parse_pull_request(payload).map(Some),
        "pull_request_review" => parse_review(payload, "pull_request_review").map(Some),
        "pull_request_review_comment" => {
            parse_review(payload, "pull_request_review_comment").map(Some)
        }
        "commit_comment" => parse_commit_comment(payload).map(Some),
        "fork" => parse_fork(payload).map(Some),
        "delete" => parse_delete(payload).map(Some),
        "release" => parse_release(payload).map(Some),
        // Unknown event types are ignored (not an error)
        _ => Ok(None),
    }
}

/// Maps GitHub's native draft-transition actions onto the synthetic
/// `extended_action` states shared with GitLab.
fn extended_action(action: &str) -> &str {
    match action {
        "converted_to_draft" => "mark_as_draft",
        "ready_for_review" => "mark_as_ready",
        other => other,
    }
}

/// Strips `refs/heads/` or `refs/tags/` from a git ref.
pub(crate) fn ref_leaf(git_ref: &str) -> &str {
    git_ref.splitn(3, '/').nth(2).unwrap_or(git_ref)
}

// ============================================================================
// Raw payload structures for deserialization
//
// These match GitHub's webhook JSON structure. Only the fields the canonical
// subset needs are declared; everything else is dropped by serde.
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    full_name: Option<String>,
    description: Option<String>,
    html_url: Option<String>,
    homepage: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSender {
    login: String,
    id: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    forced: bool,
    compare: Option<String>,
    #[serde(default)]
    commits: Vec<RawCommit>,
    repository: RawRepository,
    pusher: RawPusher,
    sender: RawSender,
}

#[derive(Debug, Deserialize)]
struct RawPusher {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: String,
    message: String,
    url: String,
    author: RawCommitAuthor,
}

#[derive(Debug, Deserialize)]
struct RawCommitAuthor {
    name: String,
}

fn project_fields(repo: &RawRepository) -> Value {
    let namespace = repo
        .full_name
        .as_deref()
        .and_then(|f| f.split('/').next())
        .unwrap_or_default();
    json!({
        "name": repo.name,
        "namespace": namespace,
        "description": repo.description,
        "url": repo.html_url,
        "homepage": repo.homepage,
    })
}

fn parse_push(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;

    let commits: Vec<Value> = raw
        .commits
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "message": c.message,
                "url": c.url,
                "author": { "name": c.author.name },
            })
        })
        .collect();

    let fields = json!({
        "branch": ref_leaf(&raw.git_ref),
        "deleted": raw.deleted,
        "forced": raw.forced,
        "compare": raw.compare,
        "commits": commits,
        "project": project_fields(&raw.repository),
        "pusher": {
            "name": raw.pusher.name,
            "username": raw.sender.login,
            "id": raw.sender.id,
        },
    });

    Ok(Event::new(
        Provider::GitHub,
        "push",
        HookKind::Push,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawCreatePayload {
    ref_type: String,
    #[serde(rename = "ref")]
    git_ref: String,
    repository: RawRepository,
    sender: RawSender,
}

fn parse_create(payload: &[u8]) -> Result<Option<Event>, ParseError> {
    let raw: RawCreatePayload = serde_json::from_slice(payload)?;

    // Branch creation is already visible through push events.
    if raw.ref_type != "tag" {
        return Ok(None);
    }

    let fields = json!({
        "tag": raw.git_ref,
        "user": { "username": raw.sender.login },
        "project": project_fields(&raw.repository),
    });

    Ok(Some(Event::new(
        Provider::GitHub,
        "tag",
        HookKind::Tag,
        raw.repository.name,
        fields,
    )))
}

#[derive(Debug, Deserialize)]
struct RawIssuesPayload {
    action: String,
    issue: RawIssue,
    repository: RawRepository,
    sender: RawSender,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    title: String,
    html_url: String,
}

fn parse_issues(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawIssuesPayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "action": raw.action,
        "number": raw.issue.number,
        "title": raw.issue.title,
        "url": raw.issue.html_url,
        "user": { "username": raw.sender.login },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        "issues",
        HookKind::Issue,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawIssueCommentPayload {
    action: String,
    comment: RawComment,
    issue: RawIssue,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    html_url: String,
    user: RawSender,
}

fn parse_issue_comment(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawIssueCommentPayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "action": raw.action,
        "number": raw.issue.number,
        "title": raw.issue.title,
        "url": raw.comment.html_url,
        "user": { "username": raw.comment.user.login },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        "issue_comment",
        HookKind::Comment,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
    sender: RawSender,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    title: String,
    html_url: String,
    #[serde(default)]
    merged: bool,
    #[serde(default)]
    draft: bool,
    head: RawBranchRef,
    base: RawBranchRef,
    user: RawSender,
}

#[derive(Debug, Deserialize)]
struct RawBranchRef {
    #[serde(rename = "ref")]
    git_ref: String,
}

fn parse_pull_request(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;
    let pr = &raw.pull_request;

    // The merging user is the more interesting actor for merged PRs.
    let username = if raw.action == "closed" && pr.merged {
        &raw.sender.login
    } else {
        &pr.user.login
    };

    let fields = json!({
        "action": raw.action,
        "extended_action": extended_action(&raw.action),
        "number": pr.number,
        "title": pr.title,
        "url": pr.html_url,
        "merged": pr.merged,
        "draft": pr.draft,
        "source_branch": pr.head.git_ref,
        "target_branch": pr.base.git_ref,
        "user": { "username": username },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        "pull_request",
        HookKind::PullRequest,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawCommitCommentPayload {
    action: Option<String>,
    comment: RawCommitComment,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawCommitComment {
    html_url: String,
    commit_id: String,
    user: RawSender,
}

fn parse_commit_comment(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawCommitCommentPayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "action": raw.action.as_deref().unwrap_or("created"),
        "commit_id": raw.comment.commit_id,
        "url": raw.comment.html_url,
        "user": { "username": raw.comment.user.login },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        "commit_comment",
        HookKind::Comment,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawForkPayload {
    forkee: RawForkee,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawForkee {
    html_url: Option<String>,
    owner: RawSender,
}

fn parse_fork(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawForkPayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "url": raw.forkee.html_url,
        // The fork's owner, not the upstream sender, did the forking.
        "user": { "username": raw.forkee.owner.login },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        "fork",
        HookKind::Fork,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawDeletePayload {
    ref_type: String,
    #[serde(rename = "ref")]
    git_ref: String,
    repository: RawRepository,
    sender: RawSender,
}

fn parse_delete(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawDeletePayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "ref": raw.git_ref,
        "ref_type": raw.ref_type,
        "user": { "username": raw.sender.login },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        "delete",
        HookKind::Delete,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawReleasePayload {
    action: Option<String>,
    release: RawRelease,
    repository: RawRepository,
    sender: RawSender,
}

#[derive(Debug, Deserialize)]
struct RawRelease {
    tag_name: String,
    html_url: Option<String>,
}

fn parse_release(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawReleasePayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "action": raw.action.as_deref().unwrap_or("published"),
        "tag": raw.release.tag_name,
        "url": raw.release.html_url,
        "user": { "username": raw.sender.login },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        "release",
        HookKind::Release,
        raw.repository.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawReviewPayload {
    action: String,
    review: Option<RawReview>,
    comment: Option<RawComment>,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    state: Option<String>,
    html_url: String,
    user: RawSender,
}

fn parse_review(payload: &[u8], eventtype: &str) -> Result<Event, ParseError> {
    let raw: RawReviewPayload = serde_json::from_slice(payload)?;
    let pr = &raw.pull_request;

    let (url, username, state) = match (&raw.review, &raw.comment) {
        (Some(review), _) => (
            review.html_url.clone(),
            review.user.login.clone(),
            review.state.clone(),
        ),
        (None, Some(comment)) => (comment.html_url.clone(), comment.user.login.clone(), None),
        (None, None) => return Err(ParseError::MissingField("review")),
    };

    let fields = json!({
        "action": raw.action,
        "state": state,
        "number": pr.number,
        "title": pr.title,
        "url": url,
        "source_branch": pr.head.git_ref,
        "target_branch": pr.base.git_ref,
        "user": { "username": username },
        "project": project_fields(&raw.repository),
    });

    Ok(Event::new(
        Provider::GitHub,
        eventtype,
        HookKind::PullRequest,
        raw.repository.name,
        fields,
    ))
}
