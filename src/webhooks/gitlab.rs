//! GitLab webhook payload normalization.
//!
//! GitLab carries the event type in the payload's `object_kind` field
//! rather than in a header, and encodes draft-state transitions of merge
//! requests as an `update` action with a `changes.draft` diff. The
//! normalizer synthesizes the `extended_action` field from that diff so
//! filters see the same two extra states GitHub reports natively.

use serde::Deserialize;
use serde_json::{json, Value};

use super::events::{Event, HookKind, Provider};
use super::parser::{ref_leaf, ParseError};

/// Normalizes a GitLab webhook payload.
///
/// The event type is read from the payload's `object_kind` field; the
/// `X-Gitlab-Event` header is only used for provider detection.
pub fn parse_gitlab(payload: &[u8]) -> Result<Option<Event>, ParseError> {
    let kind: RawObjectKind = serde_json::from_slice(payload)?;

    match kind.object_kind.as_deref() {
        Some("push") => parse_push(payload).map(Some),
        Some("tag_push") => parse_tag_push(payload).map(Some),
        Some("issue") => parse_issue(payload).map(Some),
        Some("note") => parse_note(payload),
        Some("merge_request") => parse_merge_request(payload).map(Some),
        // Unknown or missing object kinds are ignored (not an error)
        _ => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct RawObjectKind {
    object_kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    name: String,
    namespace: Option<String>,
    description: Option<String>,
    http_url: Option<String>,
    homepage: Option<String>,
}

fn project_fields(project: &RawProject) -> Value {
    json!({
        "name": project.name,
        "namespace": project.namespace,
        "description": project.description,
        "url": project.http_url,
        "homepage": project.homepage,
    })
}

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    user_name: String,
    user_username: Option<String>,
    user_id: Option<u64>,
    #[serde(default)]
    commits: Vec<RawCommit>,
    project: RawProject,
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

fn commit_fields(commits: &[RawCommit]) -> Vec<Value> {
    commits
        .iter()
        .map(|c| {
            json!({
                "id": c.id,
                "message": c.message,
                "url": c.url,
                "author": { "name": c.author.name },
            })
        })
        .collect()
}

fn parse_push(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "branch": ref_leaf(&raw.git_ref),
        "commits": commit_fields(&raw.commits),
        "project": project_fields(&raw.project),
        "pusher": {
            "name": raw.user_name,
            "username": raw.user_username,
            "id": raw.user_id,
        },
    });

    Ok(Event::new(
        Provider::GitLab,
        "push",
        HookKind::Push,
        raw.project.name,
        fields,
    ))
}

fn parse_tag_push(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "tag": ref_leaf(&raw.git_ref),
        "commits": commit_fields(&raw.commits),
        "project": project_fields(&raw.project),
        "pusher": {
            "name": raw.user_name,
            "username": raw.user_username,
            "id": raw.user_id,
        },
    });

    Ok(Event::new(
        Provider::GitLab,
        "tag",
        HookKind::Tag,
        raw.project.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawUser {
    name: String,
    username: Option<String>,
}

fn user_fields(user: &RawUser) -> Value {
    json!({ "name": user.name, "username": user.username })
}

#[derive(Debug, Deserialize)]
struct RawIssuePayload {
    user: RawUser,
    project: RawProject,
    object_attributes: RawIssueAttributes,
}

#[derive(Debug, Deserialize)]
struct RawIssueAttributes {
    action: Option<String>,
    iid: u64,
    title: String,
    url: Option<String>,
}

fn parse_issue(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawIssuePayload = serde_json::from_slice(payload)?;

    let fields = json!({
        "action": raw.object_attributes.action,
        "number": raw.object_attributes.iid,
        "title": raw.object_attributes.title,
        "url": raw.object_attributes.url,
        "user": user_fields(&raw.user),
        "project": project_fields(&raw.project),
    });

    Ok(Event::new(
        Provider::GitLab,
        "issues",
        HookKind::Issue,
        raw.project.name,
        fields,
    ))
}

#[derive(Debug, Deserialize)]
struct RawNotePayload {
    user: RawUser,
    project: RawProject,
    object_attributes: RawNoteAttributes,
    merge_request: Option<RawNoteTarget>,
    issue: Option<RawNoteTarget>,
    commit: Option<RawNoteCommit>,
    snippet: Option<RawSnippet>,
}

#[derive(Debug, Deserialize)]
struct RawNoteAttributes {
    noteable_type: String,
    url: Option<String>,
    commit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNoteTarget {
    iid: u64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct RawNoteCommit {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawSnippet {
    id: u64,
    title: String,
}

/// First line of a commit message, truncated to 100 characters.
fn commit_title(message: &str) -> String {
    let line = message.lines().next().unwrap_or_default();
    if line.chars().count() > 100 {
        let mut title: String = line.chars().take(100).collect();
        title.push_str("...");
        title
    } else {
        line.to_string()
    }
}

fn parse_note(payload: &[u8]) -> Result<Option<Event>, ParseError> {
    let raw: RawNotePayload = serde_json::from_slice(payload)?;
    let attribs = &raw.object_attributes;

    let (number, title) = match attribs.noteable_type.as_str() {
        "MergeRequest" => {
            let target = raw
                .merge_request
                .as_ref()
                .ok_or(ParseError::MissingField("merge_request"))?;
            (json!(target.iid), target.title.clone())
        }
        "Issue" => {
            let target = raw
                .issue
                .as_ref()
                .ok_or(ParseError::MissingField("issue"))?;
            (json!(target.iid), target.title.clone())
        }
        "Commit" => {
            let commit = raw
                .commit
                .as_ref()
                .ok_or(ParseError::MissingField("commit"))?;
            (Value::Null, commit_title(&commit.message))
        }
        "Snippet" => {
            let snippet = raw
                .snippet
                .as_ref()
                .ok_or(ParseError::MissingField("snippet"))?;
            (json!(snippet.id), snippet.title.clone())
        }
        _ => return Ok(None),
    };

    let fields = json!({
        "noteable_type": attribs.noteable_type,
        "number": number,
        "title": title,
        "commit_id": attribs.commit_id,
        "url": attribs.url,
        "user": user_fields(&raw.user),
        "project": project_fields(&raw.project),
    });

    Ok(Some(Event::new(
        Provider::GitLab,
        "note",
        HookKind::Comment,
        raw.project.name,
        fields,
    )))
}

#[derive(Debug, Deserialize)]
struct RawMergeRequestPayload {
    user: RawUser,
    project: RawProject,
    object_attributes: RawMergeRequestAttributes,
    changes: Option<RawChanges>,
}

#[derive(Debug, Deserialize)]
struct RawMergeRequestAttributes {
    action: Option<String>,
    iid: u64,
    title: String,
    url: Option<String>,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    draft: bool,
}

#[derive(Debug, Deserialize)]
struct RawChanges {
    draft: Option<RawDraftChange>,
}

#[derive(Debug, Deserialize)]
struct RawDraftChange {
    current: Option<bool>,
}

/// Refines the raw merge-request action with the two draft-transition
/// states GitLab only exposes through the `changes` diff.
fn extended_action(action: &str, changes: Option<&RawChanges>) -> String {
    if action == "update" {
        if let Some(change) = changes.and_then(|c| c.draft.as_ref()) {
            return match change.current {
                Some(true) => "mark_as_draft".to_string(),
                Some(false) => "mark_as_ready".to_string(),
                None => action.to_string(),
            };
        }
    }
    action.to_string()
}

fn parse_merge_request(payload: &[u8]) -> Result<Event, ParseError> {
    let raw: RawMergeRequestPayload = serde_json::from_slice(payload)?;
    let attribs = &raw.object_attributes;
    let action = attribs.action.as_deref().unwrap_or("update");

    let fields = json!({
        "action": action,
        "extended_action": extended_action(action, raw.changes.as_ref()),
        "number": attribs.iid,
        "title": attribs.title,
        "url": attribs.url,
        "draft": attribs.draft,
        "source_branch": attribs.source_branch,
        "target_branch": attribs.target_branch,
        "user": user_fields(&raw.user),
        "project": project_fields(&raw.project),
    });

    Ok(Event::new(
        Provider::GitLab,
        "merge_request",
        HookKind::PullRequest,
        raw.project.name,
        fields,
    ))
}
