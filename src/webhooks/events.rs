//! Canonical webhook event representation.
//!
//! Both providers are normalized into [`Event`]: a hook category, the
//! repository name, and a provider-agnostic tree of fields. The field tree
//! preserves nesting and list structure so that filter expressions and
//! argument templates can address any part of the payload subset.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The hosting service that delivered a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    GitHub,
    GitLab,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::GitHub => write!(f, "github"),
            Provider::GitLab => write!(f, "gitlab"),
        }
    }
}

/// Event-type category with its own routing table.
///
/// These are the keys of the `hooks` configuration section. Several raw
/// event types collapse into one category (e.g. GitHub `pull_request` and
/// GitLab `merge_request` are both [`HookKind::PullRequest`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookKind {
    Push,
    Tag,
    Issue,
    PullRequest,
    Comment,
    Fork,
    Delete,
    Release,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookKind::Push => "Push",
            HookKind::Tag => "Tag",
            HookKind::Issue => "Issue",
            HookKind::PullRequest => "PullRequest",
            HookKind::Comment => "Comment",
            HookKind::Fork => "Fork",
            HookKind::Delete => "Delete",
            HookKind::Release => "Release",
        };
        write!(f, "{name}")
    }
}

/// A provider-agnostic, normalized webhook event.
///
/// Immutable once built and scoped to a single request (or one debounce
/// window). `fields` is the canonical subset tree; `provider`, `eventtype`
/// and `repo` are mirrored into it as top-level scalars so that filter
/// expressions can address them like any other field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub provider: Provider,
    pub eventtype: String,
    pub hook: HookKind,
    pub repo: String,
    pub fields: Value,
}

impl Event {
    /// Builds an event, injecting `provider`, `eventtype` and `repo` into
    /// the field tree.
    pub fn new(
        provider: Provider,
        eventtype: impl Into<String>,
        hook: HookKind,
        repo: impl Into<String>,
        mut fields: Value,
    ) -> Self {
        let eventtype = eventtype.into();
        let repo = repo.into();
        if let Value::Object(map) = &mut fields {
            map.insert("provider".into(), Value::String(provider.to_string()));
            map.insert("eventtype".into(), Value::String(eventtype.clone()));
            map.insert("repo".into(), Value::String(repo.clone()));
        }
        Event {
            provider,
            eventtype,
            hook,
            repo,
            fields,
        }
    }

    /// The branch the event refers to, if it has one.
    pub fn branch(&self) -> Option<&str> {
        self.fields
            .get("branch")
            .or_else(|| self.fields.get("target_branch"))
            .and_then(Value::as_str)
    }

    /// The login of the user who caused the event, if known.
    pub fn actor(&self) -> Option<&str> {
        self.fields
            .get("pusher")
            .and_then(|p| p.get("username"))
            .or_else(|| self.fields.get("user").and_then(|u| u.get("username")))
            .and_then(Value::as_str)
    }

    /// The pull/merge request number, for events attached to one.
    pub fn pr_number(&self) -> Option<u64> {
        self.fields.get("number").and_then(Value::as_u64)
    }

    /// Whether this event belongs to the noisy review class that is
    /// subject to flood debouncing.
    pub fn is_review_class(&self) -> bool {
        matches!(
            self.eventtype.as_str(),
            "pull_request_review" | "pull_request_review_comment"
        ) || (self.eventtype == "note"
            && self
                .fields
                .get("noteable_type")
                .and_then(Value::as_str)
                .is_some_and(|t| t == "MergeRequest"))
    }
}
