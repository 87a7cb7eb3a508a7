//! Outcome and event reporting.
//!
//! The chat collaborator lives outside this crate; all it exposes is
//! [`Notifier::notify`]. The [`Reporter`] never calls it directly: every
//! message goes through an unbounded channel so a slow or wedged sink can
//! never stall webhook handling or the rungroup scheduler. A drain task
//! owned by the binary forwards the queue to the injected notifier.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::webhooks::{Event, HookKind};

/// Outbound collaborator interface.
pub trait Notifier: Send + Sync + 'static {
    fn notify(&self, target: &str, text: &str);
}

/// One queued message for the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub target: String,
    pub text: String,
}

/// Result of an action dispatch, as reported to the configured recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    Success,
    Failed(String),
}

/// Fans event summaries and action outcomes out to the configured targets.
#[derive(Debug, Clone)]
pub struct Reporter {
    tx: mpsc::UnboundedSender<Notification>,
    /// Repo to channel routing, with a `default` fallback entry.
    channels: HashMap<String, Vec<String>>,
    /// Repos listed here report only to their confidential channels.
    confidential: HashMap<String, Vec<String>>,
    /// Recipients of action success/failure reports.
    report_users: Vec<String>,
}

impl Reporter {
    /// Creates a reporter and the queue end the drain task consumes.
    pub fn new(
        channels: HashMap<String, Vec<String>>,
        confidential: HashMap<String, Vec<String>>,
        report_users: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Reporter {
                tx,
                channels,
                confidential,
                report_users,
            },
            rx,
        )
    }

    fn send(&self, target: &str, text: String) {
        let notification = Notification {
            target: target.to_string(),
            text,
        };
        if self.tx.send(notification).is_err() {
            warn!("notification sink is gone, dropping message");
        }
    }

    /// Channels a repo's events report to. Confidential repos route only
    /// to their confidential channels; everything else uses the repo's
    /// entry in the channel table, falling back to `default`.
    fn channels_for(&self, repo: &str) -> &[String] {
        if let Some(channels) = self.confidential.get(repo) {
            return channels;
        }
        self.channels
            .get(repo)
            .or_else(|| self.channels.get("default"))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Reports an action's outcome to every configured report recipient.
    pub fn action_outcome(&self, action: &str, outcome: &ActionOutcome) {
        let text = match outcome {
            ActionOutcome::Success => format!("action {action} finished"),
            ActionOutcome::Failed(reason) => format!("action {action} failed: {reason}"),
        };
        for user in &self.report_users {
            self.send(user, text.clone());
        }
    }

    /// Announces an event to the channels routed for its repository.
    pub fn event_summary(&self, event: &Event) {
        let Some(text) = summarize(event) else {
            return;
        };
        for channel in self.channels_for(&event.repo) {
            self.send(channel, text.clone());
        }
    }
}

fn str_field<'a>(fields: &'a Value, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

/// Builds the plain-text one-liner for an event, without any chat markup.
fn summarize(event: &Event) -> Option<String> {
    let fields = &event.fields;
    let actor = event.actor().unwrap_or("someone");
    let mut text = match event.hook {
        HookKind::Push => {
            let branch = event.branch().unwrap_or("?");
            let count = fields
                .get("commits")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            format!(
                "[{}] {actor} pushed {count} commit{} to {branch}",
                event.repo,
                if count == 1 { "" } else { "s" },
            )
        }
        HookKind::Tag => {
            let tag = str_field(fields, "tag").unwrap_or("?");
            format!("[{}] {actor} added tag {tag}", event.repo)
        }
        HookKind::Issue => {
            let action = str_field(fields, "action").unwrap_or("updated");
            let number = event.pr_number().unwrap_or(0);
            let title = str_field(fields, "title").unwrap_or("");
            format!("[{}] {actor} {action} issue #{number}: {title}", event.repo)
        }
        HookKind::PullRequest => {
            let action = str_field(fields, "extended_action")
                .or_else(|| str_field(fields, "action"))
                .unwrap_or("updated");
            let number = event.pr_number().unwrap_or(0);
            let title = str_field(fields, "title").unwrap_or("");
            format!(
                "[{}] {actor} {action} pull request #{number}: {title}",
                event.repo
            )
        }
        HookKind::Comment => {
            if let Some(commit) = str_field(fields, "commit_id") {
                let short = commit.get(..8).unwrap_or(commit);
                format!("[{}] {actor} commented on commit {short}", event.repo)
            } else {
                let number = event.pr_number().unwrap_or(0);
                let title = str_field(fields, "title").unwrap_or("");
                format!("[{}] {actor} commented on #{number}: {title}", event.repo)
            }
        }
        HookKind::Fork => format!("[{}] {actor} created a fork", event.repo),
        HookKind::Delete => {
            let ref_type = str_field(fields, "ref_type").unwrap_or("ref");
            let name = str_field(fields, "ref").unwrap_or("?");
            format!("[{}] {actor} deleted {ref_type} {name}", event.repo)
        }
        HookKind::Release => {
            let tag = str_field(fields, "tag").unwrap_or("?");
            format!("[{}] new release {tag} by {actor}", event.repo)
        }
    };
    if let Some(url) = str_field(fields, "url").or_else(|| str_field(fields, "compare")) {
        text.push_str(&format!(" ({url})"));
    }
    if let Some(extra) = fields.get("coalesced_count").and_then(Value::as_u64) {
        if extra > 1 {
            text.push_str(&format!(" [+{} more updates]", extra - 1));
        }
    }
    Some(text)
}

/// Forwards queued notifications to the collaborator until the reporter
/// side is dropped.
pub async fn drain<N: Notifier>(mut rx: mpsc::UnboundedReceiver<Notification>, notifier: N) {
    while let Some(notification) = rx.recv().await {
        notifier.notify(&notification.target, &notification.text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webhooks::Provider;
    use serde_json::json;

    fn reporter(
        channels: &[(&str, &[&str])],
        confidential: &[(&str, &[&str])],
        users: &[&str],
    ) -> (Reporter, mpsc::UnboundedReceiver<Notification>) {
        let to_map = |pairs: &[(&str, &[&str])]| {
            pairs
                .iter()
                .map(|(k, v)| {
                    (
                        k.to_string(),
                        v.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
                    )
                })
                .collect::<HashMap<_, _>>()
        };
        Reporter::new(
            to_map(channels),
            to_map(confidential),
            users.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn collect(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = rx.try_recv() {
            out.push(n);
        }
        out
    }

    fn push_event(repo: &str) -> Event {
        Event::new(
            Provider::GitHub,
            "push",
            HookKind::Push,
            repo,
            json!({
                "branch": "master",
                "commits": [{ "id": "a", "message": "m", "url": "u", "author": { "name": "A" } }],
                "pusher": { "name": "Alice", "username": "alice" },
                "compare": "https://example.com/compare",
            }),
        )
    }

    #[test]
    fn outcome_goes_to_every_report_user() {
        let (reporter, mut rx) = reporter(&[], &[], &["admin", "ops"]);
        reporter.action_outcome("deploy", &ActionOutcome::Success);
        reporter.action_outcome("deploy", &ActionOutcome::Failed("exit status 1".into()));

        let sent = collect(&mut rx);
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0].target, "admin");
        assert_eq!(sent[0].text, "action deploy finished");
        assert_eq!(sent[3].target, "ops");
        assert_eq!(sent[3].text, "action deploy failed: exit status 1");
    }

    #[test]
    fn summary_routes_to_repo_channels_with_default_fallback() {
        let (reporter, mut rx) = reporter(
            &[("default", &["#general"]), ("my_project", &["#dev", "#ci"])],
            &[],
            &[],
        );

        reporter.event_summary(&push_event("my_project"));
        let sent = collect(&mut rx);
        assert_eq!(
            sent.iter().map(|n| n.target.as_str()).collect::<Vec<_>>(),
            ["#dev", "#ci"]
        );
        assert!(sent[0].text.contains("alice pushed 1 commit to master"));
        assert!(sent[0].text.contains("https://example.com/compare"));

        reporter.event_summary(&push_event("unlisted"));
        let sent = collect(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "#general");
    }

    #[test]
    fn confidential_repos_report_only_to_confidential_channels() {
        let (reporter, mut rx) = reporter(
            &[("default", &["#general"]), ("secret", &["#dev"])],
            &[("secret", &["#private"])],
            &[],
        );

        reporter.event_summary(&push_event("secret"));
        let sent = collect(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].target, "#private");
    }

    #[test]
    fn coalesced_events_mention_the_suppressed_count() {
        let (reporter, mut rx) = reporter(&[("default", &["#general"])], &[], &[]);
        let event = Event::new(
            Provider::GitHub,
            "pull_request_review",
            HookKind::PullRequest,
            "r",
            json!({
                "action": "submitted",
                "number": 7,
                "title": "Fix things",
                "user": { "username": "bob" },
                "coalesced_count": 4,
            }),
        );
        reporter.event_summary(&event);
        let sent = collect(&mut rx);
        assert!(sent[0].text.contains("[+3 more updates]"));
    }

    #[test]
    fn commit_comments_shorten_the_commit_id() {
        let (reporter, mut rx) = reporter(&[("default", &["#general"])], &[], &[]);
        let event = Event::new(
            Provider::GitHub,
            "commit_comment",
            HookKind::Comment,
            "r",
            json!({
                "commit_id": "deadbeefcafe0123",
                "url": "https://example.com/c#comment",
                "user": { "username": "dave" },
            }),
        );
        reporter.event_summary(&event);
        let sent = collect(&mut rx);
        assert!(sent[0].text.contains("dave commented on commit deadbeef"));
        assert!(sent[0].text.contains("https://example.com/c#comment"));
    }

    #[test]
    fn fork_delete_and_release_get_summaries() {
        let (reporter, mut rx) = reporter(&[("default", &["#general"])], &[], &[]);

        reporter.event_summary(&Event::new(
            Provider::GitHub,
            "fork",
            HookKind::Fork,
            "r",
            json!({ "user": { "username": "eve" } }),
        ));
        reporter.event_summary(&Event::new(
            Provider::GitHub,
            "delete",
            HookKind::Delete,
            "r",
            json!({ "ref": "topic", "ref_type": "branch", "user": { "username": "alice" } }),
        ));
        reporter.event_summary(&Event::new(
            Provider::GitHub,
            "release",
            HookKind::Release,
            "r",
            json!({ "tag": "v2.0", "user": { "username": "alice" } }),
        ));

        let sent = collect(&mut rx);
        assert_eq!(sent.len(), 3);
        assert!(sent[0].text.contains("eve created a fork"));
        assert!(sent[1].text.contains("alice deleted branch topic"));
        assert!(sent[2].text.contains("new release v2.0 by alice"));
    }

    #[test]
    fn no_channels_means_no_messages() {
        let (reporter, mut rx) = reporter(&[], &[], &[]);
        reporter.event_summary(&push_event("r"));
        assert!(collect(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn drain_forwards_to_the_notifier() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct Capture(Arc<Mutex<Vec<(String, String)>>>);
        impl Notifier for Capture {
            fn notify(&self, target: &str, text: &str) {
                self.0
                    .lock()
                    .unwrap()
                    .push((target.to_string(), text.to_string()));
            }
        }

        let (reporter, rx) = reporter(&[], &[], &["admin"]);
        let capture = Capture(Arc::new(Mutex::new(Vec::new())));
        let seen = capture.clone();

        reporter.action_outcome("announce", &ActionOutcome::Success);
        drop(reporter);
        drain(rx, capture).await;

        let seen = seen.0.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            [("admin".to_string(), "action announce finished".to_string())]
        );
    }
}
