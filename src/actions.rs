//! Named actions and their dispatch.
//!
//! An action is either a `noop` (reports success and does nothing else) or
//! a `process` (a command with templated arguments, executed under a
//! rungroup). Argument templates are literal text with substitution
//! tokens:
//!
//! - `${event}` — the whole canonical field tree, serialized as JSON
//! - `${path.to.field}` — a dotted field lookup
//! - `${shorturl:path.to.field}` — a lookup whose value is passed through
//!   the URL shortener (long URL when shortening fails or none is
//!   configured)
//!
//! Templates are compiled at configuration load so malformed ones abort
//! startup rather than mangling a command line at dispatch time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

use crate::filter::{FieldPath, FilterParseError};
use crate::report::{ActionOutcome, Reporter};
use crate::rungroup::{RunRequest, Scheduler};
use crate::shorten::UrlShortener;
use crate::webhooks::Event;

/// Error type for argument-template compilation.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("unterminated ${{...}} token in '{0}'")]
    Unterminated(String),

    #[error("empty substitution token in '{0}'")]
    EmptyToken(String),

    #[error("bad field path in template: {0}")]
    BadPath(#[from] FilterParseError),
}

#[derive(Debug, Clone)]
enum Tok {
    Literal(String),
    Event,
    Path(FieldPath),
    ShortUrl(FieldPath),
}

/// One compiled argument template.
#[derive(Debug, Clone)]
pub struct ArgTemplate(Vec<Tok>);

impl ArgTemplate {
    pub fn parse(text: &str) -> Result<Self, TemplateError> {
        let mut toks = Vec::new();
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                toks.push(Tok::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let end = after
                .find('}')
                .ok_or_else(|| TemplateError::Unterminated(text.to_string()))?;
            let inner = &after[..end];
            let tok = if inner == "event" {
                Tok::Event
            } else if let Some(path) = inner.strip_prefix("shorturl:") {
                Tok::ShortUrl(FieldPath::parse(path)?)
            } else if inner.is_empty() {
                return Err(TemplateError::EmptyToken(text.to_string()));
            } else {
                Tok::Path(FieldPath::parse(inner)?)
            };
            toks.push(tok);
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            toks.push(Tok::Literal(rest.to_string()));
        }
        Ok(ArgTemplate(toks))
    }

    /// Renders the template against an event. Unresolvable paths become
    /// empty strings; shortening failures fall back to the long URL.
    pub async fn render(&self, event: &Event, shortener: Option<&UrlShortener>) -> String {
        let mut out = String::new();
        for tok in &self.0 {
            match tok {
                Tok::Literal(text) => out.push_str(text),
                Tok::Event => {
                    out.push_str(&serde_json::to_string(&event.fields).unwrap_or_default())
                }
                Tok::Path(path) => match path.resolve_first(&event.fields) {
                    Some(value) => out.push_str(&value),
                    None => warn!(repo = %event.repo, "template path has no value"),
                },
                Tok::ShortUrl(path) => match path.resolve_first(&event.fields) {
                    Some(url) => match shortener {
                        Some(shortener) => out.push_str(&shortener.shorten(&url).await),
                        None => out.push_str(&url),
                    },
                    None => warn!(repo = %event.repo, "shorturl template path has no value"),
                },
            }
        }
        out
    }
}

/// What an action does when dispatched.
#[derive(Debug, Clone)]
pub enum ActionKind {
    Noop,
    Process {
        command: String,
        workdir: Option<PathBuf>,
        args: Vec<ArgTemplate>,
    },
}

/// A named, fully compiled action definition.
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub rungroup: String,
}

/// Resolves routed action names and hands processes to the scheduler.
#[derive(Clone)]
pub struct ActionDispatcher {
    actions: Arc<HashMap<String, Action>>,
    scheduler: Scheduler,
    shortener: Option<Arc<UrlShortener>>,
    reporter: Reporter,
}

impl ActionDispatcher {
    pub fn new(
        actions: HashMap<String, Action>,
        scheduler: Scheduler,
        shortener: Option<Arc<UrlShortener>>,
        reporter: Reporter,
    ) -> Self {
        ActionDispatcher {
            actions: Arc::new(actions),
            scheduler,
            shortener,
            reporter,
        }
    }

    /// Dispatches one routed action for an event.
    pub async fn dispatch(&self, action_name: &str, event: &Event) {
        // Config validation guarantees routed names exist; guard anyway.
        let Some(action) = self.actions.get(action_name) else {
            warn!(action = action_name, "routed action is not defined");
            return;
        };
        match &action.kind {
            ActionKind::Noop => {
                self.reporter
                    .action_outcome(&action.name, &ActionOutcome::Success);
            }
            ActionKind::Process {
                command,
                workdir,
                args,
            } => {
                let mut rendered = Vec::with_capacity(args.len());
                for template in args {
                    rendered.push(template.render(event, self.shortener.as_deref()).await);
                }
                self.scheduler.submit(
                    &action.rungroup,
                    RunRequest {
                        action: action.name.clone(),
                        command: command.clone(),
                        args: rendered,
                        workdir: workdir.clone(),
                    },
                );
            }
        }
    }
}
