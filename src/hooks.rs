//! Hook routing tables.
//!
//! The `hooks` configuration section maps each [`HookKind`] to a table of
//! repository names, each carrying a list of hook entries. The `default`
//! key applies to repositories with no entry of their own; a repo-specific
//! list fully replaces the default list, it is not merged with it.
//!
//! An entry fires when all of its guards pass: the branch restriction, the
//! ignored-user list, and the entry's filter rules. Every matching entry
//! fires, so one event can fan out to several actions.

use std::collections::HashMap;

use crate::filter::FilterRule;
use crate::webhooks::{Event, HookKind};

/// Branch restriction of a hook entry.
#[derive(Debug, Clone)]
pub enum BranchRule {
    /// No restriction; events without a branch also pass.
    All,
    /// Only the named branches. Events without a branch do not pass.
    Only(Vec<String>),
}

impl BranchRule {
    fn allows(&self, branch: Option<&str>) -> bool {
        match self {
            BranchRule::All => true,
            BranchRule::Only(names) => {
                branch.is_some_and(|b| names.iter().any(|n| n == b))
            }
        }
    }
}

/// One configured hook entry: the action to run plus its guards.
#[derive(Debug, Clone)]
pub struct HookEntry {
    /// Name of the action to dispatch, resolved against the action table.
    pub action: String,
    pub branches: BranchRule,
    /// Actors whose events never trigger this entry.
    pub ignore_users: Vec<String>,
    /// Inclusion guards; the entry fires only if every rule matches.
    pub filter: Vec<FilterRule>,
}

impl HookEntry {
    fn matches(&self, event: &Event) -> bool {
        if !self.branches.allows(event.branch()) {
            return false;
        }
        if let Some(actor) = event.actor() {
            if self.ignore_users.iter().any(|u| u == actor) {
                return false;
            }
        }
        self.filter.iter().all(|rule| rule.matches(&event.fields))
    }
}

/// Repository key used when no repo-specific entry list exists.
pub const DEFAULT_REPO: &str = "default";

/// The compiled routing table for all hook kinds.
#[derive(Debug, Clone, Default)]
pub struct Router {
    hooks: HashMap<HookKind, HashMap<String, Vec<HookEntry>>>,
}

impl Router {
    pub fn new(hooks: HashMap<HookKind, HashMap<String, Vec<HookEntry>>>) -> Self {
        Router { hooks }
    }

    /// Returns the action names of every entry that matches the event, in
    /// configuration order.
    pub fn route(&self, event: &Event) -> Vec<&str> {
        let Some(table) = self.hooks.get(&event.hook) else {
            return Vec::new();
        };
        let entries = table
            .get(event.repo.as_str())
            .or_else(|| table.get(DEFAULT_REPO));
        let Some(entries) = entries else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|entry| entry.matches(event))
            .map(|entry| entry.action.as_str())
            .collect()
    }
}
