//! Configuration loading and validation.
//!
//! The YAML file is deserialized into raw structs and then compiled into
//! [`Settings`]: filter rules and argument templates are parsed, hook
//! entries are checked against the action table, and rungroup settings
//! must be referenced by at least one action. Any problem aborts startup
//! with a descriptive error; the relay never runs partially configured.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::actions::{Action, ActionKind, ArgTemplate, TemplateError};
use crate::filter::{parse_rules, FilterParseError, FilterRule};
use crate::hooks::{BranchRule, HookEntry, Router};
use crate::rungroup::RungroupPolicy;
use crate::shorten::ShortenerConfig;
use crate::webhooks::HookKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("bad filter rule in {context}: {source}")]
    Filter {
        context: String,
        source: FilterParseError,
    },

    #[error("hook entry for {hook}/{repo} references unknown action '{action}'")]
    UnknownAction {
        hook: HookKind,
        repo: String,
        action: String,
    },

    #[error("bad argument template in action '{action}': {source}")]
    Template {
        action: String,
        source: TemplateError,
    },

    #[error("rungroup_settings entry '{0}' is not referenced by any action")]
    UnusedRungroup(String),
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4000))
}

fn default_rungroup() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_listen")]
    listen: SocketAddr,
    tls: Option<TlsConfig>,
    github_secret: Option<String>,
    gitlab_secret: Option<String>,
    #[serde(default)]
    channels: HashMap<String, Vec<String>>,
    #[serde(default)]
    confidential_channels: HashMap<String, Vec<String>>,
    #[serde(default)]
    filter_rules: Vec<String>,
    #[serde(default)]
    hooks: HashMap<HookKind, HashMap<String, Vec<RawHookEntry>>>,
    #[serde(default)]
    actions: HashMap<String, RawAction>,
    #[serde(default)]
    rungroup_settings: HashMap<String, RawPolicy>,
    url_shortener: Option<ShortenerConfig>,
    #[serde(default)]
    prevent_flood: bool,
    #[serde(default)]
    report_users: Vec<String>,
}

/// Certificate and key for terminating TLS on the listener itself.
/// Absent means a plain TCP listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawHookEntry {
    action: String,
    /// Absent means all branches.
    branches: Option<Vec<String>>,
    #[serde(default)]
    ignore_users: Vec<String>,
    #[serde(default)]
    filter: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
enum RawAction {
    Noop,
    Process {
        command: String,
        workdir: Option<PathBuf>,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_rungroup")]
        rungroup: String,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawPolicy {
    #[serde(default)]
    clear_previous: bool,
    #[serde(default)]
    stop_running: bool,
}

/// Fully validated runtime settings.
pub struct Settings {
    pub listen: SocketAddr,
    pub tls: Option<TlsConfig>,
    pub github_secret: Option<String>,
    pub gitlab_secret: Option<String>,
    pub channels: HashMap<String, Vec<String>>,
    pub confidential_channels: HashMap<String, Vec<String>>,
    pub filter_rules: Vec<FilterRule>,
    pub router: Router,
    pub actions: HashMap<String, Action>,
    pub rungroup_policies: HashMap<String, RungroupPolicy>,
    pub shortener: Option<ShortenerConfig>,
    pub prevent_flood: bool,
    pub report_users: Vec<String>,
}

impl Settings {
    /// Loads and validates the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;

        let filter_rules =
            parse_rules(&raw.filter_rules).map_err(|source| ConfigError::Filter {
                context: "filter_rules".to_string(),
                source,
            })?;

        let actions = compile_actions(raw.actions)?;
        let router = compile_hooks(raw.hooks, &actions)?;

        let rungroup_policies: HashMap<String, RungroupPolicy> = raw
            .rungroup_settings
            .into_iter()
            .map(|(name, policy)| {
                (
                    name,
                    RungroupPolicy {
                        clear_previous: policy.clear_previous,
                        stop_running: policy.stop_running,
                    },
                )
            })
            .collect();
        for name in rungroup_policies.keys() {
            let referenced = actions.values().any(|action| {
                matches!(action.kind, ActionKind::Process { .. }) && action.rungroup == *name
            });
            if !referenced {
                return Err(ConfigError::UnusedRungroup(name.clone()));
            }
        }

        Ok(Settings {
            listen: raw.listen,
            tls: raw.tls,
            github_secret: raw.github_secret,
            gitlab_secret: raw.gitlab_secret,
            channels: raw.channels,
            confidential_channels: raw.confidential_channels,
            filter_rules,
            router,
            actions,
            rungroup_policies,
            shortener: raw.url_shortener,
            prevent_flood: raw.prevent_flood,
            report_users: raw.report_users,
        })
    }
}

fn compile_actions(
    raw: HashMap<String, RawAction>,
) -> Result<HashMap<String, Action>, ConfigError> {
    let mut actions = HashMap::with_capacity(raw.len());
    for (name, action) in raw {
        let compiled = match action {
            RawAction::Noop => Action {
                name: name.clone(),
                kind: ActionKind::Noop,
                rungroup: default_rungroup(),
            },
            RawAction::Process {
                command,
                workdir,
                args,
                rungroup,
            } => {
                let args = args
                    .iter()
                    .map(|template| ArgTemplate::parse(template))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|source| ConfigError::Template {
                        action: name.clone(),
                        source,
                    })?;
                Action {
                    name: name.clone(),
                    kind: ActionKind::Process {
                        command,
                        workdir,
                        args,
                    },
                    rungroup,
                }
            }
        };
        actions.insert(name, compiled);
    }
    Ok(actions)
}

fn compile_hooks(
    raw: HashMap<HookKind, HashMap<String, Vec<RawHookEntry>>>,
    actions: &HashMap<String, Action>,
) -> Result<Router, ConfigError> {
    let mut hooks = HashMap::with_capacity(raw.len());
    for (hook, repos) in raw {
        let mut table = HashMap::with_capacity(repos.len());
        for (repo, entries) in repos {
            let compiled = entries
                .into_iter()
                .map(|entry| {
                    if !actions.contains_key(&entry.action) {
                        return Err(ConfigError::UnknownAction {
                            hook,
                            repo: repo.clone(),
                            action: entry.action,
                        });
                    }
                    let filter =
                        parse_rules(&entry.filter).map_err(|source| ConfigError::Filter {
                            context: format!("hooks/{hook}/{repo}"),
                            source,
                        })?;
                    Ok(HookEntry {
                        action: entry.action,
                        branches: match entry.branches {
                            None => BranchRule::All,
                            Some(names) => BranchRule::Only(names),
                        },
                        ignore_users: entry.ignore_users,
                        filter,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            table.insert(repo, compiled);
        }
        hooks.insert(hook, table);
    }
    Ok(Router::new(hooks))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r##"
listen: 127.0.0.1:4001
tls:
  cert: /etc/hook-relay/cert.pem
  key: /etc/hook-relay/key.pem
github_secret: gh-secret
gitlab_secret: gl-secret
channels:
  my_project: ["#dev"]
  default: ["#misc"]
confidential_channels:
  secret_repo: ["#private"]
filter_rules:
  - 'eventtype == push AND pusher.name == bors'
hooks:
  Push:
    my_project:
      - action: deploy
        branches: [master]
        ignore_users: [bot]
    default:
      - action: announce
        filter: ['branch != master']
  PullRequest:
    default:
      - action: announce
actions:
  deploy:
    kind: process
    command: /usr/local/bin/deploy
    workdir: /srv/my_project
    args: ['--branch', '${branch}', '--payload', '${event}']
    rungroup: deploy
  announce:
    kind: noop
rungroup_settings:
  deploy: { clear_previous: true, stop_running: false }
url_shortener:
  method: GET
  url: https://sho.rt/create
  query: { url: $URL }
  accessor: { kind: json-field, path: shorturl }
prevent_flood: true
report_users: [admin]
"##;

    #[test]
    fn full_config_loads() {
        let settings = Settings::from_yaml(FULL).unwrap();
        assert_eq!(settings.listen.port(), 4001);
        let tls = settings.tls.as_ref().unwrap();
        assert_eq!(tls.cert, Path::new("/etc/hook-relay/cert.pem"));
        assert_eq!(tls.key, Path::new("/etc/hook-relay/key.pem"));
        assert_eq!(settings.github_secret.as_deref(), Some("gh-secret"));
        assert_eq!(settings.filter_rules.len(), 1);
        assert_eq!(settings.actions.len(), 2);
        assert!(settings.prevent_flood);
        assert!(settings.rungroup_policies["deploy"].clear_previous);
        assert!(settings.shortener.is_some());
        assert_eq!(settings.report_users, ["admin"]);
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let settings = Settings::from_yaml("github_secret: s\n").unwrap();
        assert_eq!(settings.listen, default_listen());
        assert!(settings.tls.is_none());
        assert!(settings.gitlab_secret.is_none());
        assert!(!settings.prevent_flood);
        assert!(settings.actions.is_empty());
    }

    #[test]
    fn unknown_action_in_hook_entry_is_rejected() {
        let yaml = r#"
hooks:
  Push:
    default:
      - action: ghost
"#;
        assert!(matches!(
            Settings::from_yaml(yaml),
            Err(ConfigError::UnknownAction { action, .. }) if action == "ghost"
        ));
    }

    #[test]
    fn malformed_filter_rule_is_rejected() {
        let yaml = "filter_rules: ['no operator']\n";
        assert!(matches!(
            Settings::from_yaml(yaml),
            Err(ConfigError::Filter { context, .. }) if context == "filter_rules"
        ));

        let yaml = r#"
actions:
  announce: { kind: noop }
hooks:
  Push:
    default:
      - action: announce
        filter: ['also broken']
"#;
        assert!(matches!(
            Settings::from_yaml(yaml),
            Err(ConfigError::Filter { .. })
        ));
    }

    #[test]
    fn malformed_template_is_rejected() {
        let yaml = r#"
actions:
  broken:
    kind: process
    command: /bin/true
    args: ['${unterminated']
"#;
        assert!(matches!(
            Settings::from_yaml(yaml),
            Err(ConfigError::Template { action, .. }) if action == "broken"
        ));
    }

    #[test]
    fn unreferenced_rungroup_settings_are_rejected() {
        let yaml = r#"
actions:
  announce: { kind: noop }
rungroup_settings:
  deploy: { stop_running: true }
"#;
        assert!(matches!(
            Settings::from_yaml(yaml),
            Err(ConfigError::UnusedRungroup(name)) if name == "deploy"
        ));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Settings::from_yaml("no_such_key: 1\n").is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        std::fs::write(&path, FULL).unwrap();
        assert!(Settings::load(&path).is_ok());
        assert!(matches!(
            Settings::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Io(_))
        ));
    }
}
