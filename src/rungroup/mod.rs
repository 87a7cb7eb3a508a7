//! Named rungroups: per-group serialized subprocess execution.
//!
//! Every process action belongs to a rungroup. Within one group at most
//! one process runs at a time, with a single pending slot behind it;
//! distinct groups are fully independent. The per-group policy decides
//! what a new request does when the group is busy:
//!
//! - `clear_previous`: the new request replaces whatever waits in the
//!   pending slot.
//! - `stop_running`: additionally, the running process is terminated so
//!   the new request starts as soon as the old one is confirmed dead.
//! - neither: the pending slot is first come first served; a request
//!   arriving while it is occupied is dropped.
//!
//! Preempted, replaced and dropped requests are all reported as failures
//! so nothing disappears silently.

pub mod process;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::report::{ActionOutcome, Reporter};
use process::{ExitOutcome, ProcessHandle};

/// A request to run one process on behalf of an action.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Action name, used in outcome reports.
    pub action: String,
    pub command: String,
    pub args: Vec<String>,
    pub workdir: Option<PathBuf>,
}

/// Preemption behavior of one rungroup. Defaults to queue-then-drop.
#[derive(Debug, Clone, Copy, Default)]
pub struct RungroupPolicy {
    pub clear_previous: bool,
    pub stop_running: bool,
}

#[derive(Default)]
struct GroupState {
    /// Cancellation handle of the running process, if any.
    running: Option<CancellationToken>,
    pending: Option<RunRequest>,
}

struct SchedulerInner {
    groups: Mutex<HashMap<String, GroupState>>,
    policies: HashMap<String, RungroupPolicy>,
    grace: Duration,
    reporter: Reporter,
}

impl SchedulerInner {
    fn lock_groups(&self) -> MutexGuard<'_, HashMap<String, GroupState>> {
        self.groups.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands process requests to their rungroups and enforces the policies.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Grace period between SIGTERM and SIGKILL.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

impl Scheduler {
    pub fn new(
        policies: HashMap<String, RungroupPolicy>,
        grace: Duration,
        reporter: Reporter,
    ) -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                groups: Mutex::new(HashMap::new()),
                policies,
                grace,
                reporter,
            }),
        }
    }

    /// Submits a request to its rungroup. Never blocks; the outcome is
    /// reported asynchronously.
    pub fn submit(&self, group: &str, request: RunRequest) {
        let policy = self
            .inner
            .policies
            .get(group)
            .copied()
            .unwrap_or_default();

        let mut discarded = None;
        {
            let mut groups = self.inner.lock_groups();
            let state = groups.entry(group.to_string()).or_default();
            if state.running.is_none() {
                let token = CancellationToken::new();
                state.running = Some(token.clone());
                drop(groups);
                debug!(group, action = %request.action, "starting process");
                spawn_runner(Arc::clone(&self.inner), group.to_string(), request, token);
                return;
            }

            if policy.stop_running {
                debug!(group, action = %request.action, "terminating running process");
                if let Some(running) = &state.running {
                    running.cancel();
                }
            }
            if policy.stop_running || policy.clear_previous {
                discarded = state.pending.replace(request);
            } else if state.pending.is_none() {
                debug!(group, action = %request.action, "queued behind running process");
                state.pending = Some(request);
            } else {
                debug!(group, action = %request.action, "pending slot occupied, dropping");
                discarded = Some(request);
            }
        }
        if let Some(dropped) = discarded {
            self.inner.reporter.action_outcome(
                &dropped.action,
                &ActionOutcome::Failed(format!("discarded, rungroup {group} busy")),
            );
        }
    }
}

fn spawn_runner(
    inner: Arc<SchedulerInner>,
    group: String,
    mut request: RunRequest,
    mut token: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let outcome = run_one(&inner, &request, &token).await;
            inner.reporter.action_outcome(&request.action, &outcome);

            let mut groups = inner.lock_groups();
            let state = groups.entry(group.clone()).or_default();
            match state.pending.take() {
                Some(next) => {
                    let fresh = CancellationToken::new();
                    state.running = Some(fresh.clone());
                    drop(groups);
                    debug!(group, action = %next.action, "starting pending process");
                    request = next;
                    token = fresh;
                }
                None => {
                    state.running = None;
                    return;
                }
            }
        }
    });
}

async fn run_one(
    inner: &SchedulerInner,
    request: &RunRequest,
    token: &CancellationToken,
) -> ActionOutcome {
    let handle = match ProcessHandle::spawn(&request.command, &request.args, request.workdir.as_ref())
    {
        Ok(handle) => handle,
        Err(error) => return ActionOutcome::Failed(format!("spawn failed: {error}")),
    };
    match handle.wait(token, inner.grace).await {
        ExitOutcome::Exited(status) if status.success() => ActionOutcome::Success,
        ExitOutcome::Exited(status) => ActionOutcome::Failed(status.to_string()),
        ExitOutcome::Terminated => ActionOutcome::Failed("terminated by a newer request".into()),
        ExitOutcome::WaitFailed(error) => ActionOutcome::Failed(format!("wait failed: {error}")),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::report::Notification;
    use std::time::Instant;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn scheduler(
        policies: &[(&str, RungroupPolicy)],
    ) -> (Scheduler, mpsc::UnboundedReceiver<Notification>) {
        let (reporter, rx) = Reporter::new(
            HashMap::new(),
            HashMap::new(),
            vec!["admin".to_string()],
        );
        let policies = policies
            .iter()
            .map(|(name, policy)| (name.to_string(), *policy))
            .collect();
        (
            Scheduler::new(policies, Duration::from_secs(1), reporter),
            rx,
        )
    }

    fn sh_request(action: &str, script: &str) -> RunRequest {
        RunRequest {
            action: action.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            workdir: None,
        }
    }

    async fn next_report(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Notification {
        timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a report")
            .expect("reporter dropped")
    }

    #[tokio::test]
    async fn processes_in_one_group_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");
        let script = |n: u32| {
            format!(
                "echo start-{n} >> {log}; sleep 0.2; echo end-{n} >> {log}",
                log = log.display()
            )
        };

        let (scheduler, mut rx) = scheduler(&[]);
        scheduler.submit("g", sh_request("first", &script(1)));
        scheduler.submit("g", sh_request("second", &script(2)));

        assert_eq!(next_report(&mut rx).await.text, "action first finished");
        assert_eq!(next_report(&mut rx).await.text, "action second finished");

        let contents = std::fs::read_to_string(&log).unwrap();
        assert_eq!(
            contents.lines().collect::<Vec<_>>(),
            ["start-1", "end-1", "start-2", "end-2"]
        );
    }

    #[tokio::test]
    async fn default_policy_drops_when_pending_slot_is_occupied() {
        let (scheduler, mut rx) = scheduler(&[]);
        scheduler.submit("g", sh_request("running", "sleep 0.3"));
        scheduler.submit("g", sh_request("queued", "true"));
        scheduler.submit("g", sh_request("latecomer", "true"));

        // The latecomer is rejected immediately, before the others finish.
        let report = next_report(&mut rx).await;
        assert_eq!(report.text, "action latecomer failed: discarded, rungroup g busy");
        assert_eq!(next_report(&mut rx).await.text, "action running finished");
        assert_eq!(next_report(&mut rx).await.text, "action queued finished");
    }

    #[tokio::test]
    async fn stop_running_terminates_and_replaces() {
        let policy = RungroupPolicy {
            clear_previous: false,
            stop_running: true,
        };
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("log");

        let (scheduler, mut rx) = scheduler(&[("g", policy)]);
        scheduler.submit("g", sh_request("old", "sleep 30"));
        // Give the process a moment to actually start.
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.submit(
            "g",
            sh_request("new", &format!("echo ran >> {}", log.display())),
        );

        let report = next_report(&mut rx).await;
        assert_eq!(report.text, "action old failed: terminated by a newer request");
        assert_eq!(next_report(&mut rx).await.text, "action new finished");
        assert_eq!(std::fs::read_to_string(&log).unwrap(), "ran\n");
    }

    #[tokio::test]
    async fn clear_previous_replaces_the_pending_request() {
        let policy = RungroupPolicy {
            clear_previous: true,
            stop_running: false,
        };
        let (scheduler, mut rx) = scheduler(&[("g", policy)]);
        scheduler.submit("g", sh_request("running", "sleep 0.3"));
        scheduler.submit("g", sh_request("stale", "true"));
        scheduler.submit("g", sh_request("fresh", "true"));

        let report = next_report(&mut rx).await;
        assert_eq!(report.text, "action stale failed: discarded, rungroup g busy");
        assert_eq!(next_report(&mut rx).await.text, "action running finished");
        assert_eq!(next_report(&mut rx).await.text, "action fresh finished");
    }

    #[tokio::test]
    async fn distinct_groups_run_in_parallel() {
        let (scheduler, mut rx) = scheduler(&[]);
        let started = Instant::now();
        scheduler.submit("a", sh_request("left", "sleep 0.3"));
        scheduler.submit("b", sh_request("right", "sleep 0.3"));

        assert!(next_report(&mut rx).await.text.contains("finished"));
        assert!(next_report(&mut rx).await.text.contains("finished"));
        // Serialized execution would take at least 0.6s.
        assert!(started.elapsed() < Duration::from_millis(550));
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_and_frees_the_group() {
        let (scheduler, mut rx) = scheduler(&[]);
        let mut bad = sh_request("broken", "true");
        bad.command = "/nonexistent/command".to_string();
        scheduler.submit("g", bad);

        let report = next_report(&mut rx).await;
        assert!(report.text.starts_with("action broken failed: spawn failed"));

        // The group is usable again afterwards.
        scheduler.submit("g", sh_request("ok", "true"));
        assert_eq!(next_report(&mut rx).await.text, "action ok finished");
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_failure() {
        let (scheduler, mut rx) = scheduler(&[]);
        scheduler.submit("g", sh_request("failing", "exit 2"));
        let report = next_report(&mut rx).await;
        assert!(report.text.starts_with("action failing failed:"));
        assert!(report.text.contains('2'));
    }
}
