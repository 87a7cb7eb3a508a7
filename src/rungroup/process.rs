//! Subprocess spawning and confirmed termination.
//!
//! Preemption needs "confirmed dead", not "asked to stop": a replacement
//! must not start while the old process might still hold its resources.
//! Termination is therefore SIGTERM, a bounded grace period, then SIGKILL,
//! and always ends in an observed exit.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// How a supervised process ended.
#[derive(Debug)]
pub enum ExitOutcome {
    /// Ran to completion with this status.
    Exited(ExitStatus),
    /// Stopped by preemption before completing.
    Terminated,
    /// The wait itself failed; the exit status is unknown.
    WaitFailed(std::io::Error),
}

/// A running subprocess owned by the scheduler.
pub struct ProcessHandle {
    child: Child,
}

impl ProcessHandle {
    /// Spawns the command with the given arguments, optionally in a working
    /// directory.
    pub fn spawn(
        command: &str,
        args: &[String],
        workdir: Option<&PathBuf>,
    ) -> std::io::Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = workdir {
            cmd.current_dir(dir);
        }
        Ok(ProcessHandle { child: cmd.spawn()? })
    }

    /// Waits for the process to exit, or terminates it when `stop` fires.
    ///
    /// Termination sends SIGTERM first and escalates to SIGKILL after the
    /// grace period; either way this only returns once the exit has been
    /// observed.
    pub async fn wait(mut self, stop: &CancellationToken, grace: Duration) -> ExitOutcome {
        tokio::select! {
            status = self.child.wait() => match status {
                Ok(status) => ExitOutcome::Exited(status),
                Err(error) => ExitOutcome::WaitFailed(error),
            },
            _ = stop.cancelled() => {
                self.terminate(grace).await;
                ExitOutcome::Terminated
            }
        }
    }

    async fn terminate(&mut self, grace: Duration) {
        self.send_sigterm();
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(grace_secs = grace.as_secs_f64(), "grace period elapsed, killing process");
                if let Err(error) = self.child.start_kill() {
                    warn!(%error, "failed to deliver SIGKILL");
                }
                let _ = self.child.wait().await;
            }
        }
    }

    #[cfg(unix)]
    fn send_sigterm(&mut self) {
        match self.child.id() {
            // Already reaped; nothing to signal.
            None => {}
            Some(pid) => {
                // SAFETY: plain kill(2) call on a pid we own.
                let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if rc != 0 {
                    warn!(pid, "failed to deliver SIGTERM");
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn send_sigterm(&mut self) {
        // No SIGTERM equivalent; go straight to hard kill.
        if let Err(error) = self.child.start_kill() {
            warn!(%error, "failed to kill process");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> ProcessHandle {
        ProcessHandle::spawn("sh", &["-c".to_string(), script.to_string()], None).unwrap()
    }

    #[tokio::test]
    async fn exit_status_is_observed() {
        let stop = CancellationToken::new();
        match sh("exit 3").wait(&stop, Duration::from_secs(1)).await {
            ExitOutcome::Exited(status) => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_terminates_before_grace_expires() {
        let stop = CancellationToken::new();
        stop.cancel();
        let started = Instant::now();
        let outcome = sh("sleep 30").wait(&stop, Duration::from_secs(5)).await;
        assert!(matches!(outcome, ExitOutcome::Terminated));
        // SIGTERM alone should do it; the SIGKILL path would take 5s.
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn sigterm_immune_process_is_killed_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let ready = dir.path().join("ready");
        let handle = ProcessHandle::spawn(
            "sh",
            &[
                "-c".to_string(),
                format!("trap '' TERM; : > {}; sleep 30", ready.display()),
            ],
            None,
        )
        .unwrap();

        // Cancel only once the trap is in place, or plain SIGTERM wins.
        let wait_start = Instant::now();
        while !ready.exists() {
            assert!(wait_start.elapsed() < Duration::from_secs(5), "shell never became ready");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let stop = CancellationToken::new();
        stop.cancel();
        let started = Instant::now();
        let outcome = handle.wait(&stop, Duration::from_millis(100)).await;
        assert!(matches!(outcome, ExitOutcome::Terminated));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn workdir_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), b"").unwrap();
        let handle = ProcessHandle::spawn(
            "sh",
            &["-c".to_string(), "test -e marker".to_string()],
            Some(&dir.path().to_path_buf()),
        )
        .unwrap();
        let stop = CancellationToken::new();
        match handle.wait(&stop, Duration::from_secs(1)).await {
            ExitOutcome::Exited(status) => assert!(status.success()),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        assert!(ProcessHandle::spawn("/nonexistent/command", &[], None).is_err());
    }
}
