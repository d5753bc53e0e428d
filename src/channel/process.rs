// src/channel/process.rs

//! Launching worker processes and stopping them again.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::errors::{LockstepError, Result};
use crate::types::WorkerSpec;
use crate::worker::dispatch::WORKER_ENV;

/// Number of polite termination requests before escalating to a kill.
const TERM_ATTEMPTS: u32 = 5;
const TERMINATE_POLL: Duration = Duration::from_millis(20);

/// How worker processes are started.
///
/// Every worker is the host program re-executed with `LOCKSTEP_WORKER` set;
/// the host must call [`dispatch`](crate::worker::dispatch) before doing
/// anything else.
#[derive(Debug, Clone)]
pub struct Launcher {
    program: PathBuf,
    args: Vec<OsString>,
    env: Vec<(OsString, OsString)>,
}

impl Launcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Re-execute the running binary.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(exe))
    }

    /// Re-execute a libtest binary so that only the test called `entry` runs
    /// in the child. That test must call `dispatch`.
    pub fn test_harness(entry: &str) -> Result<Self> {
        Ok(Self::current_exe()?.args([
            entry,
            "--exact",
            "--nocapture",
            "--test-threads=1",
            "-q",
        ]))
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    /// Spawn one worker process with piped stdio.
    pub(crate) fn spawn(&self, spec: &WorkerSpec) -> Result<Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .env(WORKER_ENV, &spec.kind)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Errors built in the worker carry a backtrace only when asked to.
        if std::env::var_os("RUST_LIB_BACKTRACE").is_none()
            && std::env::var_os("RUST_BACKTRACE").is_none()
        {
            cmd.env("RUST_LIB_BACKTRACE", "1");
        }

        debug!(
            worker = %spec.name,
            kind = %spec.kind,
            program = ?self.program,
            "spawning worker process"
        );

        cmd.spawn().map_err(|source| LockstepError::Spawn {
            worker: spec.name.clone(),
            source,
        })
    }
}

/// Stop `child`, asking politely first and killing it if it does not go.
///
/// Returns once the OS reports the process as exited (and reaped).
pub(crate) async fn terminate_child(worker: &str, child: &mut Child) {
    let mut attempts: u32 = 0;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(worker, %status, attempts, "worker process is gone");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(worker, error = %e, "could not query worker process; killing it");
                if let Err(e) = child.kill().await {
                    debug!(worker, error = %e, "kill failed");
                }
                return;
            }
        }

        attempts += 1;
        if attempts <= TERM_ATTEMPTS {
            request_stop(worker, child);
        } else if let Err(e) = child.start_kill() {
            debug!(worker, error = %e, "kill request failed");
        }

        tokio::time::sleep(TERMINATE_POLL).await;
    }
}

#[cfg(unix)]
fn request_stop(worker: &str, child: &mut Child) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(worker, pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_stop(worker: &str, child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(worker, error = %e, "kill request failed");
    }
}
