//! Worker kinds shared by the integration tests.
//!
//! Every integration test binary that spawns workers must contain
//!
//! ```ignore
//! #[test]
//! fn worker_entry() {
//!     lockstep_test_utils::serve_worker();
//! }
//! ```
//!
//! The coordinator re-executes the test binary with only that test selected,
//! and `serve_worker` turns the child into a worker.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use lockstep::capsule::RemoteKind;
use lockstep::channel::Launcher;
use lockstep::types::Options;
use lockstep::worker::{FnWorker, Worker, WorkerInit, WorkerRegistry, dispatch};

/// Name of the test each binary must define as the worker entry point.
pub const WORKER_ENTRY: &str = "worker_entry";

/// An error type registered on both sides, so it comes back typed.
#[derive(Debug, Error, PartialEq)]
#[error("{0}")]
pub struct ValueError(pub String);

impl RemoteKind for ValueError {
    const KIND: &'static str = "value_error";

    fn rebuild(message: &str) -> Self {
        ValueError(message.to_string())
    }
}

/// Worker registry used by coordinator and children alike.
///
/// - `probe`: see [`ProbeArgs`].
/// - `seeded`: a closure-based worker that contributes `{"a": 1}` and fails
///   unless it sees initial `{"x": 0}` and shared `{"a": 1}`.
pub fn registry() -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    registry
        .register("probe", Probe::new)
        .register_fn(
            "seeded",
            FnWorker::new(|ctx| {
                anyhow::ensure!(
                    ctx.initial.get("x") == Some(&Value::from(0)),
                    "initial options were {:?}",
                    ctx.initial
                );
                anyhow::ensure!(
                    ctx.shared.get("a") == Some(&Value::from(1)),
                    "shared options were {:?}",
                    ctx.shared
                );
                Ok(())
            })
            .contribute(|_| {
                let mut options = Options::new();
                options.insert("a".into(), 1.into());
                Ok(options)
            }),
        )
        .error_kind::<ValueError>();
    registry
}

/// Launcher that re-executes the current test binary at [`WORKER_ENTRY`].
pub fn launcher() -> Launcher {
    Launcher::test_harness(WORKER_ENTRY).expect("locate current test binary")
}

/// Body of the worker entry test. Returns immediately in the parent.
pub fn serve_worker() {
    dispatch(&registry());
}

/// Pids of every worker that recorded an event in the `record` file.
pub fn recorded_pids(path: &Path) -> Vec<u32> {
    let mut pids: Vec<u32> = std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.split_whitespace().nth(3)?.parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Assert that none of `pids` is still running.
#[cfg(target_os = "linux")]
pub fn assert_gone(pids: &[u32]) {
    for pid in pids {
        assert!(
            !Path::new(&format!("/proc/{pid}")).exists(),
            "worker process {pid} is still around"
        );
    }
}

#[cfg(not(target_os = "linux"))]
pub fn assert_gone(_pids: &[u32]) {}

/// Arguments of the `probe` worker. Everything is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeArgs {
    /// Options to contribute.
    pub contribute: Options,
    /// Fail in `run` unless the shared options contain these entries.
    pub expect_shared: Options,
    /// Fail in `run` unless the initial options contain these entries.
    pub expect_initial: Options,
    /// Append `ready <micros> <name> <pid>` after setup and
    /// `run <micros> <name> <pid>` when run starts.
    pub record: Option<PathBuf>,
    /// Seconds to sleep in `contribute`.
    pub contribute_sleep: Option<f64>,
    /// Seconds to sleep in `setup`, before recording readiness.
    pub setup_sleep: Option<f64>,
    /// Seconds to sleep in `run`.
    pub sleep: Option<f64>,
    /// Stage to fail at: `contribute`, `setup` or `run`.
    pub fail_at: Option<String>,
    /// Message of the failure.
    pub message: Option<String>,
    /// Panic instead of returning a `ValueError`.
    pub panic: bool,
    /// Exit the process with this code instead of failing.
    pub exit_code: Option<i32>,
    /// Die from SIGKILL at `fail_at` instead of failing.
    pub kill_self: bool,
    /// Write invalid UTF-8 and then this many bytes to stderr in `run`.
    pub stderr_noise: Option<usize>,
    /// Start `sleep <secs>` in `run`, inheriting stdout, and leave it behind.
    pub orphan: Option<f64>,
}

pub struct Probe {
    name: String,
    args: ProbeArgs,
    initial: Options,
    shared: Options,
}

impl Probe {
    pub fn new(init: WorkerInit) -> anyhow::Result<Self> {
        let args = if init.args.is_null() {
            ProbeArgs::default()
        } else {
            init.args_as()?
        };
        Ok(Self {
            name: init.name,
            args,
            initial: init.initial,
            shared: Options::new(),
        })
    }

    fn maybe_fail(&self, stage: &str) -> anyhow::Result<()> {
        if self.args.fail_at.as_deref() != Some(stage) {
            return Ok(());
        }
        if let Some(code) = self.args.exit_code {
            std::process::exit(code);
        }
        if self.args.kill_self {
            kill_self();
        }
        let message = self
            .args
            .message
            .clone()
            .unwrap_or_else(|| format!("{} failed in {stage}", self.name));
        if self.args.panic {
            panic!("{message}");
        }
        Err(ValueError(message).into())
    }

    fn record(&self, event: &str) -> anyhow::Result<()> {
        let Some(path) = &self.args.record else {
            return Ok(());
        };
        let micros = SystemTime::now().duration_since(UNIX_EPOCH)?.as_micros();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open record file {}", path.display()))?;
        writeln!(file, "{event} {micros} {} {}", self.name, std::process::id())?;
        Ok(())
    }
}

#[cfg(unix)]
fn kill_self() {
    use nix::sys::signal::{Signal, raise};
    // Only returns if the signal could not be raised.
    let _ = raise(Signal::SIGKILL);
    std::process::abort();
}

#[cfg(not(unix))]
fn kill_self() {
    std::process::abort();
}

fn pause(seconds: Option<f64>) {
    if let Some(seconds) = seconds {
        thread::sleep(Duration::from_secs_f64(seconds));
    }
}

fn check_subset(what: &str, expected: &Options, actual: &Options) -> anyhow::Result<()> {
    for (key, want) in expected {
        let got = actual.get(key);
        anyhow::ensure!(
            got == Some(want),
            "{what} option `{key}`: expected {want}, got {got:?}"
        );
    }
    Ok(())
}

impl Worker for Probe {
    fn contribute(&mut self) -> anyhow::Result<Options> {
        pause(self.args.contribute_sleep);
        self.maybe_fail("contribute")?;
        Ok(self.args.contribute.clone())
    }

    fn setup(&mut self, shared: &Options) -> anyhow::Result<()> {
        self.shared = shared.clone();
        pause(self.args.setup_sleep);
        self.maybe_fail("setup")?;
        self.record("ready")
    }

    fn run(&mut self) -> anyhow::Result<()> {
        self.record("run")?;
        if let Some(bytes) = self.args.stderr_noise {
            let mut stderr = std::io::stderr().lock();
            stderr.write_all(b"\xff\xfe not utf8\n")?;
            for _ in 0..bytes / 64 {
                stderr.write_all(&[b'.'; 63])?;
                stderr.write_all(b"\n")?;
            }
            stderr.flush()?;
        }
        if let Some(seconds) = self.args.orphan {
            Command::new("sleep")
                .arg(seconds.to_string())
                .spawn()
                .context("spawn orphan sleep")?;
        }
        check_subset("initial", &self.args.expect_initial, &self.initial)?;
        check_subset("shared", &self.args.expect_shared, &self.shared)?;
        pause(self.args.sleep);
        self.maybe_fail("run")
    }
}
