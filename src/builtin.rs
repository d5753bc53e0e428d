// src/builtin.rs

//! Worker kinds available to scenario files run by the `lockstep` binary.
//!
//! | kind     | args                                              |
//! |----------|---------------------------------------------------|
//! | `idle`   | `contribute` (table), `seconds` (default: forever)|
//! | `sleep`  | `seconds`                                         |
//! | `fail`   | `stage` (contribute/setup/run), `message`         |
//! | `panic`  | `message`                                         |
//! | `expect` | `shared` (table), `initial` (table)               |

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::capsule::RemoteKind;
use crate::types::Options;
use crate::worker::{Worker, WorkerInit, WorkerRegistry};

/// Registry with every built-in kind.
pub fn registry() -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    registry
        .register("idle", Idle::new)
        .register("sleep", Sleep::new)
        .register("fail", Fail::new)
        .register("panic", Panic::new)
        .register("expect", Expect::new)
        .error_kind::<ScenarioFailure>();
    registry
}

/// The error raised by the `fail` and `expect` kinds.
#[derive(Debug, Error, PartialEq)]
#[error("{0}")]
pub struct ScenarioFailure(pub String);

impl RemoteKind for ScenarioFailure {
    const KIND: &'static str = "scenario_failure";

    fn rebuild(message: &str) -> Self {
        ScenarioFailure(message.to_string())
    }
}

fn args<T: for<'de> Deserialize<'de> + Default>(init: &WorkerInit) -> anyhow::Result<T> {
    if init.args.is_null() {
        Ok(T::default())
    } else {
        init.args_as()
    }
}

fn sleep_secs(seconds: f64) -> anyhow::Result<()> {
    let duration = Duration::try_from_secs_f64(seconds)?;
    thread::sleep(duration);
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct IdleArgs {
    #[serde(default)]
    contribute: Options,
    #[serde(default)]
    seconds: Option<f64>,
}

/// Contributes a fixed table, then idles until torn down (or for `seconds`).
struct Idle {
    args: IdleArgs,
}

impl Idle {
    fn new(init: WorkerInit) -> anyhow::Result<Self> {
        Ok(Self { args: args(&init)? })
    }
}

impl Worker for Idle {
    fn contribute(&mut self) -> anyhow::Result<Options> {
        Ok(self.args.contribute.clone())
    }

    fn run(&mut self) -> anyhow::Result<()> {
        match self.args.seconds {
            Some(seconds) => sleep_secs(seconds),
            None => loop {
                thread::sleep(Duration::from_secs(3600));
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SleepArgs {
    #[serde(default)]
    seconds: f64,
}

struct Sleep {
    seconds: f64,
}

impl Sleep {
    fn new(init: WorkerInit) -> anyhow::Result<Self> {
        let args: SleepArgs = args(&init)?;
        Ok(Self {
            seconds: args.seconds,
        })
    }
}

impl Worker for Sleep {
    fn run(&mut self) -> anyhow::Result<()> {
        sleep_secs(self.seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum FailStage {
    Contribute,
    Setup,
    #[default]
    Run,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FailArgs {
    #[serde(default)]
    stage: FailStage,
    #[serde(default)]
    message: Option<String>,
}

struct Fail {
    stage: FailStage,
    message: String,
}

impl Fail {
    fn new(init: WorkerInit) -> anyhow::Result<Self> {
        let args: FailArgs = args(&init)?;
        Ok(Self {
            stage: args.stage,
            message: args
                .message
                .unwrap_or_else(|| format!("{} failed on purpose", init.name)),
        })
    }

    fn fail_at(&self, stage: FailStage) -> anyhow::Result<()> {
        if self.stage == stage {
            return Err(ScenarioFailure(self.message.clone()).into());
        }
        Ok(())
    }
}

impl Worker for Fail {
    fn contribute(&mut self) -> anyhow::Result<Options> {
        self.fail_at(FailStage::Contribute)?;
        Ok(Options::new())
    }

    fn setup(&mut self, _shared: &Options) -> anyhow::Result<()> {
        self.fail_at(FailStage::Setup)
    }

    fn run(&mut self) -> anyhow::Result<()> {
        self.fail_at(FailStage::Run)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PanicArgs {
    #[serde(default)]
    message: Option<String>,
}

struct Panic {
    message: String,
}

impl Panic {
    fn new(init: WorkerInit) -> anyhow::Result<Self> {
        let args: PanicArgs = args(&init)?;
        Ok(Self {
            message: args.message.unwrap_or_else(|| "worker panicked".into()),
        })
    }
}

impl Worker for Panic {
    fn run(&mut self) -> anyhow::Result<()> {
        panic!("{}", self.message);
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpectArgs {
    #[serde(default)]
    shared: Options,
    #[serde(default)]
    initial: Options,
}

/// Fails unless the options it receives contain the expected entries.
struct Expect {
    expected: ExpectArgs,
    initial: Options,
    shared: Options,
}

impl Expect {
    fn new(init: WorkerInit) -> anyhow::Result<Self> {
        Ok(Self {
            expected: args(&init)?,
            initial: init.initial,
            shared: Options::new(),
        })
    }
}

fn check_subset(what: &str, expected: &Options, actual: &Options) -> anyhow::Result<()> {
    for (key, want) in expected {
        let got = actual.get(key).unwrap_or(&Value::Null);
        if got != want {
            return Err(ScenarioFailure(format!(
                "{what} option `{key}`: expected {want}, got {got}"
            ))
            .into());
        }
    }
    Ok(())
}

impl Worker for Expect {
    fn setup(&mut self, shared: &Options) -> anyhow::Result<()> {
        self.shared = shared.clone();
        Ok(())
    }

    fn run(&mut self) -> anyhow::Result<()> {
        check_subset("initial", &self.expected.initial, &self.initial)?;
        check_subset("shared", &self.expected.shared, &self.shared)
    }
}
