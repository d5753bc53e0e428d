// src/config/model.rs

use serde::Deserialize;
use serde_json::Value;

use crate::coordinator::RunBudget;
use crate::types::{JoinPolicy, Options, WorkerSpec};

/// A scenario file exactly as read from TOML.
///
/// ```toml
/// [budget]
/// operation_timeout = 5.0
/// runtime_timeout = 30.0
/// join = "all"
///
/// [initial]
/// greeting = "hello"
///
/// [[worker]]
/// kind = "sleep"
/// name = "sleeper"
/// args = { seconds = 0.2 }
/// ```
///
/// Durations are seconds. Only `[[worker]]` is required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawScenarioFile {
    #[serde(default)]
    pub budget: BudgetSection,

    /// Initial options handed to every worker.
    #[serde(default)]
    pub initial: Options,

    /// Workers in registration order.
    #[serde(default, rename = "worker")]
    pub workers: Vec<WorkerSection>,
}

/// `[budget]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetSection {
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout: f64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: f64,

    #[serde(default = "default_ready_probe")]
    pub ready_probe: f64,

    #[serde(default)]
    pub ready_timeout: Option<f64>,

    #[serde(default)]
    pub runtime_timeout: Option<f64>,

    #[serde(default)]
    pub join: JoinPolicy,
}

fn default_operation_timeout() -> f64 {
    5.0
}

fn default_poll_interval() -> f64 {
    0.1
}

fn default_ready_probe() -> f64 {
    0.5
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self {
            operation_timeout: default_operation_timeout(),
            poll_interval: default_poll_interval(),
            ready_probe: default_ready_probe(),
            ready_timeout: None,
            runtime_timeout: None,
            join: JoinPolicy::default(),
        }
    }
}

/// One `[[worker]]` entry. `name` defaults to `kind`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    pub kind: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub args: Value,
}

impl WorkerSection {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.kind)
    }

    pub fn to_spec(&self) -> WorkerSpec {
        WorkerSpec::new(&self.kind)
            .named(self.name())
            .args(self.args.clone())
    }
}

/// A validated scenario, ready to drive a coordinator.
///
/// Build it with `ScenarioFile::try_from(raw)` (see `validate.rs`).
#[derive(Debug, Clone)]
pub struct ScenarioFile {
    pub budget: RunBudget,
    pub join: JoinPolicy,
    pub initial: Options,
    pub workers: Vec<WorkerSpec>,
}

impl ScenarioFile {
    pub(crate) fn new_unchecked(
        budget: RunBudget,
        join: JoinPolicy,
        initial: Options,
        workers: Vec<WorkerSpec>,
    ) -> Self {
        Self {
            budget,
            join,
            initial,
            workers,
        }
    }
}
