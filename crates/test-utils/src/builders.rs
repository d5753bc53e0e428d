#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use lockstep::coordinator::{Coordinator, RunBudget};
use lockstep::types::{JoinPolicy, Options, WorkerSpec};
use lockstep::worker::WorkerRegistry;

use crate::fixtures::{launcher, registry};

/// Builder for a `Coordinator` over the fixture registry, spawning workers
/// from the current test binary.
pub struct ScenarioBuilder {
    registry: Arc<WorkerRegistry>,
    workers: Vec<WorkerSpec>,
    initial: Options,
    budget: RunBudget,
    join: JoinPolicy,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(registry()),
            workers: Vec::new(),
            initial: Options::new(),
            budget: RunBudget::default(),
            join: JoinPolicy::default(),
        }
    }

    /// Use a different registry on the coordinator side. Children always
    /// use the fixture registry.
    pub fn with_registry(mut self, registry: WorkerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Add a `probe` worker with the given args.
    pub fn probe(mut self, name: &str, args: Value) -> Self {
        self.workers
            .push(WorkerSpec::new("probe").named(name).args(args));
        self
    }

    pub fn worker(mut self, spec: WorkerSpec) -> Self {
        self.workers.push(spec);
        self
    }

    pub fn initial(mut self, initial: Value) -> Self {
        self.initial = initial
            .as_object()
            .cloned()
            .expect("initial options must be an object");
        self
    }

    pub fn runtime_timeout(mut self, seconds: f64) -> Self {
        self.budget.runtime_timeout = Some(Duration::from_secs_f64(seconds));
        self
    }

    pub fn ready_timeout(mut self, seconds: f64) -> Self {
        self.budget.ready_timeout = Some(Duration::from_secs_f64(seconds));
        self
    }

    pub fn operation_timeout(mut self, seconds: f64) -> Self {
        self.budget.operation_timeout = Duration::from_secs_f64(seconds);
        self
    }

    pub fn join(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }

    pub fn build(self) -> Coordinator {
        Coordinator::builder(self.registry)
            .launcher(launcher())
            .workers(self.workers)
            .initial(self.initial)
            .budget(self.budget)
            .join(self.join)
            .build()
            .expect("Failed to build coordinator from scenario builder")
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}
