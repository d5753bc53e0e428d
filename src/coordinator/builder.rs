// src/coordinator/builder.rs

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::channel::Launcher;
use crate::errors::{LockstepError, Result};
use crate::types::{JoinPolicy, Options, WorkerSpec};
use crate::worker::WorkerRegistry;

use super::budget::RunBudget;
use super::core::{Coordinator, Seed};

/// Collects everything a [`Coordinator`] needs. Nothing is spawned until
/// [`Coordinator::run`].
pub struct CoordinatorBuilder {
    registry: Arc<WorkerRegistry>,
    launcher: Option<Launcher>,
    workers: Vec<WorkerSpec>,
    seed: Option<Seed>,
    budget: RunBudget,
    join: JoinPolicy,
}

impl CoordinatorBuilder {
    pub(crate) fn new(registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry,
            launcher: None,
            workers: Vec::new(),
            seed: None,
            budget: RunBudget::default(),
            join: JoinPolicy::default(),
        }
    }

    /// How worker processes are started. Defaults to re-executing the
    /// current binary.
    pub fn launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Register one worker. Registration order is merge order.
    pub fn worker(mut self, spec: WorkerSpec) -> Self {
        self.workers.push(spec);
        self
    }

    pub fn workers(mut self, specs: impl IntoIterator<Item = WorkerSpec>) -> Self {
        self.workers.extend(specs);
        self
    }

    /// Function producing the initial options, called once per run.
    pub fn seed<F>(mut self, seed: F) -> Self
    where
        F: Fn() -> Options + Send + Sync + 'static,
    {
        self.seed = Some(Arc::new(seed));
        self
    }

    /// Fixed initial options.
    pub fn initial(self, initial: Options) -> Self {
        self.seed(move || initial.clone())
    }

    pub fn budget(mut self, budget: RunBudget) -> Self {
        self.budget = budget;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.budget.operation_timeout = timeout;
        self
    }

    pub fn runtime_timeout(mut self, limit: Duration) -> Self {
        self.budget.runtime_timeout = Some(limit);
        self
    }

    pub fn join(mut self, join: JoinPolicy) -> Self {
        self.join = join;
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        if self.workers.is_empty() {
            return Err(LockstepError::Config("at least one worker is required".into()));
        }

        let mut names = HashSet::new();
        for spec in &self.workers {
            if !self.registry.contains(&spec.kind) {
                return Err(LockstepError::UnknownWorker(spec.kind.clone()));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(LockstepError::Config(format!(
                    "duplicate worker name `{}`",
                    spec.name
                )));
            }
        }

        let launcher = match self.launcher {
            Some(launcher) => launcher,
            None => Launcher::current_exe()?,
        };
        let seed: Seed = match self.seed {
            Some(seed) => seed,
            None => Arc::new(Options::new),
        };

        Ok(Coordinator::from_parts(
            self.registry,
            launcher,
            self.workers,
            seed,
            self.budget,
            self.join,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::FnWorker;

    fn registry() -> Arc<WorkerRegistry> {
        let mut registry = WorkerRegistry::new();
        registry.register_fn("noop", FnWorker::new(|_| Ok(())));
        Arc::new(registry)
    }

    #[test]
    fn empty_runs_are_rejected() {
        let err = Coordinator::builder(registry()).build().unwrap_err();
        assert!(matches!(err, LockstepError::Config(_)));
    }

    #[test]
    fn unknown_kinds_are_rejected() {
        let err = Coordinator::builder(registry())
            .worker(WorkerSpec::new("noop"))
            .worker(WorkerSpec::new("missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, LockstepError::UnknownWorker(kind) if kind == "missing"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let err = Coordinator::builder(registry())
            .worker(WorkerSpec::new("noop"))
            .worker(WorkerSpec::new("noop"))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate worker name"));
    }

    #[test]
    fn build_keeps_registration_order() {
        let coordinator = Coordinator::builder(registry())
            .worker(WorkerSpec::new("noop").named("b"))
            .worker(WorkerSpec::new("noop").named("a"))
            .runtime_timeout(Duration::from_secs(1))
            .build()
            .unwrap();

        let names: Vec<_> = coordinator.workers().iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(
            coordinator.budget().runtime_timeout,
            Some(Duration::from_secs(1))
        );
    }
}
