// src/worker/registry.rs

//! Mapping from worker kinds to constructors.
//!
//! The same registry must be built in the coordinator and in every worker
//! process: the coordinator uses it to validate a run and to rebuild failures,
//! workers use it to construct themselves.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::capsule::{KindRegistry, RemoteKind};

use super::fn_worker::FnWorker;
use super::{Worker, WorkerInit};

type Factory = Arc<dyn Fn(WorkerInit) -> anyhow::Result<Box<dyn Worker>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct WorkerRegistry {
    factories: BTreeMap<String, Factory>,
    kinds: KindRegistry,
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("workers", &self.factories.keys().collect::<Vec<_>>())
            .field("kinds", &self.kinds)
            .finish()
    }
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker type under `kind`. A later registration of the same
    /// kind replaces the earlier one.
    pub fn register<W, F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        W: Worker + 'static,
        F: Fn(WorkerInit) -> anyhow::Result<W> + Send + Sync + 'static,
    {
        let factory: Factory =
            Arc::new(move |init| factory(init).map(|w| Box::new(w) as Box<dyn Worker>));
        self.factories.insert(kind.into(), factory);
        self
    }

    /// Register a closure-based worker under `kind`.
    pub fn register_fn(&mut self, kind: impl Into<String>, worker: FnWorker) -> &mut Self {
        self.register(kind, move |init| Ok(worker.clone().bind(init)))
    }

    /// Make `E` survive the trip from a worker back to the coordinator.
    pub fn error_kind<E: RemoteKind>(&mut self) -> &mut Self {
        self.kinds.register::<E>();
        self
    }

    pub fn kinds(&self) -> &KindRegistry {
        &self.kinds
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn worker_kinds(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construct a worker of `kind`, or `None` if no such kind is registered.
    pub fn build(&self, kind: &str, init: WorkerInit) -> Option<anyhow::Result<Box<dyn Worker>>> {
        self.factories.get(kind).map(|factory| factory(init))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Options;

    struct Counter {
        limit: u64,
    }

    impl Worker for Counter {
        fn contribute(&mut self) -> anyhow::Result<Options> {
            let mut options = Options::new();
            options.insert("limit".into(), self.limit.into());
            Ok(options)
        }

        fn run(&mut self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn registered_kinds_construct_workers() {
        let mut registry = WorkerRegistry::new();
        registry
            .register("counter", |init| {
                Ok(Counter {
                    limit: init.args_as::<Option<u64>>()?.unwrap_or(3),
                })
            })
            .register_fn("noop", FnWorker::new(|_| Ok(())));

        assert!(registry.contains("counter"));
        assert!(registry.contains("noop"));
        assert!(!registry.contains("missing"));
        assert_eq!(
            registry.worker_kinds().collect::<Vec<_>>(),
            ["counter", "noop"]
        );

        let mut worker = registry
            .build("counter", WorkerInit::default())
            .unwrap()
            .unwrap();
        assert_eq!(worker.contribute().unwrap()["limit"], 3);
        assert!(registry.build("missing", WorkerInit::default()).is_none());
    }

    #[test]
    fn constructor_errors_are_returned() {
        let mut registry = WorkerRegistry::new();
        registry.register("strict", |init| {
            let limit: u64 = init.args_as()?;
            Ok(Counter { limit })
        });

        let built = registry.build("strict", WorkerInit::default()).unwrap();
        assert!(built.is_err());
    }

    #[test]
    fn builtin_error_kinds_are_always_known() {
        let registry = WorkerRegistry::new();
        assert!(registry.kinds().contains("panic"));
        assert!(registry.kinds().contains("error"));
    }
}
