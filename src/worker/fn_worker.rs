// src/worker/fn_worker.rs

//! Workers assembled from closures instead of a hand-written type.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{Worker, WorkerInit};
use crate::types::Options;

/// Everything a closure-based worker can see.
///
/// `shared` is empty until setup has run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerContext {
    pub name: String,
    pub initial: Options,
    pub args: Value,
    pub shared: Options,
}

type ContributeFn = Arc<dyn Fn(&WorkerContext) -> anyhow::Result<Options> + Send + Sync>;
type StageFn = Arc<dyn Fn(&WorkerContext) -> anyhow::Result<()> + Send + Sync>;
type TeardownFn = Arc<dyn Fn(&WorkerContext) + Send + Sync>;

/// A worker made of a `run` closure plus optional `contribute`, `setup` and
/// `teardown` closures.
///
/// ```no_run
/// use lockstep::worker::FnWorker;
///
/// let worker = FnWorker::new(|ctx| {
///     anyhow::ensure!(ctx.shared.contains_key("server_uri"), "no server");
///     Ok(())
/// })
/// .contribute(|_| Ok(serde_json::Map::new()));
/// # let _ = worker;
/// ```
#[derive(Clone)]
pub struct FnWorker {
    contribute: Option<ContributeFn>,
    setup: Option<StageFn>,
    run: StageFn,
    teardown: Option<TeardownFn>,
}

impl fmt::Debug for FnWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorker")
            .field("contribute", &self.contribute.is_some())
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish_non_exhaustive()
    }
}

impl FnWorker {
    pub fn new<F>(run: F) -> Self
    where
        F: Fn(&WorkerContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            contribute: None,
            setup: None,
            run: Arc::new(run),
            teardown: None,
        }
    }

    pub fn contribute<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkerContext) -> anyhow::Result<Options> + Send + Sync + 'static,
    {
        self.contribute = Some(Arc::new(f));
        self
    }

    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkerContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkerContext) + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(f));
        self
    }

    /// Attach the closures to one worker instance.
    pub fn bind(self, init: WorkerInit) -> BoundFnWorker {
        BoundFnWorker {
            fns: self,
            ctx: WorkerContext {
                name: init.name,
                initial: init.initial,
                args: init.args,
                shared: Options::new(),
            },
        }
    }
}

/// An [`FnWorker`] bound to its context.
#[derive(Debug)]
pub struct BoundFnWorker {
    fns: FnWorker,
    ctx: WorkerContext,
}

impl BoundFnWorker {
    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }
}

impl Worker for BoundFnWorker {
    fn contribute(&mut self) -> anyhow::Result<Options> {
        match &self.fns.contribute {
            Some(f) => f(&self.ctx),
            None => Ok(Options::new()),
        }
    }

    fn setup(&mut self, shared: &Options) -> anyhow::Result<()> {
        self.ctx.shared = shared.clone();
        match &self.fns.setup {
            Some(f) => f(&self.ctx),
            None => Ok(()),
        }
    }

    fn run(&mut self) -> anyhow::Result<()> {
        (self.fns.run)(&self.ctx)
    }

    fn teardown(&mut self) {
        if let Some(f) = &self.fns.teardown {
            f(&self.ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn run_sees_initial_and_shared_options() {
        let worker = FnWorker::new(|ctx| {
            anyhow::ensure!(ctx.initial["x"] == 0, "initial options missing");
            anyhow::ensure!(ctx.shared["a"] == 1, "shared options missing");
            Ok(())
        });

        let mut bound = worker.bind(WorkerInit {
            name: "main".into(),
            initial: json!({ "x": 0 }).as_object().cloned().unwrap(),
            args: Value::Null,
        });

        assert!(bound.contribute().unwrap().is_empty());
        bound
            .setup(&json!({ "a": 1 }).as_object().cloned().unwrap())
            .unwrap();
        bound.run().unwrap();
        assert_eq!(bound.context().name, "main");
    }

    #[test]
    fn optional_hooks_are_called_when_present() {
        let teardowns = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&teardowns);

        let worker = FnWorker::new(|_| Ok(()))
            .contribute(|ctx| Ok(json!({ "from": ctx.name }).as_object().cloned().unwrap()))
            .setup(|_| anyhow::bail!("setup refused"))
            .teardown(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        let mut bound = worker.bind(WorkerInit {
            name: "helper".into(),
            ..WorkerInit::default()
        });

        assert_eq!(bound.contribute().unwrap()["from"], "helper");
        assert_eq!(
            bound.setup(&Options::new()).unwrap_err().to_string(),
            "setup refused"
        );
        bound.teardown();
        assert_eq!(teardowns.load(Ordering::SeqCst), 1);
    }
}
