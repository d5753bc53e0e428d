// src/worker/mod.rs

//! The code that runs inside each worker process.
//!
//! A worker goes through four stages, driven by the coordinator:
//!
//! 1. [`Worker::contribute`] publishes options for everyone else.
//! 2. [`Worker::setup`] receives the merged shared options.
//! 3. The worker signals readiness and waits for the run signal.
//! 4. [`Worker::run`] does the actual work.
//!
//! [`Worker::teardown`] runs afterwards on every path, failures included.
//!
//! - [`registry`] maps worker kinds to constructors.
//! - [`fn_worker`] builds workers from closures.
//! - [`unit`] is the lifecycle state machine.
//! - [`dispatch`] is the entry point a host program calls at startup.

pub mod dispatch;
pub mod fn_worker;
pub mod registry;
pub mod unit;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::types::Options;

pub use dispatch::{WORKER_ENV, dispatch, worker_kind};
pub use fn_worker::{FnWorker, WorkerContext};
pub use registry::WorkerRegistry;
pub use unit::{Outcome, Stage, WorkerUnit};

/// Behaviour of one worker process. Only `run` is mandatory.
pub trait Worker: Send {
    /// Options this worker offers to the others, merged into the shared
    /// options in registration order.
    fn contribute(&mut self) -> anyhow::Result<Options> {
        Ok(Options::new())
    }

    /// Called with the merged shared options before readiness is signalled.
    fn setup(&mut self, shared: &Options) -> anyhow::Result<()> {
        let _ = shared;
        Ok(())
    }

    /// Called once every worker is ready.
    fn run(&mut self) -> anyhow::Result<()>;

    /// Always called last, whatever happened before.
    fn teardown(&mut self) {}
}

/// What a worker constructor gets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerInit {
    pub name: String,
    pub initial: Options,
    pub args: Value,
}

impl WorkerInit {
    /// Deserialize the worker's args into `T`; missing args read as `null`.
    pub fn args_as<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        let args = serde_json::from_value(self.args.clone())?;
        Ok(args)
    }
}
