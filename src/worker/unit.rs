// src/worker/unit.rs

//! The worker-side lifecycle.
//!
//! [`WorkerUnit`] reads downstream frames from `input`, writes upstream
//! frames to `output` and calls the worker's hooks in between. Any error or
//! panic in a hook is captured into a [`FailureCapsule`], published upstream,
//! and ends the lifecycle. Teardown runs on every path.

use std::io::{BufRead, Write};
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capsule::{FailureCapsule, capture_any, guard};
use crate::channel::wire::{Downstream, Upstream, decode_downstream, encode_upstream};
use crate::types::Options;

use super::registry::WorkerRegistry;
use super::{Worker, WorkerInit};

/// Lifecycle stages, in the only order they can be visited.
///
/// `Failed` may be entered from any stage before `Completed`; `TornDown` is
/// always last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Created,
    ContributionSent,
    AwaitingSharedOptions,
    SetupComplete,
    ReadySignaled,
    AwaitingRunSignal,
    Running,
    Completed,
    Failed,
    TornDown,
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// A hook failed and a capsule was published.
    Failed,
    /// The coordinator went away or sent garbage.
    ProtocolError,
}

impl Outcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Outcome::Completed => 0,
            Outcome::Failed => 1,
            Outcome::ProtocolError => 2,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("coordinator closed the channel while {0}")]
    Closed(&'static str),

    #[error("unexpected {got} frame while {waiting}")]
    Unexpected {
        waiting: &'static str,
        got: &'static str,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] serde_json::Error),
}

enum Stop {
    Failed(FailureCapsule),
    Protocol(ProtocolError),
}

impl From<ProtocolError> for Stop {
    fn from(e: ProtocolError) -> Self {
        Stop::Protocol(e)
    }
}

pub struct WorkerUnit<'r, R, W> {
    registry: &'r WorkerRegistry,
    kind: String,
    name: String,
    input: R,
    output: W,
    stage: Stage,
    visited: Vec<Stage>,
}

impl<'r, R: BufRead, W: Write> WorkerUnit<'r, R, W> {
    pub fn new(registry: &'r WorkerRegistry, kind: impl Into<String>, input: R, output: W) -> Self {
        let kind = kind.into();
        Self {
            registry,
            name: kind.clone(),
            kind,
            input,
            output,
            stage: Stage::Created,
            visited: vec![Stage::Created],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Every stage entered so far, in order.
    pub fn visited(&self) -> &[Stage] {
        &self.visited
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Run the whole lifecycle.
    pub fn execute(&mut self) -> Outcome {
        let init = match self.read_init() {
            Ok(init) => init,
            Err(e) => {
                error!(kind = %self.kind, error = %e, "worker never received its init frame");
                self.advance(Stage::TornDown);
                return Outcome::ProtocolError;
            }
        };
        self.name = init.name.clone();

        let registry = self.registry;
        let kinds = registry.kinds();
        let kind = self.kind.clone();

        let built = guard(kinds, || match registry.build(&kind, init) {
            Some(built) => built,
            None => anyhow::bail!("no worker registered for kind `{kind}`"),
        });
        let mut worker = match built {
            Ok(worker) => worker,
            Err(capsule) => {
                let outcome = self.publish_failure(capsule);
                self.advance(Stage::TornDown);
                return outcome;
            }
        };

        let mut outcome = match self.drive(worker.as_mut()) {
            Ok(()) => Outcome::Completed,
            Err(Stop::Failed(capsule)) => self.publish_failure(capsule),
            Err(Stop::Protocol(e)) => {
                warn!(worker = %self.name, error = %e, "lifecycle aborted");
                Outcome::ProtocolError
            }
        };

        let teardown = capture_any(kinds, || {
            worker.teardown();
            Ok(())
        });
        if let Some(capsule) = teardown {
            if outcome == Outcome::Completed {
                outcome = self.publish_failure(capsule);
            } else {
                warn!(
                    worker = %self.name,
                    kind = capsule.kind(),
                    message = capsule.message(),
                    "teardown failed after an earlier failure"
                );
            }
        }

        // Dropping user state can panic too.
        if panic::catch_unwind(AssertUnwindSafe(move || drop(worker))).is_err() {
            warn!(worker = %self.name, "worker panicked while being dropped");
        }

        self.advance(Stage::TornDown);
        debug!(worker = %self.name, ?outcome, "worker torn down");
        outcome
    }

    fn drive(&mut self, worker: &mut dyn Worker) -> Result<(), Stop> {
        let registry = self.registry;
        let kinds = registry.kinds();

        let contribution = guard(kinds, || worker.contribute()).map_err(Stop::Failed)?;
        self.emit(&Upstream::Contribution {
            options: contribution,
        })?;
        self.advance(Stage::ContributionSent);

        self.advance(Stage::AwaitingSharedOptions);
        let shared = self.read_shared()?;
        guard(kinds, || worker.setup(&shared)).map_err(Stop::Failed)?;
        self.advance(Stage::SetupComplete);

        self.emit(&Upstream::Ready)?;
        self.advance(Stage::ReadySignaled);

        self.advance(Stage::AwaitingRunSignal);
        self.read_run()?;

        self.advance(Stage::Running);
        info!(worker = %self.name, "running");
        guard(kinds, || worker.run()).map_err(Stop::Failed)?;
        self.advance(Stage::Completed);
        Ok(())
    }

    fn publish_failure(&mut self, capsule: FailureCapsule) -> Outcome {
        debug!(
            worker = %self.name,
            kind = capsule.kind(),
            stage = ?self.stage,
            "publishing failure"
        );
        if let Err(e) = self.emit(&Upstream::Failure { capsule }) {
            error!(worker = %self.name, error = %e, "could not publish failure");
        }
        self.advance(Stage::Failed);
        Outcome::Failed
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage {next:?} after {:?}", self.stage);
        self.stage = next;
        self.visited.push(next);
    }

    fn emit(&mut self, frame: &Upstream) -> Result<(), ProtocolError> {
        let line = encode_upstream(frame)?;
        self.output.write_all(line.as_bytes())?;
        self.output.flush()?;
        Ok(())
    }

    fn next_frame(&mut self, waiting: &'static str) -> Result<Downstream, ProtocolError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.input.read_line(&mut line)? == 0 {
                return Err(ProtocolError::Closed(waiting));
            }
            if !line.trim().is_empty() {
                return Ok(decode_downstream(&line)?);
            }
        }
    }

    fn read_init(&mut self) -> Result<WorkerInit, ProtocolError> {
        const WAITING: &str = "waiting for init";
        match self.next_frame(WAITING)? {
            Downstream::Init {
                name,
                initial,
                args,
            } => Ok(WorkerInit {
                name,
                initial,
                args,
            }),
            other => Err(unexpected(WAITING, &other)),
        }
    }

    fn read_shared(&mut self) -> Result<Options, ProtocolError> {
        const WAITING: &str = "waiting for shared options";
        match self.next_frame(WAITING)? {
            Downstream::SharedOptions { options } => Ok(options),
            other => Err(unexpected(WAITING, &other)),
        }
    }

    fn read_run(&mut self) -> Result<(), ProtocolError> {
        const WAITING: &str = "waiting for the run signal";
        match self.next_frame(WAITING)? {
            Downstream::Run => Ok(()),
            other => Err(unexpected(WAITING, &other)),
        }
    }
}

fn unexpected(waiting: &'static str, frame: &Downstream) -> ProtocolError {
    let got = match frame {
        Downstream::Init { .. } => "init",
        Downstream::SharedOptions { .. } => "shared_options",
        Downstream::Run => "run",
    };
    ProtocolError::Unexpected { waiting, got }
}
