// src/channel/mod.rs

//! Per-worker message passing.
//!
//! A [`Channel`] is the coordinator's exclusive handle on one worker process.
//! It owns the process and four independent primitives:
//!
//! - an outbound contribution slot (worker -> coordinator, capacity 1)
//! - an inbound broadcast slot for the shared options (coordinator -> worker)
//! - a readiness signal (worker -> coordinator)
//! - a run signal (coordinator -> worker)
//!
//! plus a failure slot the worker writes its [`FailureCapsule`] into.
//!
//! Every operation that waits is bounded by the per-operation timeout, and
//! timeouts are attributed to the worker by name.
//!
//! - [`wire`] defines the frames.
//! - [`pump`] reads the worker's stdout/stderr.
//! - [`process`] spawns and terminates worker processes.

pub mod process;
pub mod pump;
pub mod wire;

use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::capsule::FailureCapsule;
use crate::errors::{LockstepError, Result};
use crate::types::{Options, WorkerSpec};

pub use process::Launcher;
use process::terminate_child;
use pump::{Slots, spawn_stderr_logger, spawn_stdout_pump};
use wire::{Downstream, encode_downstream};

pub struct Channel {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    timeout: Duration,
    contributions: mpsc::Receiver<Options>,
    ready: watch::Receiver<bool>,
    failure: Arc<Mutex<Option<FailureCapsule>>>,
    pump: Option<JoinHandle<()>>,
    stderr_logger: Option<JoinHandle<()>>,
    drained: bool,
    exit: Option<ExitStatus>,
    terminated: bool,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("pid", &self.child.id())
            .field("exit", &self.exit)
            .field("terminated", &self.terminated)
            .finish_non_exhaustive()
    }
}

impl Channel {
    /// Spawn the worker described by `spec`.
    pub fn open(launcher: &Launcher, spec: &WorkerSpec, timeout: Duration) -> Result<Self> {
        let mut child = launcher.spawn(spec)?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (contribution_tx, contributions) = mpsc::channel(1);
        let (ready_tx, ready) = watch::channel(false);
        let failure = Arc::new(Mutex::new(None));

        let pump = stdout.map(|stdout| {
            spawn_stdout_pump(
                spec.name.clone(),
                stdout,
                Slots {
                    contribution: contribution_tx,
                    ready: ready_tx,
                    failure: Arc::clone(&failure),
                },
            )
        });
        let stderr_logger = stderr.map(|stderr| spawn_stderr_logger(spec.name.clone(), stderr));

        Ok(Self {
            name: spec.name.clone(),
            child,
            stdin,
            timeout,
            contributions,
            ready,
            failure,
            pump,
            stderr_logger,
            drained: false,
            exit: None,
            terminated: false,
        })
    }

    /// Hand the worker its name, the run's initial options and its args.
    pub async fn send_initial(&mut self, initial: &Options, args: &Value) -> Result<()> {
        let frame = Downstream::Init {
            name: self.name.clone(),
            initial: initial.clone(),
            args: args.clone(),
        };
        self.send(frame, "send initial options").await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write one frame to the worker, bounded by the operation timeout.
    pub async fn send(&mut self, frame: Downstream, operation: &str) -> Result<()> {
        let line = encode_downstream(&frame)?;
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(self.closed(operation));
        };

        let write = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        };

        let written = tokio::time::timeout(self.timeout, write).await;
        match written {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                debug!(worker = %self.name, error = %e, operation, "write to worker failed");
                self.stdin = None;
                Err(self.closed(operation))
            }
            Err(_) => Err(self.timed_out(operation)),
        }
    }

    /// Wait for the worker's contributed options.
    pub async fn receive_contribution(&mut self) -> Result<Options> {
        const OPERATION: &str = "receive contribution";
        let received = tokio::time::timeout(self.timeout, self.contributions.recv()).await;
        match received {
            Ok(Some(options)) => Ok(options),
            Ok(None) => Err(self.closed(OPERATION)),
            Err(_) => Err(self.timed_out(OPERATION)),
        }
    }

    pub async fn send_shared_options(&mut self, shared: &Options) -> Result<()> {
        self.send(
            Downstream::SharedOptions {
                options: shared.clone(),
            },
            "send shared options",
        )
        .await
    }

    /// Release the worker into its run phase.
    pub async fn release(&mut self) -> Result<()> {
        self.send(Downstream::Run, "send run signal").await
    }

    /// Wait up to `interval` for the readiness signal. Never fails.
    pub async fn probe_ready(&mut self, interval: Duration) -> bool {
        if *self.ready.borrow() {
            return true;
        }
        let signalled = tokio::time::timeout(interval, self.ready.wait_for(|ready| *ready))
            .await
            .map(|waited| waited.is_ok());
        match signalled {
            Ok(true) => true,
            // stdout closed: the worker is on its way out, let it be reaped
            Ok(false) => {
                self.wait_slice(interval).await;
                false
            }
            Err(_) => false,
        }
    }

    pub fn is_alive(&mut self) -> bool {
        self.poll_exit().is_none()
    }

    /// Exit status, once the process is gone.
    pub fn poll_exit(&mut self) -> Option<ExitStatus> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit = status,
                Err(e) => {
                    warn!(worker = %self.name, error = %e, "could not query worker process");
                }
            }
        }
        self.exit
    }

    /// Wait at most `slice` for the process to exit.
    pub async fn wait_slice(&mut self, slice: Duration) -> Option<ExitStatus> {
        if let Some(status) = self.exit {
            return Some(status);
        }
        if let Ok(Ok(status)) = tokio::time::timeout(slice, self.child.wait()).await {
            self.exit = Some(status);
        }
        self.exit
    }

    /// Wait for the stdout pump to finish so that a capsule written just
    /// before exit is not missed.
    ///
    /// Waits at most once per channel, for `limit` capped by the operation
    /// timeout. If stdout is still open afterwards (a leftover grandchild
    /// holds it), the pump keeps running and a late capsule still lands in
    /// the failure slot, but nobody waits for it again.
    pub async fn drain(&mut self, limit: Duration) {
        if self.drained {
            return;
        }
        self.drained = true;
        let Some(pump) = self.pump.as_mut() else {
            return;
        };
        let limit = limit.min(self.timeout);
        if tokio::time::timeout(limit, pump).await.is_ok() {
            self.pump = None;
        } else {
            warn!(worker = %self.name, "worker stdout still open after exit");
        }
    }

    /// The worker's failure capsule, handed out at most once.
    pub fn take_failure(&self) -> Option<FailureCapsule> {
        match self.failure.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Stop the worker. Idempotent.
    pub async fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.stdin = None;
        terminate_child(&self.name, &mut self.child).await;
        if let Ok(Some(status)) = self.child.try_wait() {
            self.exit = Some(status);
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(logger) = self.stderr_logger.take() {
            logger.abort();
        }
        self.terminated = true;
    }

    fn timed_out(&self, operation: &str) -> LockstepError {
        LockstepError::ChannelTimeout {
            worker: self.name.clone(),
            operation: operation.to_string(),
        }
    }

    fn closed(&self, operation: &str) -> LockstepError {
        LockstepError::ChannelClosed {
            worker: self.name.clone(),
            operation: operation.to_string(),
        }
    }
}
