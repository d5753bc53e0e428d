// src/coordinator/core.rs

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::capsule::FailureCapsule;
use crate::channel::{Channel, Launcher};
use crate::errors::{LockstepError, Result};
use crate::types::{JoinPolicy, Options, WorkerSpec};
use crate::worker::WorkerRegistry;

use super::budget::RunBudget;
use super::builder::CoordinatorBuilder;
use super::merge::merge_contributions;

pub(crate) type Seed = Arc<dyn Fn() -> Options + Send + Sync>;

/// Drives a set of worker processes through one lockstep run.
pub struct Coordinator {
    registry: Arc<WorkerRegistry>,
    launcher: Launcher,
    workers: Vec<WorkerSpec>,
    seed: Seed,
    budget: RunBudget,
    join: JoinPolicy,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.workers)
            .field("launcher", &self.launcher)
            .field("budget", &self.budget)
            .field("join", &self.join)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

impl Coordinator {
    pub fn builder(registry: Arc<WorkerRegistry>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(registry)
    }

    pub(crate) fn from_parts(
        registry: Arc<WorkerRegistry>,
        launcher: Launcher,
        workers: Vec<WorkerSpec>,
        seed: Seed,
        budget: RunBudget,
        join: JoinPolicy,
    ) -> Self {
        Self {
            registry,
            launcher,
            workers,
            seed,
            budget,
            join,
        }
    }

    pub fn workers(&self) -> &[WorkerSpec] {
        &self.workers
    }

    pub fn budget(&self) -> &RunBudget {
        &self.budget
    }

    pub fn join_policy(&self) -> JoinPolicy {
        self.join
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Run every worker through contribute, setup, ready and run.
    ///
    /// Every spawned worker is terminated before this returns, whatever the
    /// outcome. A worker failure is returned as [`LockstepError::Worker`]
    /// and takes precedence over orchestration errors.
    pub async fn run(&self) -> Result<()> {
        let started = Instant::now();
        let initial = (self.seed)();
        info!(workers = self.workers.len(), join = ?self.join, "starting run");

        let mut channels = Vec::with_capacity(self.workers.len());
        let outcome = self.drive(&initial, &mut channels).await;

        for channel in &mut channels {
            channel.terminate().await;
        }

        match &outcome {
            Ok(()) => info!(elapsed_ms = elapsed_ms(started), "run completed"),
            Err(e) => warn!(elapsed_ms = elapsed_ms(started), error = %e, "run failed"),
        }
        outcome
    }

    /// All stages, in order. Channels are pushed as soon as they exist so
    /// that `run` tears down partial spawns too.
    async fn drive(&self, initial: &Options, channels: &mut Vec<Channel>) -> Result<()> {
        for spec in &self.workers {
            channels.push(Channel::open(
                &self.launcher,
                spec,
                self.budget.operation_timeout,
            )?);
            let index = channels.len() - 1;
            let sent = channels[index].send_initial(initial, &spec.args).await;
            if let Err(e) = sent {
                return Err(self.escalate(channels, index, e, false).await);
            }
        }
        debug!(stage = "spawn", "all workers started");

        let contributions = self.collect(channels).await?;
        let shared = merge_contributions(contributions);
        debug!(stage = "merge", keys = shared.len(), "shared options merged");

        self.broadcast(channels, &shared).await?;
        self.await_readiness(channels).await?;
        self.release(channels).await?;
        self.join_all(channels).await
    }

    async fn collect(&self, channels: &mut [Channel]) -> Result<Vec<Options>> {
        let mut contributions = Vec::with_capacity(channels.len());
        for index in 0..channels.len() {
            self.check_all_ok(channels, false, self.budget.operation_timeout).await?;
            let received = channels[index].receive_contribution().await;
            match received {
                Ok(options) => {
                    debug!(
                        worker = %channels[index].name(),
                        keys = options.len(),
                        "contribution received"
                    );
                    contributions.push(options);
                }
                Err(e) => return Err(self.escalate(channels, index, e, false).await),
            }
        }
        self.check_all_ok(channels, false, self.budget.operation_timeout).await?;
        Ok(contributions)
    }

    async fn broadcast(&self, channels: &mut [Channel], shared: &Options) -> Result<()> {
        for index in 0..channels.len() {
            let sent = channels[index].send_shared_options(shared).await;
            if let Err(e) = sent {
                return Err(self.escalate(channels, index, e, false).await);
            }
        }
        debug!(stage = "broadcast", "shared options sent");
        self.check_all_ok(channels, false, self.budget.operation_timeout).await
    }

    async fn await_readiness(&self, channels: &mut [Channel]) -> Result<()> {
        let started = Instant::now();
        let mut ready = vec![false; channels.len()];

        loop {
            self.check_all_ok(channels, false, self.budget.operation_timeout).await?;

            for (channel, ready) in channels.iter_mut().zip(ready.iter_mut()) {
                if !*ready {
                    *ready = channel.probe_ready(self.budget.ready_probe).await;
                }
            }

            let Some(pending) = ready.iter().position(|r| !r) else {
                break;
            };

            if let Some(limit) = self.budget.ready_timeout {
                if started.elapsed() >= limit {
                    let err = LockstepError::ChannelTimeout {
                        worker: channels[pending].name().to_string(),
                        operation: "await readiness".into(),
                    };
                    return Err(self.escalate(channels, pending, err, false).await);
                }
            }
        }

        debug!(stage = "ready", elapsed_ms = elapsed_ms(started), "all workers ready");
        self.check_all_ok(channels, false, self.budget.operation_timeout).await
    }

    async fn release(&self, channels: &mut [Channel]) -> Result<()> {
        for index in 0..channels.len() {
            let sent = channels[index].release().await;
            if let Err(e) = sent {
                return Err(self.escalate(channels, index, e, true).await);
            }
        }
        debug!(stage = "release", "all workers released");
        self.check_all_ok(channels, true, self.budget.operation_timeout).await
    }

    /// Round-robin wait until every worker has exited (or the first one, with
    /// [`JoinPolicy::FirstExit`]).
    async fn join_all(&self, channels: &mut [Channel]) -> Result<()> {
        let started = Instant::now();
        let mut exited = vec![false; channels.len()];

        loop {
            for (channel, exited) in channels.iter_mut().zip(exited.iter_mut()) {
                if *exited {
                    continue;
                }
                let slice = self.budget.slice(started.elapsed());
                if let Some(status) = channel.wait_slice(slice).await {
                    *exited = true;
                    debug!(
                        worker = %channel.name(),
                        %status,
                        elapsed_ms = elapsed_ms(started),
                        "worker exited"
                    );
                }
                if self.budget.runtime_exceeded(started.elapsed()) {
                    break;
                }
            }

            let drain_limit = self.budget.drain_limit(started.elapsed());
            self.check_all_ok(channels, true, drain_limit).await?;

            if exited.iter().all(|e| *e) {
                debug!(stage = "join", "all workers exited");
                return Ok(());
            }
            if self.join == JoinPolicy::FirstExit && exited.iter().any(|e| *e) {
                debug!(stage = "join", "first worker exited; stopping the rest");
                return Ok(());
            }
            if let Some(limit) = self.budget.runtime_timeout {
                if started.elapsed() >= limit {
                    return Err(LockstepError::RuntimeTimeout { limit });
                }
            }
        }
    }

    /// Look at every worker in registration order.
    ///
    /// The first failure capsule found wins. Otherwise the first worker that
    /// is gone is reported; once `released`, a worker that exited
    /// successfully is simply done. Each exited worker's output is drained
    /// once, for at most `drain_limit`.
    async fn check_all_ok(
        &self,
        channels: &mut [Channel],
        released: bool,
        drain_limit: Duration,
    ) -> Result<()> {
        let mut gone = None;

        for channel in channels.iter_mut() {
            let exit = channel.poll_exit();
            if exit.is_some() {
                channel.drain(drain_limit).await;
            }
            if let Some(capsule) = channel.take_failure() {
                return Err(self.reconstruct(channel.name(), capsule));
            }

            let Some(status) = exit else {
                continue;
            };
            if gone.is_some() || (released && status.success()) {
                continue;
            }

            let worker = channel.name().to_string();
            gone = Some(if released && status.code().is_some() {
                LockstepError::WorkerExited { worker, status }
            } else {
                LockstepError::DiedPrematurely { worker }
            });
        }

        match gone {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Turn a channel error into the error the caller should see. A closed
    /// channel means the worker is gone, so its capsule (or its death) is the
    /// real story; a timeout yields to any capsule that is already waiting.
    async fn escalate(
        &self,
        channels: &mut [Channel],
        index: usize,
        err: LockstepError,
        released: bool,
    ) -> LockstepError {
        match err {
            LockstepError::ChannelClosed { worker, operation } => {
                debug!(worker = %worker, operation = %operation, "worker channel closed");
                channels[index]
                    .wait_slice(self.budget.operation_timeout)
                    .await;
                match self.check_all_ok(channels, released, self.budget.operation_timeout).await {
                    Err(e) => e,
                    Ok(()) => LockstepError::DiedPrematurely { worker },
                }
            }
            LockstepError::ChannelTimeout { .. } => {
                match self.check_all_ok(channels, released, self.budget.operation_timeout).await {
                    Err(e) => e,
                    Ok(()) => err,
                }
            }
            other => other,
        }
    }

    fn reconstruct(&self, worker: &str, capsule: FailureCapsule) -> LockstepError {
        let failure = capsule.into_failure(worker, self.registry.kinds());
        warn!(
            worker,
            kind = failure.kind(),
            frames = failure.trace().len(),
            "worker failed: {}",
            failure.message()
        );
        failure.into()
    }
}
