// src/lib.rs

//! Run several worker processes through one synchronised test protocol.
//!
//! A [`Coordinator`](coordinator::Coordinator) spawns one process per
//! [`WorkerSpec`](types::WorkerSpec), collects the options each worker
//! contributes, broadcasts the merged result, waits until every worker is
//! ready, releases them together and waits for them to finish. A failure in
//! any worker comes back to the coordinator as a
//! [`RemoteFailure`](capsule::RemoteFailure) with the worker's error kind,
//! message and location trail.
//!
//! Worker processes are the host program itself, re-executed; call
//! [`worker::dispatch`] at the start of `main`.

pub mod builtin;
pub mod capsule;
pub mod channel;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod logging;
pub mod types;
pub mod worker;

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::ScenarioFile;
use crate::config::validate::seconds;
use crate::coordinator::Coordinator;
use crate::worker::WorkerRegistry;

/// High-level entry point used by `main.rs`.
///
/// - loads and validates the scenario file
/// - applies CLI overrides
/// - builds the coordinator (which checks every kind against `registry`)
/// - runs it, unless `--dry-run`
pub async fn run(args: CliArgs, registry: Arc<WorkerRegistry>) -> Result<()> {
    let mut scenario = load_and_validate(&args.scenario)?;

    if let Some(secs) = args.runtime_timeout {
        scenario.budget.runtime_timeout = Some(seconds("runtime_timeout", secs)?);
    }
    if let Some(join) = args.join {
        scenario.join = join;
    }

    let coordinator = Coordinator::builder(registry)
        .workers(scenario.workers.iter().cloned())
        .initial(scenario.initial.clone())
        .budget(scenario.budget)
        .join(scenario.join)
        .build()?;

    if args.dry_run {
        print_dry_run(&scenario);
        return Ok(());
    }

    coordinator.run().await?;
    Ok(())
}

/// Simple dry-run output: print the budget, the initial options and the
/// workers in registration order.
fn print_dry_run(scenario: &ScenarioFile) {
    let budget = &scenario.budget;

    println!("lockstep dry-run");
    println!("  budget.operation_timeout = {:?}", budget.operation_timeout);
    println!("  budget.poll_interval = {:?}", budget.poll_interval);
    println!("  budget.ready_probe = {:?}", budget.ready_probe);
    if let Some(limit) = budget.ready_timeout {
        println!("  budget.ready_timeout = {limit:?}");
    }
    if let Some(limit) = budget.runtime_timeout {
        println!("  budget.runtime_timeout = {limit:?}");
    }
    println!("  join = {:?}", scenario.join);
    if !scenario.initial.is_empty() {
        println!(
            "  initial = {}",
            serde_json::Value::Object(scenario.initial.clone())
        );
    }
    println!();

    println!("workers ({}):", scenario.workers.len());
    for worker in &scenario.workers {
        println!("  - {}", worker.name);
        println!("      kind: {}", worker.kind);
        if !worker.args.is_null() {
            println!("      args: {}", worker.args);
        }
    }

    debug!("dry-run complete (no workers spawned)");
}
