// src/worker/dispatch.rs

//! Entry point of a worker process.
//!
//! The coordinator starts workers by re-executing the host program with
//! [`WORKER_ENV`] set to the worker kind. The host calls [`dispatch`] first
//! thing in `main` (or in a dedicated `#[test]` for test binaries); in the
//! coordinator it returns immediately, in a worker it never returns.

use std::io;

use tracing::debug;

use crate::capsule::install_panic_hook;
use crate::logging::init_worker_logging;

use super::registry::WorkerRegistry;
use super::unit::WorkerUnit;

/// Environment variable naming the worker kind a process should serve.
pub const WORKER_ENV: &str = "LOCKSTEP_WORKER";

/// The worker kind this process was started for, if any.
pub fn worker_kind() -> Option<String> {
    std::env::var(WORKER_ENV).ok().filter(|kind| !kind.is_empty())
}

/// Serve the worker lifecycle and exit if this process is a worker.
pub fn dispatch(registry: &WorkerRegistry) {
    let Some(kind) = worker_kind() else {
        return;
    };
    let code = serve(registry, &kind);
    std::process::exit(code);
}

/// Run one worker of `kind` over this process's stdin/stdout and return its
/// exit code.
///
/// Stdin is locked for the lifetime of the worker.
pub fn serve(registry: &WorkerRegistry, kind: &str) -> i32 {
    init_worker_logging();
    install_panic_hook();

    debug!(kind, pid = std::process::id(), "worker process starting");

    let stdin = io::stdin();
    let mut unit = WorkerUnit::new(registry, kind, stdin.lock(), io::stdout());
    unit.execute().exit_code()
}
