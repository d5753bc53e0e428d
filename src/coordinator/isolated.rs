// src/coordinator/isolated.rs

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::channel::Launcher;
use crate::errors::Result;
use crate::types::WorkerSpec;
use crate::worker::WorkerRegistry;

use super::core::Coordinator;

/// Run a single worker in its own process, bounded by `limit`.
///
/// A failure inside the worker comes back as the reconstructed failure;
/// overrunning `limit` is a [`RuntimeTimeout`](crate::errors::LockstepError::RuntimeTimeout).
pub async fn run_isolated(
    registry: Arc<WorkerRegistry>,
    launcher: Launcher,
    spec: WorkerSpec,
    limit: Duration,
) -> Result<()> {
    debug!(worker = %spec.name, limit_ms = limit.as_millis() as u64, "running isolated worker");
    Coordinator::builder(registry)
        .launcher(launcher)
        .worker(spec)
        .runtime_timeout(limit)
        .build()?
        .run()
        .await
}
