// src/coordinator/budget.rs

use std::time::Duration;

/// Timeouts governing one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBudget {
    /// Bound on every single send/receive with a worker.
    pub operation_timeout: Duration,
    /// Wait slice per worker in the joint wait.
    pub poll_interval: Duration,
    /// How long one readiness probe waits for a single worker.
    pub ready_probe: Duration,
    /// Bound on the whole readiness barrier. `None` waits for as long as
    /// every worker stays alive.
    pub ready_timeout: Option<Duration>,
    /// Bound on the joint wait, measured from the release.
    pub runtime_timeout: Option<Duration>,
}

impl Default for RunBudget {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            ready_probe: Duration::from_millis(500),
            ready_timeout: None,
            runtime_timeout: None,
        }
    }
}

impl RunBudget {
    pub fn with_runtime_timeout(mut self, limit: Duration) -> Self {
        self.runtime_timeout = Some(limit);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_ready_timeout(mut self, limit: Duration) -> Self {
        self.ready_timeout = Some(limit);
        self
    }

    /// Wait slice for the joint wait, shortened so that it never runs past
    /// the runtime limit.
    pub(crate) fn slice(&self, elapsed: Duration) -> Duration {
        match self.runtime_timeout {
            Some(limit) => self.poll_interval.min(limit.saturating_sub(elapsed)),
            None => self.poll_interval,
        }
    }

    /// How long to wait for an exited worker's output during the joint
    /// wait: the operation timeout, but never past the runtime limit.
    pub(crate) fn drain_limit(&self, elapsed: Duration) -> Duration {
        match self.runtime_timeout {
            Some(limit) => self.operation_timeout.min(limit.saturating_sub(elapsed)),
            None => self.operation_timeout,
        }
    }

    pub(crate) fn runtime_exceeded(&self, elapsed: Duration) -> bool {
        self.runtime_timeout.is_some_and(|limit| elapsed >= limit)
    }
}
