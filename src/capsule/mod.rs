// src/capsule/mod.rs

//! Portable representation of a failure captured inside a worker.
//!
//! - [`frame`] holds recorded `(location, line)` pairs and backtrace parsing.
//! - [`kinds`] maps failure kinds to Rust error types on both sides.
//! - [`capture`] turns errors and panics into capsules.
//! - [`remote`] is what the coordinator re-raises.

pub mod capture;
pub mod frame;
pub mod kinds;
pub mod remote;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use capture::{capture_any, capture_error, capture_panic, guard, install_panic_hook};
pub use frame::Frame;
pub use kinds::{
    CapsuleError, KindRegistry, RemoteError, RemoteKind, UnregisteredFailure, WorkerPanic,
};
pub use remote::{RemoteFailure, SyntheticTrace};

/// A failure recorded in a worker: kind, message and the frames it was
/// raised through (outermost first).
///
/// Created once in the worker, sent once across the process boundary and
/// consumed at most once by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureCapsule {
    kind: String,
    message: String,
    #[serde(default)]
    frames: Vec<Frame>,
}

impl FailureCapsule {
    pub fn new(kind: impl Into<String>, message: impl Into<String>, frames: Vec<Frame>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            frames,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Rebuild the failure with its original kind.
    pub fn reconstruct(
        self,
        worker: &str,
        kinds: &KindRegistry,
    ) -> Result<RemoteFailure, CapsuleError> {
        let error = kinds.rebuild(&self.kind, &self.message)?;
        Ok(self.into_remote(worker, error))
    }

    /// Rebuild the failure, substituting an [`UnregisteredFailure`] when the
    /// kind is unknown here.
    pub fn into_failure(self, worker: &str, kinds: &KindRegistry) -> RemoteFailure {
        match kinds.rebuild(&self.kind, &self.message) {
            Ok(error) => self.into_remote(worker, error),
            Err(err) => {
                warn!(worker, error = %err, "substituting generic failure");
                let error = anyhow::Error::new(UnregisteredFailure {
                    kind: self.kind.clone(),
                    message: self.message.clone(),
                });
                self.into_remote(worker, error)
            }
        }
    }

    fn into_remote(self, worker: &str, error: anyhow::Error) -> RemoteFailure {
        RemoteFailure::new(
            worker,
            self.kind,
            self.message,
            SyntheticTrace::new(self.frames),
            error,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capsule_survives_the_wire_as_plain_data() {
        let capsule = FailureCapsule::new(
            "panic",
            "boom",
            vec![Frame::new("src/a.rs", 1), Frame::new("src/b.rs", 2)],
        );
        let json = serde_json::to_string(&capsule).unwrap();
        let back: FailureCapsule = serde_json::from_str(&json).unwrap();
        assert_eq!(back, capsule);
    }

    #[test]
    fn reconstruct_keeps_kind_message_and_frame_order() {
        let capsule = FailureCapsule::new(
            "panic",
            "boom",
            vec![Frame::new("src/a.rs", 1), Frame::new("src/b.rs", 2)],
        );
        let failure = capsule.reconstruct("w1", &KindRegistry::new()).unwrap();

        assert_eq!(failure.worker(), "w1");
        assert_eq!(failure.kind(), "panic");
        assert_eq!(failure.downcast_ref::<WorkerPanic>().unwrap().message, "boom");
        let lines: Vec<u32> = failure.trace().walk().map(|f| f.line).collect();
        assert_eq!(lines, vec![1, 2]);
    }

    #[test]
    fn unknown_kind_is_substituted() {
        let capsule = FailureCapsule::new("value_error", "boom", Vec::new());
        assert!(capsule.clone().reconstruct("w1", &KindRegistry::new()).is_err());

        let failure = capsule.into_failure("w1", &KindRegistry::new());
        let substitute = failure.downcast_ref::<UnregisteredFailure>().unwrap();
        assert_eq!(substitute.kind, "value_error");
        assert_eq!(failure.error().to_string(), "value_error: boom");
    }
}
