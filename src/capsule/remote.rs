// src/capsule/remote.rs

//! The coordinator-side view of a worker failure.

use std::error::Error as StdError;
use std::fmt;

use super::frame::Frame;

/// A stack-like trail rebuilt from the `(location, line)` pairs recorded in
/// the worker, outermost frame first.
///
/// Only reported locations survive the process boundary; there is no live
/// state behind these frames.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyntheticTrace {
    frames: Vec<Frame>,
}

impl SyntheticTrace {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    /// Frames from the outermost call to the failing one.
    pub fn walk(&self) -> impl DoubleEndedIterator<Item = &Frame> + ExactSizeIterator {
        self.frames.iter()
    }

    /// The frame the failure was raised in.
    pub fn innermost(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for SyntheticTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return writeln!(f, "  <no frames recorded>");
        }
        for (depth, frame) in self.frames.iter().enumerate() {
            writeln!(f, "  {depth:>3}: {frame}")?;
        }
        Ok(())
    }
}

/// A failure raised in a worker process, re-raised in the coordinator.
///
/// The wrapped error has the original kind whenever that kind is registered
/// on the coordinator side, so callers can `downcast_ref` to the worker's
/// error type. Otherwise it is an
/// [`UnregisteredFailure`](super::UnregisteredFailure) naming the kind.
pub struct RemoteFailure {
    worker: String,
    kind: String,
    message: String,
    trace: SyntheticTrace,
    error: anyhow::Error,
}

impl RemoteFailure {
    pub(crate) fn new(
        worker: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
        trace: SyntheticTrace,
        error: anyhow::Error,
    ) -> Self {
        Self {
            worker: worker.into(),
            kind: kind.into(),
            message: message.into(),
            trace,
            error,
        }
    }

    /// Name of the worker that failed.
    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> &SyntheticTrace {
        &self.trace
    }

    /// The rebuilt error.
    pub fn error(&self) -> &anyhow::Error {
        &self.error
    }

    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<E>()
    }

    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.is::<E>()
    }

    /// Multi-line report: headline followed by the rebuilt trail.
    pub fn report(&self) -> String {
        format!("{self}\n{}", self.trace)
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in worker \"{}\": {}",
            self.kind, self.worker, self.message
        )?;
        if let Some(frame) = self.trace.innermost() {
            write!(f, " (at {}:{})", frame.location, frame.line)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFailure")
            .field("worker", &self.worker)
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("frames", &self.trace.len())
            .finish()
    }
}

impl StdError for RemoteFailure {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.error)
    }
}
