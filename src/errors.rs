// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Worker hooks themselves return `anyhow::Result`; everything the
//! coordinator surfaces to its caller is a [`LockstepError`].

use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::capsule::RemoteFailure;

#[derive(Error, Debug)]
pub enum LockstepError {
    #[error("timed out waiting for worker \"{worker}\" ({operation})")]
    ChannelTimeout { worker: String, operation: String },

    #[error("channel to worker \"{worker}\" closed ({operation})")]
    ChannelClosed { worker: String, operation: String },

    #[error("worker \"{worker}\" has died prematurely")]
    DiedPrematurely { worker: String },

    #[error("worker \"{worker}\" exited unsuccessfully ({status})")]
    WorkerExited { worker: String, status: ExitStatus },

    #[error("runtime for workers timed out after {limit:?}")]
    RuntimeTimeout { limit: Duration },

    #[error(transparent)]
    Worker(Box<RemoteFailure>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("no worker registered for kind \"{0}\"")]
    UnknownWorker(String),

    #[error("failed to spawn worker \"{worker}\": {source}")]
    Spawn {
        worker: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire encoding error: {0}")]
    Wire(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LockstepError {
    /// The reconstructed worker failure, if this error carries one.
    pub fn as_remote(&self) -> Option<&RemoteFailure> {
        match self {
            LockstepError::Worker(failure) => Some(failure),
            _ => None,
        }
    }

    /// True for both the per-operation and the overall runtime timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LockstepError::ChannelTimeout { .. } | LockstepError::RuntimeTimeout { .. }
        )
    }
}

impl From<RemoteFailure> for LockstepError {
    fn from(failure: RemoteFailure) -> Self {
        LockstepError::Worker(Box::new(failure))
    }
}

pub type Result<T> = std::result::Result<T, LockstepError>;
