// src/capsule/kinds.rs

//! Failure kinds that can be recreated on the coordinator side.
//!
//! A kind is a stable string identifier plus two functions: a probe that
//! recognises the error inside an `anyhow::Error` (worker side) and a
//! constructor that rebuilds it from its message (coordinator side). Both
//! sides build the same [`KindRegistry`], so a kind captured in a worker can
//! be raised again with the same Rust type in the coordinator.

use std::fmt;

use thiserror::Error;

/// An error type that can cross the process boundary.
pub trait RemoteKind: std::error::Error + Send + Sync + Sized + 'static {
    /// Stable identifier shared by worker and coordinator.
    const KIND: &'static str;

    /// Recreate the error from the message recorded in the worker.
    fn rebuild(message: &str) -> Self;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapsuleError {
    #[error("failure kind \"{0}\" is not registered on this side")]
    UnknownKind(String),
}

/// Kind used for panics caught in a worker.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct WorkerPanic {
    pub message: String,
}

impl RemoteKind for WorkerPanic {
    const KIND: &'static str = "panic";

    fn rebuild(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Fallback kind for worker errors whose type is not registered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteKind for RemoteError {
    const KIND: &'static str = "error";

    fn rebuild(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Stand-in raised when a capsule's kind cannot be recreated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct UnregisteredFailure {
    pub kind: String,
    pub message: String,
}

type Probe = fn(&anyhow::Error) -> Option<String>;
type Rebuild = fn(&str) -> anyhow::Error;

#[derive(Clone, Copy)]
struct KindEntry {
    probe: Probe,
    rebuild: Rebuild,
}

fn probe<E: RemoteKind>(err: &anyhow::Error) -> Option<String> {
    err.downcast_ref::<E>().map(|e| e.to_string())
}

fn rebuild<E: RemoteKind>(message: &str) -> anyhow::Error {
    anyhow::Error::new(E::rebuild(message))
}

/// Registry of [`RemoteKind`]s, in registration order.
///
/// `panic` and `error` are always present.
#[derive(Clone)]
pub struct KindRegistry {
    entries: Vec<(&'static str, KindEntry)>,
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KindRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            entries: Vec::new(),
        };
        registry.register::<WorkerPanic>();
        registry.register::<RemoteError>();
        registry
    }

    /// Register `E`. Registering the same kind name again replaces it.
    pub fn register<E: RemoteKind>(&mut self) -> &mut Self {
        let entry = KindEntry {
            probe: probe::<E>,
            rebuild: rebuild::<E>,
        };
        match self.entries.iter_mut().find(|(name, _)| *name == E::KIND) {
            Some(slot) => slot.1 = entry,
            None => self.entries.push((E::KIND, entry)),
        }
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.entries.iter().any(|(name, _)| *name == kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.entries.iter().map(|(name, _)| *name)
    }

    /// Identify `err`: the first registered kind found anywhere in its chain
    /// wins. Unregistered errors map to `error` with the full context chain
    /// as message.
    pub fn classify(&self, err: &anyhow::Error) -> (String, String) {
        for (name, entry) in &self.entries {
            if let Some(message) = (entry.probe)(err) {
                return (name.to_string(), message);
            }
        }
        (RemoteError::KIND.to_string(), format!("{err:#}"))
    }

    /// Recreate an error of `kind` carrying `message`.
    pub fn rebuild(&self, kind: &str, message: &str) -> Result<anyhow::Error, CapsuleError> {
        self.entries
            .iter()
            .find(|(name, _)| *name == kind)
            .map(|(_, entry)| (entry.rebuild)(message))
            .ok_or_else(|| CapsuleError::UnknownKind(kind.to_string()))
    }
}
