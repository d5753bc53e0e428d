// src/types.rs

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Option maps exchanged between the coordinator and its workers.
///
/// Used for initial options (seeded once per run), per-worker contributions
/// and the merged shared options.
pub type Options = serde_json::Map<String, Value>;

/// When the joint-wait stage of a run is considered finished.
///
/// - `AllExit`: every worker must exit on its own (default behaviour).
/// - `FirstExit`: the first worker to exit cleanly ends the run; the remaining
///   workers are torn down. Handy when one "main" worker drives a test and
///   the others are long-running helpers (servers, publishers, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JoinPolicy {
    #[default]
    #[serde(rename = "all")]
    AllExit,
    #[serde(rename = "first")]
    FirstExit,
}

impl FromStr for JoinPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(JoinPolicy::AllExit),
            "first" => Ok(JoinPolicy::FirstExit),
            other => Err(format!(
                "invalid join policy: {other} (expected \"all\" or \"first\")"
            )),
        }
    }
}

/// Description of one worker process.
///
/// `kind` selects the worker implementation from a
/// [`WorkerRegistry`](crate::worker::WorkerRegistry); `name` is what shows up
/// in logs and errors; `args` are handed to the worker's constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl WorkerSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        let kind = kind.into();
        Self {
            name: kind.clone(),
            kind,
            args: Value::Null,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_policy_parses_case_insensitively() {
        assert_eq!(" First ".parse::<JoinPolicy>(), Ok(JoinPolicy::FirstExit));
        assert_eq!("all".parse::<JoinPolicy>(), Ok(JoinPolicy::AllExit));
        assert!("any".parse::<JoinPolicy>().is_err());
    }

    #[test]
    fn worker_spec_name_defaults_to_kind() {
        let spec = WorkerSpec::new("sleep").args(json!({ "seconds": 1 }));
        assert_eq!(spec.name, "sleep");
        assert_eq!(spec.args["seconds"], 1);

        let spec = spec.named("sleeper-2");
        assert_eq!(spec.name, "sleeper-2");
        assert_eq!(spec.kind, "sleep");
    }
}
