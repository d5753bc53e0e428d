// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::JoinPolicy;

/// Command-line arguments for `lockstep`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lockstep",
    version,
    about = "Run a set of worker processes through a lockstep test protocol.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the scenario file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Lockstep.toml")]
    pub scenario: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOCKSTEP_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the plan, but don't spawn any worker.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `[budget].runtime_timeout` (seconds).
    #[arg(long, value_name = "SECS")]
    pub runtime_timeout: Option<f64>,

    /// Override `[budget].join`: wait for all workers or only the first.
    #[arg(long, value_name = "all|first")]
    pub join: Option<JoinPolicy>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_parse() {
        let args = CliArgs::try_parse_from([
            "lockstep",
            "--scenario",
            "run.toml",
            "--runtime-timeout",
            "2.5",
            "--join",
            "first",
            "--dry-run",
        ])
        .unwrap();

        assert_eq!(args.scenario, "run.toml");
        assert_eq!(args.runtime_timeout, Some(2.5));
        assert_eq!(args.join, Some(JoinPolicy::FirstExit));
        assert!(args.dry_run);
    }

    #[test]
    fn bad_join_policy_is_rejected() {
        assert!(CliArgs::try_parse_from(["lockstep", "--join", "some"]).is_err());
    }
}
