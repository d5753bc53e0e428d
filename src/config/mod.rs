// src/config/mod.rs

//! Scenario files for the `lockstep` binary.
//!
//! - `model.rs`: the TOML data model.
//! - `loader.rs`: reading scenario files from disk.
//! - `validate.rs`: turning a raw scenario into a validated one.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_scenario};
pub use model::{BudgetSection, RawScenarioFile, ScenarioFile, WorkerSection};
