// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{RawScenarioFile, ScenarioFile};
use crate::errors::Result;

/// Read and deserialize a scenario file without validating it.
///
/// Use [`load_and_validate`] for anything that is going to be run.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawScenarioFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    let scenario: RawScenarioFile = toml::from_str(&contents)?;
    Ok(scenario)
}

/// Read a scenario file and validate it:
///
/// - at least one `[[worker]]`,
/// - no empty kinds and no duplicate worker names,
/// - every duration strictly positive and finite.
///
/// Whether the kinds exist is only known once a registry is at hand; the
/// coordinator builder checks that.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ScenarioFile> {
    let raw = load_from_path(path)?;
    ScenarioFile::try_from(raw)
}

/// Same as [`load_and_validate`], from a string.
pub fn parse_scenario(contents: &str) -> Result<ScenarioFile> {
    let raw: RawScenarioFile = toml::from_str(contents)?;
    ScenarioFile::try_from(raw)
}
