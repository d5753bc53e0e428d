// src/config/validate.rs

use std::collections::HashSet;
use std::time::Duration;

use crate::config::model::{BudgetSection, RawScenarioFile, ScenarioFile};
use crate::coordinator::RunBudget;
use crate::errors::{LockstepError, Result};

impl TryFrom<RawScenarioFile> for ScenarioFile {
    type Error = LockstepError;

    fn try_from(raw: RawScenarioFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_workers(&raw)?;
        validate_workers(&raw)?;
        let budget = validate_budget(&raw.budget)?;

        let workers = raw.workers.iter().map(|w| w.to_spec()).collect();
        Ok(ScenarioFile::new_unchecked(
            budget,
            raw.budget.join,
            raw.initial,
            workers,
        ))
    }
}

fn ensure_has_workers(raw: &RawScenarioFile) -> Result<()> {
    if raw.workers.is_empty() {
        return Err(LockstepError::Config(
            "scenario must contain at least one [[worker]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_workers(raw: &RawScenarioFile) -> Result<()> {
    let mut names = HashSet::new();
    for worker in &raw.workers {
        if worker.kind.trim().is_empty() {
            return Err(LockstepError::Config(
                "[[worker]].kind must not be empty".to_string(),
            ));
        }
        if !names.insert(worker.name()) {
            return Err(LockstepError::Config(format!(
                "duplicate worker name '{}'",
                worker.name()
            )));
        }
    }
    Ok(())
}

fn validate_budget(section: &BudgetSection) -> Result<RunBudget> {
    Ok(RunBudget {
        operation_timeout: seconds("operation_timeout", section.operation_timeout)?,
        poll_interval: seconds("poll_interval", section.poll_interval)?,
        ready_probe: seconds("ready_probe", section.ready_probe)?,
        ready_timeout: section
            .ready_timeout
            .map(|s| seconds("ready_timeout", s))
            .transpose()?,
        runtime_timeout: section
            .runtime_timeout
            .map(|s| seconds("runtime_timeout", s))
            .transpose()?,
    })
}

/// A strictly positive, finite number of seconds.
pub(crate) fn seconds(field: &str, value: f64) -> Result<Duration> {
    if !(value.is_finite() && value > 0.0) {
        return Err(LockstepError::Config(format!(
            "[budget].{field} must be a positive number of seconds (got {value})"
        )));
    }
    Duration::try_from_secs_f64(value).map_err(|e| {
        LockstepError::Config(format!("[budget].{field} is out of range: {e}"))
    })
}
