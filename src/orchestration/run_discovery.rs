//! # Run Discovery
//!
//! Selects the runs of a forecast snapshot that need work.
//!
//! A run is considered only when it is enabled along its whole path: its
//! scenario, its stage and the run itself. Discovery is a pure function of the
//! snapshot, so the executor re-runs it after every round instead of tracking
//! runs itself.

use std::sync::Arc;
use uuid::Uuid;

use super::types::RunContext;
use crate::constants::status_groups;
use crate::models::{Forecast, ModelRun, Project};
use crate::state_machine::Status;

fn enabled_positions(forecast: &Forecast) -> impl Iterator<Item = (usize, usize, usize, &ModelRun)> {
    forecast
        .scenarios
        .iter()
        .enumerate()
        .filter(|(_, scenario)| scenario.enabled)
        .flat_map(|(si, scenario)| {
            scenario
                .stages
                .iter()
                .enumerate()
                .filter(|(_, stage)| stage.enabled)
                .flat_map(move |(gi, stage)| {
                    stage
                        .runs
                        .iter()
                        .enumerate()
                        .filter(|(_, run)| run.enabled)
                        .map(move |(ri, run)| (si, gi, ri, run))
                })
        })
}

/// Enabled runs that have not been submitted and are not skipped
pub fn pending_runs(project: &Arc<Project>, forecast: &Arc<Forecast>) -> Vec<RunContext> {
    enabled_positions(forecast)
        .filter(|(_, _, _, run)| run.runid.is_none() && !status_groups::SKIPPED.contains(&run.status))
        .filter_map(|(si, gi, ri, _)| {
            RunContext::new(project.clone(), forecast.clone(), si, gi, ri)
        })
        .collect()
}

/// Enabled runs with an outstanding remote task
pub fn dispatched_runs(forecast: &Forecast) -> Vec<Uuid> {
    enabled_positions(forecast)
        .filter(|(_, _, _, run)| run.is_dispatched())
        .map(|(_, _, _, run)| run.id)
        .collect()
}

/// Whether work has started that refreshed inputs would invalidate
pub fn any_started(forecast: &Forecast) -> bool {
    enabled_positions(forecast).any(|(_, _, _, run)| status_groups::STARTED.contains(&run.status))
}

pub fn count_with_status(forecast: &Forecast, status: Status) -> usize {
    enabled_positions(forecast)
        .filter(|(_, _, _, run)| run.status == status)
        .count()
}
