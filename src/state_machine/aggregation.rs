//! # Status Aggregation
//!
//! Recomputes stage, scenario and forecast statuses bottom-up from the run
//! statuses of a full forecast snapshot.
//!
//! ## Rules
//!
//! - A parent with no enabled children is `COMPLETE`
//! - Any enabled child in `ERROR` makes the parent `ERROR`
//! - All enabled children `COMPLETE` makes the parent `COMPLETE`
//! - Otherwise any enabled `CANCELLED` child makes the parent `CANCELLED`
//! - Otherwise a stage is `RUNNING` once one of its runs has started and
//!   `PENDING` before that; scenarios and forecasts are `RUNNING`
//!
//! Disabled entities are neither counted nor touched. Only run statuses are
//! read, so aggregating the same snapshot twice yields the same result.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{EntityKind, StatusChange};
use super::states::Status;
use crate::models::{Forecast, Scenario, Stage};

/// Which level of the hierarchy a status is combined for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Stage,
    Scenario,
    Forecast,
}

/// Combine the statuses of enabled children into the parent's status
pub fn combine<I>(children: I, level: Level) -> Status
where
    I: IntoIterator<Item = Status>,
{
    let children: Vec<Status> = children.into_iter().collect();

    if children.is_empty() {
        return Status::Complete;
    }
    if children.iter().any(|status| *status == Status::Error) {
        return Status::Error;
    }
    if children.iter().all(|status| *status == Status::Complete) {
        return Status::Complete;
    }
    if children.iter().any(|status| *status == Status::Cancelled) {
        return Status::Cancelled;
    }

    match level {
        Level::Stage if children.iter().all(Status::is_not_started) => Status::Pending,
        _ => Status::Running,
    }
}

pub fn aggregate_stage(stage: &Stage) -> Status {
    combine(stage.enabled_runs().map(|run| run.status), Level::Stage)
}

/// Scenario status together with the statuses of its enabled stages
pub fn aggregate_scenario(scenario: &Scenario) -> (Status, Vec<EntityStatus>) {
    let stages: Vec<EntityStatus> = scenario
        .stages
        .iter()
        .filter(|stage| stage.enabled)
        .map(|stage| EntityStatus {
            id: stage.id,
            status: aggregate_stage(stage),
        })
        .collect();

    let status = combine(stages.iter().map(|stage| stage.status), Level::Scenario);
    (status, stages)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityStatus {
    pub id: Uuid,
    pub status: Status,
}

/// Result of one aggregation pass over a forecast snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedStatuses {
    pub forecast_id: Uuid,
    pub forecast: Status,
    pub scenarios: Vec<EntityStatus>,
    pub stages: Vec<EntityStatus>,
}

pub fn aggregate_forecast(forecast: &Forecast) -> AggregatedStatuses {
    let mut scenarios = Vec::new();
    let mut stages = Vec::new();

    for scenario in forecast.scenarios.iter().filter(|scenario| scenario.enabled) {
        let (status, stage_statuses) = aggregate_scenario(scenario);
        scenarios.push(EntityStatus {
            id: scenario.id,
            status,
        });
        stages.extend(stage_statuses);
    }

    let status = combine(scenarios.iter().map(|scenario| scenario.status), Level::Forecast);

    AggregatedStatuses {
        forecast_id: forecast.id,
        forecast: status,
        scenarios,
        stages,
    }
}

impl AggregatedStatuses {
    pub fn stage_status(&self, stage_id: Uuid) -> Option<Status> {
        find(&self.stages, stage_id)
    }

    pub fn scenario_status(&self, scenario_id: Uuid) -> Option<Status> {
        find(&self.scenarios, scenario_id)
    }

    /// Write the statuses into a snapshot, returning what actually changed
    pub fn apply_to(&self, forecast: &mut Forecast) -> Vec<StatusChange> {
        let mut changes = Vec::new();

        for scenario in &mut forecast.scenarios {
            if let Some(status) = self.scenario_status(scenario.id) {
                record(
                    &mut changes,
                    EntityKind::Scenario,
                    scenario.id,
                    &mut scenario.status,
                    status,
                );
            }
            for stage in &mut scenario.stages {
                if let Some(status) = self.stage_status(stage.id) {
                    record(&mut changes, EntityKind::Stage, stage.id, &mut stage.status, status);
                }
            }
        }

        if forecast.id == self.forecast_id {
            record(
                &mut changes,
                EntityKind::Forecast,
                forecast.id,
                &mut forecast.status,
                self.forecast,
            );
        }

        changes
    }
}

fn find(entities: &[EntityStatus], id: Uuid) -> Option<Status> {
    entities
        .iter()
        .find(|entity| entity.id == id)
        .map(|entity| entity.status)
}

fn record(
    changes: &mut Vec<StatusChange>,
    entity: EntityKind,
    id: Uuid,
    current: &mut Status,
    next: Status,
) {
    if *current != next {
        changes.push(StatusChange {
            entity,
            id,
            from: *current,
            to: next,
        });
        *current = next;
    }
}
