//! Shared types for the orchestration layer.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Forecast, ModelRun, Project, RemoteTaskId, Scenario, Stage};
use crate::state_machine::Status;
use crate::worker::{RunPayload, WorkerResult};

/// A run located inside the snapshot it was discovered in
///
/// The snapshot is shared between all contexts of one discovery pass.
#[derive(Debug, Clone)]
pub struct RunContext {
    project: Arc<Project>,
    forecast: Arc<Forecast>,
    scenario_index: usize,
    stage_index: usize,
    run_index: usize,
}

impl RunContext {
    /// Returns `None` when the indices don't point at a run
    pub fn new(
        project: Arc<Project>,
        forecast: Arc<Forecast>,
        scenario_index: usize,
        stage_index: usize,
        run_index: usize,
    ) -> Option<Self> {
        forecast
            .scenarios
            .get(scenario_index)?
            .stages
            .get(stage_index)?
            .runs
            .get(run_index)?;

        Some(Self {
            project,
            forecast,
            scenario_index,
            stage_index,
            run_index,
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn forecast(&self) -> &Forecast {
        &self.forecast
    }

    pub fn scenario(&self) -> &Scenario {
        &self.forecast.scenarios[self.scenario_index]
    }

    pub fn stage(&self) -> &Stage {
        &self.scenario().stages[self.stage_index]
    }

    pub fn run(&self) -> &ModelRun {
        &self.stage().runs[self.run_index]
    }

    pub fn run_id(&self) -> Uuid {
        self.run().id
    }

    pub fn build_payload(&self) -> WorkerResult<RunPayload> {
        RunPayload::build(
            self.project(),
            self.forecast(),
            self.scenario(),
            self.stage(),
            self.run(),
        )
    }
}

/// What a single dispatch attempt did to its run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The worker accepted the task and the run is now `DISPATCHED`
    Dispatched { runid: RemoteTaskId },
    /// The run is now `ERROR`; it is not submitted again
    Failed { detail: String },
    /// The run was cancelled while the submit was in flight
    Discarded,
}

/// Where one poll invocation left its run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    Failed { detail: String },
    /// Query budget for this invocation spent; the run stays `DISPATCHED`
    StillRunning,
    /// The wait was interrupted; the run stays `DISPATCHED`
    Cancelled,
    /// The run was no longer `DISPATCHED`, or its update lost a race
    Discarded,
}

impl PollOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    pub run_id: Uuid,
    pub outcome: PollOutcome,
    /// Number of `query` calls made
    pub queries: u32,
    /// Backoff waits taken between queries, in order
    pub waits: Vec<Duration>,
}

impl PollReport {
    pub(crate) fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            outcome: PollOutcome::StillRunning,
            queries: 0,
            waits: Vec::new(),
        }
    }

    pub(crate) fn finish(mut self, outcome: PollOutcome) -> Self {
        self.outcome = outcome;
        self
    }
}

/// Result of one forecast activation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub forecast_id: Uuid,
    /// Runs submitted during this activation
    pub dispatched: usize,
    pub completed: usize,
    pub failed: usize,
    /// Runs left `DISPATCHED` when the activation ended
    pub still_running: usize,
    pub rounds: u32,
    /// Aggregated forecast status
    pub status: Status,
}

impl ExecutionSummary {
    pub fn is_complete(&self) -> bool {
        self.status == Status::Complete
    }
}
