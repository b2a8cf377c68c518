use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use super::{ForecastStore, StoreError, StoreResult};
use crate::models::{Forecast, ForecastInputs, ModelRun, Project};
use crate::state_machine::{
    AggregatedStatuses, EntityKind, RunTransition, StatusChange, TransitionOutcome,
};

#[derive(Debug, Default)]
struct State {
    projects: HashMap<Uuid, Project>,
    forecasts: HashMap<Uuid, Forecast>,
    /// run id → owning forecast id
    run_index: HashMap<Uuid, Uuid>,
}

impl State {
    fn run_mut(&mut self, run_id: Uuid) -> StoreResult<&mut ModelRun> {
        let forecast_id = *self
            .run_index
            .get(&run_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::ModelRun, run_id))?;
        self.forecasts
            .get_mut(&forecast_id)
            .and_then(|forecast| forecast.find_run_mut(run_id))
            .ok_or_else(|| StoreError::not_found(EntityKind::ModelRun, run_id))
    }
}

/// Process-local store; every operation holds the lock only for its own
/// read or write
#[derive(Debug, Default)]
pub struct InMemoryForecastStore {
    state: RwLock<State>,
}

impl InMemoryForecastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_project(&self, project: Project) {
        self.state.write().projects.insert(project.id, project);
    }

    pub fn insert_forecast(&self, forecast: Forecast) {
        let mut state = self.state.write();
        for scenario in &forecast.scenarios {
            for stage in &scenario.stages {
                for run in &stage.runs {
                    state.run_index.insert(run.id, forecast.id);
                }
            }
        }
        state.forecasts.insert(forecast.id, forecast);
    }

    /// Overwrite a run's stored state directly, bypassing the guards
    pub fn replace_model_run(&self, run: ModelRun) -> StoreResult<()> {
        let mut state = self.state.write();
        let stored = state.run_mut(run.id)?;
        *stored = run;
        Ok(())
    }
}

#[async_trait]
impl ForecastStore for InMemoryForecastStore {
    async fn load_project(&self, project_id: Uuid) -> StoreResult<Project> {
        self.state
            .read()
            .projects
            .get(&project_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Project, project_id))
    }

    async fn load_forecast(&self, forecast_id: Uuid) -> StoreResult<Forecast> {
        self.state
            .read()
            .forecasts
            .get(&forecast_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::Forecast, forecast_id))
    }

    async fn load_model_run(&self, run_id: Uuid) -> StoreResult<ModelRun> {
        let state = self.state.read();
        state
            .run_index
            .get(&run_id)
            .and_then(|forecast_id| state.forecasts.get(forecast_id))
            .and_then(|forecast| forecast.find_run(run_id))
            .cloned()
            .ok_or_else(|| StoreError::not_found(EntityKind::ModelRun, run_id))
    }

    async fn apply_run_transition(
        &self,
        run_id: Uuid,
        transition: RunTransition,
    ) -> StoreResult<TransitionOutcome> {
        let mut state = self.state.write();
        let run = state.run_mut(run_id)?;
        Ok(run.transition(transition)?)
    }

    async fn update_forecast_inputs(
        &self,
        forecast_id: Uuid,
        inputs: ForecastInputs,
    ) -> StoreResult<()> {
        let mut state = self.state.write();
        let forecast = state
            .forecasts
            .get_mut(&forecast_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Forecast, forecast_id))?;
        forecast.inputs = inputs;
        Ok(())
    }

    async fn persist_statuses(
        &self,
        statuses: &AggregatedStatuses,
    ) -> StoreResult<Vec<StatusChange>> {
        let mut state = self.state.write();
        let forecast = state
            .forecasts
            .get_mut(&statuses.forecast_id)
            .ok_or_else(|| StoreError::not_found(EntityKind::Forecast, statuses.forecast_id))?;
        Ok(statuses.apply_to(forecast))
    }

    async fn list_forecasts(&self, project_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let state = self.state.read();
        let mut forecasts: Vec<&Forecast> = state
            .forecasts
            .values()
            .filter(|forecast| forecast.project_id == project_id)
            .collect();
        forecasts.sort_by_key(|forecast| forecast.starttime);
        Ok(forecasts.into_iter().map(|forecast| forecast.id).collect())
    }
}
