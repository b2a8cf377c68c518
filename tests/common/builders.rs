//! Forecast fixtures and an engine wired to in-memory collaborators.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use seismo_forecast::config::EngineConfig;
use seismo_forecast::models::{
    Forecast, ForecastInputs, ModelReference, ModelRun, Project, RemoteTaskId, Scenario,
    SeismicCatalog, Stage, StageKind, WellSnapshot,
};
use seismo_forecast::orchestration::{ForecastExecutor, StaticInputProvider};
use seismo_forecast::state_machine::Status;
use seismo_forecast::store::InMemoryForecastStore;

use super::MockWorkerProvider;

pub const ETAS_URL: &str = "http://etas-worker:5000";
pub const EM1_URL: &str = "http://em1-worker:5000";

pub fn forecast_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

pub fn catalog_inputs() -> ForecastInputs {
    ForecastInputs {
        seismic_catalog: Some(SeismicCatalog {
            fetched_at: forecast_start(),
            quakeml: "<quakeml><eventParameters/></quakeml>".to_string(),
        }),
        well: Some(WellSnapshot {
            fetched_at: forecast_start(),
            data: json!({"name": "basel-1", "sections": []}),
        }),
    }
}

/// Millisecond delays everywhere, no jitter
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.backoff.base_delay_ms = 1;
    config.backoff.max_delay_ms = 8;
    config.backoff.jitter_enabled = false;
    config.backoff.max_jitter = 0.0;
    config.backoff.max_retries = 3;
    config.orchestration.round_delay_ms = 1;
    config.orchestration.max_round_delay_ms = 5;
    config.orchestration.max_polls_per_round = 10;
    config.orchestration.max_rounds = Some(20);
    config.reservation.acquire_timeout_ms = 5_000;
    config
}

pub fn etas_run() -> ModelRun {
    ModelRun::new(ModelReference::new("etas", ETAS_URL))
}

pub fn em1_run() -> ModelRun {
    ModelRun::new(ModelReference::new("em1", EM1_URL))
}

/// A run that an earlier activation already submitted
pub fn dispatched_run(model: ModelReference, task: &str) -> ModelRun {
    let mut run = ModelRun::new(model);
    run.status = Status::Dispatched;
    run.runid = Some(RemoteTaskId::new(task));
    run.dispatched_at = Some(Utc::now() - Duration::minutes(5));
    run
}

/// One scenario with one seismicity stage holding `runs`
pub fn seismicity_forecast(project: &Project, runs: Vec<ModelRun>) -> Forecast {
    let stage = runs
        .into_iter()
        .fold(Stage::new(StageKind::Seismicity), Stage::with_run);
    let scenario = Scenario::new("base case")
        .with_injection_plan(json!({"rate_m3_min": 0.4}))
        .with_stage(stage);

    let mut forecast = Forecast::new(
        project.id,
        "weekly",
        forecast_start(),
        forecast_start() + Duration::hours(6),
    )
    .with_scenario(scenario);
    forecast.inputs = catalog_inputs();
    forecast
}

pub struct TestEngine {
    pub project: Project,
    pub store: Arc<InMemoryForecastStore>,
    pub workers: Arc<MockWorkerProvider>,
    pub executor: Arc<ForecastExecutor>,
}

impl TestEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_inputs(config, StaticInputProvider::new(catalog_inputs()))
    }

    pub fn with_inputs(config: EngineConfig, inputs: StaticInputProvider) -> Self {
        let project = Project::new("basel");
        let store = Arc::new(InMemoryForecastStore::new());
        store.insert_project(project.clone());
        let workers = Arc::new(MockWorkerProvider::new());

        let executor = ForecastExecutor::new(
            store.clone(),
            workers.clone(),
            Arc::new(inputs),
            &config,
        )
        .expect("valid engine configuration");

        Self {
            project,
            store,
            workers,
            executor: Arc::new(executor),
        }
    }

    pub fn with_forecast(&self, runs: Vec<ModelRun>) -> Forecast {
        let forecast = seismicity_forecast(&self.project, runs);
        self.store.insert_forecast(forecast.clone());
        forecast
    }
}
