//! # Forecast Hierarchy
//!
//! Forecast → Scenario → Stage → ModelRun. The engine only ever holds
//! snapshots of this tree; the store owns the entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use super::model_run::ModelRun;
use crate::state_machine::Status;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    /// Default reservoir geometry for scenarios that don't override it
    pub reservoir_geometry: Option<Value>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            reservoir_geometry: None,
        }
    }
}

/// Seismic catalog snapshot, as fetched from the catalog service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeismicCatalog {
    pub fetched_at: DateTime<Utc>,
    /// QuakeML document
    pub quakeml: String,
}

/// Well geometry and hydraulic history snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WellSnapshot {
    pub fetched_at: DateTime<Utc>,
    pub data: Value,
}

/// Upstream inputs a forecast is computed from
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForecastInputs {
    pub seismic_catalog: Option<SeismicCatalog>,
    pub well: Option<WellSnapshot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageKind {
    Seismicity,
    Hazard,
    Risk,
    SeismicitySkill,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seismicity => "SEISMICITY",
            Self::Hazard => "HAZARD",
            Self::Risk => "RISK",
            Self::SeismicitySkill => "SEISMICITY_SKILL",
        }
    }

    /// Stage kinds whose models consume the seismic catalog
    pub fn requires_catalog(&self) -> bool {
        matches!(self, Self::Seismicity | Self::SeismicitySkill)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SEISMICITY" => Ok(Self::Seismicity),
            "HAZARD" => Ok(Self::Hazard),
            "RISK" => Ok(Self::Risk),
            "SEISMICITY_SKILL" => Ok(Self::SeismicitySkill),
            _ => Err(format!("Invalid stage kind: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub id: Uuid,
    pub kind: StageKind,
    pub enabled: bool,
    /// Opaque stage configuration, e.g. `epoch_duration`
    #[serde(default)]
    pub config: Map<String, Value>,
    pub status: Status,
    pub runs: Vec<ModelRun>,
}

impl Stage {
    pub fn new(kind: StageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            enabled: true,
            config: Map::new(),
            status: Status::Pending,
            runs: Vec::new(),
        }
    }

    pub fn with_run(mut self, run: ModelRun) -> Self {
        self.runs.push(run);
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    /// Epoch length in seconds, when the stage splits the window into epochs
    pub fn epoch_duration(&self) -> Option<i64> {
        self.config.get("epoch_duration").and_then(Value::as_i64)
    }

    pub fn enabled_runs(&self) -> impl Iterator<Item = &ModelRun> {
        self.runs.iter().filter(|run| run.enabled)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
    pub status: Status,
    /// Planned well hydraulics for this scenario
    pub injection_plan: Option<Value>,
    /// Overrides the project's reservoir geometry when set
    pub reservoir_geometry: Option<Value>,
    pub stages: Vec<Stage>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            enabled: true,
            status: Status::Pending,
            injection_plan: None,
            reservoir_geometry: None,
            stages: Vec::new(),
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_injection_plan(mut self, plan: Value) -> Self {
        self.injection_plan = Some(plan);
        self
    }

    pub fn stage(&self, kind: StageKind) -> Option<&Stage> {
        self.stages.iter().find(|stage| stage.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    pub status: Status,
    #[serde(default)]
    pub inputs: ForecastInputs,
    pub scenarios: Vec<Scenario>,
}

impl Forecast {
    pub fn new(
        project_id: Uuid,
        name: impl Into<String>,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            name: name.into(),
            starttime,
            endtime,
            status: Status::Pending,
            inputs: ForecastInputs::default(),
            scenarios: Vec::new(),
        }
    }

    pub fn with_scenario(mut self, scenario: Scenario) -> Self {
        self.scenarios.push(scenario);
        self
    }

    /// Every run that is enabled along its whole path (scenario, stage, run)
    pub fn enabled_runs(&self) -> impl Iterator<Item = &ModelRun> {
        self.scenarios
            .iter()
            .filter(|scenario| scenario.enabled)
            .flat_map(|scenario| scenario.stages.iter().filter(|stage| stage.enabled))
            .flat_map(|stage| stage.enabled_runs())
    }

    pub fn find_run(&self, run_id: Uuid) -> Option<&ModelRun> {
        self.scenarios
            .iter()
            .flat_map(|scenario| scenario.stages.iter())
            .flat_map(|stage| stage.runs.iter())
            .find(|run| run.id == run_id)
    }

    pub fn find_run_mut(&mut self, run_id: Uuid) -> Option<&mut ModelRun> {
        self.scenarios
            .iter_mut()
            .flat_map(|scenario| scenario.stages.iter_mut())
            .flat_map(|stage| stage.runs.iter_mut())
            .find(|run| run.id == run_id)
    }
}
