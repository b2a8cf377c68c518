use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Map, Value};

use super::errors::{WorkerError, WorkerResult};
use crate::models::{Forecast, ModelRun, Project, Scenario, SeismicCatalog, Stage};

/// Everything a model worker needs to compute one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunPayload {
    pub seismic_catalog: Option<String>,
    pub well: Option<Value>,
    pub injection_plan: Option<Value>,
    pub reservoir_geometry: Option<Value>,
    pub model_parameters: Map<String, Value>,
    pub forecast_start: DateTime<Utc>,
    pub forecast_end: DateTime<Utc>,
}

impl RunPayload {
    /// Assemble the payload for `run` from its owning context.
    ///
    /// Fails with [`WorkerError::Encoding`] when the inputs cannot form a valid
    /// request; such a run is never submitted.
    pub fn build(
        project: &Project,
        forecast: &Forecast,
        scenario: &Scenario,
        stage: &Stage,
        run: &ModelRun,
    ) -> WorkerResult<Self> {
        if forecast.endtime <= forecast.starttime {
            return Err(WorkerError::Encoding(format!(
                "forecast window is empty: {} .. {}",
                forecast.starttime, forecast.endtime
            )));
        }

        let catalog = forecast.inputs.seismic_catalog.as_ref();
        if stage.kind.requires_catalog() && catalog.is_none() {
            return Err(WorkerError::Encoding(format!(
                "{} stage requires a seismic catalog",
                stage.kind
            )));
        }

        let mut model_parameters = run.effective_parameters();
        if let Some(epoch) = stage.epoch_duration() {
            model_parameters.insert("epoch_duration".into(), json!(epoch));
        }
        model_parameters.insert("forecast_start".into(), json!(rfc3339(forecast.starttime)));
        model_parameters.insert("forecast_end".into(), json!(rfc3339(forecast.endtime)));

        Ok(Self {
            seismic_catalog: catalog.map(|SeismicCatalog { quakeml, .. }| quakeml.clone()),
            well: forecast.inputs.well.as_ref().map(|well| well.data.clone()),
            injection_plan: scenario.injection_plan.clone(),
            reservoir_geometry: scenario
                .reservoir_geometry
                .clone()
                .or_else(|| project.reservoir_geometry.clone()),
            model_parameters,
            forecast_start: forecast.starttime,
            forecast_end: forecast.endtime,
        })
    }

    /// JSON body of `POST v1/sfm/run`
    pub fn to_request_body(&self) -> Value {
        json!({
            "data": {
                "attributes": {
                    "seismic_catalog": {"quakeml": self.seismic_catalog},
                    "well": self.well,
                    "scenario": {"well": self.injection_plan},
                    "reservoir": {"geom": self.reservoir_geometry},
                    "model_parameters": self.model_parameters,
                }
            }
        })
    }

    /// Serialized request body
    pub fn encode(&self) -> WorkerResult<Vec<u8>> {
        serde_json::to_vec(&self.to_request_body())
            .map_err(|e| WorkerError::Encoding(e.to_string()))
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
