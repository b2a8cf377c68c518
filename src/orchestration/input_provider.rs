use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Forecast, ForecastInputs, Project};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("Upstream input unavailable: {0}")]
    Unavailable(String),
}

/// Source of the upstream observations a forecast is computed from
///
/// Implementations fetch the seismic catalog and the hydraulic history for the
/// forecast window. Parsing those formats is up to the implementation.
#[async_trait]
pub trait InputProvider: Send + Sync {
    async fn fetch_inputs(
        &self,
        project: &Project,
        forecast: &Forecast,
    ) -> Result<ForecastInputs, InputError>;
}

/// Hands out the same inputs for every forecast
#[derive(Debug, Clone, Default)]
pub struct StaticInputProvider {
    inputs: ForecastInputs,
}

impl StaticInputProvider {
    pub fn new(inputs: ForecastInputs) -> Self {
        Self { inputs }
    }
}

#[async_trait]
impl InputProvider for StaticInputProvider {
    async fn fetch_inputs(
        &self,
        _project: &Project,
        _forecast: &Forecast,
    ) -> Result<ForecastInputs, InputError> {
        Ok(self.inputs.clone())
    }
}
