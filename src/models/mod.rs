//! # Models
//!
//! Typed snapshots of the forecast entity hierarchy and the values the engine
//! exchanges with model workers.

pub mod forecast;
pub mod model_run;
pub mod result;

pub use forecast::{
    Forecast, ForecastInputs, Project, Scenario, SeismicCatalog, Stage, StageKind, WellSnapshot,
};
pub use model_run::{ModelReference, ModelRun, RemoteTaskId};
pub use result::{BoundingBox, ForecastSample, ModelResult};
