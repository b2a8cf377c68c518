//! # Forecast Store
//!
//! Repository over the forecast entity hierarchy. The engine reads snapshots
//! through it and writes back run transitions and aggregated statuses.
//!
//! ## Key Features
//!
//! - **Guarded run transitions**: `apply_run_transition` runs the guard rules
//!   and the write as one atomic step per run
//! - **Late result handling**: transitions for a run cancelled in the
//!   meantime come back as [`TransitionOutcome::Discarded`]
//! - **Single-pass aggregation writes**: `persist_statuses` writes a whole
//!   [`AggregatedStatuses`] and reports what changed

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Forecast, ForecastInputs, ModelRun, Project};
use crate::state_machine::{
    AggregatedStatuses, EntityKind, GuardError, RunTransition, StatusChange, TransitionOutcome,
};

pub use memory::InMemoryForecastStore;
#[cfg(feature = "postgres")]
pub use postgres::PgForecastStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: Uuid },

    #[error("Transition rejected: {0}")]
    Guard(#[from] GuardError),

    #[error("Store backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(entity: EntityKind, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    /// The store itself is unusable, as opposed to a rejected request
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait ForecastStore: Send + Sync {
    async fn load_project(&self, project_id: Uuid) -> StoreResult<Project>;

    /// Full snapshot of a forecast, down to its runs
    async fn load_forecast(&self, forecast_id: Uuid) -> StoreResult<Forecast>;

    async fn load_model_run(&self, run_id: Uuid) -> StoreResult<ModelRun>;

    /// Check and apply a transition atomically for one run
    async fn apply_run_transition(
        &self,
        run_id: Uuid,
        transition: RunTransition,
    ) -> StoreResult<TransitionOutcome>;

    async fn update_forecast_inputs(
        &self,
        forecast_id: Uuid,
        inputs: ForecastInputs,
    ) -> StoreResult<()>;

    /// Write one aggregation pass; returns the statuses that changed
    async fn persist_statuses(
        &self,
        statuses: &AggregatedStatuses,
    ) -> StoreResult<Vec<StatusChange>>;

    async fn list_forecasts(&self, project_id: Uuid) -> StoreResult<Vec<Uuid>>;
}
