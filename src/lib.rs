#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Seismo Forecast Core
//!
//! Execution engine for induced-seismicity forecasts.
//!
//! ## Overview
//!
//! A forecast is a hierarchy of scenarios, stages and model runs. The numerical
//! models themselves live in external worker services reachable over HTTP; this
//! crate decomposes a forecast into its runs, submits each run to its worker,
//! polls the worker with backoff until the run finishes, and propagates the
//! outcome bottom-up through the hierarchy.
//!
//! ## Key Features
//!
//! - **Single-submit dispatch**: a run never has more than one remote task
//! - **Resumable polling**: restarted activations pick up dispatched runs
//!   without submitting them again
//! - **Run isolation**: failed runs are recorded and never abort siblings
//! - **Deterministic aggregation**: statuses are recomputed from full snapshots
//! - **Pluggable stores**: in-memory and PostgreSQL (`postgres` feature)
//!
//! ## Module Organization
//!
//! - [`models`] - Forecast, scenario, stage and model run entities
//! - [`state_machine`] - Statuses, run transition guards and aggregation
//! - [`worker`] - Model worker protocol and HTTP client
//! - [`orchestration`] - Dispatcher, poller, executor and coordination primitives
//! - [`store`] - Persistence of the entity hierarchy
//! - [`events`] - Status change broadcasting
//! - [`config`] - Layered configuration
//! - [`logging`] - Structured logging setup
//! - [`error`] - Crate-level error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use seismo_forecast::config::ConfigManager;
//! use seismo_forecast::orchestration::{ForecastExecutor, StaticInputProvider};
//! use seismo_forecast::store::InMemoryForecastStore;
//! use seismo_forecast::worker::HttpWorkerProvider;
//! use std::sync::Arc;
//!
//! # async fn example(forecast_id: uuid::Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! seismo_forecast::logging::init_structured_logging();
//! let mut config = ConfigManager::load()?.into_config();
//! // forecasts are stored with their inputs already attached
//! config.orchestration.refresh_inputs = false;
//!
//! let executor = ForecastExecutor::new(
//!     Arc::new(InMemoryForecastStore::new()),
//!     Arc::new(HttpWorkerProvider::new(&config.worker_client)?),
//!     Arc::new(StaticInputProvider::default()),
//!     &config,
//! )?;
//! let summary = executor.execute_forecast(forecast_id).await?;
//! println!("{} runs complete", summary.completed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                          # Unit and integration tests
//! cargo test -- --ignored             # PostgreSQL store tests (needs DATABASE_URL)
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod state_machine;
pub mod store;
pub mod worker;

pub use config::{ConfigManager, ConfigurationError, EngineConfig};
pub use constants::{status_groups, system};
pub use error::{EngineError, Result};
pub use events::{EventPublisher, StatusChangeEvent};
pub use models::{
    Forecast, ForecastInputs, ModelReference, ModelResult, ModelRun, Project, RemoteTaskId,
    Scenario, Stage, StageKind,
};
pub use orchestration::{
    DispatchOutcome, Dispatcher, ExecutionHandle, ExecutionSummary, ForecastExecutor,
    InputProvider, PollOutcome, PollReport, Poller,
};
pub use state_machine::{aggregate_forecast, AggregatedStatuses, RunTransition, Status};
pub use store::{ForecastStore, InMemoryForecastStore, StoreError};
pub use worker::{HttpModelWorker, HttpWorkerProvider, ModelWorker, TaskStatus, WorkerError};
