//! # Orchestration Engine
//!
//! Executes forecasts by delegating model runs to remote workers.
//!
//! ## Core Components
//!
//! - **ForecastExecutor**: one activation of a forecast, from input refresh to
//!   status aggregation
//! - **Dispatcher**: submits a pending run to its worker, exactly once
//! - **Poller**: queries a dispatched run with backoff until it is terminal
//! - **RunDiscovery**: selects the runs of a snapshot that need work
//! - **BackoffCalculator**: delays between queries and between poll rounds
//! - **Coordinator**: concurrency limits, exclusive reservations and
//!   cancellable pauses

pub mod backoff_calculator;
pub mod coordinator;
pub mod dispatcher;
pub mod errors;
pub mod forecast_executor;
pub mod input_provider;
pub mod poller;
pub mod run_discovery;
pub mod types;

pub use backoff_calculator::{BackoffCalculator, BackoffCalculatorConfig, BackoffError};
pub use coordinator::{
    pause, ConcurrencyLimiter, CoordinatorError, ReservationGuard, ResourceReservation,
};
pub use dispatcher::Dispatcher;
pub use errors::{DispatchError, PollError};
pub use forecast_executor::{ExecutionHandle, ForecastExecutor};
pub use input_provider::{InputError, InputProvider, StaticInputProvider};
pub use poller::{Poller, PollerConfig};
pub use types::{DispatchOutcome, ExecutionSummary, PollOutcome, PollReport, RunContext};
