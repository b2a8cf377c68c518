//! Crate-level error type.
//!
//! Run-level failures (a worker rejecting a task, a poll budget running out) are
//! recorded on the affected [`ModelRun`](crate::models::ModelRun) and never
//! surface here. `EngineError` is reserved for conditions that stop a forecast
//! activation as a whole, chiefly an unreachable store.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::orchestration::backoff_calculator::BackoffError;
use crate::orchestration::coordinator::CoordinatorError;
use crate::store::StoreError;
use crate::worker::WorkerError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
    #[error("Backoff error: {0}")]
    Backoff(#[from] BackoffError),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
