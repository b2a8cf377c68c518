use thiserror::Error;
use uuid::Uuid;

use super::coordinator::CoordinatorError;
use crate::models::RemoteTaskId;
use crate::state_machine::Status;
use crate::store::StoreError;

/// Why a run was not submitted.
///
/// Worker failures are not in here: they end the run in `ERROR` and come back
/// as [`DispatchOutcome::Failed`](super::types::DispatchOutcome::Failed).
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Run {run_id} already has remote task {runid}")]
    AlreadyDispatched { run_id: Uuid, runid: RemoteTaskId },

    #[error("Run {run_id} is disabled")]
    Disabled { run_id: Uuid },

    #[error("Run {run_id} cannot be dispatched from {status}")]
    NotDispatchable { run_id: Uuid, status: Status },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coordination error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

impl DispatchError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_fatal())
    }
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coordination error: {0}")]
    Coordinator(#[from] CoordinatorError),
}

impl PollError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_fatal())
    }
}
