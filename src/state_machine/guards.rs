//! Guard rules for model run transitions.
//!
//! These are pure checks over a run snapshot. Stores call them (through
//! [`ModelRun::transition`](crate::models::ModelRun::transition)) while holding
//! whatever lock makes the read-check-write atomic for them.

use thiserror::Error;
use uuid::Uuid;

use super::events::RunTransition;
use super::states::Status;
use crate::constants::status_groups;
use crate::models::{ModelRun, RemoteTaskId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Invalid transition for run {run_id}: {transition} from {from}")]
    InvalidTransition {
        run_id: Uuid,
        from: Status,
        transition: &'static str,
    },

    #[error("Run {run_id} already has remote task {runid}")]
    AlreadyDispatched { run_id: Uuid, runid: RemoteTaskId },

    #[error("Run {run_id} has no remote task")]
    MissingRemoteTask { run_id: Uuid },

    #[error("Run {run_id} is disabled")]
    Disabled { run_id: Uuid },
}

pub type GuardResult<T> = Result<T, GuardError>;

/// Late results for a cancelled run are dropped rather than rejected
pub fn is_discarded(current: Status, transition: &RunTransition) -> bool {
    current == Status::Cancelled
        && matches!(
            transition,
            RunTransition::Dispatch { .. } | RunTransition::Complete { .. } | RunTransition::Fail { .. }
        )
}

pub fn check_run_transition(run: &ModelRun, transition: &RunTransition) -> GuardResult<()> {
    let invalid = || GuardError::InvalidTransition {
        run_id: run.id,
        from: run.status,
        transition: transition.event_type(),
    };

    match transition {
        RunTransition::Dispatch { .. } => {
            if let Some(runid) = &run.runid {
                return Err(GuardError::AlreadyDispatched {
                    run_id: run.id,
                    runid: runid.clone(),
                });
            }
            if !run.enabled {
                return Err(GuardError::Disabled { run_id: run.id });
            }
            if !status_groups::DISPATCHABLE.contains(&run.status) {
                return Err(invalid());
            }
        }
        RunTransition::Complete { .. } => {
            if run.status != Status::Dispatched {
                return Err(invalid());
            }
            if run.runid.is_none() {
                return Err(GuardError::MissingRemoteTask { run_id: run.id });
            }
        }
        RunTransition::Fail { .. } | RunTransition::Cancel => {
            if run.status.is_terminal() {
                return Err(invalid());
            }
        }
        RunTransition::Reset => {
            if !matches!(run.status, Status::Error | Status::Cancelled) {
                return Err(invalid());
            }
        }
        RunTransition::Hold => {
            if !matches!(run.status, Status::Pending | Status::Prepared) {
                return Err(invalid());
            }
        }
        RunTransition::Release => {
            if run.status != Status::OnHold {
                return Err(invalid());
            }
        }
    }

    Ok(())
}
