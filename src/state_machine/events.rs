use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::states::Status;
use crate::models::{ModelResult, RemoteTaskId};

/// Events that can trigger model run status transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RunTransition {
    /// Remote worker accepted the task
    Dispatch {
        runid: RemoteTaskId,
        dispatched_at: DateTime<Utc>,
    },
    /// Remote task finished with a result
    Complete { result: ModelResult },
    /// Submission or remote execution failed
    Fail { detail: String },
    /// Cancel the run
    Cancel,
    /// Put a failed or cancelled run back to pending
    Reset,
    /// Hold back a run that has not started
    Hold,
    /// Release a held run
    Release,
}

impl RunTransition {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Dispatch { .. } => "dispatch",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Cancel => "cancel",
            Self::Reset => "reset",
            Self::Hold => "hold",
            Self::Release => "release",
        }
    }

    pub fn target_status(&self) -> Status {
        match self {
            Self::Dispatch { .. } => Status::Dispatched,
            Self::Complete { .. } => Status::Complete,
            Self::Fail { .. } => Status::Error,
            Self::Cancel => Status::Cancelled,
            Self::Reset | Self::Release => Status::Pending,
            Self::Hold => Status::OnHold,
        }
    }

    /// Extract error message if this is a failure event
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail { detail } => Some(detail),
            _ => None,
        }
    }
}

/// What happened when a transition was offered to a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied { from: Status, to: Status },
    /// The run was cancelled meanwhile; the late transition was dropped
    Discarded { current: Status },
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Project,
    Forecast,
    Scenario,
    Stage,
    ModelRun,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Project => "project",
            Self::Forecast => "forecast",
            Self::Scenario => "scenario",
            Self::Stage => "stage",
            Self::ModelRun => "model_run",
        };
        f.write_str(name)
    }
}

/// A persisted status change on one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub entity: EntityKind,
    pub id: Uuid,
    pub from: Status,
    pub to: Status,
}
