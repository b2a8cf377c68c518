//! # Model Run
//!
//! The smallest schedulable entity: one invocation of one model on a remote
//! worker. A run owns the identifier of its remote task once dispatched, and
//! every status change goes through [`ModelRun::transition`] so that the
//! guard rules in [`crate::state_machine::guards`] hold for every store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

use super::result::ModelResult;
use crate::state_machine::events::{RunTransition, TransitionOutcome};
use crate::state_machine::guards::{check_run_transition, is_discarded, GuardResult};
use crate::state_machine::Status;

/// Identifier of a task on a remote model worker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteTaskId(String);

impl RemoteTaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RemoteTaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RemoteTaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Externally configured model and the worker serving it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReference {
    pub name: String,
    /// Base URL of the model worker
    pub url: String,
    /// Model-level default parameters
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl ModelReference {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            config: Map::new(),
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRun {
    pub id: Uuid,
    pub enabled: bool,
    pub model: ModelReference,
    /// Run-level parameters, overriding the model defaults
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Remote task identifier, set once dispatched
    pub runid: Option<RemoteTaskId>,
    pub status: Status,
    /// Human-readable message for the current status (error detail, mostly)
    pub status_detail: Option<String>,
    pub dispatched_at: Option<DateTime<Utc>>,
    /// Present only once the run is complete
    pub result: Option<ModelResult>,
}

impl ModelRun {
    pub fn new(model: ModelReference) -> Self {
        Self {
            id: Uuid::new_v4(),
            enabled: true,
            model,
            config: Map::new(),
            runid: None,
            status: Status::Pending,
            status_detail: None,
            dispatched_at: None,
            result: None,
        }
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = config;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Model defaults overlaid with the run's own parameters
    pub fn effective_parameters(&self) -> Map<String, Value> {
        let mut parameters = self.model.config.clone();
        for (key, value) in &self.config {
            parameters.insert(key.clone(), value.clone());
        }
        parameters
    }

    pub fn is_dispatched(&self) -> bool {
        self.status == Status::Dispatched && self.runid.is_some()
    }

    /// Apply a transition after checking the guard rules.
    ///
    /// Results arriving for a run that was cancelled in the meantime are
    /// discarded without error.
    pub fn transition(&mut self, transition: RunTransition) -> GuardResult<TransitionOutcome> {
        if is_discarded(self.status, &transition) {
            return Ok(TransitionOutcome::Discarded {
                current: self.status,
            });
        }

        check_run_transition(self, &transition)?;

        let from = self.status;
        match transition {
            RunTransition::Dispatch {
                runid,
                dispatched_at,
            } => {
                self.runid = Some(runid);
                self.dispatched_at = Some(dispatched_at);
                self.status_detail = None;
                self.status = Status::Dispatched;
            }
            RunTransition::Complete { result } => {
                self.result = Some(result);
                self.status_detail = None;
                self.status = Status::Complete;
            }
            RunTransition::Fail { detail } => {
                self.status_detail = Some(detail);
                self.status = Status::Error;
            }
            RunTransition::Cancel => {
                self.status = Status::Cancelled;
            }
            RunTransition::Reset => {
                self.runid = None;
                self.dispatched_at = None;
                self.result = None;
                self.status_detail = None;
                self.status = Status::Pending;
            }
            RunTransition::Hold => {
                self.status = Status::OnHold;
            }
            RunTransition::Release => {
                self.status = Status::Pending;
            }
        }

        Ok(TransitionOutcome::Applied {
            from,
            to: self.status,
        })
    }
}
