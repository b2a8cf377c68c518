use serde::{Deserialize, Serialize};
use std::fmt;

/// Status carried by every entity of the forecast hierarchy
///
/// Not every entity kind uses every value: `Prepared` is only set on stages
/// ("ready but not started", used by the hazard stage) and `Dispatched` only on
/// model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, nothing has happened yet
    #[default]
    Pending,
    /// Work under this entity is in progress
    Running,
    /// A remote task exists for this run and has not reached a terminal state
    Dispatched,
    /// Ready but not started; aggregates like `Pending`
    Prepared,
    /// Finished successfully
    Complete,
    /// Finished with an error
    Error,
    /// Held back by an operator, skipped by the engine
    #[serde(rename = "ONHOLD")]
    OnHold,
    /// Cancelled before reaching a result
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Pending,
        Status::Running,
        Status::Dispatched,
        Status::Prepared,
        Status::Complete,
        Status::Error,
        Status::OnHold,
        Status::Cancelled,
    ];

    /// No further transitions happen without an external reset
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Cancelled)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// A remote task may be outstanding for an entity in this status
    pub fn is_outstanding(&self) -> bool {
        matches!(self, Self::Dispatched)
    }

    /// Nothing has started yet; `Prepared` and `OnHold` count as not started
    pub fn is_not_started(&self) -> bool {
        matches!(self, Self::Pending | Self::Prepared | Self::OnHold)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Dispatched => "DISPATCHED",
            Self::Prepared => "PREPARED",
            Self::Complete => "COMPLETE",
            Self::Error => "ERROR",
            Self::OnHold => "ONHOLD",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Invalid status: {s}"))
    }
}
