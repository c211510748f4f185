//! Approval state machine.
//!
//! ```text
//! Pending ──approve──▶ Reserved
//!    │ ────reject───▶ Rejected
//!    └─────cancel───▶ Cancelled
//! ```
//!
//! Every state other than Pending is terminal. Only administrators may move
//! a reservation out of Pending.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ReservationStatus, StatusChange};
use crate::repository::Actor;

use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusAction {
    Approve,
    Reject,
    Cancel,
}

impl StatusAction {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusAction::Approve => "approve",
            StatusAction::Reject => "reject",
            StatusAction::Cancel => "cancel",
        }
    }

    pub fn target(self) -> ReservationStatus {
        match self {
            StatusAction::Approve => ReservationStatus::Reserved,
            StatusAction::Reject => ReservationStatus::Rejected,
            StatusAction::Cancel => ReservationStatus::Cancelled,
        }
    }
}

impl fmt::Display for StatusAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status action: {0:?}")]
pub struct UnknownAction(pub String);

impl FromStr for StatusAction {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(StatusAction::Approve),
            "reject" => Ok(StatusAction::Reject),
            "cancel" => Ok(StatusAction::Cancel),
            _ => Err(UnknownAction(s.to_string())),
        }
    }
}

/// An accepted move, for the caller to persist and show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ReservationStatus,
    pub to: ReservationStatus,
    pub decided_at: DateTime<Utc>,
}

impl Transition {
    pub fn change(&self) -> StatusChange {
        StatusChange {
            from: self.from,
            status: self.to,
            decided_at: Some(self.decided_at),
        }
    }
}

/// Every action is allowed out of Pending and none out of a terminal state.
pub fn can_transition(from: ReservationStatus, _action: StatusAction) -> bool {
    !from.is_terminal()
}

/// Decide whether `actor` may apply `action` to a reservation in `current`.
pub fn transition(
    current: ReservationStatus,
    action: StatusAction,
    actor: &Actor,
    at: DateTime<Utc>,
) -> Result<Transition, EngineError> {
    if !actor.is_administrator {
        return Err(EngineError::Forbidden {
            actor: actor.display_name().to_string(),
            action,
        });
    }
    if !can_transition(current, action) {
        return Err(EngineError::InvalidTransition {
            from: current,
            action,
        });
    }
    Ok(Transition {
        from: current,
        to: action.target(),
        decided_at: at,
    })
}
