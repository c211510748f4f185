use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{OrganizationId, ReservationId, ReservationStatus, ResourceRef};
use crate::repository::StoreError;

use super::workflow::StatusAction;

/// Draft fields a validation message can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Purpose,
    StartDate,
    EndDate,
    StartTime,
    EndTime,
    Resource,
    Organization,
    Requester,
    OfficerInCharge,
    ContactNumber,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::Purpose => "purpose",
            Field::StartDate => "start_date",
            Field::EndDate => "end_date",
            Field::StartTime => "start_time",
            Field::EndTime => "end_time",
            Field::Resource => "resource",
            Field::Organization => "organization",
            Field::Requester => "requester",
            Field::OfficerInCharge => "officer_in_charge",
            Field::ContactNumber => "contact_number",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field → message. One message per field; the first failure recorded wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<Field, String>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: Field, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn single(field: Field, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn get(&self, field: Field) -> Option<&str> {
        self.0.get(&field).map(String::as_str)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.0.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = Field> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, &str)> {
        self.0.iter().map(|(f, m)| (*f, m.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (field, message)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{field}: {message}")?;
        }
        Ok(())
    }
}

/// A requested slot collides with an existing reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{resource} is already booked on {date} by reservation {reservation_id}")]
pub struct ConflictError {
    pub resource: ResourceRef,
    pub date: NaiveDate,
    pub reservation_id: ReservationId,
    pub organization_id: OrganizationId,
}

/// Backend trouble. Retryable; never the user's fault.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InfrastructureError {
    #[error("{operation} timed out")]
    Timeout { operation: &'static str },
    #[error("{operation} failed: {message}")]
    Unavailable {
        operation: &'static str,
        message: String,
    },
    #[error("availability unknown for {resource}: {message}")]
    AvailabilityUnknown {
        resource: ResourceRef,
        message: String,
    },
    #[error("journal error: {0}")]
    Journal(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),
    #[error(transparent)]
    Conflict(ConflictError),
    #[error("cannot {action} a {from} reservation")]
    InvalidTransition {
        from: ReservationStatus,
        action: StatusAction,
    },
    #[error("{actor} may not {action} reservations")]
    Forbidden { actor: String, action: StatusAction },
    #[error("{start} to {end} contains no bookable weekdays")]
    EmptyExpansion { start: NaiveDate, end: NaiveDate },
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

impl EngineError {
    /// Transient backend failure; the same call may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Infrastructure(_))
    }

    /// The user can fix this by changing their input or picking another slot.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            EngineError::Validation(_) | EngineError::Conflict(_) | EngineError::EmptyExpansion { .. }
        )
    }

    /// Map a repository failure raised while running `operation`.
    pub(crate) fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::NotFound(id),
            StoreError::Conflict {
                resource,
                date,
                reservation_id,
                organization_id,
            } => EngineError::Conflict(ConflictError {
                resource,
                date,
                reservation_id,
                organization_id,
            }),
            StoreError::Journal(message) => InfrastructureError::Journal(message).into(),
            StoreError::Unavailable(message) => {
                InfrastructureError::Unavailable { operation, message }.into()
            }
            // Only status writes can raise this; `change_status` maps it to
            // `InvalidTransition` itself since it knows the action.
            err @ StoreError::StatusChanged { .. } => InfrastructureError::Unavailable {
                operation,
                message: err.to_string(),
            }
            .into(),
            StoreError::LimitExceeded(what) => InfrastructureError::Unavailable {
                operation,
                message: format!("limit exceeded: {what}"),
            }
            .into(),
        }
    }
}
