//! Collaborator contracts the engine consumes: reservation storage and the
//! identity of whoever is acting.

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;

use crate::model::*;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("reservation not found: {0}")]
    NotFound(ReservationId),
    /// The store refused a write because it would double-book a resource.
    #[error("{resource} already booked on {date} by reservation {reservation_id}")]
    Conflict {
        resource: ResourceRef,
        date: NaiveDate,
        reservation_id: ReservationId,
        organization_id: OrganizationId,
    },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("journal error: {0}")]
    Journal(String),
    /// A status write expected `expected` but the row is now `found`.
    #[error("reservation {id} is {found}, expected {expected}")]
    StatusChanged {
        id: ReservationId,
        expected: ReservationStatus,
        found: ReservationStatus,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Reservations using `resource` on `date` whose window overlaps `slot`,
    /// in any status. `exclude` drops one row (the one being edited).
    async fn find_overlapping(
        &self,
        resource: ResourceRef,
        date: NaiveDate,
        slot: TimeSlot,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// All-or-nothing insert. Returns the stored rows in input order.
    async fn insert_reservations(
        &self,
        rows: Vec<Reservation>,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, StoreError>;

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<ReservationView>, StoreError>;

    /// Row-level change stream for every table the store owns.
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;
}

/// Whoever is acting on the current request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub name: Option<String>,
    pub is_administrator: bool,
}

impl Actor {
    pub fn administrator(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            is_administrator: true,
        }
    }

    pub fn member(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            is_administrator: false,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}

#[async_trait]
pub trait Identity: Send + Sync {
    async fn current_actor(&self) -> Result<Actor, StoreError>;
}

/// Always reports the same actor.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Actor);

#[async_trait]
impl Identity for StaticIdentity {
    async fn current_actor(&self) -> Result<Actor, StoreError> {
        Ok(self.0.clone())
    }
}
