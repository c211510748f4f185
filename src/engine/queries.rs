use chrono::{NaiveDate, NaiveTime};

use crate::model::*;

use super::{ConflictCheck, Engine, EngineError};

impl Engine {
    pub async fn get(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        let result = self
            .repo_call("get_reservation", self.repo.get_reservation(id))
            .await
            .and_then(|row| row.ok_or(EngineError::NotFound(id)));
        self.observe("get", result)
    }

    /// Reservations with their joins resolved, ordered by date then start time.
    pub async fn list(&self, filter: &ReservationFilter) -> Result<Vec<ReservationView>, EngineError> {
        let result = self
            .repo_call("list_reservations", self.repo.list_reservations(filter))
            .await;
        self.observe("list", result)
    }

    /// Whether `resource` is free on `date` between `start` and `end`.
    /// `exclude` ignores one reservation, typically the one being edited.
    pub async fn check_availability(
        &self,
        resource: ResourceRef,
        date: NaiveDate,
        start: NaiveTime,
        end: NaiveTime,
        exclude: Option<ReservationId>,
    ) -> Result<ConflictCheck, EngineError> {
        let result = if start < end {
            self.check_conflict(resource, date, TimeSlot::new(start, end), exclude)
                .await
        } else {
            // An empty or inverted window overlaps nothing.
            Ok(ConflictCheck::Free)
        };
        self.observe("check_availability", result)
    }
}
