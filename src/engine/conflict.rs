use chrono::NaiveDate;
use futures::future::try_join_all;

use crate::model::*;

use super::{ConflictError, Engine, EngineError, InfrastructureError};

/// Outcome of checking one resource on one day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    Free,
    Conflict(ConflictError),
}

impl ConflictCheck {
    pub fn is_free(&self) -> bool {
        matches!(self, ConflictCheck::Free)
    }
}

/// First row among `candidates` that uses `resource` on `date`, overlaps
/// `slot` and still holds it. Rejected and cancelled rows, and the excluded
/// id, never block. Candidates need not be pre-filtered.
pub fn first_conflict(
    candidates: &[Reservation],
    resource: ResourceRef,
    date: NaiveDate,
    slot: TimeSlot,
    exclude: Option<ReservationId>,
) -> ConflictCheck {
    candidates
        .iter()
        .filter(|r| r.status.holds_slot() && Some(r.id) != exclude)
        .find(|r| r.activity_date == date && r.uses(&resource) && r.slot().overlaps(&slot))
        .map_or(ConflictCheck::Free, |r| {
            ConflictCheck::Conflict(ConflictError {
                resource,
                date,
                reservation_id: r.id,
                organization_id: r.organization_id,
            })
        })
}

impl Engine {
    /// Ask the repository whether `resource` is free on `date` for `slot`.
    /// A failed lookup is reported as unknown availability, never as free.
    pub async fn check_conflict(
        &self,
        resource: ResourceRef,
        date: NaiveDate,
        slot: TimeSlot,
        exclude: Option<ReservationId>,
    ) -> Result<ConflictCheck, EngineError> {
        let rows = self
            .repo_call(
                "find_overlapping",
                self.repo.find_overlapping(resource, date, slot, exclude),
            )
            .await
            .map_err(|err| InfrastructureError::AvailabilityUnknown {
                resource,
                message: err.to_string(),
            })?;
        let check = first_conflict(&rows, resource, date, slot, exclude);
        tracing::debug!(%resource, %date, %slot, free = check.is_free(), "conflict check");
        Ok(check)
    }

    /// Check every (day, resource) pair concurrently; the first conflict in
    /// input order wins.
    pub(super) async fn check_all(
        &self,
        pairs: &[(NaiveDate, ResourceRef)],
        slot: TimeSlot,
        exclude: Option<ReservationId>,
    ) -> Result<(), EngineError> {
        let checks = try_join_all(
            pairs
                .iter()
                .map(|&(date, resource)| self.check_conflict(resource, date, slot, exclude)),
        )
        .await?;
        match checks.into_iter().find(|c| !c.is_free()) {
            Some(ConflictCheck::Conflict(conflict)) => {
                tracing::warn!(
                    resource = %conflict.resource,
                    date = %conflict.date,
                    held_by = %conflict.reservation_id,
                    "slot already booked"
                );
                Err(EngineError::Conflict(conflict))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveTime, Utc};

    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    fn slot(from: u32, to: u32) -> TimeSlot {
        TimeSlot::new(
            NaiveTime::from_hms_opt(from, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(to, 0, 0).unwrap(),
        )
    }

    fn booking(venue: VenueId, day: u32, from: u32, to: u32, status: ReservationStatus) -> Reservation {
        let s = slot(from, to);
        Reservation {
            id: ReservationId::new(),
            purpose: "Seminar".into(),
            activity_date: date(day),
            start_time: s.start,
            end_time: s.end,
            organization_id: OrganizationId::new(),
            venue_id: Some(venue),
            equipment_ids: vec![],
            status,
            requester: "Ana".into(),
            officer_in_charge: "Ben".into(),
            contact_number: "+639171234567".into(),
            created_at: Utc::now(),
            edited_at: None,
            decided_at: None,
            multi_day: None,
        }
    }

    #[test]
    fn unfiltered_candidates_only_block_on_real_overlap() {
        let venue = VenueId::new();
        let resource = ResourceRef::Venue(venue);
        // Everything a sloppy backend might return for the day.
        let candidates = vec![
            booking(venue, 12, 7, 9, ReservationStatus::Pending),
            booking(VenueId::new(), 12, 9, 12, ReservationStatus::Reserved),
            booking(venue, 13, 9, 12, ReservationStatus::Reserved),
            booking(venue, 12, 12, 14, ReservationStatus::Pending),
        ];
        assert!(first_conflict(&candidates, resource, date(12), slot(9, 12), None).is_free());

        let blocker = booking(venue, 12, 11, 13, ReservationStatus::Pending);
        let mut with_blocker = candidates.clone();
        with_blocker.push(blocker.clone());
        match first_conflict(&with_blocker, resource, date(12), slot(9, 12), None) {
            ConflictCheck::Conflict(c) => assert_eq!(c.reservation_id, blocker.id),
            ConflictCheck::Free => panic!("expected a conflict"),
        }
    }

    #[test]
    fn released_and_excluded_rows_never_block() {
        let venue = VenueId::new();
        let resource = ResourceRef::Venue(venue);
        let rejected = booking(venue, 12, 9, 12, ReservationStatus::Rejected);
        let cancelled = booking(venue, 12, 9, 12, ReservationStatus::Cancelled);
        let own = booking(venue, 12, 9, 12, ReservationStatus::Reserved);
        let rows = vec![rejected, cancelled, own.clone()];
        assert!(first_conflict(&rows, resource, date(12), slot(10, 11), Some(own.id)).is_free());
        assert!(!first_conflict(&rows, resource, date(12), slot(10, 11), None).is_free());
    }
}
