use crate::model::*;
use crate::observability;
use crate::repository::StoreError;

use super::error::Field;
use super::{Engine, EngineError, StatusAction, ValidationErrors, expand, transition, validate};

const SINGLE_DAY_EDIT: &str = "an edit covers one day; end date must match the start date";

impl Engine {
    /// Validate, expand, conflict-check and persist a request as Pending rows.
    /// All-or-nothing: a conflict on any day rejects the whole submission.
    pub async fn submit(&self, draft: ReservationDraft) -> Result<Vec<Reservation>, EngineError> {
        let result = self.submit_inner(&draft).await;
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(err) => observability::error_label(err),
        };
        metrics::counter!(observability::SUBMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        self.observe("submit", result)
    }

    async fn submit_inner(&self, draft: &ReservationDraft) -> Result<Vec<Reservation>, EngineError> {
        let request = validate(draft, self.today()).map_err(EngineError::Validation)?;
        let days = expand(&request);
        if days.is_empty() {
            return Err(EngineError::EmptyExpansion {
                start: request.start_date,
                end: request.end_date,
            });
        }

        let slot = request.slot();
        let resources = request.resources();
        let pairs: Vec<_> = days
            .iter()
            .flat_map(|day| resources.iter().map(move |r| (day.date, *r)))
            .collect();
        self.check_all(&pairs, slot, None).await?;

        let created_at = self.now();
        let rows: Vec<Reservation> = days
            .iter()
            .map(|day| Reservation {
                id: ReservationId::new(),
                purpose: request.purpose.clone(),
                activity_date: day.date,
                start_time: request.start_time,
                end_time: request.end_time,
                organization_id: request.organization_id,
                venue_id: request.venue_id,
                equipment_ids: request.equipment_ids.clone(),
                status: ReservationStatus::Pending,
                requester: request.requester.clone(),
                officer_in_charge: request.officer_in_charge.clone(),
                contact_number: request.contact_number.clone(),
                created_at,
                edited_at: None,
                decided_at: None,
                multi_day: day.slot,
            })
            .collect();

        let created = self
            .repo_call("insert_reservations", self.repo.insert_reservations(rows))
            .await?;
        metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(created.len() as u64);
        tracing::info!(
            organization = %request.organization_id,
            start = %request.start_date,
            end = %request.end_date,
            %slot,
            rows = created.len(),
            "reservation submitted"
        );
        Ok(created)
    }

    /// Replace the fields of one reservation in place. Status is kept.
    pub async fn update(&self, id: ReservationId, draft: ReservationDraft) -> Result<Reservation, EngineError> {
        let result = self.update_inner(id, &draft).await;
        self.observe("update", result)
    }

    async fn update_inner(&self, id: ReservationId, draft: &ReservationDraft) -> Result<Reservation, EngineError> {
        let single_day = match (draft.start_date, draft.end_date) {
            (_, None) => true,
            (Some(start), Some(end)) => start == end,
            (None, Some(_)) => false,
        };
        let request = match validate(draft, self.today()) {
            Ok(request) if single_day => request,
            Ok(_) => {
                return Err(EngineError::Validation(ValidationErrors::single(
                    Field::EndDate,
                    SINGLE_DAY_EDIT,
                )));
            }
            Err(mut errors) => {
                if !single_day {
                    errors.add(Field::EndDate, SINGLE_DAY_EDIT);
                }
                return Err(EngineError::Validation(errors));
            }
        };

        self.repo_call("get_reservation", self.repo.get_reservation(id))
            .await?
            .ok_or(EngineError::NotFound(id))?;

        let pairs: Vec<_> = request
            .resources()
            .into_iter()
            .map(|r| (request.start_date, r))
            .collect();
        self.check_all(&pairs, request.slot(), Some(id)).await?;

        let patch = ReservationPatch::edit(request.into_edit(), self.now());
        let updated = self
            .repo_call("update_reservation", self.repo.update_reservation(id, patch))
            .await?;
        tracing::info!(reservation = %id, date = %updated.activity_date, slot = %updated.slot(), "reservation edited");
        Ok(updated)
    }

    /// Apply an approval action on behalf of the current actor.
    pub async fn change_status(&self, id: ReservationId, action: StatusAction) -> Result<Reservation, EngineError> {
        let result = self.change_status_inner(id, action).await;
        self.observe("change_status", result)
    }

    async fn change_status_inner(&self, id: ReservationId, action: StatusAction) -> Result<Reservation, EngineError> {
        let actor = self
            .repo_call("current_actor", self.identity.current_actor())
            .await?;
        let current = self
            .repo_call("get_reservation", self.repo.get_reservation(id))
            .await?
            .ok_or(EngineError::NotFound(id))?;

        let step = transition(current.status, action, &actor, self.now())?;
        // The store refuses the write if another decision landed in between.
        let updated = self
            .repo_call_with(
                "update_reservation",
                self.repo.update_reservation(id, ReservationPatch::status(step.change())),
                |err| match err {
                    StoreError::StatusChanged { found, .. } => {
                        EngineError::InvalidTransition { from: found, action }
                    }
                    other => EngineError::from_store("update_reservation", other),
                },
            )
            .await?;
        metrics::counter!(observability::TRANSITIONS_TOTAL, "to" => step.to.as_str()).increment(1);
        tracing::info!(
            reservation = %id,
            actor = actor.display_name(),
            from = %step.from,
            to = %step.to,
            "status changed"
        );
        Ok(updated)
    }

    /// Hard delete.
    pub async fn remove(&self, id: ReservationId) -> Result<(), EngineError> {
        let result = self
            .repo_call("delete_reservation", self.repo.delete_reservation(id))
            .await;
        if result.is_ok() {
            tracing::info!(reservation = %id, "reservation deleted");
        }
        self.observe("remove", result)
    }
}
