use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::broadcast;

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;
use crate::repository::{ReservationRepository, StoreError};

use super::MemoryStore;

fn conflict(resource: ResourceRef, existing: &Reservation) -> StoreError {
    StoreError::Conflict {
        resource,
        date: existing.activity_date,
        reservation_id: existing.id,
        organization_id: existing.organization_id,
    }
}

/// Overlap between two rows of the same batch, if any.
fn intra_batch_conflict(batch: &[Reservation]) -> Option<StoreError> {
    for (i, row) in batch.iter().enumerate() {
        if !row.status.holds_slot() {
            continue;
        }
        for earlier in &batch[..i] {
            if !earlier.status.holds_slot()
                || earlier.activity_date != row.activity_date
                || !earlier.slot().overlaps(&row.slot())
            {
                continue;
            }
            if let Some(shared) = row.resources().into_iter().find(|r| earlier.uses(r)) {
                return Some(conflict(shared, earlier));
            }
        }
    }
    None
}

#[async_trait]
impl ReservationRepository for MemoryStore {
    async fn find_overlapping(
        &self,
        resource: ResourceRef,
        date: NaiveDate,
        slot: TimeSlot,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self.overlapping(&resource, date, &slot, exclude))
    }

    async fn insert_reservations(
        &self,
        rows: Vec<Reservation>,
    ) -> Result<Vec<Reservation>, StoreError> {
        if rows.is_empty() {
            return Ok(rows);
        }
        if rows.len() > MAX_BATCH_SIZE {
            return Err(StoreError::LimitExceeded("batch too large"));
        }

        let _guard = self.write_lock.lock().await;

        // Phase 1: validate the whole batch against stored rows and itself.
        for row in &rows {
            if self.reservations.contains_key(&row.id) {
                return Err(StoreError::Unavailable(format!("duplicate reservation id {}", row.id)));
            }
            if row.status.holds_slot()
                && let Some((resource, existing)) = self.blocking_row(row)
            {
                return Err(conflict(resource, &existing));
            }
        }
        if let Some(err) = intra_batch_conflict(&rows) {
            return Err(err);
        }

        // Phase 2: one journal record for the batch, then fan out notifications.
        let event = StoreEvent::ReservationsInserted { rows: rows.clone() };
        self.persist_and_apply(&event).await?;
        for row in &rows {
            self.notify
                .send(&ChangeEvent::new(ChangeKind::Insert, ChangeRow::Reservation(row.clone())));
        }
        Ok(rows)
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut row = self
            .reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))?;

        if let Some(change) = &patch.status
            && row.status != change.from
        {
            return Err(StoreError::StatusChanged {
                id,
                expected: change.from,
                found: row.status,
            });
        }

        let moves_slot = patch.edit.is_some();
        patch.apply(&mut row);
        if moves_slot
            && row.status.holds_slot()
            && let Some((resource, existing)) = self.blocking_row(&row)
        {
            return Err(conflict(resource, &existing));
        }

        let event = StoreEvent::ReservationUpdated { row: row.clone() };
        self.persist_and_apply(&event).await?;
        self.notify
            .send(&ChangeEvent::new(ChangeKind::Update, ChangeRow::Reservation(row.clone())));
        Ok(row)
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let row = self
            .reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(StoreError::NotFound(id))?;
        self.persist_and_apply(&StoreEvent::ReservationDeleted { id }).await?;
        self.notify
            .send(&ChangeEvent::new(ChangeKind::Delete, ChangeRow::Reservation(row)));
        Ok(())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(&id).map(|r| r.value().clone()))
    }

    async fn list_reservations(
        &self,
        filter: &ReservationFilter,
    ) -> Result<Vec<ReservationView>, StoreError> {
        let rows: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        let mut views: Vec<ReservationView> = rows
            .into_iter()
            .map(|row| self.view(row))
            .filter(|view| filter.matches(view))
            .collect();
        views.sort_by_key(|v| {
            let r = &v.reservation;
            (r.activity_date, r.start_time, r.id)
        });
        Ok(views)
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.notify.subscribe_all()
    }
}
