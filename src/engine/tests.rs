use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::clock::FixedClock;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::repository::{Actor, StaticIdentity};
use crate::store::MemoryStore;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 10:00 Manila on Tue 2025-06-10.
fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock(Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap()))
}

fn engine_as(actor: Actor) -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::in_memory(Arc::new(NotifyHub::new())));
    let engine = Engine::new(store.clone(), Arc::new(StaticIdentity(actor))).with_clock(clock());
    (engine, store)
}

fn engine() -> (Engine, Arc<MemoryStore>) {
    engine_as(Actor::administrator("osa-admin"))
}

fn draft(venue: VenueId, on: NaiveDate, from: NaiveTime, to: NaiveTime) -> ReservationDraft {
    ReservationDraft {
        purpose: "Org general assembly".into(),
        start_date: Some(on),
        end_date: None,
        start_time: Some(from),
        end_time: Some(to),
        organization_id: Some(OrganizationId::new()),
        venue_id: Some(venue),
        equipment_ids: vec![],
        requester: "Ana Santos".into(),
        officer_in_charge: "Ben Cruz".into(),
        contact_number: "09171234567".into(),
    }
}

// ── Submission ───────────────────────────────────────────

#[tokio::test]
async fn submit_single_day_creates_pending_row() {
    let (engine, store) = engine();
    let venue = VenueId::new();
    let rows = assert_ok!(engine.submit(draft(venue, date(2025, 6, 12), time(9, 0), time(11, 0))).await);

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row.status, ReservationStatus::Pending);
    assert_eq!(row.activity_date, date(2025, 6, 12));
    assert_eq!(row.contact_number, "+639171234567");
    assert_eq!(row.multi_day, None);
    assert_eq!(row.decided_at, None);
    assert_eq!(row.created_at, clock().0);
    assert_eq!(store.reservation_count(), 1);
}

#[tokio::test]
async fn submit_range_skips_weekend() {
    let (engine, _store) = engine();
    let mut d = draft(VenueId::new(), date(2025, 6, 15), time(13, 0), time(15, 0));
    d.end_date = Some(date(2025, 6, 19));
    let rows = engine.submit(d).await.unwrap();

    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.activity_date).collect();
    assert_eq!(
        dates,
        vec![date(2025, 6, 16), date(2025, 6, 17), date(2025, 6, 18), date(2025, 6, 19)]
    );
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(row.multi_day, Some(MultiDaySlot { index: i as u16 + 1, total: 4 }));
    }
}

#[tokio::test]
async fn weekend_only_range_is_empty_expansion() {
    let (engine, store) = engine();
    let mut d = draft(VenueId::new(), date(2025, 6, 14), time(9, 0), time(10, 0));
    d.end_date = Some(date(2025, 6, 15));
    let err = engine.submit(d).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::EmptyExpansion {
            start: date(2025, 6, 14),
            end: date(2025, 6, 15),
        }
    );
    assert!(err.is_user_correctable());
    assert_eq!(store.reservation_count(), 0);
}

#[tokio::test]
async fn single_weekend_day_is_allowed() {
    let (engine, _store) = engine();
    let rows = engine
        .submit(draft(VenueId::new(), date(2025, 6, 14), time(9, 0), time(10, 0)))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn invalid_draft_persists_nothing() {
    let (engine, store) = engine();
    let mut d = draft(VenueId::new(), date(2025, 6, 10), time(9, 0), time(10, 0));
    d.purpose = String::new();
    let err = assert_err!(engine.submit(d).await);
    let EngineError::Validation(errors) = err else {
        panic!("expected validation error, got {err:?}");
    };
    assert!(errors.contains(Field::Purpose));
    assert!(errors.contains(Field::StartDate));
    assert_eq!(store.reservation_count(), 0);
}

// ── Conflicts ────────────────────────────────────────────

#[tokio::test]
async fn overlapping_venue_booking_conflicts() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let first = engine
        .submit(draft(venue, date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);

    let err = engine
        .submit(draft(venue, date(2025, 6, 12), time(10, 0), time(12, 0)))
        .await
        .unwrap_err();
    let EngineError::Conflict(conflict) = err else {
        panic!("expected conflict, got {err:?}");
    };
    assert_eq!(conflict.reservation_id, first.id);
    assert_eq!(conflict.organization_id, first.organization_id);
    assert_eq!(conflict.resource, ResourceRef::Venue(venue));
    assert_eq!(conflict.date, date(2025, 6, 12));
}

#[tokio::test]
async fn back_to_back_bookings_do_not_conflict() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    engine
        .submit(draft(venue, date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap();
    assert_ok!(engine.submit(draft(venue, date(2025, 6, 12), time(11, 0), time(13, 0))).await);
}

#[tokio::test]
async fn conflict_on_one_day_rejects_whole_range() {
    let (engine, store) = engine();
    let venue = VenueId::new();
    engine
        .submit(draft(venue, date(2025, 6, 18), time(9, 0), time(11, 0)))
        .await
        .unwrap();

    let mut d = draft(venue, date(2025, 6, 16), time(10, 0), time(12, 0));
    d.end_date = Some(date(2025, 6, 20));
    let err = engine.submit(d).await.unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ref c) if c.date == date(2025, 6, 18)));
    assert_eq!(store.reservation_count(), 1);
}

#[tokio::test]
async fn shared_equipment_conflicts_across_venues() {
    let (engine, _store) = engine();
    let projector = EquipmentId::new();
    let mut a = draft(VenueId::new(), date(2025, 6, 12), time(9, 0), time(11, 0));
    a.equipment_ids = vec![projector];
    engine.submit(a).await.unwrap();

    let mut b = draft(VenueId::new(), date(2025, 6, 12), time(10, 0), time(11, 30));
    b.equipment_ids = vec![EquipmentId::new(), projector];
    let err = engine.submit(b).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Conflict(ref c) if c.resource == ResourceRef::Equipment(projector)
    ));
}

#[tokio::test]
async fn rejected_and_cancelled_rows_free_the_slot() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let on = date(2025, 6, 12);
    let a = engine.submit(draft(venue, on, time(9, 0), time(11, 0))).await.unwrap().remove(0);
    engine.change_status(a.id, StatusAction::Reject).await.unwrap();
    let b = engine.submit(draft(venue, on, time(9, 0), time(11, 0))).await.unwrap().remove(0);
    engine.change_status(b.id, StatusAction::Cancel).await.unwrap();
    assert_ok!(engine.submit(draft(venue, on, time(10, 0), time(12, 0))).await);
}

#[tokio::test]
async fn check_availability_honours_exclude() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let on = date(2025, 6, 12);
    let row = engine.submit(draft(venue, on, time(9, 0), time(11, 0))).await.unwrap().remove(0);
    let resource = ResourceRef::Venue(venue);

    let busy = engine
        .check_availability(resource, on, time(10, 0), time(10, 30), None)
        .await
        .unwrap();
    assert!(!busy.is_free());

    let own = engine
        .check_availability(resource, on, time(10, 0), time(10, 30), Some(row.id))
        .await
        .unwrap();
    assert!(own.is_free());

    let other_day = engine
        .check_availability(resource, date(2025, 6, 13), time(10, 0), time(10, 30), None)
        .await
        .unwrap();
    assert_eq!(other_day, ConflictCheck::Free);
}

#[tokio::test]
async fn free_slots_subtract_held_windows() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let on = date(2025, 6, 12);
    engine.submit(draft(venue, on, time(9, 0), time(11, 0))).await.unwrap();
    let lunch = engine.submit(draft(venue, on, time(12, 0), time(13, 0))).await.unwrap().remove(0);
    engine.submit(draft(venue, on, time(13, 0), time(14, 30))).await.unwrap();
    engine.change_status(lunch.id, StatusAction::Reject).await.unwrap();

    let free = engine.free_slots(ResourceRef::Venue(venue), on).await.unwrap();
    assert_eq!(
        free,
        vec![
            TimeSlot::new(time(7, 0), time(9, 0)),
            TimeSlot::new(time(11, 0), time(13, 0)),
            TimeSlot::new(time(14, 30), time(21, 0)),
        ]
    );
}

// ── Edits ────────────────────────────────────────────────

#[tokio::test]
async fn edit_keeps_status_and_stamps_edited_at() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let row = engine
        .submit(draft(venue, date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);
    engine.change_status(row.id, StatusAction::Approve).await.unwrap();

    // Overlaps its own prior slot only.
    let mut d = draft(venue, date(2025, 6, 12), time(10, 0), time(12, 0));
    d.organization_id = Some(row.organization_id);
    d.purpose = "Rescheduled assembly".into();
    let updated = engine.update(row.id, d).await.unwrap();

    assert_eq!(updated.status, ReservationStatus::Reserved);
    assert_eq!(updated.purpose, "Rescheduled assembly");
    assert_eq!(updated.start_time, time(10, 0));
    assert_eq!(updated.edited_at, Some(clock().0));
    assert!(updated.decided_at.is_some());
}

#[tokio::test]
async fn edit_into_another_booking_conflicts() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let on = date(2025, 6, 12);
    let a = engine.submit(draft(venue, on, time(9, 0), time(11, 0))).await.unwrap().remove(0);
    let b = engine.submit(draft(venue, on, time(13, 0), time(14, 0))).await.unwrap().remove(0);

    let err = engine
        .update(b.id, draft(venue, on, time(10, 30), time(13, 30)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Conflict(ref c) if c.reservation_id == a.id));
    assert_eq!(engine.get(b.id).await.unwrap().start_time, time(13, 0));
}

#[tokio::test]
async fn edit_keeps_multi_day_position() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let mut d = draft(venue, date(2025, 6, 16), time(9, 0), time(10, 0));
    d.end_date = Some(date(2025, 6, 18));
    let second = engine.submit(d).await.unwrap().remove(1);

    let updated = engine
        .update(second.id, draft(venue, date(2025, 6, 17), time(15, 0), time(16, 0)))
        .await
        .unwrap();
    assert_eq!(updated.multi_day, Some(MultiDaySlot { index: 2, total: 3 }));
}

#[tokio::test]
async fn edit_must_cover_one_day() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let row = engine
        .submit(draft(venue, date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);

    let mut d = draft(venue, date(2025, 6, 12), time(9, 0), time(11, 0));
    d.end_date = Some(date(2025, 6, 13));
    let err = engine.update(row.id, d).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(ref e) if e.contains(Field::EndDate)));
}

#[tokio::test]
async fn edit_missing_reservation() {
    let (engine, _store) = engine();
    let id = ReservationId::new();
    let err = engine
        .update(id, draft(VenueId::new(), date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::NotFound(id));
}

// ── Workflow ─────────────────────────────────────────────

#[tokio::test]
async fn approve_then_reject_is_invalid() {
    let (engine, _store) = engine();
    let row = engine
        .submit(draft(VenueId::new(), date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);

    let approved = engine.change_status(row.id, StatusAction::Approve).await.unwrap();
    assert_eq!(approved.status, ReservationStatus::Reserved);
    assert_eq!(approved.decided_at, Some(clock().0));

    let err = engine.change_status(row.id, StatusAction::Reject).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            from: ReservationStatus::Reserved,
            action: StatusAction::Reject,
        }
    );
    assert_eq!(engine.get(row.id).await.unwrap().status, ReservationStatus::Reserved);
}

#[tokio::test]
async fn members_cannot_change_status() {
    let (engine, store) = engine_as(Actor::member("student-officer"));
    let row = engine
        .submit(draft(VenueId::new(), date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);
    let err = engine.change_status(row.id, StatusAction::Approve).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden { ref actor, .. } if actor == "student-officer"));
    assert_eq!(
        store.get_reservation(row.id).await.unwrap().unwrap().status,
        ReservationStatus::Pending
    );
}

#[tokio::test]
async fn status_change_on_missing_row() {
    let (engine, _store) = engine();
    let id = ReservationId::new();
    let err = engine.change_status(id, StatusAction::Approve).await.unwrap_err();
    assert_eq!(err, EngineError::NotFound(id));
}

// ── Removal & listing ────────────────────────────────────

#[tokio::test]
async fn remove_then_get_is_not_found() {
    let (engine, _store) = engine();
    let row = engine
        .submit(draft(VenueId::new(), date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);
    assert_ok!(engine.remove(row.id).await);
    assert_eq!(engine.get(row.id).await.unwrap_err(), EngineError::NotFound(row.id));
    assert_eq!(engine.remove(row.id).await.unwrap_err(), EngineError::NotFound(row.id));
}

#[tokio::test]
async fn list_filters_by_status() {
    let (engine, _store) = engine();
    let venue = VenueId::new();
    let a = engine
        .submit(draft(venue, date(2025, 6, 12), time(9, 0), time(10, 0)))
        .await
        .unwrap()
        .remove(0);
    engine
        .submit(draft(venue, date(2025, 6, 13), time(9, 0), time(10, 0)))
        .await
        .unwrap();
    engine.change_status(a.id, StatusAction::Approve).await.unwrap();

    let all = engine.list(&ReservationFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    let reserved = engine
        .list(&ReservationFilter::default().with_status(ReservationStatus::Reserved))
        .await
        .unwrap();
    assert_eq!(reserved.len(), 1);
    assert_eq!(reserved[0].reservation.id, a.id);
}

// ── Infrastructure failures ──────────────────────────────

#[derive(Clone, Copy)]
enum Breakage {
    Unreachable,
    Stalled,
}

struct BrokenRepo(Breakage);

impl BrokenRepo {
    async fn fail<T>(&self) -> Result<T, StoreError> {
        match self.0 {
            Breakage::Unreachable => Err(StoreError::Unavailable("connection refused".into())),
            Breakage::Stalled => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(StoreError::Unavailable("gave up".into()))
            }
        }
    }
}

#[async_trait]
impl ReservationRepository for BrokenRepo {
    async fn find_overlapping(
        &self,
        _resource: ResourceRef,
        _date: NaiveDate,
        _slot: TimeSlot,
        _exclude: Option<ReservationId>,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.fail().await
    }

    async fn insert_reservations(&self, _rows: Vec<Reservation>) -> Result<Vec<Reservation>, StoreError> {
        self.fail().await
    }

    async fn update_reservation(
        &self,
        _id: ReservationId,
        _patch: ReservationPatch,
    ) -> Result<Reservation, StoreError> {
        self.fail().await
    }

    async fn delete_reservation(&self, _id: ReservationId) -> Result<(), StoreError> {
        self.fail().await
    }

    async fn get_reservation(&self, _id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        self.fail().await
    }

    async fn list_reservations(&self, _filter: &ReservationFilter) -> Result<Vec<ReservationView>, StoreError> {
        self.fail().await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        broadcast::channel(1).1
    }
}

fn broken_engine(breakage: Breakage) -> Engine {
    Engine::new(
        Arc::new(BrokenRepo(breakage)),
        Arc::new(StaticIdentity(Actor::administrator("osa-admin"))),
    )
    .with_clock(clock())
    .with_settings(EngineSettings {
        repo_timeout: Duration::from_millis(20),
        ..EngineSettings::default()
    })
}

#[tokio::test]
async fn failed_lookup_is_unknown_availability_not_free() {
    let engine = broken_engine(Breakage::Unreachable);
    let venue = VenueId::new();
    let err = engine
        .submit(draft(venue, date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Infrastructure(InfrastructureError::AvailabilityUnknown { resource, .. })
            if resource == ResourceRef::Venue(venue)
    ));
    assert!(err.is_retryable());
    assert!(!err.is_user_correctable());
}

#[tokio::test]
async fn stalled_repository_times_out() {
    let engine = broken_engine(Breakage::Stalled);
    let id = ReservationId::new();
    let err = engine.get(id).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Infrastructure(InfrastructureError::Timeout {
            operation: "get_reservation"
        })
    );

    let err = engine.remove(id).await.unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn unreachable_list_is_retryable() {
    let engine = broken_engine(Breakage::Unreachable);
    let err = engine.list(&ReservationFilter::default()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Infrastructure(InfrastructureError::Unavailable {
            operation: "list_reservations",
            ..
        })
    ));
}

// ── Racing decisions ─────────────────────────────────────

/// Serves the first copy of each row it ever read, as a reader that lost a
/// race with another admin would see it. Writes go to the real store.
struct StaleReads {
    store: Arc<MemoryStore>,
    seen: std::sync::Mutex<std::collections::HashMap<ReservationId, Reservation>>,
}

#[async_trait]
impl ReservationRepository for StaleReads {
    async fn find_overlapping(
        &self,
        resource: ResourceRef,
        date: NaiveDate,
        slot: TimeSlot,
        exclude: Option<ReservationId>,
    ) -> Result<Vec<Reservation>, StoreError> {
        self.store.find_overlapping(resource, date, slot, exclude).await
    }

    async fn insert_reservations(&self, rows: Vec<Reservation>) -> Result<Vec<Reservation>, StoreError> {
        self.store.insert_reservations(rows).await
    }

    async fn update_reservation(
        &self,
        id: ReservationId,
        patch: ReservationPatch,
    ) -> Result<Reservation, StoreError> {
        self.store.update_reservation(id, patch).await
    }

    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError> {
        self.store.delete_reservation(id).await
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError> {
        let fresh = self.store.get_reservation(id).await?;
        let mut seen = self.seen.lock().unwrap();
        Ok(match fresh {
            Some(row) => Some(seen.entry(id).or_insert(row).clone()),
            None => seen.get(&id).cloned(),
        })
    }

    async fn list_reservations(&self, filter: &ReservationFilter) -> Result<Vec<ReservationView>, StoreError> {
        self.store.list_reservations(filter).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.store.subscribe()
    }
}

#[tokio::test]
async fn late_decision_cannot_override_terminal_status() {
    let (engine, store) = engine();
    let row = engine
        .submit(draft(VenueId::new(), date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);

    let stale = Engine::new(
        Arc::new(StaleReads {
            store: store.clone(),
            seen: Default::default(),
        }),
        Arc::new(StaticIdentity(Actor::administrator("second-admin"))),
    )
    .with_clock(clock());
    // Second admin loads the row while it is still Pending.
    assert_eq!(stale.get(row.id).await.unwrap().status, ReservationStatus::Pending);

    assert_ok!(engine.change_status(row.id, StatusAction::Approve).await);

    let err = assert_err!(stale.change_status(row.id, StatusAction::Reject).await);
    assert_eq!(
        err,
        EngineError::InvalidTransition {
            from: ReservationStatus::Reserved,
            action: StatusAction::Reject,
        }
    );
    let stored = store.get_reservation(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ReservationStatus::Reserved);
    assert_eq!(stored.decided_at, Some(clock().0));
}

#[tokio::test]
async fn concurrent_decisions_admit_one() {
    let (engine, store) = engine();
    let engine = Arc::new(engine);
    let row = engine
        .submit(draft(VenueId::new(), date(2025, 6, 12), time(9, 0), time(11, 0)))
        .await
        .unwrap()
        .remove(0);

    let mut handles = Vec::new();
    for action in [StatusAction::Approve, StatusAction::Reject, StatusAction::Cancel] {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.change_status(row.id, action).await }));
    }
    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(updated) => winners.push(updated.status),
            Err(err) => assert!(matches!(err, EngineError::InvalidTransition { .. }), "{err:?}"),
        }
    }
    assert_eq!(winners.len(), 1);
    let stored = store.get_reservation(row.id).await.unwrap().unwrap();
    assert_eq!(stored.status, winners[0]);
}
