//! In-process implementation of [`ReservationRepository`]: tables in
//! `DashMap`s, an optional on-disk journal, and a [`NotifyHub`] for change
//! events.

mod file;
mod journal;
mod repository;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::model::*;
use crate::notify::NotifyHub;
use crate::repository::StoreError;

use file::JournalFile;
use journal::JournalCommand;

/// Rows per `ReservationsInserted` record when compacting.
const COMPACT_CHUNK: usize = 256;

pub struct MemoryStore {
    reservations: DashMap<ReservationId, Reservation>,
    /// Activity date → reservation ids on that day.
    by_date: DashMap<NaiveDate, Vec<ReservationId>>,
    organizations: DashMap<OrganizationId, Organization>,
    venues: DashMap<VenueId, Venue>,
    equipment: DashMap<EquipmentId, Equipment>,
    /// Serializes check-then-write so two writers can't both pass the
    /// overlap check for the same slot.
    write_lock: Mutex<()>,
    journal: Option<mpsc::Sender<JournalCommand>>,
    notify: Arc<NotifyHub>,
}

impl MemoryStore {
    /// Store with no durability. Does not need a runtime.
    pub fn in_memory(notify: Arc<NotifyHub>) -> Self {
        Self {
            reservations: DashMap::new(),
            by_date: DashMap::new(),
            organizations: DashMap::new(),
            venues: DashMap::new(),
            equipment: DashMap::new(),
            write_lock: Mutex::new(()),
            journal: None,
            notify,
        }
    }

    /// Replay the journal at `path` and keep appending to it.
    /// Must be called inside a tokio runtime (spawns the journal writer).
    pub fn open(path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let (file, replay) = JournalFile::recover(&path)?;
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(journal::writer_loop(file, rx));

        let mut store = Self::in_memory(notify);
        for event in &replay.events {
            store.apply(event);
        }
        store.journal = Some(tx);
        tracing::info!(
            path = %path.display(),
            records = replay.events.len(),
            tail_discarded = replay.damage.is_some(),
            reservations = store.reservations.len(),
            "journal replayed"
        );
        Ok(store)
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_durable(&self) -> bool {
        self.journal.is_some()
    }

    // ── Event application ────────────────────────────────────

    fn index_date(&self, date: NaiveDate, id: ReservationId) {
        self.by_date.entry(date).or_default().push(id);
    }

    fn unindex_date(&self, date: NaiveDate, id: &ReservationId) {
        if let Some(mut ids) = self.by_date.get_mut(&date) {
            ids.retain(|i| i != id);
        }
        self.by_date.remove_if(&date, |_, ids| ids.is_empty());
    }

    fn put_reservation(&self, row: Reservation) {
        if let Some(old) = self.reservations.get(&row.id).map(|r| r.activity_date) {
            self.unindex_date(old, &row.id);
        }
        self.index_date(row.activity_date, row.id);
        self.reservations.insert(row.id, row);
    }

    fn drop_reservation(&self, id: &ReservationId) -> Option<Reservation> {
        let (_, row) = self.reservations.remove(id)?;
        self.unindex_date(row.activity_date, id);
        Some(row)
    }

    /// Apply a journal record to the in-memory tables. Used for replay and
    /// for live writes after the record is durable.
    fn apply(&self, event: &StoreEvent) {
        match event {
            StoreEvent::ReservationsInserted { rows } => {
                for row in rows {
                    self.put_reservation(row.clone());
                }
            }
            StoreEvent::ReservationUpdated { row } => self.put_reservation(row.clone()),
            StoreEvent::ReservationDeleted { id } => {
                self.drop_reservation(id);
            }
            StoreEvent::OrganizationSaved(org) => {
                self.organizations.insert(org.id, org.clone());
            }
            StoreEvent::OrganizationRemoved { id } => {
                self.organizations.remove(id);
            }
            StoreEvent::VenueSaved(venue) => {
                self.venues.insert(venue.id, venue.clone());
            }
            StoreEvent::VenueRemoved { id } => {
                self.venues.remove(id);
                for doomed in self.reservations_on_venue(*id) {
                    self.drop_reservation(&doomed.id);
                }
            }
            StoreEvent::EquipmentSaved(item) => {
                self.equipment.insert(item.id, item.clone());
            }
            StoreEvent::EquipmentRemoved { id } => {
                self.equipment.remove(id);
            }
        }
    }

    fn reservations_on_venue(&self, venue: VenueId) -> Vec<Reservation> {
        self.reservations
            .iter()
            .filter(|e| e.value().venue_id == Some(venue))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Journal (when durable) then apply. Callers hold `write_lock`.
    async fn persist_and_apply(&self, event: &StoreEvent) -> Result<(), StoreError> {
        if let Some(tx) = &self.journal {
            let (resp_tx, resp_rx) = oneshot::channel();
            tx.send(JournalCommand::Append {
                event: event.clone(),
                response: resp_tx,
            })
            .await
            .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
            resp_rx
                .await
                .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
                .map_err(|e| StoreError::Journal(e.to_string()))?;
        }
        self.apply(event);
        Ok(())
    }

    // ── Overlap lookups ──────────────────────────────────────

    pub(crate) fn overlapping(
        &self,
        resource: &ResourceRef,
        date: NaiveDate,
        slot: &TimeSlot,
        exclude: Option<ReservationId>,
    ) -> Vec<Reservation> {
        let Some(ids) = self.by_date.get(&date).map(|ids| ids.value().clone()) else {
            return Vec::new();
        };
        let mut hits: Vec<Reservation> = ids
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| self.reservations.get(id).map(|r| r.value().clone()))
            .filter(|r| r.uses(resource) && r.slot().overlaps(slot))
            .collect();
        hits.sort_by_key(|r| (r.start_time, r.id));
        hits
    }

    /// First stored row still holding a slot that `row` would collide with.
    fn blocking_row(&self, row: &Reservation) -> Option<(ResourceRef, Reservation)> {
        let slot = row.slot();
        row.resources().into_iter().find_map(|resource| {
            self.overlapping(&resource, row.activity_date, &slot, Some(row.id))
                .into_iter()
                .find(|existing| existing.status.holds_slot())
                .map(|existing| (resource, existing))
        })
    }

    // ── Catalog ──────────────────────────────────────────────

    async fn save_catalog(&self, event: StoreEvent, row: ChangeRow) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let existed = match &row {
            ChangeRow::Organization(org) => self.organizations.contains_key(&org.id),
            ChangeRow::Venue(venue) => self.venues.contains_key(&venue.id),
            ChangeRow::Equipment(item) => self.equipment.contains_key(&item.id),
            ChangeRow::Reservation(r) => self.reservations.contains_key(&r.id),
        };
        self.persist_and_apply(&event).await?;
        let kind = if existed { ChangeKind::Update } else { ChangeKind::Insert };
        self.notify.send(&ChangeEvent::new(kind, row));
        Ok(())
    }

    pub async fn save_organization(&self, org: Organization) -> Result<(), StoreError> {
        self.save_catalog(StoreEvent::OrganizationSaved(org.clone()), ChangeRow::Organization(org))
            .await
    }

    pub async fn save_venue(&self, venue: Venue) -> Result<(), StoreError> {
        self.save_catalog(StoreEvent::VenueSaved(venue.clone()), ChangeRow::Venue(venue))
            .await
    }

    pub async fn save_equipment(&self, item: Equipment) -> Result<(), StoreError> {
        self.save_catalog(StoreEvent::EquipmentSaved(item.clone()), ChangeRow::Equipment(item))
            .await
    }

    /// Current organizations, venues and equipment, each sorted by id.
    pub fn catalog(&self) -> Catalog {
        let mut catalog = Catalog {
            organizations: self.organizations.iter().map(|e| e.value().clone()).collect(),
            venues: self.venues.iter().map(|e| e.value().clone()).collect(),
            equipment: self.equipment.iter().map(|e| e.value().clone()).collect(),
        };
        catalog.organizations.sort_by_key(|o| o.id);
        catalog.venues.sort_by_key(|v| v.id);
        catalog.equipment.sort_by_key(|e| e.id);
        catalog
    }

    /// Remove an organization. Its reservations keep the dangling reference.
    pub async fn remove_organization(&self, id: OrganizationId) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(org) = self.organizations.get(&id).map(|o| o.value().clone()) else {
            return Ok(false);
        };
        self.persist_and_apply(&StoreEvent::OrganizationRemoved { id }).await?;
        self.notify
            .send(&ChangeEvent::new(ChangeKind::Delete, ChangeRow::Organization(org)));
        Ok(true)
    }

    /// Remove a venue and every reservation made against it.
    /// Returns the number of reservations removed with it.
    pub async fn remove_venue(&self, id: VenueId) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().await;
        let venue = self.venues.get(&id).map(|v| v.value().clone());
        let superseded = self.reservations_on_venue(id);
        if venue.is_none() && superseded.is_empty() {
            return Ok(0);
        }
        self.persist_and_apply(&StoreEvent::VenueRemoved { id }).await?;
        if let Some(venue) = venue {
            self.notify
                .send(&ChangeEvent::new(ChangeKind::Delete, ChangeRow::Venue(venue)));
        }
        for row in &superseded {
            self.notify
                .send(&ChangeEvent::new(ChangeKind::Delete, ChangeRow::Reservation(row.clone())));
        }
        tracing::info!(venue = %id, superseded = superseded.len(), "venue removed");
        Ok(superseded.len())
    }

    /// Remove an equipment item. Reservations keep the dangling reference.
    pub async fn remove_equipment(&self, id: EquipmentId) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(item) = self.equipment.get(&id).map(|e| e.value().clone()) else {
            return Ok(false);
        };
        self.persist_and_apply(&StoreEvent::EquipmentRemoved { id }).await?;
        self.notify
            .send(&ChangeEvent::new(ChangeKind::Delete, ChangeRow::Equipment(item)));
        Ok(true)
    }

    fn view(&self, row: Reservation) -> ReservationView {
        ReservationView {
            organization: self.organizations.get(&row.organization_id).map(|o| o.value().clone()),
            venue_name: row
                .venue_id
                .and_then(|id| self.venues.get(&id).map(|v| v.name.clone())),
            equipment_names: row
                .equipment_ids
                .iter()
                .filter_map(|id| self.equipment.get(id).map(|e| e.name.clone()))
                .collect(),
            reservation: row,
        }
    }

    // ── Compaction ───────────────────────────────────────────

    /// Minimal record sequence that rebuilds the current tables.
    fn snapshot_events(&self) -> Vec<StoreEvent> {
        let mut events: Vec<StoreEvent> = Vec::new();
        events.extend(self.organizations.iter().map(|e| StoreEvent::OrganizationSaved(e.value().clone())));
        events.extend(self.venues.iter().map(|e| StoreEvent::VenueSaved(e.value().clone())));
        events.extend(self.equipment.iter().map(|e| StoreEvent::EquipmentSaved(e.value().clone())));

        let mut rows: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        rows.sort_by_key(|r| r.id);
        events.extend(rows.chunks(COMPACT_CHUNK).map(|chunk| StoreEvent::ReservationsInserted {
            rows: chunk.to_vec(),
        }));
        events
    }

    /// Rewrite the journal from current state. No-op for in-memory stores.
    pub async fn compact_journal(&self) -> Result<(), StoreError> {
        let Some(tx) = &self.journal else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;
        let events = self.snapshot_events();
        let (resp_tx, resp_rx) = oneshot::channel();
        tx.send(JournalCommand::Compact {
            events,
            response: resp_tx,
        })
        .await
        .map_err(|_| StoreError::Journal("journal writer shut down".into()))?;
        resp_rx
            .await
            .map_err(|_| StoreError::Journal("journal writer dropped response".into()))?
            .map_err(|e| StoreError::Journal(e.to_string()))
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        let Some(tx) = &self.journal else {
            return 0;
        };
        let (resp_tx, resp_rx) = oneshot::channel();
        if tx
            .send(JournalCommand::AppendsSinceCompact { response: resp_tx })
            .await
            .is_err()
        {
            return 0;
        }
        resp_rx.await.unwrap_or(0)
    }
}
