//! Calendar projection: reservations rendered as timed events, kept current
//! from the store's change stream.
//!
//! A [`CalendarProjection`] holds the reservations it has seen plus a small
//! catalog snapshot (organization codes, venue and equipment names). Each
//! [`ChangeEvent`] recomputes only the rows it touches. If the broadcast
//! receiver lags, [`CalendarProjection::sync`] reports [`SyncOutcome::Stale`]
//! and the caller reloads from [`crate::Engine::list`].

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::model::*;

pub const NO_RESOURCE: &str = "No resource";

/// One reservation as drawn on the calendar, in office-local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEvent {
    pub reservation_id: ReservationId,
    pub title: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub resource_label: String,
    pub status: ReservationStatus,
    pub color: &'static str,
}

pub fn status_color(status: ReservationStatus) -> &'static str {
    match status {
        ReservationStatus::Pending => "#f59e0b",
        ReservationStatus::Reserved => "#16a34a",
        ReservationStatus::Rejected => "#dc2626",
        ReservationStatus::Cancelled => "#6b7280",
    }
}

fn title(view: &ReservationView) -> String {
    let r = &view.reservation;
    let mut title = match &r.multi_day {
        Some(slot) => format!("{} {}", slot.label(), r.purpose),
        None => r.purpose.clone(),
    };
    if let Some(org) = &view.organization {
        title.push_str(&format!(" ({})", org.code));
    }
    title
}

fn resource_label(view: &ReservationView) -> String {
    if let Some(name) = &view.venue_name {
        name.clone()
    } else if !view.equipment_names.is_empty() {
        view.equipment_names.join(", ")
    } else {
        NO_RESOURCE.to_string()
    }
}

pub fn project_event(view: &ReservationView) -> CalendarEvent {
    let r = &view.reservation;
    CalendarEvent {
        reservation_id: r.id,
        title: title(view),
        start: r.activity_date.and_time(r.start_time),
        end: r.activity_date.and_time(r.end_time),
        resource_label: resource_label(view),
        status: r.status,
        color: status_color(r.status),
    }
}

/// Events for `views`, ordered by start. Missing joins fall back to
/// defaults; no view is dropped.
pub fn project_calendar(views: &[ReservationView]) -> Vec<CalendarEvent> {
    let mut events: Vec<CalendarEvent> = views.iter().map(project_event).collect();
    sort_events(&mut events);
    events
}

fn sort_events(events: &mut [CalendarEvent]) {
    events.sort_by(|a, b| (a.start, a.reservation_id).cmp(&(b.start, b.reservation_id)));
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarView {
    Month,
    Week,
    Day,
}

impl CalendarView {
    /// First day of the period containing `date`. Weeks start on Monday.
    pub fn period_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            CalendarView::Month => date.with_day(1).unwrap_or(date),
            CalendarView::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            CalendarView::Day => date,
        }
    }
}

/// Group events by the period they start in.
pub fn bucket(events: &[CalendarEvent], view: CalendarView) -> BTreeMap<NaiveDate, Vec<CalendarEvent>> {
    let mut buckets: BTreeMap<NaiveDate, Vec<CalendarEvent>> = BTreeMap::new();
    for event in events {
        buckets
            .entry(view.period_start(event.start.date()))
            .or_default()
            .push(event.clone());
    }
    for events in buckets.values_mut() {
        sort_events(events);
    }
    buckets
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Pending notifications were applied; `rows` events were recomputed.
    Applied { rows: usize },
    /// The receiver fell behind and dropped `missed` notifications. The
    /// projection may be wrong; reload it.
    Stale { missed: u64 },
    /// The sender is gone.
    Closed,
}

#[derive(Debug, Default, Clone)]
pub struct CalendarProjection {
    rows: HashMap<ReservationId, Reservation>,
    events: HashMap<ReservationId, CalendarEvent>,
    organizations: HashMap<OrganizationId, Organization>,
    venues: HashMap<VenueId, String>,
    equipment: HashMap<EquipmentId, String>,
}

impl CalendarProjection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a listing. The catalog snapshot is taken from the views'
    /// resolved joins.
    pub fn from_views(views: Vec<ReservationView>) -> Self {
        let mut projection = Self::new();
        for view in views {
            let r = &view.reservation;
            if let Some(org) = &view.organization {
                projection.organizations.insert(org.id, org.clone());
            }
            if let (Some(id), Some(name)) = (r.venue_id, &view.venue_name) {
                projection.venues.insert(id, name.clone());
            }
            // Names are only attributable when every item resolved.
            if view.equipment_names.len() == r.equipment_ids.len() {
                for (id, name) in r.equipment_ids.iter().zip(&view.equipment_names) {
                    projection.equipment.insert(*id, name.clone());
                }
            }
            projection.events.insert(r.id, project_event(&view));
            projection.rows.insert(r.id, view.reservation);
        }
        projection
    }

    /// Add a full catalog snapshot and re-render every event against it.
    /// Without this the projection only knows the catalog rows its seed
    /// views referenced.
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        for org in catalog.organizations {
            self.organizations.insert(org.id, org);
        }
        for venue in catalog.venues {
            self.venues.insert(venue.id, venue.name);
        }
        for item in catalog.equipment {
            self.equipment.insert(item.id, item.name);
        }
        self.refresh_where(|_| true);
        self
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: ReservationId) -> Option<&CalendarEvent> {
        self.events.get(&id)
    }

    /// All events ordered by start.
    pub fn events(&self) -> Vec<CalendarEvent> {
        let mut events: Vec<CalendarEvent> = self.events.values().cloned().collect();
        sort_events(&mut events);
        events
    }

    fn view_of(&self, row: &Reservation) -> ReservationView {
        ReservationView {
            reservation: row.clone(),
            organization: self.organizations.get(&row.organization_id).cloned(),
            venue_name: row.venue_id.and_then(|id| self.venues.get(&id).cloned()),
            equipment_names: row
                .equipment_ids
                .iter()
                .filter_map(|id| self.equipment.get(id).cloned())
                .collect(),
        }
    }

    fn refresh_where(&mut self, affected: impl Fn(&Reservation) -> bool) -> usize {
        let ids: Vec<ReservationId> = self
            .rows
            .values()
            .filter(|r| affected(r))
            .map(|r| r.id)
            .collect();
        for id in &ids {
            if let Some(row) = self.rows.get(id) {
                let event = project_event(&self.view_of(row));
                self.events.insert(*id, event);
            }
        }
        ids.len()
    }

    /// Apply one change. Returns how many events were recomputed or removed.
    pub fn apply(&mut self, change: &ChangeEvent) -> usize {
        let deleted = change.kind == ChangeKind::Delete;
        match &change.row {
            ChangeRow::Reservation(row) => {
                if deleted {
                    self.rows.remove(&row.id);
                    usize::from(self.events.remove(&row.id).is_some())
                } else {
                    let event = project_event(&self.view_of(row));
                    self.events.insert(row.id, event);
                    self.rows.insert(row.id, row.clone());
                    1
                }
            }
            ChangeRow::Organization(org) => {
                if deleted {
                    self.organizations.remove(&org.id);
                } else {
                    self.organizations.insert(org.id, org.clone());
                }
                let id = org.id;
                self.refresh_where(|r| r.organization_id == id)
            }
            ChangeRow::Venue(venue) => {
                if deleted {
                    self.venues.remove(&venue.id);
                } else {
                    self.venues.insert(venue.id, venue.name.clone());
                }
                let id = venue.id;
                self.refresh_where(|r| r.venue_id == Some(id))
            }
            ChangeRow::Equipment(item) => {
                if deleted {
                    self.equipment.remove(&item.id);
                } else {
                    self.equipment.insert(item.id, item.name.clone());
                }
                let id = item.id;
                self.refresh_where(|r| r.equipment_ids.contains(&id))
            }
        }
    }

    /// Drain every notification already queued on `rx`.
    pub fn sync(&mut self, rx: &mut broadcast::Receiver<ChangeEvent>) -> SyncOutcome {
        let mut rows = 0;
        loop {
            match rx.try_recv() {
                Ok(change) => rows += self.apply(&change),
                Err(TryRecvError::Empty) => return SyncOutcome::Applied { rows },
                Err(TryRecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "calendar projection lagged; reload required");
                    return SyncOutcome::Stale { missed };
                }
                Err(TryRecvError::Closed) => return SyncOutcome::Closed,
            }
        }
    }
}
