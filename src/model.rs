use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Ulid);

        impl $name {
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = ulid::DecodeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ulid::from_string(s).map(Self)
            }
        }
    };
}

id_type!(ReservationId);
id_type!(OrganizationId);
id_type!(VenueId);
id_type!(EquipmentId);

/// Half-open clock window `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeSlot start must be before end");
        Self { start, end }
    }

    /// Strict overlap: a slot ending exactly when another starts does not overlap it.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}–{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// A reservable thing: a venue or one equipment item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceRef {
    Venue(VenueId),
    Equipment(EquipmentId),
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceRef::Venue(id) => write!(f, "venue {id}"),
            ResourceRef::Equipment(id) => write!(f, "equipment {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Reserved,
    Rejected,
    Cancelled,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 4] = [
        ReservationStatus::Pending,
        ReservationStatus::Reserved,
        ReservationStatus::Rejected,
        ReservationStatus::Cancelled,
    ];

    /// Numeric code as stored in the `reservation_status` lookup table.
    pub fn code(self) -> i16 {
        match self {
            ReservationStatus::Pending => 1,
            ReservationStatus::Reserved => 2,
            ReservationStatus::Rejected => 3,
            ReservationStatus::Cancelled => 4,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Rejected => "rejected",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Pending)
    }

    /// Whether a row in this status still occupies its slot.
    pub fn holds_slot(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Reserved)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a row inside a multi-day batch (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MultiDaySlot {
    pub index: u16,
    pub total: u16,
}

impl MultiDaySlot {
    pub fn label(&self) -> String {
        format!("[Multi-day {} of {}]", self.index, self.total)
    }

    pub fn is_first(&self) -> bool {
        self.index == 1
    }
}

/// A single resource booking for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub purpose: String,
    pub activity_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub organization_id: OrganizationId,
    pub venue_id: Option<VenueId>,
    pub equipment_ids: Vec<EquipmentId>,
    pub status: ReservationStatus,
    pub requester: String,
    pub officer_in_charge: String,
    pub contact_number: String,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub multi_day: Option<MultiDaySlot>,
}

impl Reservation {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }

    /// Venue first, then equipment in selection order.
    pub fn resources(&self) -> Vec<ResourceRef> {
        self.venue_id
            .map(ResourceRef::Venue)
            .into_iter()
            .chain(self.equipment_ids.iter().copied().map(ResourceRef::Equipment))
            .collect()
    }

    pub fn uses(&self, resource: &ResourceRef) -> bool {
        match resource {
            ResourceRef::Venue(id) => self.venue_id == Some(*id),
            ResourceRef::Equipment(id) => self.equipment_ids.contains(id),
        }
    }
}

/// User-entered booking intent, possibly spanning several days.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationDraft {
    pub purpose: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub organization_id: Option<OrganizationId>,
    pub venue_id: Option<VenueId>,
    #[serde(default)]
    pub equipment_ids: Vec<EquipmentId>,
    pub requester: String,
    pub officer_in_charge: String,
    pub contact_number: String,
}

/// Fields an edit may replace. Status is never part of an edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationEdit {
    pub purpose: String,
    pub activity_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub organization_id: OrganizationId,
    pub venue_id: Option<VenueId>,
    pub equipment_ids: Vec<EquipmentId>,
    pub requester: String,
    pub officer_in_charge: String,
    pub contact_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    /// Status the caller decided from. The write is refused if the row has
    /// moved on since.
    pub from: ReservationStatus,
    pub status: ReservationStatus,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Partial update handed to the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPatch {
    pub edit: Option<ReservationEdit>,
    pub status: Option<StatusChange>,
    pub edited_at: Option<DateTime<Utc>>,
}

impl ReservationPatch {
    pub fn edit(edit: ReservationEdit, at: DateTime<Utc>) -> Self {
        Self {
            edit: Some(edit),
            status: None,
            edited_at: Some(at),
        }
    }

    pub fn status(change: StatusChange) -> Self {
        Self {
            edit: None,
            status: Some(change),
            edited_at: None,
        }
    }

    pub fn apply(self, row: &mut Reservation) {
        if let Some(edit) = self.edit {
            row.purpose = edit.purpose;
            row.activity_date = edit.activity_date;
            row.start_time = edit.start_time;
            row.end_time = edit.end_time;
            row.organization_id = edit.organization_id;
            row.venue_id = edit.venue_id;
            row.equipment_ids = edit.equipment_ids;
            row.requester = edit.requester;
            row.officer_in_charge = edit.officer_in_charge;
            row.contact_number = edit.contact_number;
        }
        if let Some(change) = self.status {
            row.status = change.status;
            row.decided_at = change.decided_at;
        }
        if let Some(at) = self.edited_at {
            row.edited_at = Some(at);
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub name: String,
    /// Short code shown in calendar labels, e.g. "CSG".
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EquipmentId,
    pub name: String,
}

/// Every organization, venue and equipment item at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub organizations: Vec<Organization>,
    pub venues: Vec<Venue>,
    pub equipment: Vec<Equipment>,
}

/// A reservation with its lookups resolved. Any join may be missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationView {
    pub reservation: Reservation,
    pub organization: Option<Organization>,
    pub venue_name: Option<String>,
    pub equipment_names: Vec<String>,
}

/// Listing parameters. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationFilter {
    pub statuses: Vec<ReservationStatus>,
    pub organization_id: Option<OrganizationId>,
    pub resource: Option<ResourceRef>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub search: Option<String>,
}

impl ReservationFilter {
    pub fn with_status(mut self, status: ReservationStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub fn between(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.from = Some(from);
        self.to = Some(to);
        self
    }

    pub fn for_resource(mut self, resource: ResourceRef) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn matches(&self, view: &ReservationView) -> bool {
        let r = &view.reservation;
        if !self.statuses.is_empty() && !self.statuses.contains(&r.status) {
            return false;
        }
        if self.organization_id.is_some_and(|id| id != r.organization_id) {
            return false;
        }
        if let Some(resource) = &self.resource
            && !r.uses(resource)
        {
            return false;
        }
        if self.from.is_some_and(|from| r.activity_date < from)
            || self.to.is_some_and(|to| r.activity_date > to)
        {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(term) => {
                let term = term.to_lowercase();
                let org = view.organization.as_ref();
                [
                    Some(r.purpose.as_str()),
                    Some(r.requester.as_str()),
                    Some(r.officer_in_charge.as_str()),
                    org.map(|o| o.name.as_str()),
                    org.map(|o| o.code.as_str()),
                ]
                .into_iter()
                .flatten()
                .any(|field| field.to_lowercase().contains(&term))
            }
        }
    }
}

// ── Change notifications ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Reservation,
    Organization,
    Venue,
    Equipment,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Reservation => "reservation",
            Table::Organization => "organization",
            Table::Venue => "venue",
            Table::Equipment => "equipment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeRow {
    Reservation(Reservation),
    Organization(Organization),
    Venue(Venue),
    Equipment(Equipment),
}

/// One row-level change, as broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub row: ChangeRow,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, row: ChangeRow) -> Self {
        Self { kind, row }
    }

    pub fn table(&self) -> Table {
        match self.row {
            ChangeRow::Reservation(_) => Table::Reservation,
            ChangeRow::Organization(_) => Table::Organization,
            ChangeRow::Venue(_) => Table::Venue,
            ChangeRow::Equipment(_) => Table::Equipment,
        }
    }

    /// `{"table": ..., "event": ..., "row": ...}` payload for realtime clients.
    pub fn payload_json(&self) -> serde_json::Value {
        let row = match &self.row {
            ChangeRow::Reservation(r) => serde_json::to_value(r),
            ChangeRow::Organization(o) => serde_json::to_value(o),
            ChangeRow::Venue(v) => serde_json::to_value(v),
            ChangeRow::Equipment(e) => serde_json::to_value(e),
        }
        .unwrap_or(serde_json::Value::Null);
        serde_json::json!({
            "table": self.table().as_str(),
            "event": self.kind,
            "row": row,
        })
    }
}

/// Journal record format. Flat, one variant per store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    ReservationsInserted { rows: Vec<Reservation> },
    ReservationUpdated { row: Reservation },
    ReservationDeleted { id: ReservationId },
    OrganizationSaved(Organization),
    OrganizationRemoved { id: OrganizationId },
    VenueSaved(Venue),
    VenueRemoved { id: VenueId },
    EquipmentSaved(Equipment),
    EquipmentRemoved { id: EquipmentId },
}
