//! Draft checks. Every rule runs; failures accumulate per field.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};

use crate::limits::*;
use crate::model::*;
use crate::policy;

use super::error::{Field, ValidationErrors};

/// A draft that passed every rule: text trimmed, phone normalized,
/// equipment de-duplicated in selection order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub purpose: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub organization_id: OrganizationId,
    pub venue_id: Option<VenueId>,
    pub equipment_ids: Vec<EquipmentId>,
    pub requester: String,
    pub officer_in_charge: String,
    pub contact_number: String,
}

impl ValidatedRequest {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.start_time, self.end_time)
    }

    pub fn is_range(&self) -> bool {
        self.end_date > self.start_date
    }

    pub fn resources(&self) -> Vec<ResourceRef> {
        self.venue_id
            .map(ResourceRef::Venue)
            .into_iter()
            .chain(self.equipment_ids.iter().copied().map(ResourceRef::Equipment))
            .collect()
    }

    /// Replacement fields for an in-place edit of a single-day reservation.
    pub fn into_edit(self) -> ReservationEdit {
        ReservationEdit {
            purpose: self.purpose,
            activity_date: self.start_date,
            start_time: self.start_time,
            end_time: self.end_time,
            organization_id: self.organization_id,
            venue_id: self.venue_id,
            equipment_ids: self.equipment_ids,
            requester: self.requester,
            officer_in_charge: self.officer_in_charge,
            contact_number: self.contact_number,
        }
    }
}

fn required_text(errors: &mut ValidationErrors, field: Field, raw: &str, max: usize) -> String {
    let text = raw.trim();
    if text.is_empty() {
        errors.add(field, "is required");
    } else if text.chars().count() > max {
        errors.add(field, format!("must be at most {max} characters"));
    }
    text.to_string()
}

fn dedup_equipment(ids: &[EquipmentId]) -> Vec<EquipmentId> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter().copied().filter(|id| seen.insert(*id)).collect()
}

pub fn validate(draft: &ReservationDraft, today: NaiveDate) -> Result<ValidatedRequest, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let purpose = required_text(&mut errors, Field::Purpose, &draft.purpose, MAX_PURPOSE_LEN);

    let earliest = policy::earliest_bookable_date(today);
    match draft.start_date {
        None => errors.add(Field::StartDate, "is required"),
        Some(date) if date < earliest => errors.add(
            Field::StartDate,
            format!("must be on or after {earliest} ({MIN_ADVANCE_DAYS} days in advance)"),
        ),
        Some(_) => {}
    }

    if let (Some(start), Some(end)) = (draft.start_date, draft.end_date) {
        if end < start {
            errors.add(Field::EndDate, "must not be before the start date");
        } else if (end - start).num_days() + 1 > MAX_RANGE_DAYS {
            errors.add(Field::EndDate, format!("range may span at most {MAX_RANGE_DAYS} days"));
        }
    }

    let hours = format!("must be between {BUSINESS_OPEN} and {BUSINESS_CLOSE}");
    match draft.start_time {
        None => errors.add(Field::StartTime, "is required"),
        Some(t) if !policy::within_business_hours(t) => errors.add(Field::StartTime, hours.clone()),
        Some(_) => {}
    }
    match draft.end_time {
        None => errors.add(Field::EndTime, "is required"),
        Some(t) if !policy::within_business_hours(t) => errors.add(Field::EndTime, hours),
        Some(end) => {
            // Ordering is only reported against a start time that is itself valid.
            if let Some(start) = draft.start_time
                && policy::within_business_hours(start)
                && end <= start
            {
                errors.add(Field::EndTime, "must be after the start time");
            }
        }
    }

    let equipment_ids = dedup_equipment(&draft.equipment_ids);
    if draft.venue_id.is_none() && equipment_ids.is_empty() {
        errors.add(Field::Resource, "select a venue or at least one equipment item");
    } else if equipment_ids.len() > MAX_EQUIPMENT_PER_REQUEST {
        errors.add(
            Field::Resource,
            format!("at most {MAX_EQUIPMENT_PER_REQUEST} equipment items per request"),
        );
    }

    if draft.organization_id.is_none() {
        errors.add(Field::Organization, "is required");
    }

    let requester = required_text(&mut errors, Field::Requester, &draft.requester, MAX_NAME_LEN);
    let officer_in_charge = required_text(
        &mut errors,
        Field::OfficerInCharge,
        &draft.officer_in_charge,
        MAX_NAME_LEN,
    );

    let contact_number = if draft.contact_number.trim().is_empty() {
        errors.add(Field::ContactNumber, "is required");
        String::new()
    } else {
        let normalized = policy::normalize_phone(&draft.contact_number);
        if !policy::is_office_phone(&normalized) || !policy::is_international_phone(&normalized) {
            errors.add(Field::ContactNumber, "must be a mobile number like +639XXXXXXXXX");
        }
        normalized
    };

    if !errors.is_empty() {
        return Err(errors);
    }

    // Every Option below was checked above; a None here would have recorded an error.
    match (draft.start_date, draft.start_time, draft.end_time, draft.organization_id) {
        (Some(start_date), Some(start_time), Some(end_time), Some(organization_id)) => {
            Ok(ValidatedRequest {
                purpose,
                start_date,
                end_date: draft.end_date.unwrap_or(start_date),
                start_time,
                end_time,
                organization_id,
                venue_id: draft.venue_id,
                equipment_ids,
                requester,
                officer_in_charge,
                contact_number,
            })
        }
        _ => Err(errors),
    }
}
