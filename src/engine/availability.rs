use chrono::NaiveDate;

use crate::model::*;
use crate::policy;

use super::{Engine, EngineError};

/// Free windows inside `window` once every `busy` slot is taken out.
/// `busy` need not be sorted or disjoint.
pub fn free_windows(window: TimeSlot, busy: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut busy = busy.to_vec();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);
    subtract_intervals(&[window], &busy)
}

/// Merge sorted overlapping/adjacent slots into disjoint slots.
pub fn merge_overlapping(sorted: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut merged: Vec<TimeSlot> = Vec::new();
    for &slot in sorted {
        if let Some(last) = merged.last_mut()
            && slot.start <= last.end
        {
            last.end = last.end.max(slot.end);
            continue;
        }
        merged.push(slot);
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `to_remove` disjoint.
pub fn subtract_intervals(base: &[TimeSlot], to_remove: &[TimeSlot]) -> Vec<TimeSlot> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(TimeSlot::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(TimeSlot::new(current_start, current_end));
        }
    }

    result
}

impl Engine {
    /// Open windows for `resource` on `date` within business hours.
    pub async fn free_slots(&self, resource: ResourceRef, date: NaiveDate) -> Result<Vec<TimeSlot>, EngineError> {
        let window = policy::business_window();
        let rows = self
            .repo_call(
                "find_overlapping",
                self.repo.find_overlapping(resource, date, window, None),
            )
            .await;
        let rows = self.observe("free_slots", rows)?;
        let busy: Vec<TimeSlot> = rows
            .iter()
            .filter(|r| r.status.holds_slot())
            .map(Reservation::slot)
            .collect();
        Ok(free_windows(window, &busy))
    }
}
