use chrono::NaiveDate;

use crate::model::MultiDaySlot;
use crate::policy;

use super::validate::ValidatedRequest;

/// One calendar day of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRequest {
    pub date: NaiveDate,
    pub is_first_day: bool,
    /// Position inside a multi-day batch; `None` for single-day requests.
    pub slot: Option<MultiDaySlot>,
}

/// Split a request into the days it books.
///
/// A single-day request yields its own date even on a weekend. A range
/// yields its weekdays only and may come back empty.
pub fn expand(request: &ValidatedRequest) -> Vec<DayRequest> {
    if !request.is_range() {
        return vec![DayRequest {
            date: request.start_date,
            is_first_day: true,
            slot: None,
        }];
    }

    let dates = policy::expand_date_range(request.start_date, request.end_date);
    let total = u16::try_from(dates.len()).unwrap_or(u16::MAX);
    dates
        .into_iter()
        .zip(1..=total)
        .map(|(date, index)| DayRequest {
            date,
            is_first_day: index == 1,
            slot: Some(MultiDaySlot { index, total }),
        })
        .collect()
}
