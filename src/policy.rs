//! Calendar and contact rules shared by validation, expansion and availability.

use std::sync::LazyLock;

use chrono::{Datelike, Days, NaiveDate, NaiveTime, Weekday};
use regex::Regex;

use crate::limits::{BUSINESS_CLOSE, BUSINESS_OPEN, MIN_ADVANCE_DAYS};
use crate::model::TimeSlot;

static OFFICE_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+639\d{9}$").expect("static regex"));

static INTERNATIONAL_PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?\d{10,15}$").expect("static regex"));

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Inclusive, ascending weekdays in `start..=end`. Empty when `start > end`.
pub fn expand_date_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !is_weekend(*d))
        .collect()
}

/// Canonicalize a local or international mobile number to `+63…`.
///
/// Only normalizes; whether the result is acceptable is decided by
/// [`is_office_phone`] and [`is_international_phone`].
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.starts_with("63") {
        format!("+{digits}")
    } else if let Some(rest) = digits.strip_prefix('0') {
        format!("+63{rest}")
    } else {
        format!("+63{digits}")
    }
}

/// `+639` followed by nine digits.
pub fn is_office_phone(normalized: &str) -> bool {
    OFFICE_PHONE.is_match(normalized)
}

/// Generic international form: optional `+`, 10–15 digits.
pub fn is_international_phone(normalized: &str) -> bool {
    INTERNATIONAL_PHONE.is_match(normalized)
}

/// `07:00 ≤ time ≤ 21:00`. An end time may sit exactly on closing.
pub fn within_business_hours(time: NaiveTime) -> bool {
    (BUSINESS_OPEN..=BUSINESS_CLOSE).contains(&time)
}

pub fn business_window() -> TimeSlot {
    TimeSlot::new(BUSINESS_OPEN, BUSINESS_CLOSE)
}

pub fn earliest_bookable_date(today: NaiveDate) -> NaiveDate {
    today
        .checked_add_days(Days::new(MIN_ADVANCE_DAYS.unsigned_abs()))
        .unwrap_or(NaiveDate::MAX)
}
