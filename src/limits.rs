use chrono::NaiveTime;

const fn clock(hour: u32, minute: u32) -> NaiveTime {
    match NaiveTime::from_hms_opt(hour, minute, 0) {
        Some(t) => t,
        None => panic!("invalid clock time"),
    }
}

/// Earliest start time of any reservation.
pub const BUSINESS_OPEN: NaiveTime = clock(7, 0);

/// Latest end time of any reservation (inclusive).
pub const BUSINESS_CLOSE: NaiveTime = clock(21, 0);

/// Today and the next calendar day are never bookable.
pub const MIN_ADVANCE_DAYS: i64 = 2;

/// Widest inclusive start..=end range a single request may cover.
pub const MAX_RANGE_DAYS: i64 = 31;

pub const MAX_PURPOSE_LEN: usize = 500;
pub const MAX_NAME_LEN: usize = 120;
pub const MAX_EQUIPMENT_PER_REQUEST: usize = 20;

/// Upper bound on rows in one all-or-nothing insert.
pub const MAX_BATCH_SIZE: usize = MAX_RANGE_DAYS as usize;

/// Capacity of each change-notification broadcast channel.
pub const NOTIFY_CHANNEL_CAPACITY: usize = 256;
