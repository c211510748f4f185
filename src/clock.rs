use chrono::{DateTime, FixedOffset, NaiveDate, Utc};

/// Source of "now". The engine never reads the system clock directly.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar date at the office for `now()`.
    fn today(&self, office: FixedOffset) -> NaiveDate {
        self.now().with_timezone(&office).date_naive()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn today_uses_office_offset() {
        // 17:30 UTC on the 7th is already the 8th in Manila (+08:00).
        let clock = FixedClock(Utc.with_ymd_and_hms(2025, 6, 7, 17, 30, 0).unwrap());
        let manila = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(clock.today(manila), NaiveDate::from_ymd_opt(2025, 6, 8).unwrap());
        assert_eq!(
            clock.today(FixedOffset::east_opt(0).unwrap()),
            NaiveDate::from_ymd_opt(2025, 6, 7).unwrap()
        );
    }
}
