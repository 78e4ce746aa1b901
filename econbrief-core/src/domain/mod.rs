//! Domain types: markets, event categories, calendar events.

pub mod event;
pub mod market;

pub use event::{CalendarEvent, Metadata, MetadataValue, MACRO_TICKER};
pub use market::{EventType, Market, ParseDomainError};

use chrono::{Days, NaiveDate};

/// Last day of the inclusive window `[start, start + days_ahead]`.
/// Saturates at `NaiveDate::MAX` instead of overflowing.
pub fn horizon(start: NaiveDate, days_ahead: u32) -> NaiveDate {
    start
        .checked_add_days(Days::new(u64::from(days_ahead)))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn horizon_adds_days() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 5).unwrap();
        assert_eq!(horizon(start, 0), start);
        assert_eq!(horizon(start, 7), NaiveDate::from_ymd_opt(2026, 2, 12).unwrap());
    }

    #[test]
    fn horizon_saturates_on_huge_windows() {
        let start = NaiveDate::from_ymd_opt(2026, 2, 5).unwrap();
        assert_eq!(horizon(start, u32::MAX), NaiveDate::MAX);
        assert_eq!(horizon(NaiveDate::MAX, 1), NaiveDate::MAX);
    }
}
