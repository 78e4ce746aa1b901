//! One calendar per supported market behind a single save/summary surface.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::persist::{CalendarError, CalendarFormat};
use super::store::{CalendarSummary, MarketCalendar};
use crate::domain::{CalendarEvent, Market};

/// Owns a [`MarketCalendar`] for every entry in [`Market::ALL`].
///
/// Layout: `{data_dir}/{market}/calendar.{yaml,json}`.
#[derive(Debug, Clone)]
pub struct MarketCalendarManager {
    data_dir: PathBuf,
    calendars: [MarketCalendar; 2],
}

fn slot(market: Market) -> usize {
    match market {
        Market::Ftse => 0,
        Market::Nasdaq => 1,
    }
}

impl MarketCalendarManager {
    /// Load every market's calendar from `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let calendars = Market::ALL.map(|m| MarketCalendar::open(m, data_dir.join(m.as_str())));
        Self {
            data_dir,
            calendars,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn get_calendar(&self, market: Market) -> &MarketCalendar {
        &self.calendars[slot(market)]
    }

    pub fn get_calendar_mut(&mut self, market: Market) -> &mut MarketCalendar {
        &mut self.calendars[slot(market)]
    }

    pub fn calendars(&self) -> impl Iterator<Item = &MarketCalendar> {
        self.calendars.iter()
    }

    pub fn add_event_to_market(&mut self, market: Market, event: CalendarEvent) -> bool {
        self.get_calendar_mut(market).add_event(event)
    }

    /// Save every calendar. Stops at the first failure.
    pub fn save_all(&mut self, format: CalendarFormat) -> Result<Vec<PathBuf>, CalendarError> {
        self.calendars
            .iter_mut()
            .map(|calendar| calendar.save_calendar(format))
            .collect()
    }

    pub fn get_summary(&self) -> BTreeMap<Market, CalendarSummary> {
        self.calendars
            .iter()
            .map(|calendar| (calendar.market(), calendar.get_summary()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use chrono::NaiveDate;

    #[test]
    fn slots_match_market_order() {
        for (i, market) in Market::ALL.into_iter().enumerate() {
            assert_eq!(slot(market), i);
        }
    }

    #[test]
    fn routes_events_to_the_right_market() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = MarketCalendarManager::open(dir.path());
        let hsba = CalendarEvent::new(
            "HSBA",
            Market::Ftse,
            EventType::Earnings,
            NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
            "HSBC Holdings PLC Full Year Results 2025",
        );
        assert!(mgr.add_event_to_market(Market::Ftse, hsba));

        let summary = mgr.get_summary();
        assert_eq!(summary[&Market::Ftse].total_events, 1);
        assert_eq!(summary[&Market::Nasdaq].total_events, 0);
        assert_eq!(mgr.get_calendar(Market::Ftse).market(), Market::Ftse);
    }

    #[test]
    fn save_all_writes_one_file_per_market() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = MarketCalendarManager::open(dir.path());
        let paths = mgr.save_all(CalendarFormat::Json).unwrap();
        assert_eq!(paths.len(), Market::ALL.len());
        assert!(dir.path().join("ftse/calendar.json").exists());
        assert!(dir.path().join("nasdaq/calendar.json").exists());
    }
}
