//! Fetch stage: pull the run's raw events out of the stored market calendars.
//!
//! Network access happens during calendar maintenance (`init` / `update`),
//! not here. This stage only reads what the calendar store already holds for
//! `[date, date + lookahead_days]` and writes it to `events/<date>.yaml`.

use chrono::{NaiveDate, NaiveDateTime};
use econbrief_core::calendar::MarketCalendarManager;
use econbrief_core::CalendarEvent;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::artifact::{write_yaml, StageError};

/// One event as handed to normalization. Every field is optional so files
/// written by hand or by older runs still load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RawEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<&CalendarEvent> for RawEvent {
    fn from(event: &CalendarEvent) -> Self {
        RawEvent {
            id: None,
            source: Some(format!("calendar:{}", event.market())),
            category: Some(event.event_type().as_str().to_string()),
            timestamp: Some(event.date().to_string()),
            description: Some(format!("{}: {}", event.ticker(), event.description())),
            tags: vec![
                event.market().as_str().to_string(),
                event.ticker().to_string(),
                event.event_type().short_name().to_string(),
            ],
        }
    }
}

/// On-disk shape of `events/<date>.yaml` and `events/<date>-normalized.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsFile<T> {
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    pub event_count: usize,
    pub events: Vec<T>,
}

impl<T> EventsFile<T> {
    pub fn new(date: NaiveDate, events: Vec<T>) -> Self {
        Self {
            date,
            timestamp: chrono::Local::now().naive_local(),
            event_count: events.len(),
            events,
        }
    }
}

/// Stored calendar events for every market dated `[date, date + lookahead_days]`,
/// ordered by market, then date, then ticker.
pub fn fetch_events(
    date: NaiveDate,
    calendars: &MarketCalendarManager,
    lookahead_days: u32,
) -> Vec<RawEvent> {
    let horizon = econbrief_core::domain::horizon(date, lookahead_days);
    let events: Vec<RawEvent> = calendars
        .calendars()
        .flat_map(|calendar| calendar.iter_events())
        .filter(|event| date <= event.date() && event.date() <= horizon)
        .map(RawEvent::from)
        .collect();
    info!(%date, lookahead_days, count = events.len(), "fetched raw events");
    events
}

pub fn raw_events_path(events_dir: &Path, date: NaiveDate) -> PathBuf {
    events_dir.join(format!("{date}.yaml"))
}

/// Write `events/<date>.yaml`.
pub fn save_raw_events(
    events_dir: &Path,
    date: NaiveDate,
    events: &[RawEvent],
) -> Result<PathBuf, StageError> {
    let path = raw_events_path(events_dir, date);
    write_yaml(&path, &EventsFile::new(date, events.to_vec()))?;
    info!(count = events.len(), path = %path.display(), "saved raw events");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use econbrief_core::{EventType, Market};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, day).unwrap()
    }

    #[test]
    fn selects_window_across_markets() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = MarketCalendarManager::open(dir.path());
        manager.add_event_to_market(
            Market::Nasdaq,
            CalendarEvent::new("AAPL", Market::Nasdaq, EventType::Earnings, d(5), "Apple Q1"),
        );
        manager.add_event_to_market(
            Market::Ftse,
            CalendarEvent::new("HSBA", Market::Ftse, EventType::Earnings, d(10), "HSBC FY"),
        );
        manager.add_event_to_market(
            Market::Nasdaq,
            CalendarEvent::new("MSFT", Market::Nasdaq, EventType::Earnings, d(20), "Microsoft"),
        );

        let events = fetch_events(d(3), &manager, 7);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source.as_deref(), Some("calendar:ftse"));
        assert_eq!(events[1].description.as_deref(), Some("AAPL: Apple Q1"));
        assert_eq!(events[1].category.as_deref(), Some("earnings"));
        assert!(events.iter().all(|e| e.id.is_none()));
    }

    #[test]
    fn huge_lookahead_reaches_every_future_event() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = MarketCalendarManager::open(dir.path());
        manager.add_event_to_market(
            Market::Nasdaq,
            CalendarEvent::new("AAPL", Market::Nasdaq, EventType::Earnings, d(1), "Apple Q1"),
        );
        manager.add_event_to_market(
            Market::Nasdaq,
            CalendarEvent::new("MSFT", Market::Nasdaq, EventType::Earnings, d(20), "Microsoft"),
        );

        let events = fetch_events(d(3), &manager, u32::MAX);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].description.as_deref(), Some("MSFT: Microsoft"));
    }

    #[test]
    fn saved_file_has_header_fields() {
        let dir = tempfile::tempdir().unwrap();
        let raw = vec![RawEvent {
            description: Some("US CPI".into()),
            ..RawEvent::default()
        }];
        let path = save_raw_events(dir.path(), d(5), &raw).unwrap();
        assert_eq!(path, dir.path().join("2026-02-05.yaml"));

        let file: EventsFile<RawEvent> =
            serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(file.event_count, 1);
        assert_eq!(file.events, raw);
    }
}
