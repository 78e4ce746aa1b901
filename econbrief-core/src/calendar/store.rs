//! Per-market calendar store with dedup on insert and read-side queries.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::persist::{locate_calendar_file, CalendarDocument, CalendarError, CalendarFormat};
use crate::domain::{horizon, CalendarEvent, EventType, Market};

/// Events grouped by ticker. Query results omit tickers with no matches.
pub type TickerEvents<'a> = BTreeMap<String, Vec<&'a CalendarEvent>>;

/// Earliest and latest event dates, `None` on an empty calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub first: Option<NaiveDate>,
    pub last: Option<NaiveDate>,
}

/// Aggregate view of one market calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSummary {
    pub market: Market,
    pub total_tickers: usize,
    pub total_events: usize,
    pub event_types: BTreeMap<EventType, usize>,
    pub date_range: DateRange,
    pub last_updated: Option<NaiveDateTime>,
}

/// All calendar events for exactly one market, keyed by ticker.
///
/// Invariants:
/// - every event stored under key `t` has `ticker() == t`
/// - within one ticker, no two events share `(date, event_type)`
///
/// Mutation needs `&mut self`, so a single writer is enforced by the borrow
/// checker. Nothing is persisted until [`save_calendar`](Self::save_calendar).
#[derive(Debug, Clone)]
pub struct MarketCalendar {
    market: Market,
    data_dir: PathBuf,
    events: BTreeMap<String, Vec<CalendarEvent>>,
    last_updated: Option<NaiveDateTime>,
}

impl MarketCalendar {
    /// Empty calendar that will persist under `data_dir`. Does not touch disk.
    pub fn empty(market: Market, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            market,
            data_dir: data_dir.into(),
            events: BTreeMap::new(),
            last_updated: None,
        }
    }

    /// Load the calendar stored in `data_dir`.
    ///
    /// A missing or unreadable file yields an empty calendar, never an error.
    pub fn open(market: Market, data_dir: impl Into<PathBuf>) -> Self {
        let mut calendar = Self::empty(market, data_dir);
        info!(market = %market, "loading local calendar");

        let Some((path, format)) = locate_calendar_file(&calendar.data_dir) else {
            return calendar;
        };

        match CalendarDocument::read(&path, format) {
            Ok(doc) if doc.market != market => {
                warn!(
                    path = %path.display(),
                    found = %doc.market,
                    expected = %market,
                    "calendar file belongs to another market, ignoring"
                );
            }
            Ok(doc) => {
                calendar.last_updated = doc.last_updated;
                let loaded = calendar.add_events_bulk(doc.events.into_values().flatten());
                info!(market = %market, events = loaded, "loaded calendar");
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable calendar file, starting empty");
            }
        }

        calendar
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn last_updated(&self) -> Option<NaiveDateTime> {
        self.last_updated
    }

    /// Insert `event` unless its ticker already has one with the same date and
    /// type. Returns whether it was inserted; duplicates are dropped silently.
    /// An event tagged with another market is re-tagged with this calendar's.
    pub fn add_event(&mut self, mut event: CalendarEvent) -> bool {
        if event.market() != self.market {
            warn!(
                ticker = event.ticker(),
                event_market = %event.market(),
                calendar_market = %self.market,
                "event market differs from calendar; re-tagging"
            );
            event = event.rehomed(self.market);
        }
        let list = self.events.entry(event.ticker().to_string()).or_default();
        if list.iter().any(|existing| existing.same_slot(&event)) {
            return false;
        }
        debug!(
            ticker = event.ticker(),
            event_type = %event.event_type(),
            date = %event.date(),
            "added event"
        );
        list.push(event);
        true
    }

    /// Apply [`add_event`](Self::add_event) to each item in arrival order.
    /// Returns the number of events inserted.
    pub fn add_events_bulk<I>(&mut self, events: I) -> usize
    where
        I: IntoIterator<Item = CalendarEvent>,
    {
        events
            .into_iter()
            .map(|event| self.add_event(event))
            .filter(|inserted| *inserted)
            .count()
    }

    /// Events for `ticker` in insertion order; empty for an unknown ticker.
    pub fn get_events_by_ticker(&self, ticker: &str) -> &[CalendarEvent] {
        self.events.get(ticker).map(Vec::as_slice).unwrap_or(&[])
    }

    fn filtered<F>(&self, keep: F) -> TickerEvents<'_>
    where
        F: Fn(&CalendarEvent) -> bool,
    {
        self.events
            .iter()
            .filter_map(|(ticker, events)| {
                let matched: Vec<&CalendarEvent> = events.iter().filter(|e| keep(e)).collect();
                (!matched.is_empty()).then(|| (ticker.clone(), matched))
            })
            .collect()
    }

    /// Events dated within `[start, end]`, both bounds inclusive.
    pub fn get_events_by_date_range(&self, start: NaiveDate, end: NaiveDate) -> TickerEvents<'_> {
        self.filtered(|e| start <= e.date() && e.date() <= end)
    }

    pub fn get_events_by_type(&self, event_type: EventType) -> TickerEvents<'_> {
        self.filtered(|e| e.event_type() == event_type)
    }

    /// Events in `[today, today + days_ahead]`, using the local date.
    pub fn get_upcoming_events(&self, days_ahead: u32) -> TickerEvents<'_> {
        self.get_upcoming_events_from(chrono::Local::now().date_naive(), days_ahead)
    }

    pub fn get_upcoming_events_from(&self, today: NaiveDate, days_ahead: u32) -> TickerEvents<'_> {
        self.get_events_by_date_range(today, horizon(today, days_ahead))
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.events
            .iter()
            .filter(|(_, events)| !events.is_empty())
            .map(|(ticker, _)| ticker.as_str())
    }

    pub fn event_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    /// Every event, ordered by date then ticker.
    pub fn iter_events(&self) -> Vec<&CalendarEvent> {
        let mut all: Vec<&CalendarEvent> = self.events.values().flatten().collect();
        all.sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.ticker().cmp(b.ticker())));
        all
    }

    pub fn get_summary(&self) -> CalendarSummary {
        let mut event_types: BTreeMap<EventType, usize> = BTreeMap::new();
        let mut first: Option<NaiveDate> = None;
        let mut last: Option<NaiveDate> = None;

        for event in self.events.values().flatten() {
            *event_types.entry(event.event_type()).or_insert(0) += 1;
            first = Some(first.map_or(event.date(), |d| d.min(event.date())));
            last = Some(last.map_or(event.date(), |d| d.max(event.date())));
        }

        CalendarSummary {
            market: self.market,
            total_tickers: self.tickers().count(),
            total_events: self.event_count(),
            event_types,
            date_range: DateRange { first, last },
            last_updated: self.last_updated,
        }
    }

    fn to_document(&self, last_updated: NaiveDateTime) -> CalendarDocument {
        let events: BTreeMap<String, Vec<CalendarEvent>> = self
            .events
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .map(|(ticker, list)| (ticker.clone(), list.clone()))
            .collect();
        CalendarDocument {
            market: self.market,
            last_updated: Some(last_updated),
            event_count: self.event_count(),
            tickers: events.keys().cloned().collect(),
            events,
        }
    }

    /// Path the calendar is written to for `format`.
    pub fn file_path(&self, format: CalendarFormat) -> PathBuf {
        self.data_dir.join(format.file_name())
    }

    /// Serialize the full in-memory state, overwriting any previous file for
    /// this format. Updates `last_updated` on success.
    pub fn save_calendar(&mut self, format: CalendarFormat) -> Result<PathBuf, CalendarError> {
        let now = chrono::Local::now().naive_local();
        let path = self.file_path(format);
        self.to_document(now).write(&path, format)?;
        self.last_updated = Some(now);
        info!(market = %self.market, path = %path.display(), "saved calendar");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn ev(ticker: &str, t: EventType, d: &str) -> CalendarEvent {
        CalendarEvent::new(ticker, Market::Nasdaq, t, date(d), format!("{ticker} {t}"))
    }

    fn sample() -> MarketCalendar {
        let mut cal = MarketCalendar::empty(Market::Nasdaq, "/unused");
        cal.add_events_bulk([
            ev("AAPL", EventType::Earnings, "2026-02-05"),
            ev("AAPL", EventType::Dividend, "2026-02-12"),
            ev("MSFT", EventType::Earnings, "2026-01-28"),
            ev("NVDA", EventType::Split, "2026-06-10"),
        ]);
        cal
    }

    #[test]
    fn duplicate_insert_keeps_first() {
        let mut cal = MarketCalendar::empty(Market::Nasdaq, "/unused");
        let first = ev("AAPL", EventType::Earnings, "2026-02-05");
        let second = CalendarEvent::new(
            "AAPL",
            Market::Nasdaq,
            EventType::Earnings,
            date("2026-02-05"),
            "revised",
        );
        assert!(cal.add_event(first));
        assert!(!cal.add_event(second));
        let stored = cal.get_events_by_ticker("AAPL");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].description(), "AAPL earnings");
    }

    #[test]
    fn bulk_preserves_arrival_order_within_ticker() {
        let cal = sample();
        let dates: Vec<_> = cal
            .get_events_by_ticker("AAPL")
            .iter()
            .map(|e| e.date())
            .collect();
        assert_eq!(dates, vec![date("2026-02-05"), date("2026-02-12")]);
    }

    #[test]
    fn unknown_ticker_is_empty() {
        assert!(sample().get_events_by_ticker("TSLA").is_empty());
    }

    #[test]
    fn date_range_is_inclusive_and_omits_empty_tickers() {
        let cal = sample();
        let hits = cal.get_events_by_date_range(date("2026-01-28"), date("2026-02-05"));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits["MSFT"].len(), 1);
        assert_eq!(hits["AAPL"].len(), 1);
        assert!(!hits.contains_key("NVDA"));
    }

    #[test]
    fn type_query_groups_by_ticker() {
        let cal = sample();
        let earnings = cal.get_events_by_type(EventType::Earnings);
        assert_eq!(earnings.keys().collect::<Vec<_>>(), vec!["AAPL", "MSFT"]);
        assert!(cal.get_events_by_type(EventType::Ipo).is_empty());
    }

    #[test]
    fn upcoming_uses_closed_window() {
        let cal = sample();
        let hits = cal.get_upcoming_events_from(date("2026-02-05"), 7);
        assert_eq!(hits["AAPL"].len(), 2);
        assert!(!hits.contains_key("MSFT"));
    }

    #[test]
    fn summary_counts_are_consistent() {
        let summary = sample().get_summary();
        assert_eq!(summary.total_tickers, 3);
        assert_eq!(summary.total_events, 4);
        assert_eq!(summary.event_types.values().sum::<usize>(), summary.total_events);
        assert_eq!(summary.event_types[&EventType::Earnings], 2);
        assert_eq!(summary.date_range.first, Some(date("2026-01-28")));
        assert_eq!(summary.date_range.last, Some(date("2026-06-10")));
    }

    #[test]
    fn empty_summary_has_no_date_range() {
        let summary = MarketCalendar::empty(Market::Ftse, "/unused").get_summary();
        assert_eq!(summary.total_events, 0);
        assert_eq!(summary.date_range, DateRange { first: None, last: None });
        assert!(summary.event_types.is_empty());
    }

    #[test]
    fn iter_events_sorted_by_date() {
        let cal = sample();
        let tickers: Vec<_> = cal.iter_events().iter().map(|e| e.ticker()).collect();
        assert_eq!(tickers, vec!["MSFT", "AAPL", "AAPL", "NVDA"]);
    }
}
