//! Priority-ordered fallback across calendar sources.
//!
//! For each market the first healthy source that answers both the earnings
//! and dividend queries wins; results are never merged across sources. A
//! source that errors is skipped for the rest of the call. Running out of
//! sources is not an error: the market simply gets no new events.

use serde::Serialize;
use tracing::{debug, info, warn};

use super::finnhub::FinnhubSource;
use super::manual::ManualSource;
use super::yahoo::YahooCalendarSource;
use super::{DataSource, SourceSettings};
use crate::calendar::{MarketCalendar, MarketCalendarManager};
use crate::domain::{CalendarEvent, Market};

/// Everything one fallback pass produced for a market.
#[derive(Debug, Default)]
pub struct FetchBundle {
    pub earnings: Vec<CalendarEvent>,
    pub dividends: Vec<CalendarEvent>,
    pub economic: Vec<CalendarEvent>,
    /// Source that supplied earnings and dividends.
    pub company_source: Option<String>,
    /// Source that supplied economic events.
    pub economic_source: Option<String>,
    /// `(source, error)` for every source that was tried and failed.
    pub failures: Vec<(String, String)>,
}

impl FetchBundle {
    pub fn event_count(&self) -> usize {
        self.earnings.len() + self.dividends.len() + self.economic.len()
    }

    pub fn into_events(self) -> impl Iterator<Item = CalendarEvent> {
        self.earnings
            .into_iter()
            .chain(self.dividends)
            .chain(self.economic)
    }
}

/// Outcome of populating one market's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopulateReport {
    pub market: Market,
    pub source: Option<String>,
    pub fetched: usize,
    pub inserted: usize,
    pub failures: Vec<String>,
}

/// Ordered list of sources, highest priority first.
pub struct CalendarFetcher {
    sources: Vec<Box<dyn DataSource>>,
}

impl CalendarFetcher {
    pub fn new(sources: Vec<Box<dyn DataSource>>) -> Self {
        Self { sources }
    }

    /// Standard chain: Finnhub (when a key is configured), Yahoo (when
    /// healthy at construction), then the manual file, which is always last.
    pub fn from_settings(settings: &SourceSettings) -> Self {
        let mut sources: Vec<Box<dyn DataSource>> = Vec::new();

        match settings.finnhub_api_key.as_deref() {
            Some(key) => match FinnhubSource::new(key, settings.watchlist.clone()) {
                Ok(source) => sources.push(Box::new(source)),
                Err(e) => warn!(error = %e, "Finnhub source unavailable"),
            },
            None => debug!("no Finnhub API key configured"),
        }

        match YahooCalendarSource::new(settings.watchlist.clone()) {
            Ok(source) if source.health_check() => sources.push(Box::new(source)),
            Ok(_) => debug!("Yahoo source not healthy, skipping"),
            Err(e) => warn!(error = %e, "Yahoo source unavailable"),
        }

        sources.push(Box::new(ManualSource::open(&settings.manual_file)));

        let fetcher = Self::new(sources);
        info!(sources = ?fetcher.source_names(), "calendar fetcher ready");
        fetcher
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Run the fallback chain for `market`.
    pub fn fetch_all_calendars(&self, market: Market, days_ahead: u32) -> FetchBundle {
        let mut bundle = FetchBundle::default();

        for source in &self.sources {
            let name = source.name();
            if !source.health_check() {
                debug!(source = name, %market, "source unhealthy, skipping");
                continue;
            }

            let company = source
                .fetch_earnings_calendar(market, days_ahead)
                .and_then(|earnings| {
                    source
                        .fetch_dividend_calendar(market, days_ahead)
                        .map(|dividends| (earnings, dividends))
                });
            let (earnings, dividends) = match company {
                Ok(found) => found,
                Err(e) => {
                    warn!(source = name, %market, error = %e, "source failed, trying next");
                    bundle.failures.push((name.to_string(), e.to_string()));
                    continue;
                }
            };

            if bundle.economic_source.is_none() {
                match source.fetch_economic_calendar(days_ahead) {
                    Ok(economic) => {
                        bundle.economic = economic
                            .into_iter()
                            .map(|event| event.rehomed(market))
                            .collect();
                        bundle.economic_source = Some(name.to_string());
                    }
                    Err(e) => {
                        warn!(source = name, %market, error = %e, "economic fetch failed, trying next");
                        bundle.failures.push((name.to_string(), e.to_string()));
                        continue;
                    }
                }
            }

            bundle.earnings = earnings;
            bundle.dividends = dividends;
            bundle.company_source = Some(name.to_string());
            info!(
                source = name,
                %market,
                earnings = bundle.earnings.len(),
                dividends = bundle.dividends.len(),
                economic = bundle.economic.len(),
                "calendar fetched"
            );
            break;
        }

        if bundle.company_source.is_none() {
            warn!(%market, "no usable calendar source");
        }
        bundle
    }

    /// Fetch for the calendar's market and insert, deduplicating.
    pub fn populate_calendar(&self, calendar: &mut MarketCalendar, days_ahead: u32) -> PopulateReport {
        let market = calendar.market();
        let bundle = self.fetch_all_calendars(market, days_ahead);
        let source = bundle.company_source.clone();
        let failures = bundle
            .failures
            .iter()
            .map(|(name, err)| format!("{name}: {err}"))
            .collect();
        let fetched = bundle.event_count();
        let inserted = calendar.add_events_bulk(bundle.into_events());
        info!(%market, fetched, inserted, "calendar populated");
        PopulateReport {
            market,
            source,
            fetched,
            inserted,
            failures,
        }
    }

    pub fn populate_all_markets(
        &self,
        manager: &mut MarketCalendarManager,
        days_ahead: u32,
    ) -> Vec<PopulateReport> {
        Market::ALL
            .into_iter()
            .map(|market| self.populate_calendar(manager.get_calendar_mut(market), days_ahead))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceError;

    struct Broken;

    impl DataSource for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn fetch_earnings_calendar(&self, _: Market, _: u32) -> Result<Vec<CalendarEvent>, SourceError> {
            Err(SourceError::NetworkUnreachable("down".into()))
        }
        fn fetch_dividend_calendar(&self, _: Market, _: u32) -> Result<Vec<CalendarEvent>, SourceError> {
            Ok(Vec::new())
        }
        fn fetch_economic_calendar(&self, _: u32) -> Result<Vec<CalendarEvent>, SourceError> {
            Ok(Vec::new())
        }
        fn health_check(&self) -> bool {
            true
        }
    }

    #[test]
    fn no_sources_gives_empty_bundle() {
        let fetcher = CalendarFetcher::new(Vec::new());
        let bundle = fetcher.fetch_all_calendars(Market::Nasdaq, 30);
        assert_eq!(bundle.event_count(), 0);
        assert!(bundle.company_source.is_none());
    }

    #[test]
    fn failures_are_recorded() {
        let fetcher = CalendarFetcher::new(vec![Box::new(Broken)]);
        let bundle = fetcher.fetch_all_calendars(Market::Ftse, 30);
        assert_eq!(bundle.failures.len(), 1);
        assert_eq!(bundle.failures[0].0, "broken");
        assert!(bundle.company_source.is_none());
    }

    #[test]
    fn default_chain_ends_with_manual() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SourceSettings {
            manual_file: dir.path().join("market_calendars.yaml"),
            ..SourceSettings::default()
        };
        let fetcher = CalendarFetcher::from_settings(&settings);
        assert_eq!(fetcher.source_names(), vec!["Manual YAML"]);
    }
}
