//! Calendar data sources and the priority-ordered fallback orchestrator.
//!
//! The [`DataSource`] trait abstracts over where events come from (Finnhub,
//! Yahoo Finance, a curated YAML file) so sources can be swapped and mocked.
//! Sources don't know about the calendar store; [`CalendarFetcher`] sits
//! above them and decides which one to use.

pub mod circuit_breaker;
pub mod fetcher;
pub mod finnhub;
pub mod http;
pub mod manual;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use fetcher::{CalendarFetcher, FetchBundle, PopulateReport};
pub use finnhub::FinnhubSource;
pub use manual::ManualSource;
pub use yahoo::YahooCalendarSource;

use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::{CalendarEvent, Market};

/// Structured errors from data sources.
///
/// The orchestrator recovers from all of them; they only surface in logs and
/// in [`FetchBundle::failures`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("hard stop: provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("source not configured: {0}")]
    NotConfigured(String),

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source error: {0}")]
    Other(String),
}

/// Capability contract every calendar source implements.
pub trait DataSource: Send + Sync {
    /// Human-readable name used in logs and reports.
    fn name(&self) -> &str;

    /// Upcoming earnings releases for `market`.
    fn fetch_earnings_calendar(
        &self,
        market: Market,
        days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError>;

    /// Upcoming dividend events for `market`.
    fn fetch_dividend_calendar(
        &self,
        market: Market,
        days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError>;

    /// Macroeconomic indicator releases. Not market specific; the fetcher
    /// re-homes them to whichever market is being populated.
    fn fetch_economic_calendar(&self, days_ahead: u32) -> Result<Vec<CalendarEvent>, SourceError>;

    /// Self-reported readiness, consulted before any fetch.
    fn health_check(&self) -> bool;
}

/// Resolved settings the concrete sources are built from.
#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    /// Finnhub API key, already read from the environment.
    pub finnhub_api_key: Option<String>,
    /// Tickers to query per market for per-symbol endpoints.
    pub watchlist: BTreeMap<Market, Vec<String>>,
    /// Curated fallback file.
    pub manual_file: PathBuf,
}

impl SourceSettings {
    pub fn watchlist_for(&self, market: Market) -> &[String] {
        self.watchlist.get(&market).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// `[today, today + days_ahead]` as a pair of dates.
pub fn fetch_window(today: NaiveDate, days_ahead: u32) -> (NaiveDate, NaiveDate) {
    (today, crate::domain::horizon(today, days_ahead))
}
