//! Yahoo Finance calendar source.
//!
//! Reads the `calendarEvents` module of the v10 quoteSummary API, one request
//! per watchlist ticker. Yahoo has no economic calendar, so
//! [`DataSource::fetch_economic_calendar`] always returns an empty list.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes; the manual YAML source is the fallback when it breaks.

use chrono::{DateTime, Local, NaiveDate};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::http::HttpJson;
use super::{fetch_window, DataSource, SourceError};
use crate::domain::{CalendarEvent, EventType, Market};

#[derive(Debug, Deserialize)]
pub struct QuoteSummaryResponse {
    #[serde(rename = "quoteSummary")]
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    result: Option<Vec<SummaryResult>>,
    error: Option<SummaryError>,
}

#[derive(Debug, Deserialize)]
struct SummaryError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct SummaryResult {
    #[serde(rename = "calendarEvents")]
    calendar_events: Option<CalendarEvents>,
}

#[derive(Debug, Default, Deserialize)]
struct CalendarEvents {
    #[serde(default)]
    earnings: Option<EarningsBlock>,
    #[serde(rename = "exDividendDate", default)]
    ex_dividend_date: Option<RawValue>,
    #[serde(rename = "dividendDate", default)]
    dividend_date: Option<RawValue>,
}

#[derive(Debug, Deserialize)]
struct EarningsBlock {
    #[serde(rename = "earningsDate", default)]
    earnings_date: Vec<RawValue>,
    #[serde(rename = "earningsAverage", default)]
    earnings_average: Option<RawValue>,
    #[serde(rename = "revenueAverage", default)]
    revenue_average: Option<RawValue>,
}

/// Yahoo's `{ "raw": ..., "fmt": ... }` wrapper.
#[derive(Debug, Deserialize)]
struct RawValue {
    #[serde(default)]
    raw: Option<f64>,
}

impl RawValue {
    fn as_date(&self) -> Option<NaiveDate> {
        let secs = self.raw? as i64;
        DateTime::from_timestamp(secs, 0).map(|dt| dt.date_naive())
    }
}

fn calendar_events(
    ticker: &str,
    resp: QuoteSummaryResponse,
) -> Result<CalendarEvents, SourceError> {
    let result = resp.quote_summary.result.ok_or_else(|| match resp.quote_summary.error {
        Some(err) => SourceError::ResponseFormatChanged(format!(
            "{ticker}: {}: {}",
            err.code, err.description
        )),
        None => SourceError::ResponseFormatChanged(format!("{ticker}: empty result with no error")),
    })?;
    Ok(result
        .into_iter()
        .next()
        .and_then(|r| r.calendar_events)
        .unwrap_or_default())
}

fn in_window(date: NaiveDate, window: (NaiveDate, NaiveDate)) -> bool {
    window.0 <= date && date <= window.1
}

/// Earnings events for one ticker from a quoteSummary response.
///
/// Yahoo sometimes reports a two-date range for an unconfirmed release; the
/// first date inside the window is used.
pub fn parse_earnings(
    ticker: &str,
    market: Market,
    resp: QuoteSummaryResponse,
    window: (NaiveDate, NaiveDate),
) -> Result<Vec<CalendarEvent>, SourceError> {
    let Some(block) = calendar_events(ticker, resp)?.earnings else {
        return Ok(Vec::new());
    };
    let Some(date) = block
        .earnings_date
        .iter()
        .filter_map(RawValue::as_date)
        .find(|d| in_window(*d, window))
    else {
        return Ok(Vec::new());
    };

    let mut event = CalendarEvent::new(
        ticker,
        market,
        EventType::Earnings,
        date,
        format!("{ticker} Earnings"),
    )
    .with_metadata("source", "yahoo");
    if block.earnings_date.len() > 1 {
        event = event.with_metadata("date_confirmed", false);
    }
    if let Some(eps) = block.earnings_average.and_then(|v| v.raw) {
        event = event.with_metadata("eps_estimate", eps);
    }
    if let Some(revenue) = block.revenue_average.and_then(|v| v.raw) {
        event = event.with_metadata("revenue_estimate", revenue);
    }
    Ok(vec![event])
}

/// Dividend events for one ticker: the ex-dividend date, with the pay date as metadata.
pub fn parse_dividends(
    ticker: &str,
    market: Market,
    resp: QuoteSummaryResponse,
    window: (NaiveDate, NaiveDate),
) -> Result<Vec<CalendarEvent>, SourceError> {
    let events = calendar_events(ticker, resp)?;
    let Some(ex_date) = events
        .ex_dividend_date
        .as_ref()
        .and_then(RawValue::as_date)
        .filter(|d| in_window(*d, window))
    else {
        return Ok(Vec::new());
    };

    let mut event = CalendarEvent::new(
        ticker,
        market,
        EventType::Dividend,
        ex_date,
        format!("{ticker} Ex-Dividend"),
    )
    .with_metadata("source", "yahoo");
    if let Some(pay) = events.dividend_date.as_ref().and_then(RawValue::as_date) {
        event = event.with_metadata("pay_date", pay.to_string());
    }
    Ok(vec![event])
}

/// Yahoo Finance [`DataSource`]. Only covers tickers on the watchlist.
pub struct YahooCalendarSource {
    http: HttpJson,
    watchlist: BTreeMap<Market, Vec<String>>,
}

impl YahooCalendarSource {
    pub fn new(watchlist: BTreeMap<Market, Vec<String>>) -> Result<Self, SourceError> {
        let breaker = Arc::new(CircuitBreaker::default_provider("yahoo"));
        Ok(Self {
            http: HttpJson::new(breaker)?,
            watchlist,
        })
    }

    fn watchlist_for(&self, market: Market) -> &[String] {
        self.watchlist.get(&market).map(Vec::as_slice).unwrap_or(&[])
    }

    fn summary_url(symbol: &str) -> String {
        format!("https://query2.finance.yahoo.com/v10/finance/quoteSummary/{symbol}")
    }

    /// Fetch and parse one module per ticker, skipping tickers whose
    /// response has changed shape.
    fn collect<F>(&self, market: Market, days_ahead: u32, parse: F) -> Result<Vec<CalendarEvent>, SourceError>
    where
        F: Fn(&str, Market, QuoteSummaryResponse, (NaiveDate, NaiveDate)) -> Result<Vec<CalendarEvent>, SourceError>,
    {
        let window = fetch_window(Local::now().date_naive(), days_ahead);
        let mut events = Vec::new();
        for ticker in self.watchlist_for(market) {
            let resp: QuoteSummaryResponse = self.http.get_json(
                &Self::summary_url(&market.vendor_symbol(ticker)),
                &[("modules", "calendarEvents".to_string())],
                "yahoo quoteSummary",
            )?;
            match parse(ticker, market, resp, window) {
                Ok(found) => events.extend(found),
                Err(e) => warn!(source = "yahoo", ticker = %ticker, error = %e, "skipping ticker"),
            }
        }
        Ok(events)
    }
}

impl DataSource for YahooCalendarSource {
    fn name(&self) -> &str {
        "Yahoo Finance"
    }

    fn fetch_earnings_calendar(
        &self,
        market: Market,
        days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        let events = self.collect(market, days_ahead, parse_earnings)?;
        debug!(%market, count = events.len(), "yahoo earnings fetched");
        Ok(events)
    }

    fn fetch_dividend_calendar(
        &self,
        market: Market,
        days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        let events = self.collect(market, days_ahead, parse_dividends)?;
        debug!(%market, count = events.len(), "yahoo dividends fetched");
        Ok(events)
    }

    fn fetch_economic_calendar(&self, _days_ahead: u32) -> Result<Vec<CalendarEvent>, SourceError> {
        Ok(Vec::new())
    }

    /// Healthy when the breaker is closed and there is something to query.
    fn health_check(&self) -> bool {
        self.watchlist.values().any(|tickers| !tickers.is_empty()) && self.http.breaker().is_allowed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MetadataValue;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn ts(date: NaiveDate) -> i64 {
        date.and_hms_opt(12, 0, 0).unwrap().and_utc().timestamp()
    }

    fn response(json: serde_json::Value) -> QuoteSummaryResponse {
        serde_json::from_value(json).unwrap()
    }

    fn window() -> (NaiveDate, NaiveDate) {
        (d(2026, 2, 1), d(2026, 2, 28))
    }

    #[test]
    fn earnings_uses_first_date_in_window() {
        let resp = response(serde_json::json!({"quoteSummary": {"result": [{"calendarEvents": {
            "earnings": {
                "earningsDate": [{"raw": ts(d(2026, 2, 5))}, {"raw": ts(d(2026, 2, 9))}],
                "earningsAverage": {"raw": 2.35}
            }
        }}], "error": null}}));
        let events = parse_earnings("AAPL", Market::Nasdaq, resp, window()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date(), d(2026, 2, 5));
        assert_eq!(events[0].metadata()["date_confirmed"], MetadataValue::Bool(false));
        assert_eq!(events[0].metadata()["eps_estimate"], MetadataValue::Number(2.35));
    }

    #[test]
    fn earnings_outside_window_yields_nothing() {
        let resp = response(serde_json::json!({"quoteSummary": {"result": [{"calendarEvents": {
            "earnings": {"earningsDate": [{"raw": ts(d(2026, 5, 1))}]}
        }}]}}));
        assert!(parse_earnings("AAPL", Market::Nasdaq, resp, window()).unwrap().is_empty());
    }

    #[test]
    fn dividends_use_ex_date_with_pay_date() {
        let resp = response(serde_json::json!({"quoteSummary": {"result": [{"calendarEvents": {
            "exDividendDate": {"raw": ts(d(2026, 2, 9))},
            "dividendDate": {"raw": ts(d(2026, 2, 12))}
        }}]}}));
        let events = parse_dividends("HSBA", Market::Ftse, resp, window()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), EventType::Dividend);
        assert_eq!(events[0].market(), Market::Ftse);
        assert_eq!(events[0].metadata()["pay_date"], MetadataValue::from("2026-02-12"));
    }

    #[test]
    fn error_envelope_is_format_change() {
        let resp = response(serde_json::json!({"quoteSummary": {"result": null,
            "error": {"code": "Not Found", "description": "No fundamentals data found"}}}));
        let err = parse_earnings("ZZZZ", Market::Nasdaq, resp, window()).unwrap_err();
        assert!(matches!(err, SourceError::ResponseFormatChanged(_)));
    }

    #[test]
    fn empty_watchlist_is_unhealthy() {
        let source = YahooCalendarSource::new(BTreeMap::new()).unwrap();
        assert!(!source.health_check());
        assert!(source.fetch_economic_calendar(30).unwrap().is_empty());
    }
}
