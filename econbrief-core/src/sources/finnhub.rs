//! Finnhub calendar source.
//!
//! Earnings and economic releases come from the range endpoints
//! (`/calendar/earnings`, `/calendar/economic`); dividends are per symbol
//! (`/stock/dividend`), so they are only fetched for watchlist tickers.
//!
//! Malformed records are skipped with a warning rather than failing the batch.

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;
use super::http::HttpJson;
use super::{fetch_window, DataSource, SourceError};
use crate::domain::{CalendarEvent, EventType, Market, MetadataValue, MACRO_TICKER};

const BASE_URL: &str = "https://finnhub.io/api/v1";

#[derive(Debug, Deserialize)]
struct EarningsEnvelope {
    #[serde(rename = "earningsCalendar", default)]
    earnings_calendar: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct EarningsRow {
    symbol: String,
    date: NaiveDate,
    #[serde(default)]
    hour: Option<String>,
    #[serde(default)]
    quarter: Option<i64>,
    #[serde(default)]
    year: Option<i64>,
    #[serde(rename = "epsEstimate", default)]
    eps_estimate: Option<f64>,
    #[serde(rename = "revenueEstimate", default)]
    revenue_estimate: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DividendRow {
    #[serde(default)]
    symbol: Option<String>,
    /// Ex-dividend date.
    date: NaiveDate,
    #[serde(default)]
    amount: Option<f64>,
    #[serde(rename = "payDate", default)]
    pay_date: Option<String>,
    #[serde(default)]
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EconomicEnvelope {
    #[serde(rename = "economicCalendar", default)]
    economic_calendar: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct EconomicRow {
    event: String,
    /// `"YYYY-MM-DD HH:MM:SS"`.
    time: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    impact: Option<String>,
    #[serde(default)]
    estimate: Option<f64>,
    #[serde(default)]
    prev: Option<f64>,
    #[serde(default)]
    unit: Option<String>,
}

fn decode_rows<T: for<'de> Deserialize<'de>>(rows: Vec<Value>, what: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value::<T>(row) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(source = "finnhub", what, error = %e, "skipping malformed record");
                None
            }
        })
        .collect()
}

fn in_window(date: NaiveDate, window: (NaiveDate, NaiveDate)) -> bool {
    window.0 <= date && date <= window.1
}

/// Convert an earnings calendar response into events for `market`.
///
/// Symbols that don't belong to `market` are dropped. A non-empty
/// `watchlist` further restricts the result to those tickers.
pub fn parse_earnings(
    body: Value,
    market: Market,
    watchlist: &[String],
    window: (NaiveDate, NaiveDate),
) -> Result<Vec<CalendarEvent>, SourceError> {
    let envelope: EarningsEnvelope = serde_json::from_value(body)
        .map_err(|e| SourceError::ResponseFormatChanged(format!("earnings calendar: {e}")))?;

    let events = decode_rows::<EarningsRow>(envelope.earnings_calendar, "earnings")
        .into_iter()
        .filter(|row| in_window(row.date, window))
        .filter_map(|row| {
            let ticker = market.local_ticker(&row.symbol)?;
            if !watchlist.is_empty() && !watchlist.contains(&ticker) {
                return None;
            }
            let description = match (row.quarter, row.year) {
                (Some(q), Some(y)) => format!("{ticker} Q{q} {y} Earnings"),
                _ => format!("{ticker} Earnings"),
            };
            let mut metadata = BTreeMap::new();
            if let Some(hour) = row.hour.filter(|h| !h.is_empty()) {
                metadata.insert("hour".to_string(), MetadataValue::from(hour));
            }
            if let Some(eps) = row.eps_estimate {
                metadata.insert("eps_estimate".to_string(), MetadataValue::from(eps));
            }
            if let Some(rev) = row.revenue_estimate {
                metadata.insert("revenue_estimate".to_string(), MetadataValue::from(rev));
            }
            metadata.insert("source".to_string(), MetadataValue::from("finnhub"));
            Some(
                CalendarEvent::new(ticker, market, EventType::Earnings, row.date, description)
                    .with_metadata_map(metadata),
            )
        })
        .collect();
    Ok(events)
}

/// Convert a `/stock/dividend` response for one `ticker` into events.
pub fn parse_dividends(
    body: Value,
    market: Market,
    ticker: &str,
    window: (NaiveDate, NaiveDate),
) -> Result<Vec<CalendarEvent>, SourceError> {
    let rows = match body {
        Value::Array(rows) => rows,
        other => {
            return Err(SourceError::ResponseFormatChanged(format!(
                "dividends for {ticker}: expected array, got {}",
                json_kind(&other)
            )))
        }
    };

    let events = decode_rows::<DividendRow>(rows, "dividend")
        .into_iter()
        .filter(|row| in_window(row.date, window))
        .map(|row| {
            let description = match (row.amount, row.currency.as_deref()) {
                (Some(amount), Some(currency)) => {
                    format!("{ticker} Dividend {amount} {currency}")
                }
                (Some(amount), None) => format!("{ticker} Dividend {amount}"),
                _ => format!("{ticker} Dividend"),
            };
            let mut event =
                CalendarEvent::new(ticker, market, EventType::Dividend, row.date, description)
                    .with_metadata("source", "finnhub");
            if let Some(amount) = row.amount {
                event = event.with_metadata("amount", amount);
            }
            if let Some(pay_date) = row.pay_date.filter(|d| !d.is_empty()) {
                event = event.with_metadata("pay_date", pay_date);
            }
            if let Some(symbol) = row.symbol {
                event = event.with_metadata("vendor_symbol", symbol);
            }
            event
        })
        .collect();
    Ok(events)
}

/// Convert an economic calendar response into `MACRO` events.
///
/// Events carry `placeholder` as their market until the fetcher re-homes them.
pub fn parse_economic(
    body: Value,
    placeholder: Market,
    window: (NaiveDate, NaiveDate),
) -> Result<Vec<CalendarEvent>, SourceError> {
    let envelope: EconomicEnvelope = serde_json::from_value(body)
        .map_err(|e| SourceError::ResponseFormatChanged(format!("economic calendar: {e}")))?;

    let events = decode_rows::<EconomicRow>(envelope.economic_calendar, "economic")
        .into_iter()
        .filter_map(|row| {
            let date = match row.time.get(..10).map(|d| d.parse::<NaiveDate>()) {
                Some(Ok(date)) => date,
                _ => {
                    warn!(source = "finnhub", time = %row.time, "skipping economic record with bad time");
                    return None;
                }
            };
            if !in_window(date, window) {
                return None;
            }
            let description = match &row.country {
                Some(country) if !country.is_empty() => format!("{country} {}", row.event),
                _ => row.event.clone(),
            };
            let mut event = CalendarEvent::economic(placeholder, date, description)
                .with_metadata("source", "finnhub")
                .with_metadata("indicator", row.event);
            if let Some(country) = row.country {
                event = event.with_metadata("country", country);
            }
            if let Some(impact) = row.impact {
                event = event.with_metadata("impact", impact);
            }
            if let Some(estimate) = row.estimate {
                event = event.with_metadata("estimate", estimate);
            }
            if let Some(prev) = row.prev {
                event = event.with_metadata("previous", prev);
            }
            if let Some(unit) = row.unit {
                event = event.with_metadata("unit", unit);
            }
            Some(event)
        })
        .collect();
    Ok(events)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Finnhub-backed [`DataSource`]. Requires an API key.
pub struct FinnhubSource {
    http: HttpJson,
    api_key: String,
    watchlist: BTreeMap<Market, Vec<String>>,
}

impl FinnhubSource {
    pub fn new(
        api_key: impl Into<String>,
        watchlist: BTreeMap<Market, Vec<String>>,
    ) -> Result<Self, SourceError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(SourceError::NotConfigured("Finnhub API key is empty".into()));
        }
        let breaker = Arc::new(CircuitBreaker::default_provider("finnhub"));
        Ok(Self {
            http: HttpJson::new(breaker)?,
            api_key,
            watchlist,
        })
    }

    fn watchlist_for(&self, market: Market) -> &[String] {
        self.watchlist.get(&market).map(Vec::as_slice).unwrap_or(&[])
    }

    fn range_query(&self, window: (NaiveDate, NaiveDate)) -> Vec<(&'static str, String)> {
        vec![
            ("from", window.0.to_string()),
            ("to", window.1.to_string()),
            ("token", self.api_key.clone()),
        ]
    }
}

impl DataSource for FinnhubSource {
    fn name(&self) -> &str {
        "Finnhub"
    }

    fn fetch_earnings_calendar(
        &self,
        market: Market,
        days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        let window = fetch_window(Local::now().date_naive(), days_ahead);
        let body: Value = self.http.get_json(
            &format!("{BASE_URL}/calendar/earnings"),
            &self.range_query(window),
            "finnhub earnings",
        )?;
        let events = parse_earnings(body, market, self.watchlist_for(market), window)?;
        debug!(%market, count = events.len(), "finnhub earnings fetched");
        Ok(events)
    }

    fn fetch_dividend_calendar(
        &self,
        market: Market,
        days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        let window = fetch_window(Local::now().date_naive(), days_ahead);
        let mut events = Vec::new();
        for ticker in self.watchlist_for(market) {
            let mut query = self.range_query(window);
            query.push(("symbol", market.vendor_symbol(ticker)));
            let body: Value = self.http.get_json(
                &format!("{BASE_URL}/stock/dividend"),
                &query,
                "finnhub dividends",
            )?;
            events.extend(parse_dividends(body, market, ticker, window)?);
        }
        debug!(%market, count = events.len(), "finnhub dividends fetched");
        Ok(events)
    }

    fn fetch_economic_calendar(&self, days_ahead: u32) -> Result<Vec<CalendarEvent>, SourceError> {
        let window = fetch_window(Local::now().date_naive(), days_ahead);
        let body: Value = self.http.get_json(
            &format!("{BASE_URL}/calendar/economic"),
            &self.range_query(window),
            "finnhub economic",
        )?;
        parse_economic(body, Market::Nasdaq, window)
    }

    fn health_check(&self) -> bool {
        self.http.breaker().is_allowed()
    }
}
