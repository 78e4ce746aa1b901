//! Curated YAML file source, always available as the last fallback.
//!
//! File layout:
//!
//! ```yaml
//! nasdaq:
//!   earnings:
//!     - {ticker: AAPL, date: 2026-02-05, description: "Apple Q1 FY26 Earnings"}
//!   dividends:
//!     - {ticker: AAPL, date: 2026-02-09, metadata: {amount: 0.25}}
//! ftse:
//!   earnings: []
//! economic:
//!   - {date: 2026-02-11, description: "US CPI"}
//! ```
//!
//! Entries are returned regardless of `days_ahead`; the file is curated by
//! hand and its contents are taken as-is. The source is always registered
//! with the fetcher but only reports healthy when the file holds data.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{DataSource, SourceError};
use crate::domain::{CalendarEvent, EventType, Market, Metadata};

#[derive(Debug, Deserialize)]
struct ManualEntry {
    #[serde(default)]
    ticker: Option<String>,
    date: NaiveDate,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    metadata: Metadata,
}

/// Reads events from a hand-maintained YAML file.
#[derive(Debug)]
pub struct ManualSource {
    path: PathBuf,
    data: Value,
}

impl ManualSource {
    /// Load `path`. A missing or unparsable file yields an empty source.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_yaml::from_str::<Value>(&text) {
                Ok(data) => data,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "manual calendar file is not valid YAML");
                    Value::Null
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "manual calendar file not found");
                Value::Null
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read manual calendar file");
                Value::Null
            }
        };
        Self { path, data }
    }

    /// Build from already-parsed YAML text, without touching disk.
    pub fn from_yaml_str(text: &str) -> Result<Self, SourceError> {
        let data = serde_yaml::from_str(text)
            .map_err(|e| SourceError::ResponseFormatChanged(format!("manual calendar: {e}")))?;
        Ok(Self {
            path: PathBuf::new(),
            data,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entries(&self, keys: &[&str]) -> Vec<ManualEntry> {
        let mut node = &self.data;
        for key in keys {
            match node.get(*key) {
                Some(next) => node = next,
                None => return Vec::new(),
            }
        }
        let Some(items) = node.as_sequence() else {
            if !node.is_null() {
                warn!(section = %keys.join("."), "manual calendar section is not a list");
            }
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| match serde_yaml::from_value::<ManualEntry>(item.clone()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(section = %keys.join("."), error = %e, "skipping malformed manual entry");
                    None
                }
            })
            .collect()
    }

    fn company_events(&self, market: Market, section: &str, event_type: EventType, label: &str) -> Vec<CalendarEvent> {
        self.entries(&[market.as_str(), section])
            .into_iter()
            .filter_map(|entry| {
                let Some(ticker) = entry.ticker.filter(|t| !t.trim().is_empty()) else {
                    warn!(%market, section, date = %entry.date, "skipping manual entry without ticker");
                    return None;
                };
                let description = entry
                    .description
                    .unwrap_or_else(|| format!("{ticker} {label}"));
                Some(
                    CalendarEvent::new(ticker, market, event_type, entry.date, description)
                        .with_metadata_map(entry.metadata),
                )
            })
            .collect()
    }
}

impl DataSource for ManualSource {
    fn name(&self) -> &str {
        "Manual YAML"
    }

    fn fetch_earnings_calendar(
        &self,
        market: Market,
        _days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        Ok(self.company_events(market, "earnings", EventType::Earnings, "Earnings"))
    }

    fn fetch_dividend_calendar(
        &self,
        market: Market,
        _days_ahead: u32,
    ) -> Result<Vec<CalendarEvent>, SourceError> {
        Ok(self.company_events(market, "dividends", EventType::Dividend, "Dividend"))
    }

    fn fetch_economic_calendar(&self, _days_ahead: u32) -> Result<Vec<CalendarEvent>, SourceError> {
        Ok(self
            .entries(&["economic"])
            .into_iter()
            .map(|entry| {
                let description = entry
                    .description
                    .unwrap_or_else(|| "Economic Indicator".to_string());
                CalendarEvent::economic(Market::Nasdaq, entry.date, description)
                    .with_metadata_map(entry.metadata)
            })
            .collect())
    }

    /// Healthy once the file has been read and holds a non-empty mapping.
    fn health_check(&self) -> bool {
        self.data.as_mapping().is_some_and(|m| !m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MetadataValue, MACRO_TICKER};

    const SAMPLE: &str = r#"
nasdaq:
  earnings:
    - {ticker: AAPL, date: 2026-02-05, description: "Apple Q1 FY26 Earnings"}
    - {ticker: MSFT, date: "not a date"}
    - {date: 2026-02-06}
  dividends:
    - {ticker: AAPL, date: 2026-02-09, metadata: {amount: 0.25}}
ftse:
  earnings:
    - {ticker: HSBA, date: 2026-02-10}
economic:
  - {date: 2026-02-11, description: "US CPI", metadata: {impact: high}}
  - {date: 2026-02-12}
"#;

    #[test]
    fn reads_company_sections_and_skips_bad_entries() {
        let source = ManualSource::from_yaml_str(SAMPLE).unwrap();
        let earnings = source.fetch_earnings_calendar(Market::Nasdaq, 30).unwrap();
        assert_eq!(earnings.len(), 1);
        assert_eq!(earnings[0].description(), "Apple Q1 FY26 Earnings");

        let ftse = source.fetch_earnings_calendar(Market::Ftse, 30).unwrap();
        assert_eq!(ftse[0].description(), "HSBA Earnings");
        assert!(source.fetch_dividend_calendar(Market::Ftse, 30).unwrap().is_empty());

        let dividends = source.fetch_dividend_calendar(Market::Nasdaq, 30).unwrap();
        assert_eq!(dividends[0].metadata()["amount"], MetadataValue::Number(0.25));
    }

    #[test]
    fn economic_entries_are_macro_events() {
        let source = ManualSource::from_yaml_str(SAMPLE).unwrap();
        let economic = source.fetch_economic_calendar(30).unwrap();
        assert_eq!(economic.len(), 2);
        assert!(economic.iter().all(|e| e.ticker() == MACRO_TICKER));
        assert_eq!(economic[1].description(), "Economic Indicator");
        assert!(source.health_check());
    }

    #[test]
    fn missing_file_is_empty_and_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let source = ManualSource::open(dir.path().join("absent.yaml"));
        assert!(!source.health_check());
        assert!(source.fetch_earnings_calendar(Market::Nasdaq, 30).unwrap().is_empty());
        assert!(source.fetch_economic_calendar(30).unwrap().is_empty());
    }

    #[test]
    fn non_finite_amounts_are_dropped() {
        let source = ManualSource::from_yaml_str(
            "nasdaq:\n  dividends:\n    - {ticker: AAPL, date: 2026-02-09, metadata: {amount: .nan, currency: USD}}\n",
        )
        .unwrap();
        let dividends = source.fetch_dividend_calendar(Market::Nasdaq, 30).unwrap();
        assert_eq!(dividends.len(), 1);
        assert!(!dividends[0].metadata().contains_key("amount"));
        assert!(dividends[0].metadata().contains_key("currency"));
    }
}
