//! Calendar event record and its typed metadata bag.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use super::market::{EventType, Market};

/// Ticker used for macroeconomic events that don't belong to a listed company.
pub const MACRO_TICKER: &str = "MACRO";

/// Scalar metadata value attached to an event (eps_estimate, dividend_amount, ...).
///
/// Serialized untagged so calendar files read naturally in both encodings.
/// Variant order matters for deserialization: integers are tried before floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Number(n) => write!(f, "{n}"),
            MetadataValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Number(v)
    }
}

impl From<&str> for MetadataValue {
    fn from(v: &str) -> Self {
        MetadataValue::Text(v.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(v: String) -> Self {
        MetadataValue::Text(v)
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

impl MetadataValue {
    /// False for NaN and infinities, which JSON cannot carry.
    pub fn is_storable(&self) -> bool {
        match self {
            MetadataValue::Number(n) => n.is_finite(),
            _ => true,
        }
    }
}

/// Drop non-finite numbers, logging each one.
fn retain_storable(metadata: &mut Metadata) {
    metadata.retain(|key, value| {
        let keep = value.is_storable();
        if !keep {
            warn!(key = %key, value = %value, "dropping non-finite metadata value");
        }
        keep
    });
}

fn deserialize_metadata<'de, D>(deserializer: D) -> Result<Metadata, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let mut metadata = Metadata::deserialize(deserializer)?;
    retain_storable(&mut metadata);
    Ok(metadata)
}

/// One scheduled market or economic occurrence.
///
/// Events are immutable once built: fields are private and there is no
/// update-in-place. The `with_*` methods consume the event and are meant for
/// use while an adapter is still constructing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    ticker: String,
    market: Market,
    event_type: EventType,
    date: NaiveDate,
    description: String,
    #[serde(default = "now_local")]
    timestamp: NaiveDateTime,
    #[serde(default, deserialize_with = "deserialize_metadata")]
    metadata: Metadata,
}

fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

impl CalendarEvent {
    pub fn new(
        ticker: impl Into<String>,
        market: Market,
        event_type: EventType,
        date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self {
            ticker: ticker.into(),
            market,
            event_type,
            date,
            description: description.into(),
            timestamp: now_local(),
            metadata: Metadata::new(),
        }
    }

    /// Macro event (ticker [`MACRO_TICKER`]) of type [`EventType::Economic`].
    pub fn economic(market: Market, date: NaiveDate, description: impl Into<String>) -> Self {
        Self::new(MACRO_TICKER, market, EventType::Economic, date, description)
    }

    /// Attach one metadata entry. Non-finite numbers are dropped with a warning.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        let (key, value) = (key.into(), value.into());
        if value.is_storable() {
            self.metadata.insert(key, value);
        } else {
            warn!(ticker = %self.ticker, key = %key, value = %value, "dropping non-finite metadata value");
        }
        self
    }

    pub fn with_metadata_map(mut self, mut metadata: Metadata) -> Self {
        retain_storable(&mut metadata);
        self.metadata.extend(metadata);
        self
    }

    /// Copy of this event attributed to another market. Used for macro events,
    /// which are fetched once and stored in every market's calendar.
    pub fn rehomed(mut self, market: Market) -> Self {
        self.market = market;
        self
    }

    pub fn ticker(&self) -> &str {
        &self.ticker
    }

    pub fn market(&self) -> Market {
        self.market
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Dedup key within one market: `(ticker, date, event_type)`.
    pub fn dedup_key(&self) -> (&str, NaiveDate, EventType) {
        (&self.ticker, self.date, self.event_type)
    }

    /// True if both events occupy the same dedup slot.
    pub fn same_slot(&self, other: &CalendarEvent) -> bool {
        self.dedup_key() == other.dedup_key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn metadata_untagged_roundtrip_keeps_kinds() {
        let ev = CalendarEvent::new("AAPL", Market::Nasdaq, EventType::Earnings, date("2026-02-05"), "Q1")
            .with_metadata("eps_estimate", 2.15)
            .with_metadata("quarter", 1_i64)
            .with_metadata("confirmed", true)
            .with_metadata("hour", "amc");

        let json = serde_json::to_string(&ev).unwrap();
        let back: CalendarEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ev);
        assert_eq!(back.metadata()["quarter"], MetadataValue::Integer(1));
        assert_eq!(back.metadata()["eps_estimate"], MetadataValue::Number(2.15));
    }

    #[test]
    fn non_finite_numbers_are_never_stored() {
        let ev = CalendarEvent::new("AAPL", Market::Nasdaq, EventType::Earnings, date("2026-02-05"), "Q1")
            .with_metadata("eps_estimate", f64::NAN)
            .with_metadata("revenue_estimate", f64::INFINITY)
            .with_metadata("quarter", 1_i64);
        assert_eq!(ev.metadata().len(), 1);

        let mut map = Metadata::new();
        map.insert("amount".into(), MetadataValue::Number(f64::NAN));
        map.insert("currency".into(), MetadataValue::from("USD"));
        let ev = ev.with_metadata_map(map);
        assert!(!ev.metadata().contains_key("amount"));
        assert!(ev.metadata().contains_key("currency"));
    }

    #[test]
    fn yaml_nan_is_dropped_on_load() {
        let yaml = "ticker: MSFT\nmarket: nasdaq\nevent_type: dividend\ndate: 2026-04-20\n\
                    description: Div\nmetadata: {amount: .nan, pay_date: 2026-05-01}\n";
        let ev: CalendarEvent = serde_yaml::from_str(yaml).unwrap();
        assert!(!ev.metadata().contains_key("amount"));
        assert!(ev.metadata().contains_key("pay_date"));
    }

    #[test]
    fn date_serializes_as_iso() {
        let ev = CalendarEvent::new("HSBA", Market::Ftse, EventType::Dividend, date("2026-03-09"), "Div");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["date"], "2026-03-09");
        assert_eq!(json["event_type"], "dividend");
        assert_eq!(json["market"], "ftse");
    }

    #[test]
    fn missing_timestamp_and_metadata_default() {
        let yaml = "ticker: MSFT\nmarket: nasdaq\nevent_type: earnings\ndate: 2026-04-20\ndescription: Q3\n";
        let ev: CalendarEvent = serde_yaml::from_str(yaml).unwrap();
        assert!(ev.metadata().is_empty());
        assert_eq!(ev.date(), date("2026-04-20"));
    }

    #[test]
    fn dedup_key_ignores_description() {
        let a = CalendarEvent::new("AAPL", Market::Nasdaq, EventType::Earnings, date("2026-02-05"), "a");
        let b = CalendarEvent::new("AAPL", Market::Nasdaq, EventType::Earnings, date("2026-02-05"), "b");
        let c = CalendarEvent::new("AAPL", Market::Nasdaq, EventType::Dividend, date("2026-02-05"), "a");
        assert!(a.same_slot(&b));
        assert!(!a.same_slot(&c));
    }

    #[test]
    fn economic_constructor_uses_macro_ticker() {
        let ev = CalendarEvent::economic(Market::Nasdaq, date("2026-02-11"), "CPI").rehomed(Market::Ftse);
        assert_eq!(ev.ticker(), MACRO_TICKER);
        assert_eq!(ev.event_type(), EventType::Economic);
        assert_eq!(ev.market(), Market::Ftse);
    }
}
