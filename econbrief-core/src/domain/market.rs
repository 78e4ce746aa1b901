//! Supported markets and calendar event categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A supported exchange. Calendars are partitioned by market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Ftse,
    Nasdaq,
}

impl Market {
    /// Every supported market, in declaration order.
    pub const ALL: [Market; 2] = [Market::Ftse, Market::Nasdaq];

    /// Lowercase identifier used in file paths and serialized documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Market::Ftse => "ftse",
            Market::Nasdaq => "nasdaq",
        }
    }

    /// Exchange suffix that vendor feeds append to listed symbols (`HSBA.L`).
    pub fn symbol_suffix(self) -> Option<&'static str> {
        match self {
            Market::Ftse => Some(".L"),
            Market::Nasdaq => None,
        }
    }

    /// Map a vendor symbol onto this market's bare ticker.
    ///
    /// Returns `None` if the symbol belongs to a different venue. Symbols with
    /// any other dotted suffix are treated as foreign listings.
    pub fn local_ticker(self, vendor_symbol: &str) -> Option<String> {
        let symbol = vendor_symbol.trim();
        if symbol.is_empty() {
            return None;
        }
        match self.symbol_suffix() {
            Some(suffix) => symbol
                .strip_suffix(suffix)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            None => (!symbol.contains('.')).then(|| symbol.to_string()),
        }
    }

    /// Vendor symbol for a bare ticker on this market.
    pub fn vendor_symbol(self, ticker: &str) -> String {
        match self.symbol_suffix() {
            Some(suffix) => format!("{ticker}{suffix}"),
            None => ticker.to_string(),
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseDomainError {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Market {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ftse" => Ok(Market::Ftse),
            "nasdaq" => Ok(Market::Nasdaq),
            _ => Err(ParseDomainError {
                kind: "market",
                value: s.to_string(),
            }),
        }
    }
}

/// Category of a calendar occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "earnings")]
    Earnings,
    #[serde(rename = "dividend")]
    Dividend,
    #[serde(rename = "stock_split")]
    Split,
    #[serde(rename = "ipo")]
    Ipo,
    #[serde(rename = "conference")]
    Conference,
    #[serde(rename = "economic_indicator")]
    Economic,
    #[serde(rename = "merger_acquisition")]
    Merger,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::Earnings,
        EventType::Dividend,
        EventType::Split,
        EventType::Ipo,
        EventType::Conference,
        EventType::Economic,
        EventType::Merger,
    ];

    /// Serialized name, as written to calendar files.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Earnings => "earnings",
            EventType::Dividend => "dividend",
            EventType::Split => "stock_split",
            EventType::Ipo => "ipo",
            EventType::Conference => "conference",
            EventType::Economic => "economic_indicator",
            EventType::Merger => "merger_acquisition",
        }
    }

    /// Short alias accepted on the command line.
    pub fn short_name(self) -> &'static str {
        match self {
            EventType::Split => "split",
            EventType::Economic => "economic",
            EventType::Merger => "merger",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseDomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle || t.short_name() == needle)
            .ok_or_else(|| ParseDomainError {
                kind: "event type",
                value: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_parses_case_insensitively() {
        assert_eq!("FTSE".parse::<Market>().unwrap(), Market::Ftse);
        assert_eq!(" nasdaq ".parse::<Market>().unwrap(), Market::Nasdaq);
        assert!("nyse".parse::<Market>().is_err());
    }

    #[test]
    fn market_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Market::Ftse).unwrap(), "\"ftse\"");
    }

    #[test]
    fn local_ticker_respects_suffix() {
        assert_eq!(Market::Ftse.local_ticker("HSBA.L").as_deref(), Some("HSBA"));
        assert_eq!(Market::Ftse.local_ticker("AAPL"), None);
        assert_eq!(Market::Nasdaq.local_ticker("AAPL").as_deref(), Some("AAPL"));
        assert_eq!(Market::Nasdaq.local_ticker("HSBA.L"), None);
        assert_eq!(Market::Ftse.local_ticker(".L"), None);
    }

    #[test]
    fn vendor_symbol_appends_suffix() {
        assert_eq!(Market::Ftse.vendor_symbol("LLOY"), "LLOY.L");
        assert_eq!(Market::Nasdaq.vendor_symbol("MSFT"), "MSFT");
    }

    #[test]
    fn event_type_accepts_long_and_short_names() {
        assert_eq!("split".parse::<EventType>().unwrap(), EventType::Split);
        assert_eq!("stock_split".parse::<EventType>().unwrap(), EventType::Split);
        assert_eq!("economic".parse::<EventType>().unwrap(), EventType::Economic);
        assert_eq!(
            "merger_acquisition".parse::<EventType>().unwrap(),
            EventType::Merger
        );
        let err = "rumour".parse::<EventType>().unwrap_err();
        assert_eq!(err.kind, "event type");
    }

    #[test]
    fn event_type_serialized_names_are_stable() {
        for t in EventType::ALL {
            let json = serde_json::to_string(&t).unwrap();
            assert_eq!(json, format!("\"{}\"", t.as_str()));
        }
    }
}
