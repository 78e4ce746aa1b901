//! Durable calendar documents in YAML or JSON.
//!
//! Layout: `{data_dir}/{market}/calendar.{yaml,json}`. Each save overwrites
//! the full state for the market. Writes are atomic: write to `.tmp`, then
//! rename into place.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use crate::domain::{CalendarEvent, Market};

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("calendar I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("calendar YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("calendar JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CalendarError {
    fn io(path: &Path, source: io::Error) -> Self {
        CalendarError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk encoding of a calendar document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarFormat {
    Yaml,
    Json,
}

impl CalendarFormat {
    pub const ALL: [CalendarFormat; 2] = [CalendarFormat::Yaml, CalendarFormat::Json];

    pub fn file_name(self) -> &'static str {
        match self {
            CalendarFormat::Yaml => "calendar.yaml",
            CalendarFormat::Json => "calendar.json",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalendarFormat::Yaml => "yaml",
            CalendarFormat::Json => "json",
        }
    }
}

impl fmt::Display for CalendarFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalendarFormat {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(CalendarFormat::Yaml),
            "json" => Ok(CalendarFormat::Json),
            _ => Err(CalendarError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Full serialized state of one market calendar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarDocument {
    pub market: Market,
    #[serde(default)]
    pub last_updated: Option<NaiveDateTime>,
    #[serde(default)]
    pub event_count: usize,
    #[serde(default)]
    pub tickers: Vec<String>,
    #[serde(default)]
    pub events: BTreeMap<String, Vec<CalendarEvent>>,
}

impl CalendarDocument {
    pub fn encode(&self, format: CalendarFormat) -> Result<String, CalendarError> {
        Ok(match format {
            CalendarFormat::Yaml => serde_yaml::to_string(self)?,
            CalendarFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    pub fn decode(text: &str, format: CalendarFormat) -> Result<Self, CalendarError> {
        Ok(match format {
            CalendarFormat::Yaml => serde_yaml::from_str(text)?,
            CalendarFormat::Json => serde_json::from_str(text)?,
        })
    }

    pub fn read(path: &Path, format: CalendarFormat) -> Result<Self, CalendarError> {
        let text = fs::read_to_string(path).map_err(|e| CalendarError::io(path, e))?;
        Self::decode(&text, format)
    }

    /// Write atomically, creating parent directories as needed.
    pub fn write(&self, path: &Path, format: CalendarFormat) -> Result<(), CalendarError> {
        let text = self.encode(format)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CalendarError::io(parent, e))?;
        }
        let tmp = path.with_extension(format!("{}.tmp", format.as_str()));
        fs::write(&tmp, text).map_err(|e| CalendarError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            CalendarError::io(path, e)
        })
    }
}

/// Pick the calendar file to load from `dir`: the most recently modified of
/// the existing encodings, YAML on a tie.
pub fn locate_calendar_file(dir: &Path) -> Option<(PathBuf, CalendarFormat)> {
    CalendarFormat::ALL
        .into_iter()
        .filter_map(|format| {
            let path = dir.join(format.file_name());
            let modified = fs::metadata(&path).ok()?.modified().ok()?;
            Some((modified, path, format))
        })
        // max_by_key keeps the last maximum, so reverse to prefer YAML on ties
        .rev()
        .max_by_key(|(modified, _, _)| *modified)
        .map(|(_, path, format)| (path, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventType;
    use chrono::NaiveDate;

    #[test]
    fn unknown_format_is_rejected() {
        let err = "xml".parse::<CalendarFormat>().unwrap_err();
        assert!(matches!(err, CalendarError::UnsupportedFormat(ref f) if f == "xml"));
        assert_eq!("YML".parse::<CalendarFormat>().unwrap(), CalendarFormat::Yaml);
    }

    #[test]
    fn document_decodes_sparse_fields() {
        let doc = CalendarDocument::decode("market: ftse\n", CalendarFormat::Yaml).unwrap();
        assert_eq!(doc.market, Market::Ftse);
        assert!(doc.events.is_empty());
        assert!(doc.last_updated.is_none());
    }

    #[test]
    fn locate_prefers_newest_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(locate_calendar_file(dir.path()).is_none());

        let doc = CalendarDocument {
            market: Market::Nasdaq,
            last_updated: None,
            event_count: 1,
            tickers: vec!["AAPL".into()],
            events: BTreeMap::from([(
                "AAPL".to_string(),
                vec![CalendarEvent::new(
                    "AAPL",
                    Market::Nasdaq,
                    EventType::Earnings,
                    NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
                    "Q1",
                )],
            )]),
        };
        doc.write(&dir.path().join("calendar.yaml"), CalendarFormat::Yaml)
            .unwrap();
        let (_, format) = locate_calendar_file(dir.path()).unwrap();
        assert_eq!(format, CalendarFormat::Yaml);

        let json_path = dir.path().join("calendar.json");
        doc.write(&json_path, CalendarFormat::Json).unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        fs::File::options()
            .write(true)
            .open(&json_path)
            .unwrap()
            .set_modified(later)
            .unwrap();
        let (path, format) = locate_calendar_file(dir.path()).unwrap();
        assert_eq!(format, CalendarFormat::Json);
        assert!(path.ends_with("calendar.json"));
        assert!(!dir.path().join("calendar.json.tmp").exists());
    }
}
