//! Normalize stage: give every raw event a stable id and a fixed field set,
//! then drop exact duplicates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::artifact::{read_yaml, write_yaml, StageError};
use crate::fetch::{raw_events_path, EventsFile, RawEvent};

/// Fixed-shape event passed to the LLM steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_id: String,
    pub source: String,
    pub category: String,
    pub timestamp: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Content-derived id: BLAKE3 over source, timestamp, and description,
/// truncated to 16 hex characters.
pub fn derive_event_id(source: &str, timestamp: &str, description: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.as_bytes());
    hasher.update(&[0]);
    hasher.update(timestamp.as_bytes());
    hasher.update(&[0]);
    hasher.update(description.as_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

fn clean(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

/// Load `events/<date>.yaml`. A missing file is logged and yields no events.
pub fn load_raw_events(events_dir: &Path, date: NaiveDate) -> Result<Vec<RawEvent>, StageError> {
    let path = raw_events_path(events_dir, date);
    match read_yaml::<EventsFile<RawEvent>>(&path)? {
        Some(file) => Ok(file.events),
        None => {
            error!(path = %path.display(), "raw events file not found");
            Ok(Vec::new())
        }
    }
}

/// Standardize fields and drop events whose `event_id` was already seen.
///
/// Missing fields default to `source = "unknown"`, `category = "other"`,
/// `timestamp = now`, `description = ""`. The id is derived from the raw
/// fields, so two events that only lack a timestamp still collapse.
pub fn normalize_events(raw: &[RawEvent]) -> Vec<NormalizedEvent> {
    info!(count = raw.len(), "normalizing raw events");
    let mut seen = HashSet::new();
    let mut normalized = Vec::with_capacity(raw.len());

    for event in raw {
        let source = clean(&event.source).unwrap_or("unknown");
        let description = event.description.as_deref().map(str::trim).unwrap_or("");
        let raw_timestamp = clean(&event.timestamp);

        let event_id = match clean(&event.id) {
            Some(id) => id.to_string(),
            None => derive_event_id(source, raw_timestamp.unwrap_or(""), description),
        };
        if !seen.insert(event_id.clone()) {
            continue;
        }

        normalized.push(NormalizedEvent {
            event_id,
            source: source.to_string(),
            category: clean(&event.category).unwrap_or("other").to_lowercase(),
            timestamp: raw_timestamp.map(str::to_string).unwrap_or_else(|| {
                chrono::Local::now()
                    .naive_local()
                    .format("%Y-%m-%dT%H:%M:%S")
                    .to_string()
            }),
            description: description.to_string(),
            tags: normalize_tags(&event.tags),
        });
    }

    let dropped = raw.len() - normalized.len();
    if dropped > 0 {
        info!(dropped, "dropped duplicate events");
    }
    normalized
}

/// Write `events/<date>-normalized.yaml`.
pub fn save_normalized_events(
    events_dir: &Path,
    date: NaiveDate,
    events: &[NormalizedEvent],
) -> Result<PathBuf, StageError> {
    let path = events_dir.join(format!("{date}-normalized.yaml"));
    write_yaml(&path, &EventsFile::new(date, events.to_vec()))?;
    info!(count = events.len(), path = %path.display(), "saved normalized events");
    Ok(path)
}
