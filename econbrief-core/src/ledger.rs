//! Daily token ledger — carries token usage across pipeline invocations.
//!
//! The guard's budget is named "daily" but a guard only lives for one run.
//! The ledger persists per-day totals so a second run on the same day starts
//! from what the first one spent.
//!
//! Layout: a single JSON object mapping `YYYY-MM-DD` to tokens used.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("ledger serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    days: BTreeMap<NaiveDate, u64>,
}

/// Per-day token totals backed by a JSON file.
#[derive(Debug)]
pub struct TokenLedger {
    path: PathBuf,
    file: LedgerFile,
}

impl TokenLedger {
    /// Open the ledger at `path`. A missing or corrupt file yields an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "corrupt token ledger, starting empty");
                LedgerFile::default()
            }),
            Err(_) => LedgerFile::default(),
        };
        Self { path, file }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tokens already spent on `date`.
    pub fn usage_on(&self, date: NaiveDate) -> u64 {
        self.file.days.get(&date).copied().unwrap_or(0)
    }

    /// Add `tokens` to the total for `date`. Totals never decrease.
    pub fn record(&mut self, date: NaiveDate, tokens: u64) {
        let entry = self.file.days.entry(date).or_insert(0);
        *entry = entry.saturating_add(tokens);
    }

    /// Drop entries older than `keep_from`.
    pub fn prune_before(&mut self, keep_from: NaiveDate) {
        self.file.days.retain(|day, _| *day >= keep_from);
    }

    /// Write the ledger atomically (`.tmp` then rename).
    pub fn save(&self) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.file)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            e
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn records_accumulate_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/token_ledger.json");

        let mut ledger = TokenLedger::open(&path);
        assert_eq!(ledger.usage_on(day("2026-02-05")), 0);
        ledger.record(day("2026-02-05"), 1_200);
        ledger.record(day("2026-02-05"), 300);
        ledger.save().unwrap();

        let reopened = TokenLedger::open(&path);
        assert_eq!(reopened.usage_on(day("2026-02-05")), 1_500);
        assert_eq!(reopened.usage_on(day("2026-02-06")), 0);
    }

    #[test]
    fn corrupt_file_yields_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token_ledger.json");
        fs::write(&path, "{not json").unwrap();
        let ledger = TokenLedger::open(&path);
        assert_eq!(ledger.usage_on(day("2026-02-05")), 0);
    }

    #[test]
    fn prune_keeps_recent_days() {
        let mut ledger = TokenLedger::open("/nonexistent/ledger.json");
        ledger.record(day("2026-01-01"), 10);
        ledger.record(day("2026-02-01"), 20);
        ledger.prune_before(day("2026-01-15"));
        assert_eq!(ledger.usage_on(day("2026-01-01")), 0);
        assert_eq!(ledger.usage_on(day("2026-02-01")), 20);
    }
}
