//! Validate stage: structural checks plus forbidden-content keyword scan.
//!
//! Validation never fails; problems are reported in [`ValidationReport`] and
//! the driver decides what to do with them.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact::{write_yaml, StageError};
use crate::prompts::ConstraintFile;
use crate::steps::STEPS;

const PRICE_PREDICTION: [&str; 5] = ["target price", "will go up", "will go down", "bull run", "crash"];
const TRADING_ADVICE: [&str; 5] = ["buy", "sell", "go long", "go short", "increase exposure"];

/// Keyword lists checked against the lowercased output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintKeywords {
    pub price_prediction: Vec<String>,
    pub trading_advice: Vec<String>,
}

impl Default for ConstraintKeywords {
    fn default() -> Self {
        Self {
            price_prediction: PRICE_PREDICTION.iter().map(|s| s.to_string()).collect(),
            trading_advice: TRADING_ADVICE.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ConstraintKeywords {
    /// Built-in lists extended with the entries from `constraints.yaml`.
    pub fn with_extra(extra: &ConstraintFile) -> Self {
        let mut keywords = Self::default();
        extend_unique(&mut keywords.price_prediction, &extra.price_prediction);
        extend_unique(&mut keywords.trading_advice, &extra.trading_advice);
        keywords
    }
}

fn extend_unique(list: &mut Vec<String>, extra: &[String]) {
    for keyword in extra {
        let keyword = keyword.trim().to_lowercase();
        if !keyword.is_empty() && !list.contains(&keyword) {
            list.push(keyword);
        }
    }
}

/// Outcome of validating one pipeline output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub timestamp: NaiveDateTime,
    pub schema_valid: bool,
    pub schema_errors: Vec<String>,
    pub constraints_met: bool,
    pub constraint_violations: Vec<String>,
    pub overall_valid: bool,
}

/// Require `date`, `steps`, and every step id under `steps`.
pub fn validate_schema(output: &Value) -> (bool, Vec<String>) {
    info!("validating output schema");
    let mut errors = Vec::new();

    if output.get("date").is_none() {
        errors.push("Missing 'date' field".to_string());
    }
    let steps = output.get("steps");
    if steps.is_none() {
        errors.push("Missing 'steps' field".to_string());
    }
    for step in STEPS {
        if steps.and_then(|s| s.get(step)).is_none() {
            errors.push(format!("Missing step: {step}"));
        }
    }

    (errors.is_empty(), errors)
}

/// Case-insensitive substring scan of the whole serialized output.
pub fn check_constraints(output: &Value, keywords: &ConstraintKeywords) -> (bool, Vec<String>) {
    info!("checking constraints");
    let text = serde_yaml::to_string(output)
        .unwrap_or_default()
        .to_lowercase();

    let mut violations = Vec::new();
    for keyword in &keywords.price_prediction {
        if text.contains(keyword.as_str()) {
            violations.push(format!("Price prediction keyword detected: '{keyword}'"));
        }
    }
    for keyword in &keywords.trading_advice {
        if text.contains(keyword.as_str()) {
            violations.push(format!("Trading advice keyword detected: '{keyword}'"));
        }
    }

    (violations.is_empty(), violations)
}

pub fn validate_output(output: &Value, keywords: &ConstraintKeywords) -> ValidationReport {
    let (schema_valid, schema_errors) = validate_schema(output);
    let (constraints_met, constraint_violations) = check_constraints(output, keywords);
    let report = ValidationReport {
        timestamp: chrono::Local::now().naive_local(),
        schema_valid,
        schema_errors,
        constraints_met,
        constraint_violations,
        overall_valid: schema_valid && constraints_met,
    };

    if report.overall_valid {
        info!("validation passed");
    } else {
        warn!(
            schema_errors = ?report.schema_errors,
            violations = ?report.constraint_violations,
            "validation failed"
        );
    }
    report
}

/// Write `archive/<date>-validation.yaml`.
pub fn save_validation_report(
    archive_dir: &Path,
    date: NaiveDate,
    report: &ValidationReport,
) -> Result<PathBuf, StageError> {
    let path = archive_dir.join(format!("{date}-validation.yaml"));
    write_yaml(&path, report)?;
    info!(path = %path.display(), "saved validation report");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_output(brief: &str) -> Value {
        let mut yaml = String::from("date: 2026-02-05\nsteps:\n");
        for step in STEPS {
            yaml.push_str(&format!("  {step}:\n    note: ok\n"));
        }
        yaml.push_str(&format!("  06_brief_text: \"{brief}\"\n"));
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn complete_output_passes_schema() {
        let (ok, errors) = validate_schema(&complete_output("calm"));
        assert!(ok, "{errors:?}");
    }

    #[test]
    fn missing_fields_are_listed() {
        let (ok, errors) = validate_schema(&serde_yaml::from_str("foo: 1").unwrap());
        assert!(!ok);
        assert_eq!(errors.len(), 2 + STEPS.len());
        assert_eq!(errors[0], "Missing 'date' field");
        assert_eq!(errors[2], "Missing step: 01_filter_events");
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let keywords = ConstraintKeywords::default();
        let (ok, violations) = check_constraints(&complete_output("Investors should BUY now"), &keywords);
        assert!(!ok);
        assert_eq!(violations, vec!["Trading advice keyword detected: 'buy'"]);

        let (ok, _) = check_constraints(&complete_output("Rates are on hold."), &keywords);
        assert!(ok);
    }

    #[test]
    fn extra_keywords_extend_defaults() {
        let extra = ConstraintFile {
            price_prediction: vec!["To The Moon".into(), "crash".into()],
            trading_advice: Vec::new(),
        };
        let keywords = ConstraintKeywords::with_extra(&extra);
        assert_eq!(keywords.price_prediction.len(), PRICE_PREDICTION.len() + 1);
        let (ok, violations) = check_constraints(&complete_output("to the moon"), &keywords);
        assert!(!ok);
        assert!(violations[0].contains("to the moon"));
    }

    #[test]
    fn report_combines_both_checks() {
        let report = validate_output(&complete_output("a crash is coming"), &ConstraintKeywords::default());
        assert!(report.schema_valid);
        assert!(!report.constraints_met);
        assert!(!report.overall_valid);

        let dir = tempfile::tempdir().unwrap();
        let date = NaiveDate::from_ymd_opt(2026, 2, 5).unwrap();
        let path = save_validation_report(dir.path(), date, &report).unwrap();
        assert!(path.ends_with("2026-02-05-validation.yaml"));
    }
}
