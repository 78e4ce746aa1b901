//! The six fixed LLM reasoning steps.
//!
//! Each step receives the previous step's parsed output (the first step gets
//! the normalized events) and its tokens go through the guard before the
//! next step starts. A halt stops the loop and is recorded in
//! [`PipelineOutput::halted_at`].

use chrono::{NaiveDate, NaiveDateTime};
use econbrief_core::guard::{Clock, Continuation, ExecutionGuard, HaltReason};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::artifact::{write_yaml, StageError};
use crate::config::ApiConfig;
use crate::llm::{parse_step_output, LlmClient};
use crate::normalize::NormalizedEvent;
use crate::prompts::PromptLibrary;

/// Step identifiers in execution order. Also the prompt file stems.
pub const STEPS: [&str; 6] = [
    "01_filter_events",
    "02_macro_regime",
    "03_policy_impact",
    "04_second_order",
    "05_scenarios",
    "06_brief",
];

/// Everything the reasoning steps produced for one run date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    /// Step id → parsed output, in execution order.
    pub steps: Mapping,
    /// Tokens spent by the steps of this run.
    #[serde(default)]
    pub tokens_used: u64,
    /// Last step that ran before the guard called a halt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<HaltReason>,
}

impl PipelineOutput {
    pub fn steps_completed(&self) -> usize {
        self.steps.len()
    }

    pub fn is_complete(&self) -> bool {
        STEPS
            .iter()
            .all(|step| self.steps.contains_key(Value::String((*step).to_string())))
    }
}

fn user_message(prompt: &str, input: &Value) -> Result<String, StageError> {
    let data = serde_yaml::to_string(input)?;
    Ok(if prompt.trim().is_empty() {
        format!("Analyze the following data:\n{data}")
    } else {
        format!("{}\n\nAnalyze the following data:\n{data}", prompt.trim())
    })
}

/// Run the steps in order, feeding each output into the next.
pub fn run_pipeline<C: Clock>(
    date: NaiveDate,
    events: &[NormalizedEvent],
    prompts: &PromptLibrary,
    client: &dyn LlmClient,
    api: &ApiConfig,
    guard: &mut ExecutionGuard<C>,
) -> Result<PipelineOutput, StageError> {
    info!(%date, events = events.len(), "starting LLM pipeline");
    let system_prompt = prompts.load_system_prompt()?;

    let mut output = PipelineOutput {
        date,
        timestamp: chrono::Local::now().naive_local(),
        steps: Mapping::new(),
        tokens_used: 0,
        halted_at: None,
        halt_reason: None,
    };

    let mut input = {
        let mut first = Mapping::new();
        first.insert(Value::String("events".into()), serde_yaml::to_value(events)?);
        Value::Mapping(first)
    };

    for step in STEPS {
        info!(step, "running step");
        let template = prompts.load_prompt(step)?;
        let message = user_message(&template.prompt, &input)?;
        let response = client.call(&system_prompt, &message, api)?;

        let parsed = Value::Mapping(parse_step_output(&response.text));
        output
            .steps
            .insert(Value::String(step.to_string()), parsed.clone());
        output.tokens_used += response.tokens_used;
        input = parsed;

        if let Continuation::Halt(reason) = guard.checkpoint(response.tokens_used) {
            warn!(step, %reason, "guard stop during LLM pipeline");
            output.halted_at = Some(step.to_string());
            output.halt_reason = Some(reason);
            break;
        }
    }

    Ok(output)
}

/// Write `archive/<date>-analysis.yaml`.
pub fn save_pipeline_output(
    archive_dir: &Path,
    output: &PipelineOutput,
) -> Result<PathBuf, StageError> {
    let path = archive_dir.join(format!("{}-analysis.yaml", output.date));
    write_yaml(&path, output)?;
    info!(path = %path.display(), "saved pipeline output");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, LlmResponse, PlaceholderClient};
    use econbrief_core::guard::{GuardLimits, ManualClock};
    use std::sync::Mutex;

    /// Echoes a mapping naming the step it was given and records each message.
    struct Recording {
        tokens: u64,
        messages: Mutex<Vec<String>>,
    }

    impl LlmClient for Recording {
        fn call(&self, _: &str, user: &str, _: &ApiConfig) -> Result<LlmResponse, LlmError> {
            let mut messages = self.messages.lock().unwrap();
            messages.push(user.to_string());
            Ok(LlmResponse {
                text: format!("step_index: {}\n", messages.len()),
                tokens_used: self.tokens,
            })
        }
    }

    fn prompts() -> (tempfile::TempDir, PromptLibrary) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("system")).unwrap();
        std::fs::write(dir.path().join("system/role.yaml"), "system_prompt: analyst\n").unwrap();
        let lib = PromptLibrary::new(dir.path());
        (dir, lib)
    }

    fn guard(budget: u64) -> ExecutionGuard<ManualClock> {
        let mut guard = ExecutionGuard::with_clock(
            GuardLimits {
                daily_token_budget: budget,
                execution_window_minutes: 30,
            },
            ManualClock::new(),
        );
        guard.start();
        guard
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 2, 5).unwrap()
    }

    #[test]
    fn runs_all_steps_and_chains_outputs() {
        let (_dir, lib) = prompts();
        let client = Recording {
            tokens: 10,
            messages: Mutex::new(Vec::new()),
        };
        let mut guard = guard(100_000);
        let output =
            run_pipeline(date(), &[], &lib, &client, &ApiConfig::default(), &mut guard).unwrap();

        assert!(output.is_complete());
        assert!(output.halted_at.is_none());
        assert_eq!(output.tokens_used, 60);
        assert_eq!(guard.tokens_used(), 60);

        let messages = client.messages.lock().unwrap();
        assert!(messages[0].contains("events: []"));
        assert!(messages[1].contains("step_index: 1"));
        let keys: Vec<&str> = output.steps.keys().filter_map(Value::as_str).collect();
        assert_eq!(keys, STEPS);
    }

    #[test]
    fn halts_when_token_budget_runs_low() {
        let (_dir, lib) = prompts();
        let client = Recording {
            tokens: 1_500,
            messages: Mutex::new(Vec::new()),
        };
        // 5000 budget: after step 3 (4500 used) fewer than 1000 remain.
        let mut guard = guard(5_000);
        let output =
            run_pipeline(date(), &[], &lib, &client, &ApiConfig::default(), &mut guard).unwrap();

        assert_eq!(output.steps_completed(), 3);
        assert_eq!(output.halted_at.as_deref(), Some("03_policy_impact"));
        assert!(matches!(output.halt_reason, Some(HaltReason::TokenBudget { .. })));
        assert!(!output.is_complete());
    }

    #[test]
    fn missing_system_prompt_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let lib = PromptLibrary::new(dir.path());
        let err = run_pipeline(
            date(),
            &[],
            &lib,
            &PlaceholderClient,
            &ApiConfig::default(),
            &mut guard(10_000),
        )
        .unwrap_err();
        assert!(matches!(err, StageError::Prompt(_)));
    }

    #[test]
    fn placeholder_steps_are_wrapped_and_saved() {
        let (_dir, lib) = prompts();
        let archive = tempfile::tempdir().unwrap();
        let mut guard = guard(100_000);
        let output = run_pipeline(
            date(),
            &[],
            &lib,
            &PlaceholderClient,
            &ApiConfig::default(),
            &mut guard,
        )
        .unwrap();
        let first = &output.steps[STEPS[0]];
        assert!(first.get("raw_response").is_some());

        let path = save_pipeline_output(archive.path(), &output).unwrap();
        assert!(path.ends_with("2026-02-05-analysis.yaml"));
    }
}
