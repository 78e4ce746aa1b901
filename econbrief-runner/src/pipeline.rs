//! Top-level driver: fetch → normalize → LLM steps → validate, with the
//! execution guard consulted after every stage.
//!
//! Outcomes:
//! - guard halts before the LLM stage → [`RunStatus::Halted`]
//! - guard halts during or right after the LLM stage → [`RunStatus::Partial`]
//!   (validation is skipped)
//! - all stages done → [`RunStatus::Success`]
//! - any stage error → [`RunStatus::Error`]; the driver never panics or
//!   returns `Err`, the report carries the message.

use chrono::{Duration, Local, NaiveDate};
use econbrief_core::calendar::MarketCalendarManager;
use econbrief_core::guard::{
    Clock, Continuation, ExecutionGuard, GuardStatus, HaltReason, ShutdownReport,
};
use econbrief_core::ledger::TokenLedger;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::artifact::StageError;
use crate::config::{LimitsConfig, PipelineConfig};
use crate::fetch::{fetch_events, save_raw_events};
use crate::llm::{client_for, LlmClient};
use crate::normalize::{load_raw_events, normalize_events, save_normalized_events};
use crate::prompts::PromptLibrary;
use crate::steps::{run_pipeline, save_pipeline_output};
use crate::validate::{save_validation_report, validate_output, ConstraintKeywords, ValidationReport};

/// Ledger entries older than this many days are pruned on save.
const LEDGER_RETENTION_DAYS: i64 = 30;

/// Everything a run needs besides the guard.
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub prompts: PromptLibrary,
    pub client: Box<dyn LlmClient>,
}

impl PipelineContext {
    /// Build the LLM client named by `config.api.provider`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, StageError> {
        let client = client_for(&config.api)?;
        Ok(Self::with_client(config, client))
    }

    pub fn with_client(config: PipelineConfig, client: Box<dyn LlmClient>) -> Self {
        let prompts = PromptLibrary::new(&config.paths.prompts_dir);
        Self {
            config,
            prompts,
            client,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Halted,
    Partial,
    Error,
}

/// Summary of one pipeline run, printed by the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub date: NaiveDate,
    /// `"execution_guard"` when the guard stopped the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt: Option<HaltReason>,
    /// Pipeline stages (fetch, normalize, LLM) fully completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps_completed: Option<u32>,
    /// LLM reasoning steps completed, when the LLM stage started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_steps_completed: Option<usize>,
    pub execution_guard: GuardStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<ShutdownReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<PathBuf>,
}

impl RunReport {
    fn new<C: Clock>(status: RunStatus, date: NaiveDate, guard: &ExecutionGuard<C>) -> Self {
        Self {
            status,
            date,
            reason: None,
            halt: None,
            steps_completed: None,
            llm_steps_completed: None,
            execution_guard: guard.get_status(),
            shutdown: None,
            validation: None,
            error: None,
            artifacts: Vec::new(),
        }
    }

    fn stopped<C: Clock>(
        status: RunStatus,
        date: NaiveDate,
        guard: &ExecutionGuard<C>,
        halt: HaltReason,
    ) -> Self {
        Self {
            reason: Some("execution_guard".into()),
            halt: Some(halt),
            shutdown: Some(guard.force_shutdown()),
            ..Self::new(status, date, guard)
        }
    }
}

/// Guard for a run starting now: limits from config, seeded with the tokens
/// already spent `today` when carry-over is enabled, and started.
pub fn setup_pipeline_guard(
    limits: &LimitsConfig,
    ledger: &TokenLedger,
    today: NaiveDate,
) -> ExecutionGuard {
    let carried = if limits.carry_over_daily_usage {
        ledger.usage_on(today)
    } else {
        0
    };
    let mut guard = ExecutionGuard::from_limits(limits.guard_limits()).with_carried_tokens(carried);
    if carried > 0 {
        info!(carried, %today, "carrying over earlier token usage");
    }
    guard.start();
    guard
}

/// Budget snapshot for `today` without starting a run.
pub fn daily_status(config: &PipelineConfig, today: NaiveDate) -> GuardStatus {
    let ledger = TokenLedger::open(config.paths.ledger_path());
    let carried = if config.limits.carry_over_daily_usage {
        ledger.usage_on(today)
    } else {
        0
    };
    ExecutionGuard::from_limits(config.limits.guard_limits())
        .with_carried_tokens(carried)
        .get_status()
}

/// Run every stage for `date` with a fresh guard, then update the token ledger.
pub fn run_full_pipeline(date: NaiveDate, ctx: &PipelineContext) -> RunReport {
    let today = Local::now().date_naive();
    let limits = ctx.config.limits;
    let mut ledger = TokenLedger::open(ctx.config.paths.ledger_path());
    let mut guard = setup_pipeline_guard(&limits, &ledger, today);

    let report = run_with_guard(date, ctx, &mut guard);

    if limits.carry_over_daily_usage {
        ledger.record(today, guard.run_tokens());
        ledger.prune_before(today - Duration::days(LEDGER_RETENTION_DAYS));
        if let Err(e) = ledger.save() {
            warn!(path = %ledger.path().display(), error = %e, "failed to save token ledger");
        }
    }
    report
}

/// Run every stage for `date` against an already started guard.
pub fn run_with_guard<C: Clock>(
    date: NaiveDate,
    ctx: &PipelineContext,
    guard: &mut ExecutionGuard<C>,
) -> RunReport {
    info!(%date, "=== starting pipeline ===");
    let mut artifacts = Vec::new();
    let mut report = match drive(date, ctx, guard, &mut artifacts) {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "pipeline failed");
            RunReport {
                error: Some(e.to_string()),
                ..RunReport::new(RunStatus::Error, date, guard)
            }
        }
    };
    report.artifacts = artifacts;
    info!(status = ?report.status, "=== pipeline finished ===");
    report
}

fn drive<C: Clock>(
    date: NaiveDate,
    ctx: &PipelineContext,
    guard: &mut ExecutionGuard<C>,
    artifacts: &mut Vec<PathBuf>,
) -> Result<RunReport, StageError> {
    let paths = &ctx.config.paths;
    let events_dir = paths.events_dir();

    info!("stage 1: fetching raw events");
    let calendars = MarketCalendarManager::open(paths.calendars_dir());
    let raw = fetch_events(date, &calendars, ctx.config.sources.lookahead_days);
    artifacts.push(save_raw_events(&events_dir, date, &raw)?);
    if let Continuation::Halt(reason) = guard.checkpoint(0) {
        error!("guard stop: cannot continue to normalization");
        return Ok(RunReport::stopped(RunStatus::Halted, date, guard, reason));
    }

    info!("stage 2: normalizing events");
    let raw = load_raw_events(&events_dir, date)?;
    let normalized = normalize_events(&raw);
    artifacts.push(save_normalized_events(&events_dir, date, &normalized)?);
    if let Continuation::Halt(reason) = guard.checkpoint(0) {
        error!("guard stop: cannot continue to LLM");
        return Ok(RunReport::stopped(RunStatus::Halted, date, guard, reason));
    }

    info!("stage 3: running LLM reasoning pipeline");
    let output = run_pipeline(
        date,
        &normalized,
        &ctx.prompts,
        ctx.client.as_ref(),
        &ctx.config.api,
        guard,
    )?;
    artifacts.push(save_pipeline_output(&paths.archive_dir(), &output)?);
    if let Some(reason) = output.halt_reason {
        warn!("guard stop: skipping validation due to time/token pressure");
        return Ok(RunReport {
            steps_completed: Some(if output.is_complete() { 3 } else { 2 }),
            llm_steps_completed: Some(output.steps_completed()),
            ..RunReport::stopped(RunStatus::Partial, date, guard, reason)
        });
    }

    info!("stage 4: validating output");
    let keywords = ConstraintKeywords::with_extra(&ctx.prompts.load_constraints()?);
    let value = serde_yaml::to_value(&output)?;
    let validation = validate_output(&value, &keywords);
    artifacts.push(save_validation_report(&paths.archive_dir(), date, &validation)?);

    let report = RunReport {
        steps_completed: Some(4),
        llm_steps_completed: Some(output.steps_completed()),
        validation: Some(validation),
        ..RunReport::new(RunStatus::Success, date, guard)
    };
    info!(status = ?report.execution_guard, "pipeline complete");
    Ok(report)
}
