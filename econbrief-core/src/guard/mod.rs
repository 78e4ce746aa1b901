//! Execution guard — time and token budget accounting for one pipeline run.
//!
//! Enforcement is cooperative. The guard never interrupts anything; the driver
//! feeds it each stage's token usage through [`ExecutionGuard::checkpoint`] and
//! must act on the returned [`Continuation`]. There is no protection against a
//! single stage overrunning its budget mid-execution.
//!
//! Thresholds:
//! - `max_runtime_seconds = (execution_window_minutes - 5) * 60`
//! - halt when fewer than [`MIN_SECONDS_REMAINING`] seconds remain
//! - halt when fewer than [`MIN_TOKENS_REMAINING`] tokens remain

pub mod clock;

pub use clock::{Clock, ManualClock, SystemClock};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info, warn};

/// Minutes subtracted from the configured window as a safety buffer.
pub const SAFETY_BUFFER_MINUTES: u64 = 5;

/// Halt once remaining time drops below this many seconds.
pub const MIN_SECONDS_REMAINING: f64 = 30.0;

/// Halt once remaining tokens drop below this count.
pub const MIN_TOKENS_REMAINING: i64 = 1000;

/// Reason code written into every [`ShutdownReport`].
pub const SHUTDOWN_REASON: &str = "execution_guard_exceeded";

/// Budget limits, loaded from the `[limits]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardLimits {
    pub daily_token_budget: u64,
    pub execution_window_minutes: u64,
}

/// Why the guard asked the pipeline to stop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "budget", rename_all = "snake_case")]
pub enum HaltReason {
    TimeBudget { remaining_seconds: f64 },
    TokenBudget { remaining_tokens: i64 },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::TimeBudget { remaining_seconds } => {
                write!(f, "time budget nearly exhausted ({remaining_seconds:.0}s remaining)")
            }
            HaltReason::TokenBudget { remaining_tokens } => {
                write!(f, "token budget nearly exhausted ({remaining_tokens} tokens remaining)")
            }
        }
    }
}

/// Continuation decision returned after every pipeline stage.
#[must_use = "the pipeline must branch on the guard's decision"]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Continuation {
    Proceed,
    Halt(HaltReason),
}

impl Continuation {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Continuation::Proceed)
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        match self {
            Continuation::Proceed => None,
            Continuation::Halt(reason) => Some(*reason),
        }
    }
}

/// Snapshot of budget consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardStatus {
    pub elapsed_seconds: f64,
    pub remaining_seconds: f64,
    pub tokens_used: u64,
    pub remaining_tokens: i64,
    pub budget_exhaustion_pct: f64,
}

/// Informational record produced by [`ExecutionGuard::force_shutdown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShutdownReport {
    pub shutdown_reason: String,
    pub elapsed_seconds: f64,
    pub tokens_used: u64,
    pub timestamp: NaiveDateTime,
}

/// Tracks elapsed time and token usage for exactly one pipeline run.
#[derive(Debug)]
pub struct ExecutionGuard<C: Clock = SystemClock> {
    clock: C,
    limits: GuardLimits,
    max_runtime_seconds: u64,
    start_time: Option<Instant>,
    tokens_used: u64,
    carried_tokens: u64,
}

impl ExecutionGuard<SystemClock> {
    pub fn from_limits(limits: GuardLimits) -> Self {
        Self::with_clock(limits, SystemClock)
    }
}

impl<C: Clock> ExecutionGuard<C> {
    pub fn with_clock(limits: GuardLimits, clock: C) -> Self {
        let max_runtime_seconds = limits
            .execution_window_minutes
            .saturating_sub(SAFETY_BUFFER_MINUTES)
            .saturating_mul(60);
        Self {
            clock,
            limits,
            max_runtime_seconds,
            start_time: None,
            tokens_used: 0,
            carried_tokens: 0,
        }
    }

    /// Seed the counter with tokens already spent earlier the same day.
    pub fn with_carried_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = self.tokens_used.saturating_add(tokens);
        self.carried_tokens = self.carried_tokens.saturating_add(tokens);
        self
    }

    /// Mark the run's origin. Calling again resets the origin and so extends
    /// the allowed window.
    pub fn start(&mut self) {
        if self.start_time.is_some() {
            warn!("execution guard restarted; time window origin reset");
        }
        self.start_time = Some(self.clock.now());
        info!(
            max_runtime_seconds = self.max_runtime_seconds,
            "pipeline execution started"
        );
    }

    pub fn is_started(&self) -> bool {
        self.start_time.is_some()
    }

    pub fn limits(&self) -> GuardLimits {
        self.limits
    }

    pub fn max_runtime_seconds(&self) -> u64 {
        self.max_runtime_seconds
    }

    /// Total tokens counted against today's budget, including carried usage.
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used
    }

    /// Tokens recorded by this run only.
    pub fn run_tokens(&self) -> u64 {
        self.tokens_used - self.carried_tokens
    }

    /// Seconds since [`start`](Self::start), or zero if never started.
    pub fn elapsed_seconds(&self) -> f64 {
        match self.start_time {
            Some(origin) => self.clock.now().saturating_duration_since(origin).as_secs_f64(),
            None => 0.0,
        }
    }

    /// Seconds left before the hard cutoff. Negative once overdue; the full
    /// window if the guard was never started.
    pub fn check_time_remaining(&self) -> f64 {
        self.max_runtime_seconds as f64 - self.elapsed_seconds()
    }

    pub fn remaining_tokens(&self) -> i64 {
        i64::try_from(self.limits.daily_token_budget).unwrap_or(i64::MAX)
            - i64::try_from(self.tokens_used).unwrap_or(i64::MAX)
    }

    fn budget_pct(&self) -> f64 {
        let budget = self.limits.daily_token_budget.max(1) as f64;
        self.tokens_used as f64 / budget * 100.0
    }

    /// Add tokens consumed by a stage. Overshooting the budget is allowed and
    /// only observed at the next evaluation.
    pub fn record_tokens(&mut self, count: u64) {
        self.tokens_used = self.tokens_used.saturating_add(count);
        info!(
            tokens_used = self.tokens_used,
            daily_token_budget = self.limits.daily_token_budget,
            "tokens used: {:.1}% of budget",
            self.budget_pct()
        );
    }

    /// Evaluate both budgets without recording anything.
    pub fn evaluate(&self) -> Continuation {
        let remaining_seconds = self.check_time_remaining();
        if remaining_seconds < MIN_SECONDS_REMAINING {
            warn!(remaining_seconds, "time budget nearly exhausted");
            return Continuation::Halt(HaltReason::TimeBudget { remaining_seconds });
        }

        let remaining_tokens = self.remaining_tokens();
        if remaining_tokens < MIN_TOKENS_REMAINING {
            warn!(remaining_tokens, "token budget nearly exhausted");
            return Continuation::Halt(HaltReason::TokenBudget { remaining_tokens });
        }

        Continuation::Proceed
    }

    /// Record a stage's token usage and decide whether the pipeline may go on.
    pub fn checkpoint(&mut self, stage_tokens: u64) -> Continuation {
        self.record_tokens(stage_tokens);
        self.evaluate()
    }

    /// Boolean form of [`evaluate`](Self::evaluate).
    pub fn should_continue(&self) -> bool {
        self.evaluate().is_proceed()
    }

    /// Build a shutdown record for logging. Has no control-flow effect.
    pub fn force_shutdown(&self) -> ShutdownReport {
        let elapsed_seconds = self.elapsed_seconds();
        error!("force shutdown triggered after {elapsed_seconds:.0}s");
        ShutdownReport {
            shutdown_reason: SHUTDOWN_REASON.to_string(),
            elapsed_seconds,
            tokens_used: self.tokens_used,
            timestamp: chrono::Local::now().naive_local(),
        }
    }

    pub fn get_status(&self) -> GuardStatus {
        GuardStatus {
            elapsed_seconds: self.elapsed_seconds(),
            remaining_seconds: self.check_time_remaining(),
            tokens_used: self.tokens_used,
            remaining_tokens: self.remaining_tokens(),
            budget_exhaustion_pct: self.budget_pct(),
        }
    }
}
