//! EconBrief Core — market calendars, calendar sources, and the run budget guard.
//!
//! This crate holds everything the daily briefing pipeline needs below the
//! LLM layer:
//! - Domain types (markets, event types, calendar events)
//! - Per-market calendar store with YAML/JSON persistence
//! - Data sources (Finnhub, Yahoo Finance, curated YAML) behind one trait
//! - Priority-ordered fallback orchestration across those sources
//! - Execution guard for wall-clock and token budgets, plus a daily token ledger

pub mod calendar;
pub mod domain;
pub mod guard;
pub mod ledger;
pub mod sources;

pub use calendar::{CalendarError, CalendarFormat, MarketCalendar, MarketCalendarManager};
pub use domain::{CalendarEvent, EventType, Market};
pub use guard::{Continuation, ExecutionGuard, GuardLimits};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared across the pipeline are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::CalendarEvent>();
        require_sync::<domain::CalendarEvent>();
        require_send::<calendar::MarketCalendar>();
        require_sync::<calendar::MarketCalendar>();
        require_send::<calendar::MarketCalendarManager>();
        require_sync::<calendar::MarketCalendarManager>();

        require_send::<guard::ExecutionGuard>();
        require_sync::<guard::ExecutionGuard>();
        require_send::<guard::ExecutionGuard<guard::ManualClock>>();
        require_send::<ledger::TokenLedger>();

        require_send::<sources::CircuitBreaker>();
        require_sync::<sources::CircuitBreaker>();
        require_send::<sources::CalendarFetcher>();
        require_sync::<sources::CalendarFetcher>();
        require_send::<sources::ManualSource>();
        require_sync::<sources::ManualSource>();
    }
}
