//! Calendar store: per-market event collections, queries, and persistence.

pub mod manager;
pub mod persist;
pub mod store;

pub use manager::MarketCalendarManager;
pub use persist::{CalendarDocument, CalendarError, CalendarFormat};
pub use store::{CalendarSummary, DateRange, MarketCalendar, TickerEvents};
