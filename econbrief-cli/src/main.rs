//! EconBrief CLI — calendar maintenance and the daily briefing run.
//!
//! Commands:
//! - `init` — populate every market calendar from the configured sources
//! - `update` — refresh one or all markets and save in the chosen format
//! - `query` — filter stored events, optionally exporting JSON or CSV
//! - `verify` — per-market overview of what is stored
//! - `run` — execute the full pipeline for a date and print the run report
//! - `status` — today's token and time budget

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use econbrief_core::calendar::{CalendarSummary, MarketCalendar, MarketCalendarManager};
use econbrief_core::sources::{CalendarFetcher, PopulateReport};
use econbrief_core::{CalendarEvent, CalendarFormat, EventType, Market};
use econbrief_runner::config::LimitsConfig;
use econbrief_runner::{daily_status, run_full_pipeline, PipelineConfig, PipelineContext};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "econbrief",
    about = "EconBrief — market calendars and the daily macro briefing pipeline"
)]
struct Cli {
    /// Data directory. Overrides `paths.data_dir` from the config.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Populate every market calendar and save as YAML.
    Init {
        /// Days ahead to fetch.
        #[arg(long, default_value_t = 180)]
        days: u32,
    },
    /// Refresh calendars from the configured sources.
    Update {
        /// Market to update: ftse, nasdaq, or all.
        #[arg(long, default_value = "all")]
        market: String,

        /// Days ahead to fetch.
        #[arg(long, default_value_t = 90)]
        days: u32,

        /// File format to save: yaml or json.
        #[arg(long, default_value = "yaml")]
        export: String,

        /// Print each market's summary after saving.
        #[arg(long, default_value_t = false)]
        show_summary: bool,
    },
    /// Query stored calendar events.
    Query {
        /// Restrict to one market.
        #[arg(long)]
        market: Option<String>,

        /// Events for one ticker.
        #[arg(long)]
        ticker: Option<String>,

        /// Event type (earnings, dividend, split, ipo, conference, economic, merger).
        #[arg(long = "type")]
        event_type: Option<String>,

        /// Events in the next N days.
        #[arg(long)]
        upcoming: Option<u32>,

        /// Range start (YYYY-MM-DD), inclusive.
        #[arg(long)]
        date_from: Option<String>,

        /// Range end (YYYY-MM-DD), inclusive.
        #[arg(long)]
        date_to: Option<String>,

        /// Print calendar summaries instead of events.
        #[arg(long, default_value_t = false)]
        summary: bool,

        /// Write matching events to a JSON file.
        #[arg(long)]
        export_json: Option<PathBuf>,

        /// Write matching events to a CSV file.
        #[arg(long)]
        export_csv: Option<PathBuf>,
    },
    /// Show what each market calendar holds.
    Verify,
    /// Run the daily pipeline and print the run report.
    Run {
        /// Run date (YYYY-MM-DD). Defaults to today.
        date: Option<String>,
    },
    /// Show today's budget consumption.
    Status,
}

/// Event filters for `query`, after parsing.
#[derive(Debug, Default)]
struct EventFilter {
    ticker: Option<String>,
    event_type: Option<EventType>,
    upcoming: Option<u32>,
    range: Option<(NaiveDate, NaiveDate)>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { days } => {
            let config = load_calendar_config(&cli.config, cli.data_dir)?;
            run_init(&config, days)
        }
        Commands::Update {
            market,
            days,
            export,
            show_summary,
        } => {
            let config = load_calendar_config(&cli.config, cli.data_dir)?;
            run_update(&config, &market, days, &export, show_summary)
        }
        Commands::Query {
            market,
            ticker,
            event_type,
            upcoming,
            date_from,
            date_to,
            summary,
            export_json,
            export_csv,
        } => {
            let config = load_calendar_config(&cli.config, cli.data_dir)?;
            let markets = parse_markets(market.as_deref().unwrap_or("all"))?;
            if summary {
                return run_query_summary(&config, &markets);
            }
            let filter = EventFilter {
                ticker: ticker.map(|t| t.trim().to_uppercase()),
                event_type: event_type.as_deref().map(str::parse).transpose()?,
                upcoming,
                range: parse_range(date_from.as_deref(), date_to.as_deref())?,
            };
            run_query(&config, &markets, &filter, export_json, export_csv)
        }
        Commands::Verify => {
            let config = load_calendar_config(&cli.config, cli.data_dir)?;
            run_verify(&config)
        }
        Commands::Run { date } => {
            let config = load_pipeline_config(&cli.config, cli.data_dir)?;
            let date = match date {
                Some(s) => parse_date(&s)?,
                None => Local::now().date_naive(),
            };
            run_pipeline_cmd(config, date)
        }
        Commands::Status => {
            let config = load_pipeline_config(&cli.config, cli.data_dir)?;
            run_status(&config)
        }
    }
}

// ── Config ──────────────────────────────────────────────────────────

/// Strict load for `run` and `status`: the file must exist and be valid.
fn load_pipeline_config(path: &Path, data_dir: Option<PathBuf>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(path)?;
    if let Some(dir) = data_dir {
        config.paths.data_dir = dir;
    }
    Ok(config)
}

/// Calendar commands only need paths and sources, so a missing file falls
/// back to defaults. An existing but invalid file is still an error.
fn load_calendar_config(path: &Path, data_dir: Option<PathBuf>) -> Result<PipelineConfig> {
    if path.exists() {
        return load_pipeline_config(path, data_dir);
    }
    info!(path = %path.display(), "no config file, using defaults");
    let mut config = PipelineConfig::with_limits(LimitsConfig {
        daily_token_budget: 50_000,
        execution_window_minutes: 30,
        carry_over_daily_usage: true,
    });
    if let Some(dir) = data_dir {
        config.paths.data_dir = dir;
    }
    Ok(config)
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").with_context(|| format!("invalid date '{s}', expected YYYY-MM-DD"))
}

fn parse_markets(s: &str) -> Result<Vec<Market>> {
    if s.eq_ignore_ascii_case("all") {
        return Ok(Market::ALL.to_vec());
    }
    Ok(vec![s.parse::<Market>()?])
}

fn parse_range(from: Option<&str>, to: Option<&str>) -> Result<Option<(NaiveDate, NaiveDate)>> {
    match (from, to) {
        (None, None) => Ok(None),
        (Some(from), Some(to)) => {
            let (start, end) = (parse_date(from)?, parse_date(to)?);
            if start > end {
                bail!("--date-from {start} is after --date-to {end}");
            }
            Ok(Some((start, end)))
        }
        _ => bail!("--date-from and --date-to must be given together"),
    }
}

fn fetcher(config: &PipelineConfig) -> Result<CalendarFetcher> {
    let settings = config.source_settings()?;
    let fetcher = CalendarFetcher::from_settings(&settings);
    info!(sources = ?fetcher.source_names(), "calendar sources");
    Ok(fetcher)
}

// ── Calendar commands ───────────────────────────────────────────────

fn run_init(config: &PipelineConfig, days: u32) -> Result<()> {
    let fetcher = fetcher(config)?;
    let mut manager = MarketCalendarManager::open(config.paths.calendars_dir());

    let reports = fetcher.populate_all_markets(&mut manager, days);
    for report in &reports {
        print_populate_report(report);
    }
    save_markets(&mut manager, &Market::ALL, CalendarFormat::Yaml);
    for summary in manager.get_summary().values() {
        print_summary(summary);
    }
    Ok(())
}

/// Save each market's calendar. A failed save is logged and the remaining
/// markets are still written. Returns the paths that were saved.
fn save_markets(
    manager: &mut MarketCalendarManager,
    markets: &[Market],
    format: CalendarFormat,
) -> Vec<PathBuf> {
    let mut saved = Vec::new();
    for &market in markets {
        match manager.get_calendar_mut(market).save_calendar(format) {
            Ok(path) => {
                println!("Saved {}", path.display());
                saved.push(path);
            }
            Err(e) => warn!(%market, error = %e, "failed to save calendar"),
        }
    }
    saved
}

fn run_update(
    config: &PipelineConfig,
    market: &str,
    days: u32,
    export: &str,
    show_summary: bool,
) -> Result<()> {
    let markets = parse_markets(market)?;
    let format: CalendarFormat = export.parse()?;
    let fetcher = fetcher(config)?;
    let mut manager = MarketCalendarManager::open(config.paths.calendars_dir());

    for market in markets {
        let calendar = manager.get_calendar_mut(market);
        let report = fetcher.populate_calendar(calendar, days);
        print_populate_report(&report);
        match calendar.save_calendar(format) {
            Ok(path) => println!("Saved {}", path.display()),
            Err(e) => {
                warn!(%market, error = %e, "failed to save calendar");
                continue;
            }
        }
        if show_summary {
            print_summary(&calendar.get_summary());
        }
    }
    Ok(())
}

/// Events of one calendar matching `filter`, sorted by date then ticker.
fn select_events<'a>(
    calendar: &'a MarketCalendar,
    filter: &EventFilter,
    today: NaiveDate,
) -> Vec<&'a CalendarEvent> {
    let mut events: Vec<&CalendarEvent> = if let Some(ticker) = &filter.ticker {
        calendar.get_events_by_ticker(ticker).iter().collect()
    } else if let Some(days) = filter.upcoming {
        calendar
            .get_upcoming_events_from(today, days)
            .into_values()
            .flatten()
            .collect()
    } else if let Some((start, end)) = filter.range {
        calendar
            .get_events_by_date_range(start, end)
            .into_values()
            .flatten()
            .collect()
    } else if let Some(event_type) = filter.event_type {
        calendar
            .get_events_by_type(event_type)
            .into_values()
            .flatten()
            .collect()
    } else {
        calendar.iter_events()
    };

    if let Some(event_type) = filter.event_type {
        events.retain(|e| e.event_type() == event_type);
    }
    if let Some((start, end)) = filter.range {
        events.retain(|e| start <= e.date() && e.date() <= end);
    }
    if let Some(days) = filter.upcoming {
        let horizon = econbrief_core::domain::horizon(today, days);
        events.retain(|e| today <= e.date() && e.date() <= horizon);
    }
    events.sort_by(|a, b| a.date().cmp(&b.date()).then_with(|| a.ticker().cmp(b.ticker())));
    events
}

fn run_query(
    config: &PipelineConfig,
    markets: &[Market],
    filter: &EventFilter,
    export_json: Option<PathBuf>,
    export_csv: Option<PathBuf>,
) -> Result<()> {
    let manager = MarketCalendarManager::open(config.paths.calendars_dir());
    let today = Local::now().date_naive();

    let mut matched: Vec<&CalendarEvent> = Vec::new();
    for &market in markets {
        matched.extend(select_events(manager.get_calendar(market), filter, today));
    }

    println!("{} event(s)", matched.len());
    for event in &matched {
        println!(
            "  {}  {:<7} {:<8} {:<20} {}",
            event.date(),
            event.market().as_str(),
            event.ticker(),
            event.event_type().as_str(),
            event.description()
        );
    }

    if let Some(path) = export_json {
        let json = serde_json::to_string_pretty(&matched)?;
        write_export(&path, &json)?;
    }
    if let Some(path) = export_csv {
        write_export(&path, &events_to_csv(&matched)?)?;
    }
    Ok(())
}

fn run_query_summary(config: &PipelineConfig, markets: &[Market]) -> Result<()> {
    let manager = MarketCalendarManager::open(config.paths.calendars_dir());
    for &market in markets {
        print_summary(&manager.get_calendar(market).get_summary());
    }
    Ok(())
}

fn run_verify(config: &PipelineConfig) -> Result<()> {
    let manager = MarketCalendarManager::open(config.paths.calendars_dir());
    for calendar in manager.calendars() {
        let summary = calendar.get_summary();
        println!("=== {} ===", summary.market.as_str().to_uppercase());
        println!("  Tickers: {}", summary.total_tickers);
        println!("  Events:  {}", summary.total_events);
        for (event_type, count) in &summary.event_types {
            println!("    {event_type}: {count}");
        }
        let events = calendar.iter_events();
        if events.is_empty() {
            println!("  (no events stored)");
            continue;
        }
        println!("  First events:");
        for event in events.iter().take(3) {
            println!("    {} {} {}", event.date(), event.ticker(), event.description());
        }
    }
    Ok(())
}

// ── Pipeline commands ───────────────────────────────────────────────

fn run_pipeline_cmd(config: PipelineConfig, date: NaiveDate) -> Result<()> {
    let ctx = PipelineContext::from_config(config)?;
    let report = run_full_pipeline(date, &ctx);
    print!("{}", serde_yaml::to_string(&report)?);
    Ok(())
}

fn run_status(config: &PipelineConfig) -> Result<()> {
    let today = Local::now().date_naive();
    let status = daily_status(config, today);
    println!("Budget status for {today}");
    println!(
        "  Tokens used:      {} / {} ({:.1}%)",
        status.tokens_used, config.limits.daily_token_budget, status.budget_exhaustion_pct
    );
    println!("  Remaining tokens: {}", status.remaining_tokens);
    println!("  Run window:       {:.0}s", status.remaining_seconds);
    Ok(())
}

// ── Output helpers ──────────────────────────────────────────────────

fn events_to_csv(events: &[&CalendarEvent]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["market", "ticker", "event_type", "date", "description"])?;
    for event in events {
        wtr.write_record([
            event.market().as_str(),
            event.ticker(),
            event.event_type().as_str(),
            &event.date().to_string(),
            event.description(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn write_export(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Exported to {}", path.display());
    Ok(())
}

fn print_populate_report(report: &PopulateReport) {
    match &report.source {
        Some(source) => println!(
            "{}: {} fetched from {source}, {} new",
            report.market, report.fetched, report.inserted
        ),
        None => println!("{}: no source available", report.market),
    }
    for failure in &report.failures {
        println!("  failed: {failure}");
    }
}

fn print_summary(summary: &CalendarSummary) {
    println!("{}", "=".repeat(50));
    println!("{} calendar", summary.market.as_str().to_uppercase());
    println!("  Tickers: {}", summary.total_tickers);
    println!("  Events:  {}", summary.total_events);
    if let (Some(first), Some(last)) = (summary.date_range.first, summary.date_range.last) {
        println!("  Range:   {first} .. {last}");
    }
    if let Some(updated) = summary.last_updated {
        println!("  Updated: {}", updated.format("%Y-%m-%d %H:%M:%S"));
    }
    for (event_type, count) in &summary.event_types {
        println!("    {event_type}: {count}");
    }
}
