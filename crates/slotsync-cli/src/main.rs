//! SlotSync CLI
//!
//! Thin wrapper around slotsync-core for command-line usage. Every command
//! runs against an in-memory store seeded from a schedule file.
//!
//! ## Usage
//!
//! ```bash
//! # Bookable slots for a date (or a run of dates)
//! slotsync resolve schedule.json --date 2026-10-19 --days 7
//!
//! # Earliest open slot
//! slotsync next schedule.json --from 2026-10-16
//!
//! # Request a booking and feed it a payment outcome
//! slotsync book schedule.json --client client-2 --date 2026-10-19 --slot 09:00-10:00 --pay succeeded
//!
//! # Stream bus events while the schedule loads
//! slotsync watch schedule.json
//!
//! # Reconnect delays for the active config
//! slotsync backoff --attempts 6
//!
//! # Summarize JSONL logs
//! slotsync logs --log-dir ./logs
//! ```

mod schedule;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Days, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use slotsync_core::logging::{read_records, read_records_for, LogSummary, LoggingBuilder};
use slotsync_core::{
    AvailabilityEngine, BackoffPolicy, BookingOutcome, BookingRequest, BusEvent, Dataset,
    EngineConfig, MemoryStore, PaymentNotice, PaymentSignal, SlotCatalog, TimeSlotId, UserId,
};

use crate::schedule::ScheduleFile;

/// Longest run of dates a single command walks (about ten years)
const MAX_SPAN_DAYS: i64 = 3660;

/// SlotSync - therapist availability and booking
#[derive(Parser)]
#[command(name = "slotsync")]
#[command(version)]
#[command(about = "SlotSync - therapist availability and booking")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Engine config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSONL logs under this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show bookable slots
    Resolve {
        /// Schedule file
        schedule: PathBuf,
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        date: NaiveDate,
        /// Number of consecutive dates
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..=MAX_SPAN_DAYS))]
        days: u32,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Find the earliest bookable slot
    Next {
        schedule: PathBuf,
        #[arg(long)]
        from: NaiveDate,
        /// Days to search ahead
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(0..=MAX_SPAN_DAYS))]
        horizon: u32,
    },

    /// Request a booking
    Book {
        schedule: PathBuf,
        #[arg(long)]
        client: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        slot: String,
        /// Apply a payment outcome to the new booking
        #[arg(long, value_enum)]
        pay: Option<PayArg>,
    },

    /// Print bus events while the schedule loads
    Watch { schedule: PathBuf },

    /// Show the reconnect backoff schedule
    Backoff {
        #[arg(long, default_value_t = 6)]
        attempts: u32,
    },

    /// Print the effective engine config
    Config,

    /// Summarize JSONL logs
    Logs {
        /// Only files written on this date
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum PayArg {
    Succeeded,
    Failed,
    Refunded,
}

impl From<PayArg> for PaymentSignal {
    fn from(arg: PayArg) -> Self {
        match arg {
            PayArg::Succeeded => PaymentSignal::Succeeded,
            PayArg::Failed => PaymentSignal::Failed,
            PayArg::Refunded => PaymentSignal::Refunded,
        }
    }
}

/// Default log directory (~/.slotsync/logs)
fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".slotsync")
        .join("logs")
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>) -> Result<()> {
    let mut builder = LoggingBuilder::new("cli").verbosity(verbosity);
    if let Some(dir) = log_dir {
        builder = builder.logs_dir(dir);
    }
    builder.init().context("Failed to initialize logging")?;
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Engine over a fresh in-memory store seeded from `schedule`
async fn open_engine(
    config: EngineConfig,
    schedule: &ScheduleFile,
) -> Result<(AvailabilityEngine, Arc<MemoryStore>)> {
    let store = Arc::new(MemoryStore::new());
    let engine = AvailabilityEngine::new(config, store.clone(), SlotCatalog::default())?;
    schedule.load(&engine, &store).await?;
    Ok((engine, store))
}

fn describe_event(event: &BusEvent) -> String {
    let detail = match &event.data {
        Dataset::Availability(_) => format!("{} weekly rules", event.data.len()),
        Dataset::Overrides(_) => format!("{} overrides", event.data.len()),
        Dataset::Appointments(_) => format!("{} appointments", event.data.len()),
        Dataset::Presence(_) => "presence".to_string(),
    };
    format!("v{} {} {} ({})", event.version, event.key, event.action, detail)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.log_dir.as_deref())?;
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Resolve {
            schedule,
            date,
            days,
            json,
        } => {
            let to = date
                .checked_add_days(Days::new(u64::from(days) - 1))
                .with_context(|| format!("--days {days} runs past the last supported date"))?;
            let schedule = ScheduleFile::from_path(&schedule)?;
            let (engine, _store) = open_engine(config, &schedule).await?;
            let range = engine.resolve_range(&schedule.owner, date, to).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&range)?);
            } else {
                println!("Availability for {}:", schedule.owner);
                for (day, slots) in &range.days {
                    if slots.is_empty() {
                        println!("  {} (none)", day);
                    } else {
                        let list: Vec<&str> = slots.iter().map(TimeSlotId::as_str).collect();
                        println!("  {} {}", day, list.join(", "));
                    }
                }
            }
            engine.shutdown().await;
        }

        Commands::Next {
            schedule,
            from,
            horizon,
        } => {
            let schedule = ScheduleFile::from_path(&schedule)?;
            let (engine, _store) = open_engine(config, &schedule).await?;
            match engine.next_available(&schedule.owner, from, horizon).await? {
                Some((date, slot)) => println!("Next available: {} {}", date, slot),
                None => println!("No availability in the next {} days.", horizon),
            }
            engine.shutdown().await;
        }

        Commands::Book {
            schedule,
            client,
            date,
            slot,
            pay,
        } => {
            let schedule = ScheduleFile::from_path(&schedule)?;
            let (engine, _store) = open_engine(config, &schedule).await?;
            let request = BookingRequest {
                owner_id: schedule.owner.clone(),
                counterparty_id: UserId::new(client),
                time_slot_id: TimeSlotId::new(slot),
                date,
                price: None,
            };

            match engine.request_booking(request).await? {
                BookingOutcome::Requested { appointment } => {
                    println!("Booking requested.");
                    println!("  ID: {}", appointment.id.to_string_repr());
                    println!("  Status: {}", appointment.status);
                    if let Some(pay) = pay {
                        let updated = engine
                            .handle_payment_signal(PaymentNotice {
                                appointment_id: appointment.id,
                                signal: pay.into(),
                            })
                            .await?;
                        println!("  Payment: {:?}", updated.payment_status);
                        println!("  Status after payment: {}", updated.status);
                    }
                }
                BookingOutcome::Conflict { conflict } => {
                    println!("Conflict: slot already taken.");
                    if let Some(existing) = conflict.conflicting_appointment() {
                        println!("  Existing appointment: {}", existing.to_string_repr());
                    }
                    engine.shutdown().await;
                    std::process::exit(2);
                }
            }
            engine.shutdown().await;
        }

        Commands::Watch { schedule } => {
            let schedule = ScheduleFile::from_path(&schedule)?;
            let store = Arc::new(MemoryStore::new());
            let engine = AvailabilityEngine::new(config, store.clone(), SlotCatalog::default())?;
            engine.start();

            let _conflicts = engine.subscribe_conflicts(|record| {
                println!("conflict {} {:?} resolved={}", record.id, record.kind, record.resolved);
            })?;
            let subscription = engine.subscribe_availability(schedule.owner.clone(), |event| {
                println!("{}", describe_event(event));
            })?;
            // Let the initial snapshots land before writing
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            schedule.load(&engine, &store).await?;
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;

            let diagnostics = engine.sync_diagnostics();
            println!();
            println!("Watched keys: {}", diagnostics.watched());
            for key in &diagnostics.keys {
                println!(
                    "  {} v{} {}{}",
                    key.key,
                    key.version.unwrap_or(0),
                    key.status,
                    if key.is_stale { " [stale]" } else { "" }
                );
            }
            let stats = engine.bus_stats();
            println!("Events published: {}", stats.published);

            drop(subscription);
            engine.shutdown().await;
        }

        Commands::Backoff { attempts } => {
            let policy = BackoffPolicy::for_connection(&config.connection);
            println!(
                "Reconnect backoff (max {} attempts, jitter up to {}ms):",
                config.connection.max_reconnect_attempts, config.connection.max_jitter_ms
            );
            for (attempt, delay) in policy.schedule(attempts).iter().enumerate() {
                println!("  attempt {}: {}ms", attempt + 1, delay.as_millis());
            }
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Logs { date } => {
            let dir = cli.log_dir.unwrap_or_else(default_log_dir);
            let (records, skipped) = match date {
                Some(date) => read_records_for(&dir, date),
                None => read_records(&dir),
            }
            .with_context(|| format!("Failed to read logs in {}", dir.display()))?;

            let summary = LogSummary::from_records(&records);
            println!("Log records: {}", summary.total);
            for (level, count) in &summary.by_level {
                println!("  {}: {}", level, count);
            }
            if skipped > 0 {
                println!("Skipped {} unreadable lines", skipped);
            }
        }
    }

    Ok(())
}
