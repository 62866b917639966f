//! Lineup CLI
//!
//! Inspects and drives the festival cache subsystem from the command line:
//! resolve configuration keys, switch the active festival year, refresh the
//! pointer snapshot and look up bands and schedules.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use pointer_config::{load_settings, RefreshOutcome};
use schedule_service::{FestivalRuntime, HttpSnapshotFetcher, Lookup};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "lineup")]
#[command(about = "Festival lineup cache and epoch control")]
struct Args {
    /// Settings file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Environment (development, staging, production)
    #[arg(short, long, global = true)]
    environment: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a configuration key for the active year
    Resolve { key: String },
    /// Switch the active epoch and reload every cache
    Switch { year: String },
    /// Apply a year selection (`Current` or a year)
    Select { selection: String },
    /// Download the pointer snapshot and reload caches if the year moved
    Refresh,
    /// Show one band for the active year
    Band { name: String },
    /// List the schedule of one band for the active year
    Events { band: String },
    /// Print runtime status as JSON
    Status,
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lineup=info".parse()?)
                .add_directive("schedule_service=info".parse()?),
        )
        .init();

    let settings = load_settings(args.config.as_deref(), args.environment.as_deref())
        .context("Failed to load settings")?;
    info!("📁 Data dir: {:?}", settings.data_dir);

    let runtime = FestivalRuntime::from_settings(settings)?;
    match runtime.startup_year_check() {
        Ok(Some(id)) => info!(%id, "Caches reloaded for changed event year"),
        Ok(None) => {}
        Err(e) => warn!(
            epoch = %runtime.coordinator().current_epoch(),
            "Startup year check failed; continuing with the current epoch: {:#}", e
        ),
    }

    run(&runtime, args.command)
}

fn run(runtime: &Arc<FestivalRuntime>, command: Command) -> Result<()> {
    let wait = runtime.replay_wait();

    match command {
        Command::Resolve { key } => {
            let value = settle(runtime.config_value(&key), wait, &key)?;
            println!("{}", value);
        }
        Command::Switch { year } => {
            let id = runtime.switch_epoch(&year)?;
            println!("{} -> {}", id, runtime.coordinator().current_epoch());
        }
        Command::Select { selection } => {
            let id = runtime.select_year(&selection)?;
            println!("{} -> {}", id, runtime.coordinator().current_epoch());
        }
        Command::Refresh => {
            let fetcher = HttpSnapshotFetcher::new()?;
            match runtime.refresh(&fetcher)? {
                RefreshOutcome::Unchanged { checksum } => {
                    println!("unchanged ({:08x})", checksum)
                }
                RefreshOutcome::Updated { checksum, records } => {
                    println!("updated ({:08x}, {} records)", checksum, records)
                }
            }
        }
        Command::Band { name } => match settle(runtime.band(&name), wait, &name)? {
            Some(band) => println!("{}", serde_json::to_string_pretty(&band)?),
            None => warn!(band = %name, epoch = %runtime.coordinator().current_epoch(), "Band not found"),
        },
        Command::Events { band } => {
            for event in settle(runtime.events_for_band(&band), wait, &band)? {
                println!(
                    "{} {} {}-{} {}",
                    event.day, event.location, event.start_time, event.end_time, event.event_type
                );
            }
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&runtime.status())?);
        }
    }
    Ok(())
}

/// Wait out a deferred lookup, failing if the transition never completes
fn settle<T>(lookup: Lookup<T>, wait: std::time::Duration, what: &str) -> Result<T>
where
    T: schedule_service::FromLookupValue,
{
    lookup
        .wait(wait)
        .with_context(|| format!("Lookup for '{}' not answered within {:?}", what, wait))
}
