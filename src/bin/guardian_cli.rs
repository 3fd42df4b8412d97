use std::path::PathBuf;
use structopt::StructOpt;

use cloudguard::config::Config;
use cloudguard::engine::CorrelationEngine;
use cloudguard::input::EventTailer;
use cloudguard::models::IncidentStatus;
use cloudguard::output::{OutputFormat, OutputHandler};
use cloudguard::persistence::{SqliteStateStore, StateStore};

/// Cloud Guardian Command Line Interface
#[derive(StructOpt, Debug)]
#[structopt(name = "guardian", about = "Cross-cloud correlation engine CLI")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Replay a recorded event feed through a single-threaded engine
    Replay {
        /// Path to the JSONL event file
        #[structopt(short, long)]
        file: PathBuf,
        /// Optional configuration file for engine parameters
        #[structopt(short, long)]
        config: Option<PathBuf>,
    },
    /// Show recent incidents from the state store
    Incidents {
        /// Path to the SQLite database
        #[structopt(short, long, default_value = "guardian.db")]
        db: PathBuf,
        /// Maximum number of incidents to show
        #[structopt(short, long, default_value = "20")]
        limit: usize,
    },
    /// Show incident counts by category and status
    Summary {
        /// Path to the SQLite database
        #[structopt(short, long, default_value = "guardian.db")]
        db: PathBuf,
    },
    /// Move a stored incident to a new lifecycle status
    Transition {
        /// Path to the SQLite database
        #[structopt(short, long, default_value = "guardian.db")]
        db: PathBuf,
        /// Incident id
        #[structopt(short, long)]
        id: String,
        /// Target status: open, investigating, resolved, dismissed
        #[structopt(short, long)]
        status: String,
        /// Allow a backwards transition, e.g. reopening a dismissed incident
        #[structopt(long)]
        force: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();

    let cli = Cli::from_args();

    match cli {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Replay { file, config } => {
            if !file.exists() {
                eprintln!("File not found: {:?}", file);
                std::process::exit(1);
            }

            let config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::default(),
            };

            let mut tailer = EventTailer::new(file);
            let events = tailer.read_all()?;
            println!("Replaying {} event(s)...\n", events.len());

            let mut engine = CorrelationEngine::new(&config.engine, None);
            let mut output = OutputHandler::new(OutputFormat::Console, None)?;
            let mut emitted = 0usize;
            let mut rejected = 0usize;

            for event in events {
                match engine.ingest(event) {
                    Ok(incidents) => {
                        for incident in incidents {
                            output.write_incident(&incident)?;
                            emitted += 1;
                        }
                    }
                    Err(e) => {
                        rejected += 1;
                        log::warn!("Event rejected: {}", e);
                    }
                }
            }

            println!(
                "\nReplay complete: {} incident update(s), {} rejected event(s)",
                emitted, rejected
            );
        }
        Cli::Incidents { db, limit } => {
            let store = SqliteStateStore::new(&db)?;
            let incidents = store.get_recent_incidents(limit)?;

            if incidents.is_empty() {
                println!("No incidents recorded");
            }
            for incident in incidents {
                println!(
                    "{}  [{}] {} - Score: {:.1}, Status: {}, Key: {}",
                    incident.opened_at,
                    incident.category,
                    incident.summary,
                    incident.score,
                    incident.status,
                    incident.key
                );
            }
        }
        Cli::Summary { db } => {
            let store = SqliteStateStore::new(&db)?;

            println!("By category:");
            for (category, count) in store.count_by_category()? {
                println!("  {:<28} {}", category.to_string(), count);
            }

            println!("\nBy status:");
            for (status, count) in store.count_by_status()? {
                println!("  {:<28} {}", status.to_string(), count);
            }
        }
        Cli::Transition {
            db,
            id,
            status,
            force,
        } => {
            let next = IncidentStatus::from_str_opt(&status).ok_or_else(|| {
                format!("Unknown status '{}'; expected open, investigating, resolved or dismissed", status)
            })?;

            let store = SqliteStateStore::new(&db)?;
            let current = store
                .get_recent_incidents(10_000)?
                .into_iter()
                .find(|i| i.id == id)
                .ok_or_else(|| format!("Incident not found: {}", id))?;

            if !force && !current.status.can_transition(next) {
                eprintln!(
                    "Transition {} -> {} is not allowed; use --force to override",
                    current.status, next
                );
                std::process::exit(1);
            }

            store.update_incident_status(&id, next)?;
            println!("Incident {} moved to {}", id, next);
        }
    }

    Ok(())
}
