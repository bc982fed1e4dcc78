use super::logging;
use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser, Subcommand};
use petledger::{LedgerConfig, PersistentStore, PetLedger, ResolveReport};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "petledger")]
#[command(about = "Resolve and persist in-game pet ownership for lists of users")]
pub struct App {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the store document path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Override the upstream query endpoint
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve ownership for the given user ids
    Resolve {
        ids: Vec<String>,
        /// Read additional ids from a file, one per line
        #[arg(long)]
        ids_file: Option<PathBuf>,
    },
    /// Print store statistics
    Stats,
    /// List ids whose record is older than the threshold
    Stale {
        #[arg(long)]
        max_age_hours: Option<u64>,
    },
    /// Re-fetch every stale record from upstream
    RefreshStale,
    /// Remove a user's record from the store
    Delete { user_id: String },
}

impl App {
    pub async fn run(self) -> Result<()> {
        logging::init(self.verbose, self.log_file.as_deref())?;
        let config = self.load_config()?;

        match self.command {
            Command::Resolve { ids, ids_file } => {
                let ids = collect_ids(ids, ids_file.as_deref())?;
                let ledger = PetLedger::open(config).await.context("Failed to open ledger")?;
                let report = ledger.resolve_with_stats(&ids).await?;
                print_report(report)
            }
            Command::Stats => {
                let store = PersistentStore::open(config.store_path);
                print_json(&store.stats().await?)
            }
            Command::Stale { max_age_hours } => {
                let config = match max_age_hours {
                    Some(hours) => config.stale_after_hours(hours),
                    None => config,
                };
                let store = PersistentStore::open(config.store_path.clone());
                print_json(&store.stale_ids(config.stale_after()).await?)
            }
            Command::RefreshStale => {
                let ledger = PetLedger::open(config).await.context("Failed to open ledger")?;
                let report = ledger.refresh_stale().await?;
                print_report(report)
            }
            Command::Delete { user_id } => {
                let store = PersistentStore::open(config.store_path);
                if store.delete_record(&user_id).await? {
                    println!("Deleted {}", user_id);
                    Ok(())
                } else {
                    Err(anyhow!("User '{}' is not in the store", user_id))
                }
            }
        }
    }

    fn load_config(&self) -> Result<LedgerConfig> {
        let mut config = match &self.config {
            Some(path) => LedgerConfig::from_json_file(path)?,
            None => LedgerConfig::default(),
        };
        if let Some(store) = &self.store {
            config = config.store_path(store);
        }
        if let Some(endpoint) = &self.endpoint {
            config = config.endpoint(endpoint);
        }
        Ok(config)
    }
}

fn collect_ids(mut ids: Vec<String>, ids_file: Option<&Path>) -> Result<Vec<String>> {
    if let Some(path) = ids_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read ids file '{}'", path.display()))?;
        ids.extend(
            raw.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }

    if ids.is_empty() {
        return Err(anyhow!("No user ids given"));
    }
    Ok(ids)
}

/// Prints the results, then fails the command if they could not be stored.
fn print_report(report: ResolveReport) -> Result<()> {
    print_json(&report.results)?;
    report
        .persisted
        .map(|_| ())
        .context("Results were not saved to the store")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
