mod config;
mod error;
mod fetch;
mod loader;
mod merge;
mod models;
mod normalize;
mod pipeline;
mod planner;
mod source;
mod storage;
mod utils;

#[cfg(test)]
mod testing;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::loader::load_universe;
use crate::pipeline::{Pipeline, plan_from_store};
use crate::storage::{open_store, summarize};

#[derive(Parser)]
#[command(name = "stock-ingest", about = "Incremental daily price history ingestion", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ticker list CSV (overrides storage.ticker_file)
    #[arg(long, global = true, env = "STOCK_TICKER_FILE")]
    tickers: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch new history for every ticker and merge it into the store
    Run {
        /// Ingestion date recorded in metadata (default: today, UTC)
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Print the ingestion plan without fetching
    Plan {
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },

    /// Show stored table statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "stock_ingest=info,warn",
        1 => "stock_ingest=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(path) = cli.tickers {
        config.storage.ticker_file = path;
    }

    match cli.command {
        Command::Run { as_of } => {
            let _t = utils::Timer::start("Ingestion run");
            let ingestion_date = as_of.unwrap_or_else(utils::today);
            let ticker_file = config.storage.ticker_file.clone();
            let pipeline = Pipeline::from_config(config)?;

            let result = match load_universe(&ticker_file) {
                Ok(universe) => pipeline.run(&universe, ingestion_date).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(report) => {
                    info!(
                        "Run succeeded: {} planned, {} fetched, {} failed, {} stale skipped",
                        report.planned,
                        report.fetched,
                        report.failed.len(),
                        report.stale
                    );
                }
                Err(e) => {
                    error!("Run failed: {}", e);
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Command::Plan { as_of } => {
            let _t = utils::Timer::start("Planning");
            let ingestion_date = as_of.unwrap_or_else(utils::today);
            let store = open_store(&config.storage)?;
            let universe = load_universe(&config.storage.ticker_file)?;
            let plan = plan_from_store(store.as_ref(), &config.pipeline, &universe, ingestion_date)?;

            println!("{} tickers planned for {}:", plan.len(), ingestion_date);
            for entry in &plan.entries {
                println!("  {:<10} {}", entry.ticker, entry.window);
            }
            if !plan.stale.is_empty() {
                println!("stale (skipped): {}", plan.stale.join(", "));
            }
            if !plan.up_to_date.is_empty() {
                println!("up to date: {}", plan.up_to_date.join(", "));
            }
        }

        Command::Stats => {
            let _t = utils::Timer::start("Stats");
            let store = open_store(&config.storage)?;
            let stats = summarize(store.as_ref())?;
            let show = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or("—".into());
            println!("─────────────────────────────────");
            println!("  Stock history — {}", store.describe());
            println!("─────────────────────────────────");
            println!("  Tickers       : {}", utils::fmt_number(stats.tickers));
            println!("  Price rows    : {}", utils::fmt_number(stats.rows));
            println!("  Metadata rows : {}", utils::fmt_number(stats.metadata_rows));
            println!("  From          : {}", show(stats.first_day));
            println!("  To            : {}", show(stats.last_day));
            println!("─────────────────────────────────");
        }
    }

    Ok(ExitCode::SUCCESS)
}
