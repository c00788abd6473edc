//! tenpack-rewards - weekly payout runner
//!
//! Trigger for the rewards engine, meant to be run by a scheduler after each
//! week closes or by an admin. Results are printed to stdout as JSON; logs go
//! to stderr.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tenpack_common::config::{RootFolderInitializer, RootFolderResolver};
use tenpack_common::db::init::init_database;
use tenpack_common::time::{self, week_bounds};
use tenpack_rewards::rewards::min_account_age;
use tenpack_rewards::{
    compute_top_tracks, PayoutRepository, RankingMode, RewardsEngine, SqliteStore,
    SubmissionRecord, SubmissionRepository,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const MODULE_NAME: &str = "rewards";

#[derive(Debug, Parser)]
#[command(name = "tenpack-rewards", version, about = "Weekly chart rewards for Tenpack")]
struct Cli {
    /// Root folder containing tenpack.db (overrides TENPACK_ROOT_FOLDER and TOML)
    #[arg(long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pay out a finished week (default: previous week)
    Run {
        /// Any date inside the target week, YYYY-MM-DD
        #[arg(long)]
        week_start: Option<NaiveDate>,
    },
    /// Check whether a week can be paid out, without writing anything
    Check {
        #[arg(long)]
        week_start: Option<NaiveDate>,
    },
    /// Preview a week's chart (default: current week)
    Top {
        #[arg(long)]
        week_start: Option<NaiveDate>,
        #[arg(long, default_value = "all-time")]
        mode: RankingMode,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List reward rows written for a week (default: previous week)
    Rewards {
        #[arg(long)]
        week_start: Option<NaiveDate>,
    },
}

fn week_or(date: Option<NaiveDate>, default: impl FnOnce() -> DateTime<Utc>) -> DateTime<Utc> {
    date.map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or_else(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let resolver = RootFolderResolver::new(MODULE_NAME).with_cli_arg(cli.root_folder.clone());
    let config = resolver.load_config();

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting tenpack-rewards v{}", env!("CARGO_PKG_VERSION"));

    let initializer = RootFolderInitializer::new(resolver.resolve_with(&config));
    initializer.ensure_directory_exists()?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .context("Failed to open database")?;
    let store = SqliteStore::new(pool);

    match cli.command {
        Command::Run { week_start } => {
            let week = week_or(week_start, time::previous_week_start);
            let engine = RewardsEngine::new(store);

            match engine.apply_weekly_rewards(week).await {
                Ok(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
                Err(e) => {
                    error!(error = %e, "Weekly rewards failed");
                    anyhow::bail!("{}", e.user_message());
                }
            }
        }
        Command::Check { week_start } => {
            let week = week_or(week_start, time::previous_week_start);
            let engine = RewardsEngine::new(store);

            let check = engine
                .can_run_rewards_for_week(week)
                .await
                .map_err(|e| anyhow::anyhow!(e.user_message()))?;
            println!("{}", serde_json::to_string_pretty(&check)?);
        }
        Command::Top {
            week_start,
            mode,
            limit,
        } => {
            let bounds = week_bounds(week_or(week_start, time::now));
            let records = store.find_week_submissions(&bounds, min_account_age()).await?;
            let events: Vec<_> = records.iter().map(SubmissionRecord::to_event).collect();

            let mut ranked = compute_top_tracks(&events, mode);
            ranked.truncate(limit);
            println!("{}", serde_json::to_string_pretty(&ranked)?);
        }
        Command::Rewards { week_start } => {
            let bounds = week_bounds(week_or(week_start, time::previous_week_start));
            let rewards = store.find_week_rewards(bounds.start).await?;
            println!("{}", serde_json::to_string_pretty(&rewards)?);
        }
    }

    Ok(())
}
