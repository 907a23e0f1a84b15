//! Command-line interface for the StarkEx synchronizer.
//!
//! # Commands
//!
//! - `run`: Follow the chain and keep the database in sync until Ctrl-C
//! - `status`: Print the sync cursor, freeze status and latest records
//! - `rewind --to <block>`: Move the cursor back; the next `run` resyncs from there
//!
//! # Example
//!
//! ```bash
//! starkex-sync run
//! starkex-sync status
//! starkex-sync rewind --to 15000000
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::{info, warn};

use crate::app::Application;
use crate::config::Config;
use crate::db::key_value::{FREEZE_STATUS, LAST_BLOCK_NUMBER_SYNCED};
use crate::db::repository::{PreprocessedStateDetailsRepository, StateUpdateRepository};
use crate::db::{create_pool, KeyValueStore};
use crate::error::{SyncError, SyncResult};
use crate::model::FreezeStatus;

/// StarkEx exchange state synchronizer
#[derive(Parser, Debug)]
#[command(name = "starkex-sync")]
#[command(about = "Indexes StarkEx exchange state from Ethereum", long_about = None)]
#[command(version)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Follow the chain and sync until interrupted
    Run,

    /// Print the current sync status
    Status,

    /// Move the sync cursor back to a block
    Rewind {
        /// Last block to keep
        #[arg(long)]
        to: u64,
    },
}

/// Parse CLI arguments and execute the appropriate command.
///
/// # Errors
///
/// Returns an error if configuration loading, the database or the node
/// connection fails.
pub async fn run() -> SyncResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Run => run_sync_command(&config).await,
        Commands::Status => run_status_command(&config).await,
        Commands::Rewind { to } => run_rewind_command(&config, to).await,
    }
}

async fn run_sync_command(config: &Config) -> SyncResult<()> {
    println!("{}", "🔍 Starting StarkEx sync...".cyan().bold());
    let app = Application::connect(config).await?;
    let (forwarder, poller) = app.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            println!();
            println!("{}", "🛑 Shutting down gracefully...".yellow().bold());
        }
        result = poller => {
            warn!(?result, "Block polling stopped");
        }
    }

    forwarder.abort();
    app.scheduler.wait_idle().await;
    let cursor = app.key_values.find_by_key(LAST_BLOCK_NUMBER_SYNCED).await?;
    if let Some(cursor) = cursor {
        println!("{} Last synced block: {}", "📍".cyan(), cursor.to_string().yellow());
    }
    println!("{}", "👋 Shutdown complete".green().bold());
    Ok(())
}

async fn run_status_command(config: &Config) -> SyncResult<()> {
    let pool = create_pool(config.database_url()).await?;
    let key_values = KeyValueStore::new(pool.clone());

    let cursor = key_values.find_by_key(LAST_BLOCK_NUMBER_SYNCED).await?;
    let freeze_status = key_values
        .find_by_key_with_default(FREEZE_STATUS, FreezeStatus::NotFrozen)
        .await?;
    println!(
        "{} {}",
        "Last synced block:".bold(),
        cursor.map_or_else(|| "none".dimmed().to_string(), |c| c.to_string().yellow().to_string())
    );
    let freeze_label = match freeze_status {
        FreezeStatus::NotFrozen => freeze_status.as_str().green(),
        FreezeStatus::Freezable => freeze_status.as_str().yellow(),
        FreezeStatus::Frozen => freeze_status.as_str().red(),
    };
    println!("{} {}", "Freeze status:".bold(), freeze_label.bold());

    match StateUpdateRepository::new(pool.clone()).find_last().await? {
        Some(update) => println!(
            "{} #{} at block {} ({})",
            "Last state update:".bold(),
            update.id.to_string().yellow(),
            update.block_number,
            format_timestamp(update.timestamp).dimmed()
        ),
        None => println!("{} {}", "Last state update:".bold(), "none".dimmed()),
    }

    let mut conn = pool
        .acquire()
        .await
        .map_err(SyncError::sqlx("Failed to acquire connection"))?;
    match PreprocessedStateDetailsRepository::new(pool.clone()).find_last(&mut conn).await? {
        Some(details) => {
            let l2 = details
                .cumulative_l2_transactions_statistics
                .map_or_else(|| "pending".to_string(), |s| s.total().to_string());
            println!(
                "{} #{} | forced: {} | withdrawable updates: {} | L2 total: {}",
                "Last preprocessed:".bold(),
                details.state_update_id.to_string().yellow(),
                details.forced_transaction_count,
                details.withdrawable_asset_update_count,
                l2.blue()
            );
        }
        None => println!("{} {}", "Last preprocessed:".bold(), "none".dimmed()),
    }
    Ok(())
}

async fn run_rewind_command(config: &Config, to: u64) -> SyncResult<()> {
    let pool = create_pool(config.database_url()).await?;
    let key_values = KeyValueStore::new(pool);
    let rewound = rewind(&key_values, to).await?;
    if rewound {
        println!("{} Cursor moved to block {}", "✅".green(), to.to_string().yellow());
        println!("Data above it is discarded on the next {}.", "run".bold());
    } else {
        println!("{} Cursor is already at or below block {}", "ℹ️".cyan(), to);
    }
    Ok(())
}

/// Moves the cursor back to `to`. Never moves it forward.
///
/// Returns `true` if the cursor changed.
async fn rewind(key_values: &KeyValueStore, to: u64) -> SyncResult<bool> {
    match key_values.find_by_key(LAST_BLOCK_NUMBER_SYNCED).await? {
        Some(cursor) if cursor > to => {
            warn!(from = cursor, to, "Rewinding sync cursor");
            key_values.add_or_update(LAST_BLOCK_NUMBER_SYNCED, &to).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn format_timestamp(seconds: i64) -> String {
    chrono::DateTime::from_timestamp(seconds, 0)
        .map_or_else(|| seconds.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}
