//! SQLite persistence for the synchronizer.
//!
//! This module provides storage for:
//! - The key/value cursor store (sync cursor, freeze status, migration number)
//! - Known block hashes for reorg detection
//! - Raw records written by the event collectors
//! - Preprocessed statistics derived from state updates
//!
//! # Architecture
//!
//! - `models`: Row and record types that map to database tables
//! - `key_value`: Typed key/value store
//! - `repository`: One repository per record table
//! - Connection pooling with SQLite WAL mode for concurrency
//! - Migration system for schema versioning
//!
//! Operations that must commit together take a `&mut SqliteConnection`, so
//! callers decide the transaction boundary with `pool.begin()`.

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::error::{SyncError, SyncResult};

pub mod key_value;
pub mod models;
pub mod repository;

pub use key_value::{Key, KeyValueStore};

/// Tables the synchronizer cannot run without.
const REQUIRED_TABLES: &[&str] = &[
    "key_values",
    "known_blocks",
    "state_transition_facts",
    "pages",
    "state_updates",
    "user_transactions",
    "withdrawable_assets",
    "l2_transactions",
    "preprocessed_state_details",
    "preprocessed_user_l2_transactions_statistics",
];

/// Creates a SQLite connection pool and applies migrations.
///
/// # Configuration
///
/// - **WAL mode**: Enables concurrent readers during writes
/// - **Busy timeout**: 30 seconds to handle lock contention
/// - **Max connections**: 5, or 1 for in-memory databases so every
///   query sees the same database
///
/// # Example
///
/// ```no_run
/// use starkex_sync::db::create_pool;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pool = create_pool("sqlite:./starkex-sync.db").await?;
///     Ok(())
/// }
/// ```
pub async fn create_pool(database_url: &str) -> SyncResult<SqlitePool> {
    info!(database_url, "Connecting to database");

    let in_memory = database_url.contains(":memory:");
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| {
            SyncError::database(
                format!("Failed to parse database URL: {database_url}"),
                Some(Box::new(e)),
            )
        })?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    let max_connections = if in_memory { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .acquire_timeout(Duration::from_secs(5))
        .connect_with(options)
        .await
        .map_err(|e| {
            SyncError::database(
                format!("Failed to connect to database at {database_url}"),
                Some(Box::new(e)),
            )
        })?;

    info!("Running database migrations");
    run_migrations(&pool).await?;
    verify_database(&pool).await?;
    info!("Database migrations complete");

    Ok(pool)
}

/// Applies all pending migrations from the `migrations/` directory.
pub async fn run_migrations(pool: &SqlitePool) -> SyncResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            SyncError::database("Failed to run database migrations", Some(Box::new(e)))
        })?;

    Ok(())
}

/// Verify that required tables exist after migrations.
pub async fn verify_database(pool: &SqlitePool) -> SyncResult<()> {
    let rows = sqlx::query_as::<_, (String,)>(
        "SELECT name FROM sqlite_master WHERE type = 'table'",
    )
    .fetch_all(pool)
    .await
    .map_err(SyncError::sqlx("Failed to verify database schema"))?;

    let missing: Vec<&str> = REQUIRED_TABLES
        .iter()
        .copied()
        .filter(|table| !rows.iter().any(|(name,)| name == table))
        .collect();

    if !missing.is_empty() {
        return Err(SyncError::database(
            format!("Database schema incomplete. Missing tables: {}", missing.join(", ")),
            None,
        ));
    }

    Ok(())
}

/// Converts a block number to its SQLite representation.
pub(crate) fn to_sql_int(value: u64) -> SyncResult<i64> {
    i64::try_from(value).map_err(|e| {
        SyncError::database(
            format!("Value {value} does not fit in a SQLite integer"),
            Some(Box::new(e)),
        )
    })
}

/// Converts a stored integer back to an unsigned block number or id.
pub(crate) fn from_sql_int(value: i64) -> SyncResult<u64> {
    u64::try_from(value).map_err(|e| {
        SyncError::database(
            format!("Negative value {value} found where unsigned expected"),
            Some(Box::new(e)),
        )
    })
}
