//! Repository pattern for database operations.
//!
//! One repository per record table. Each holds the pool for standalone
//! operations; methods that take a `&mut SqliteConnection` participate in a
//! transaction owned by the caller.
//!
//! With an in-memory database the pool has a single connection, so code
//! holding an open transaction must only use the connection-taking methods.

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::db::to_sql_int;
use crate::error::{SyncError, SyncResult};

mod known_blocks;
mod l2_transactions;
mod pages;
mod preprocessed;
mod state_transition_facts;
mod state_updates;
mod user_transactions;
mod withdrawable_assets;

pub use known_blocks::KnownBlockRepository;
pub use l2_transactions::L2TransactionRepository;
pub use pages::PageRepository;
pub use preprocessed::{PreprocessedStateDetailsRepository, PreprocessedUserL2StatisticsRepository};
pub use state_transition_facts::StateTransitionFactRepository;
pub use state_updates::StateUpdateRepository;
pub use user_transactions::UserTransactionRepository;
pub use withdrawable_assets::WithdrawableAssetRepository;

/// Opens a transaction on `pool`.
pub async fn begin(pool: &SqlitePool) -> SyncResult<Transaction<'static, Sqlite>> {
    pool.begin()
        .await
        .map_err(SyncError::sqlx("Failed to start transaction"))
}

/// Commits `tx`.
pub async fn commit(tx: Transaction<'static, Sqlite>) -> SyncResult<()> {
    tx.commit()
        .await
        .map_err(SyncError::sqlx("Failed to commit transaction"))
}

/// Deletes every row of a block-numbered table above `block_number`.
async fn delete_all_after(pool: &SqlitePool, table: &'static str, block_number: u64) -> SyncResult<u64> {
    let result = sqlx::query(&format!("DELETE FROM {table} WHERE block_number > ?"))
        .bind(to_sql_int(block_number)?)
        .execute(pool)
        .await
        .map_err(SyncError::sqlx(format!("Failed to delete {table} after block {block_number}")))?;
    Ok(result.rows_affected())
}

async fn count(pool: &SqlitePool, table: &'static str) -> SyncResult<u64> {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .map_err(SyncError::sqlx(format!("Failed to count {table}")))?;
    crate::db::from_sql_int(n)
}
