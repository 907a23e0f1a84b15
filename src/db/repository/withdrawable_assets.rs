use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::WithdrawableAssetRecord;
use crate::db::{from_sql_int, to_sql_int};
use crate::error::{SyncError, SyncResult};

/// Access to `withdrawable_assets`.
#[derive(Debug, Clone)]
pub struct WithdrawableAssetRepository {
    pool: SqlitePool,
}

impl WithdrawableAssetRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, conn: &mut SqliteConnection, record: &WithdrawableAssetRecord) -> SyncResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO withdrawable_assets (
                block_number, transaction_hash, timestamp, stark_key, asset_hash, balance_delta
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.block_number)
        .bind(&record.transaction_hash)
        .bind(record.timestamp)
        .bind(&record.stark_key)
        .bind(&record.asset_hash)
        .bind(&record.balance_delta)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx("Failed to insert withdrawable asset"))?;
        Ok(result.last_insert_rowid())
    }

    /// Rows in blocks `(after_block, up_to_block]`.
    pub async fn count_in_blocks(
        &self,
        conn: &mut SqliteConnection,
        after_block: u64,
        up_to_block: u64,
    ) -> SyncResult<u64> {
        let (n,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM withdrawable_assets WHERE block_number > ? AND block_number <= ?",
        )
        .bind(to_sql_int(after_block)?)
        .bind(to_sql_int(up_to_block)?)
        .fetch_one(conn)
        .await
        .map_err(SyncError::sqlx("Failed to count withdrawable assets"))?;
        from_sql_int(n)
    }

    pub async fn get_all(&self) -> SyncResult<Vec<WithdrawableAssetRecord>> {
        sqlx::query_as("SELECT * FROM withdrawable_assets ORDER BY block_number, id")
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to query withdrawable assets"))
    }

    pub async fn delete_all_after(&self, block_number: u64) -> SyncResult<u64> {
        super::delete_all_after(&self.pool, "withdrawable_assets", block_number).await
    }
}
