use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{UserTransactionAddRecord, UserTransactionData, UserTransactionRecord};
use crate::db::{from_sql_int, to_sql_int};
use crate::error::{SyncError, SyncResult};

const FORCED_FILTER: &str = "type IN ('ForcedWithdrawal', 'ForcedTrade', 'FullWithdrawal')";

/// Access to `user_transactions`.
#[derive(Debug, Clone)]
pub struct UserTransactionRepository {
    pool: SqlitePool,
}

impl UserTransactionRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, conn: &mut SqliteConnection, record: &UserTransactionAddRecord) -> SyncResult<i64> {
        let data = serde_json::to_string(&record.data).map_err(|e| {
            SyncError::database("Failed to encode user transaction payload", Some(Box::new(e)))
        })?;
        let result = sqlx::query(
            r#"
            INSERT INTO user_transactions (
                type, stark_key_a, stark_key_b, block_number, transaction_hash,
                log_index, timestamp, data
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.data.type_name())
        .bind(record.data.stark_key_a())
        .bind(record.data.stark_key_b())
        .bind(record.block_number)
        .bind(&record.transaction_hash)
        .bind(record.log_index)
        .bind(record.timestamp)
        .bind(data)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx("Failed to insert user transaction"))?;
        Ok(result.last_insert_rowid())
    }

    /// Forced requests in blocks `(after_block, up_to_block]`.
    pub async fn count_forced_in_blocks(
        &self,
        conn: &mut SqliteConnection,
        after_block: u64,
        up_to_block: u64,
    ) -> SyncResult<u64> {
        let (n,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM user_transactions WHERE {FORCED_FILTER} AND block_number > ? AND block_number <= ?"
        ))
        .bind(to_sql_int(after_block)?)
        .bind(to_sql_int(up_to_block)?)
        .fetch_one(conn)
        .await
        .map_err(SyncError::sqlx("Failed to count forced transactions"))?;
        from_sql_int(n)
    }

    /// Oldest forced request recorded in a block above `block_number`.
    pub async fn find_oldest_forced_after(&self, block_number: u64) -> SyncResult<Option<UserTransactionRecord>> {
        sqlx::query_as(&format!(
            "SELECT * FROM user_transactions WHERE {FORCED_FILTER} AND block_number > ? \
             ORDER BY block_number, log_index LIMIT 1"
        ))
        .bind(to_sql_int(block_number)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(SyncError::sqlx("Failed to query pending forced transactions"))
    }

    pub async fn get_all(&self) -> SyncResult<Vec<UserTransactionRecord>> {
        sqlx::query_as("SELECT * FROM user_transactions ORDER BY block_number, log_index, id")
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to query user transactions"))
    }

    /// Payloads of every stored transaction, in chain order.
    pub async fn get_all_data(&self) -> SyncResult<Vec<UserTransactionData>> {
        self.get_all()
            .await?
            .iter()
            .map(UserTransactionRecord::data)
            .collect()
    }

    pub async fn delete_all_after(&self, block_number: u64) -> SyncResult<u64> {
        super::delete_all_after(&self.pool, "user_transactions", block_number).await
    }

    pub async fn delete_all(&self) -> SyncResult<u64> {
        let result = sqlx::query("DELETE FROM user_transactions")
            .execute(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to clear user transactions"))?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> SyncResult<u64> {
        super::count(&self.pool, "user_transactions").await
    }
}
