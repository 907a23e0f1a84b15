use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{
    L2TransactionStatistics, PreprocessedStateDetailsRecord, PreprocessedStateDetailsRow,
    PreprocessedUserL2StatisticsRecord, PreprocessedUserL2StatisticsRow,
};
use crate::db::{from_sql_int, to_sql_int};
use crate::error::{SyncError, SyncResult};

/// Access to `preprocessed_state_details`.
#[derive(Debug, Clone)]
pub struct PreprocessedStateDetailsRepository {
    pool: SqlitePool,
}

impl PreprocessedStateDetailsRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Appends a record without L2 statistics; returns its id.
    pub async fn add(
        &self,
        conn: &mut SqliteConnection,
        record: &PreprocessedStateDetailsRecord,
    ) -> SyncResult<i64> {
        let l2 = record.l2_transactions_statistics.map(L2TransactionStatistics::to_json).transpose()?;
        let cumulative = record
            .cumulative_l2_transactions_statistics
            .map(L2TransactionStatistics::to_json)
            .transpose()?;
        let result = sqlx::query(
            r#"
            INSERT INTO preprocessed_state_details (
                state_update_id, state_transition_hash, block_number, timestamp,
                forced_transaction_count, withdrawable_asset_update_count,
                l2_transactions_statistics, cumulative_l2_transactions_statistics
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(to_sql_int(record.state_update_id)?)
        .bind(&record.state_transition_hash)
        .bind(to_sql_int(record.block_number)?)
        .bind(record.timestamp)
        .bind(to_sql_int(record.forced_transaction_count)?)
        .bind(to_sql_int(record.withdrawable_asset_update_count)?)
        .bind(l2)
        .bind(cumulative)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx(format!(
            "Failed to insert preprocessed details for state update {}",
            record.state_update_id
        )))?;
        Ok(result.last_insert_rowid())
    }

    /// Record with the highest state update id.
    pub async fn find_last(&self, conn: &mut SqliteConnection) -> SyncResult<Option<PreprocessedStateDetailsRecord>> {
        let row: Option<PreprocessedStateDetailsRow> = sqlx::query_as(
            "SELECT * FROM preprocessed_state_details ORDER BY state_update_id DESC LIMIT 1",
        )
        .fetch_optional(conn)
        .await
        .map_err(SyncError::sqlx("Failed to query last preprocessed state details"))?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn find_by_state_update_id(
        &self,
        conn: &mut SqliteConnection,
        state_update_id: u64,
    ) -> SyncResult<Option<PreprocessedStateDetailsRecord>> {
        let row: Option<PreprocessedStateDetailsRow> =
            sqlx::query_as("SELECT * FROM preprocessed_state_details WHERE state_update_id = ?")
                .bind(to_sql_int(state_update_id)?)
                .fetch_optional(conn)
                .await
                .map_err(SyncError::sqlx(format!(
                    "Failed to query preprocessed details for state update {state_update_id}"
                )))?;
        row.map(TryInto::try_into).transpose()
    }

    /// Records still missing L2 statistics up to `state_update_id`, ascending.
    pub async fn get_all_without_l2_statistics_up_to(
        &self,
        conn: &mut SqliteConnection,
        state_update_id: u64,
    ) -> SyncResult<Vec<PreprocessedStateDetailsRecord>> {
        let rows: Vec<PreprocessedStateDetailsRow> = sqlx::query_as(
            r#"
            SELECT * FROM preprocessed_state_details
            WHERE l2_transactions_statistics IS NULL AND state_update_id <= ?
            ORDER BY state_update_id
            "#,
        )
        .bind(to_sql_int(state_update_id)?)
        .fetch_all(conn)
        .await
        .map_err(SyncError::sqlx("Failed to query preprocessed details without L2 statistics"))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn update_l2_statistics(
        &self,
        conn: &mut SqliteConnection,
        id: i64,
        statistics: L2TransactionStatistics,
        cumulative: L2TransactionStatistics,
    ) -> SyncResult<()> {
        sqlx::query(
            r#"
            UPDATE preprocessed_state_details
            SET l2_transactions_statistics = ?, cumulative_l2_transactions_statistics = ?
            WHERE id = ?
            "#,
        )
        .bind(statistics.to_json()?)
        .bind(cumulative.to_json()?)
        .bind(id)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx(format!("Failed to update preprocessed details {id}")))?;
        Ok(())
    }

    pub async fn delete_by_state_update_id(&self, conn: &mut SqliteConnection, state_update_id: u64) -> SyncResult<u64> {
        let result = sqlx::query("DELETE FROM preprocessed_state_details WHERE state_update_id = ?")
            .bind(to_sql_int(state_update_id)?)
            .execute(conn)
            .await
            .map_err(SyncError::sqlx(format!(
                "Failed to delete preprocessed details for state update {state_update_id}"
            )))?;
        Ok(result.rows_affected())
    }

    pub async fn get_all(&self) -> SyncResult<Vec<PreprocessedStateDetailsRecord>> {
        let rows: Vec<PreprocessedStateDetailsRow> =
            sqlx::query_as("SELECT * FROM preprocessed_state_details ORDER BY state_update_id")
                .fetch_all(&self.pool)
                .await
                .map_err(SyncError::sqlx("Failed to query preprocessed state details"))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn delete_all(&self) -> SyncResult<u64> {
        let result = sqlx::query("DELETE FROM preprocessed_state_details")
            .execute(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to clear preprocessed state details"))?;
        Ok(result.rows_affected())
    }
}

/// Access to `preprocessed_user_l2_transactions_statistics`.
#[derive(Debug, Clone)]
pub struct PreprocessedUserL2StatisticsRepository {
    pool: SqlitePool,
}

impl PreprocessedUserL2StatisticsRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, conn: &mut SqliteConnection, record: &PreprocessedUserL2StatisticsRecord) -> SyncResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO preprocessed_user_l2_transactions_statistics (
                state_update_id, stark_key, l2_transactions_statistics,
                cumulative_l2_transactions_statistics
            )
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(to_sql_int(record.state_update_id)?)
        .bind(&record.stark_key)
        .bind(record.l2_transactions_statistics.to_json()?)
        .bind(record.cumulative_l2_transactions_statistics.to_json()?)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx("Failed to insert user L2 statistics"))?;
        Ok(result.last_insert_rowid())
    }

    /// Highest state update id with user statistics.
    pub async fn find_last_state_update_id(&self, conn: &mut SqliteConnection) -> SyncResult<Option<u64>> {
        let (id,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(state_update_id) FROM preprocessed_user_l2_transactions_statistics")
                .fetch_one(conn)
                .await
                .map_err(SyncError::sqlx("Failed to query last user L2 statistics"))?;
        id.map(from_sql_int).transpose()
    }

    pub async fn find_latest_by_stark_key(
        &self,
        conn: &mut SqliteConnection,
        stark_key: &str,
    ) -> SyncResult<Option<PreprocessedUserL2StatisticsRecord>> {
        let row: Option<PreprocessedUserL2StatisticsRow> = sqlx::query_as(
            r#"
            SELECT state_update_id, stark_key, l2_transactions_statistics,
                   cumulative_l2_transactions_statistics
            FROM preprocessed_user_l2_transactions_statistics
            WHERE stark_key = ?
            ORDER BY state_update_id DESC LIMIT 1
            "#,
        )
        .bind(stark_key)
        .fetch_optional(conn)
        .await
        .map_err(SyncError::sqlx("Failed to query user L2 statistics"))?;
        row.map(TryInto::try_into).transpose()
    }

    pub async fn delete_by_state_update_id(&self, conn: &mut SqliteConnection, state_update_id: u64) -> SyncResult<u64> {
        let result = sqlx::query(
            "DELETE FROM preprocessed_user_l2_transactions_statistics WHERE state_update_id = ?",
        )
        .bind(to_sql_int(state_update_id)?)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx("Failed to delete user L2 statistics"))?;
        Ok(result.rows_affected())
    }

    /// History of one user, oldest first.
    pub async fn get_all_by_stark_key(&self, stark_key: &str) -> SyncResult<Vec<PreprocessedUserL2StatisticsRecord>> {
        let rows: Vec<PreprocessedUserL2StatisticsRow> = sqlx::query_as(
            r#"
            SELECT state_update_id, stark_key, l2_transactions_statistics,
                   cumulative_l2_transactions_statistics
            FROM preprocessed_user_l2_transactions_statistics
            WHERE stark_key = ?
            ORDER BY state_update_id
            "#,
        )
        .bind(stark_key)
        .fetch_all(&self.pool)
        .await
        .map_err(SyncError::sqlx("Failed to query user L2 statistics"))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}
