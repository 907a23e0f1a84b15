use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::{L2TransactionRecord, L2TransactionStatistics};
use crate::db::{from_sql_int, to_sql_int};
use crate::error::{SyncError, SyncResult};

/// Read access to `l2_transactions`, plus the insert used by the L2 feed.
#[derive(Debug, Clone)]
pub struct L2TransactionRepository {
    pool: SqlitePool,
}

impl L2TransactionRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, record: &L2TransactionRecord) -> SyncResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO l2_transactions (
                state_update_id, transaction_id, type, stark_key_a, stark_key_b, is_replaced
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.state_update_id)
        .bind(record.transaction_id)
        .bind(&record.kind)
        .bind(&record.stark_key_a)
        .bind(&record.stark_key_b)
        .bind(record.is_replaced)
        .execute(&self.pool)
        .await
        .map_err(SyncError::sqlx("Failed to insert L2 transaction"))?;
        Ok(result.last_insert_rowid())
    }

    /// Latest state update for which L2 data exists.
    pub async fn find_latest_state_update_id(&self, conn: &mut SqliteConnection) -> SyncResult<Option<u64>> {
        let (id,): (Option<i64>,) = sqlx::query_as("SELECT MAX(state_update_id) FROM l2_transactions")
            .fetch_one(conn)
            .await
            .map_err(SyncError::sqlx("Failed to query latest L2 state update"))?;
        id.map(from_sql_int).transpose()
    }

    pub async fn get_statistics_by_state_update_id(
        &self,
        conn: &mut SqliteConnection,
        state_update_id: u64,
    ) -> SyncResult<L2TransactionStatistics> {
        let rows: Vec<(String, bool, i64)> = sqlx::query_as(
            r#"
            SELECT type, is_replaced, COUNT(*) FROM l2_transactions
            WHERE state_update_id = ?
            GROUP BY type, is_replaced
            "#,
        )
        .bind(to_sql_int(state_update_id)?)
        .fetch_all(conn)
        .await
        .map_err(SyncError::sqlx(format!(
            "Failed to query L2 statistics for state update {state_update_id}"
        )))?;
        aggregate(rows)
    }

    /// Stark keys with L2 activity in a state update, sorted.
    pub async fn get_stark_keys_by_state_update_id(
        &self,
        conn: &mut SqliteConnection,
        state_update_id: u64,
    ) -> SyncResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT stark_key_a FROM l2_transactions WHERE state_update_id = ? AND stark_key_a IS NOT NULL
            UNION
            SELECT stark_key_b FROM l2_transactions WHERE state_update_id = ? AND stark_key_b IS NOT NULL
            ORDER BY 1
            "#,
        )
        .bind(to_sql_int(state_update_id)?)
        .bind(to_sql_int(state_update_id)?)
        .fetch_all(conn)
        .await
        .map_err(SyncError::sqlx("Failed to query L2 stark keys"))?;
        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    pub async fn get_statistics_by_state_update_id_and_stark_key(
        &self,
        conn: &mut SqliteConnection,
        state_update_id: u64,
        stark_key: &str,
    ) -> SyncResult<L2TransactionStatistics> {
        let rows: Vec<(String, bool, i64)> = sqlx::query_as(
            r#"
            SELECT type, is_replaced, COUNT(*) FROM l2_transactions
            WHERE state_update_id = ? AND (stark_key_a = ? OR stark_key_b = ?)
            GROUP BY type, is_replaced
            "#,
        )
        .bind(to_sql_int(state_update_id)?)
        .bind(stark_key)
        .bind(stark_key)
        .fetch_all(conn)
        .await
        .map_err(SyncError::sqlx("Failed to query user L2 statistics"))?;
        aggregate(rows)
    }
}

fn aggregate(rows: Vec<(String, bool, i64)>) -> SyncResult<L2TransactionStatistics> {
    let mut stats = L2TransactionStatistics::default();
    for (kind, is_replaced, n) in rows {
        let n = from_sql_int(n)?;
        if is_replaced {
            stats.replaced_transactions_count += n;
        } else {
            stats.record(&kind, n);
        }
    }
    Ok(stats)
}
