use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::StateUpdateRecord;
use crate::db::{from_sql_int, to_sql_int};
use crate::error::{SyncError, SyncResult};

/// Access to `state_updates`.
#[derive(Debug, Clone)]
pub struct StateUpdateRepository {
    pool: SqlitePool,
}

impl StateUpdateRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts records with their preassigned ids.
    pub async fn add(&self, conn: &mut SqliteConnection, records: &[StateUpdateRecord]) -> SyncResult<()> {
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO state_updates (
                    id, block_number, transaction_hash, state_transition_hash,
                    sequence_number, batch_id, vault_root, order_root, timestamp
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.id)
            .bind(record.block_number)
            .bind(&record.transaction_hash)
            .bind(&record.state_transition_hash)
            .bind(&record.sequence_number)
            .bind(&record.batch_id)
            .bind(&record.vault_root)
            .bind(&record.order_root)
            .bind(record.timestamp)
            .execute(&mut *conn)
            .await
            .map_err(SyncError::sqlx(format!("Failed to insert state update {}", record.id)))?;
        }
        Ok(())
    }

    /// Highest stored id.
    pub async fn find_last_id(&self, conn: &mut SqliteConnection) -> SyncResult<Option<u64>> {
        let (id,): (Option<i64>,) = sqlx::query_as("SELECT MAX(id) FROM state_updates")
            .fetch_one(conn)
            .await
            .map_err(SyncError::sqlx("Failed to query last state update id"))?;
        id.map(from_sql_int).transpose()
    }

    pub async fn find_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: u64,
    ) -> SyncResult<Option<StateUpdateRecord>> {
        sqlx::query_as("SELECT * FROM state_updates WHERE id = ?")
            .bind(to_sql_int(id)?)
            .fetch_optional(conn)
            .await
            .map_err(SyncError::sqlx(format!("Failed to query state update {id}")))
    }

    /// Most recent state update.
    pub async fn find_last(&self) -> SyncResult<Option<StateUpdateRecord>> {
        sqlx::query_as("SELECT * FROM state_updates ORDER BY id DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to query last state update"))
    }

    /// Row count and highest id, used to check that ids are contiguous.
    pub async fn count_and_max_id(&self) -> SyncResult<(u64, Option<u64>)> {
        let (count, max): (i64, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MAX(id) FROM state_updates")
                .fetch_one(&self.pool)
                .await
                .map_err(SyncError::sqlx("Failed to count state updates"))?;
        Ok((from_sql_int(count)?, max.map(from_sql_int).transpose()?))
    }

    pub async fn get_all(&self) -> SyncResult<Vec<StateUpdateRecord>> {
        sqlx::query_as("SELECT * FROM state_updates ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to query state updates"))
    }

    pub async fn delete_all_after(&self, block_number: u64) -> SyncResult<u64> {
        super::delete_all_after(&self.pool, "state_updates", block_number).await
    }
}
