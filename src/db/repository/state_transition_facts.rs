use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::StateTransitionFactRecord;
use crate::error::{SyncError, SyncResult};

/// Access to `state_transition_facts`.
#[derive(Debug, Clone)]
pub struct StateTransitionFactRepository {
    pool: SqlitePool,
}

impl StateTransitionFactRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts records in order, returning their ids.
    pub async fn add(
        &self,
        conn: &mut SqliteConnection,
        records: &[StateTransitionFactRecord],
    ) -> SyncResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO state_transition_facts (block_number, transaction_hash, log_index, hash)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(record.block_number)
            .bind(&record.transaction_hash)
            .bind(record.log_index)
            .bind(&record.hash)
            .execute(&mut *conn)
            .await
            .map_err(SyncError::sqlx("Failed to insert state transition fact"))?;
            ids.push(result.last_insert_rowid());
        }
        Ok(ids)
    }

    /// Fact emitted by the given transaction.
    pub async fn find_by_transaction_hash(
        &self,
        conn: &mut SqliteConnection,
        transaction_hash: &str,
    ) -> SyncResult<Option<StateTransitionFactRecord>> {
        sqlx::query_as(
            "SELECT * FROM state_transition_facts WHERE transaction_hash = ? ORDER BY id LIMIT 1",
        )
        .bind(transaction_hash)
        .fetch_optional(conn)
        .await
        .map_err(SyncError::sqlx("Failed to query state transition fact"))
    }

    pub async fn get_all(&self) -> SyncResult<Vec<StateTransitionFactRecord>> {
        sqlx::query_as("SELECT * FROM state_transition_facts ORDER BY block_number, log_index")
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to query state transition facts"))
    }

    pub async fn delete_all_after(&self, block_number: u64) -> SyncResult<u64> {
        super::delete_all_after(&self.pool, "state_transition_facts", block_number).await
    }

    pub async fn count(&self) -> SyncResult<u64> {
        super::count(&self.pool, "state_transition_facts").await
    }
}
