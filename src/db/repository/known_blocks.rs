use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::parse_hash;
use crate::db::{from_sql_int, to_sql_int};
use crate::error::{SyncError, SyncResult};
use crate::model::BlockRecord;

type KnownBlockRow = (i64, String, String, i64);

fn to_record((number, hash, parent_hash, timestamp): KnownBlockRow) -> SyncResult<BlockRecord> {
    Ok(BlockRecord::new(
        from_sql_int(number)?,
        parse_hash(&hash)?,
        parse_hash(&parent_hash)?,
        from_sql_int(timestamp)?,
    ))
}

/// Recent canonical block hashes kept for reorg detection.
#[derive(Debug, Clone)]
pub struct KnownBlockRepository {
    pool: SqlitePool,
}

impl KnownBlockRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add_or_replace(&self, conn: &mut SqliteConnection, block: &BlockRecord) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO known_blocks (block_number, block_hash, parent_hash, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(to_sql_int(block.number)?)
        .bind(format!("{:?}", block.hash))
        .bind(format!("{:?}", block.parent_hash))
        .bind(to_sql_int(block.timestamp)?)
        .execute(conn)
        .await
        .map_err(SyncError::sqlx(format!("Failed to store known block {}", block.number)))?;
        Ok(())
    }

    pub async fn find_by_number(&self, block_number: u64) -> SyncResult<Option<BlockRecord>> {
        let row: Option<KnownBlockRow> = sqlx::query_as(
            "SELECT block_number, block_hash, parent_hash, timestamp FROM known_blocks WHERE block_number = ?",
        )
        .bind(to_sql_int(block_number)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(SyncError::sqlx("Failed to query known block"))?;
        row.map(to_record).transpose()
    }

    pub async fn find_last(&self) -> SyncResult<Option<BlockRecord>> {
        let row: Option<KnownBlockRow> = sqlx::query_as(
            "SELECT block_number, block_hash, parent_hash, timestamp FROM known_blocks ORDER BY block_number DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(SyncError::sqlx("Failed to query last known block"))?;
        row.map(to_record).transpose()
    }

    /// Known blocks above `block_number`, ascending.
    pub async fn get_all_after(&self, block_number: u64) -> SyncResult<Vec<BlockRecord>> {
        let rows: Vec<KnownBlockRow> = sqlx::query_as(
            r#"
            SELECT block_number, block_hash, parent_hash, timestamp FROM known_blocks
            WHERE block_number > ? ORDER BY block_number
            "#,
        )
        .bind(to_sql_int(block_number)?)
        .fetch_all(&self.pool)
        .await
        .map_err(SyncError::sqlx("Failed to query known blocks"))?;
        rows.into_iter().map(to_record).collect()
    }

    pub async fn delete_after(&self, conn: &mut SqliteConnection, block_number: u64) -> SyncResult<u64> {
        let result = sqlx::query("DELETE FROM known_blocks WHERE block_number > ?")
            .bind(to_sql_int(block_number)?)
            .execute(conn)
            .await
            .map_err(SyncError::sqlx("Failed to delete known blocks"))?;
        Ok(result.rows_affected())
    }

    /// Drops blocks below `block_number`.
    pub async fn prune_before(&self, block_number: u64) -> SyncResult<u64> {
        let result = sqlx::query("DELETE FROM known_blocks WHERE block_number < ?")
            .bind(to_sql_int(block_number)?)
            .execute(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to prune known blocks"))?;
        Ok(result.rows_affected())
    }
}
