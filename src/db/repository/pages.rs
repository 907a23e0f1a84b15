use sqlx::{SqliteConnection, SqlitePool};

use crate::db::models::PageRecord;
use crate::error::{SyncError, SyncResult};

/// Access to `pages`.
#[derive(Debug, Clone)]
pub struct PageRepository {
    pool: SqlitePool,
}

impl PageRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, conn: &mut SqliteConnection, records: &[PageRecord]) -> SyncResult<Vec<i64>> {
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            let result = sqlx::query(
                r#"
                INSERT INTO pages (block_number, transaction_hash, log_index, fact_hash, page_hash, data)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(record.block_number)
            .bind(&record.transaction_hash)
            .bind(record.log_index)
            .bind(&record.fact_hash)
            .bind(&record.page_hash)
            .bind(&record.data)
            .execute(&mut *conn)
            .await
            .map_err(SyncError::sqlx("Failed to insert page"))?;
            ids.push(result.last_insert_rowid());
        }
        Ok(ids)
    }

    pub async fn get_all(&self) -> SyncResult<Vec<PageRecord>> {
        sqlx::query_as("SELECT * FROM pages ORDER BY block_number, log_index")
            .fetch_all(&self.pool)
            .await
            .map_err(SyncError::sqlx("Failed to query pages"))
    }

    pub async fn delete_all_after(&self, block_number: u64) -> SyncResult<u64> {
        super::delete_all_after(&self.pool, "pages", block_number).await
    }

    pub async fn count(&self) -> SyncResult<u64> {
        super::count(&self.pool, "pages").await
    }
}
