use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::db::models::PreprocessedUserL2StatisticsRecord;
use crate::db::repository::{L2TransactionRepository, PreprocessedUserL2StatisticsRepository};
use crate::error::SyncResult;

/// Per stark key L2 statistics with a running total per user.
#[derive(Debug, Clone)]
pub struct UserL2StatisticsPreprocessor {
    statistics: PreprocessedUserL2StatisticsRepository,
    l2_transactions: L2TransactionRepository,
}

impl UserL2StatisticsPreprocessor {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            statistics: PreprocessedUserL2StatisticsRepository::new(pool.clone()),
            l2_transactions: L2TransactionRepository::new(pool),
        }
    }

    /// Adds rows for every state update after the last processed one, up to
    /// `up_to_state_update_id` and the latest state update with L2 data.
    pub async fn catch_up(&self, conn: &mut SqliteConnection, up_to_state_update_id: u64) -> SyncResult<()> {
        let Some(latest_with_l2) = self.l2_transactions.find_latest_state_update_id(conn).await? else {
            return Ok(());
        };
        let target = up_to_state_update_id.min(latest_with_l2);
        let start = self
            .statistics
            .find_last_state_update_id(conn)
            .await?
            .map_or(1, |id| id + 1);

        for state_update_id in start..=target {
            let stark_keys = self
                .l2_transactions
                .get_stark_keys_by_state_update_id(conn, state_update_id)
                .await?;
            for stark_key in stark_keys {
                let statistics = self
                    .l2_transactions
                    .get_statistics_by_state_update_id_and_stark_key(conn, state_update_id, &stark_key)
                    .await?;
                let cumulative = match self.statistics.find_latest_by_stark_key(conn, &stark_key).await? {
                    Some(previous) => previous.cumulative_l2_transactions_statistics + statistics,
                    None => statistics,
                };
                let record = PreprocessedUserL2StatisticsRecord {
                    state_update_id,
                    stark_key,
                    l2_transactions_statistics: statistics,
                    cumulative_l2_transactions_statistics: cumulative,
                };
                self.statistics.add(conn, &record).await?;
            }
            debug!(state_update_id, "Preprocessed user L2 statistics");
        }
        Ok(())
    }

    pub async fn rollback_one_state_update(
        &self,
        conn: &mut SqliteConnection,
        state_update_id: u64,
    ) -> SyncResult<()> {
        self.statistics
            .delete_by_state_update_id(conn, state_update_id)
            .await?;
        Ok(())
    }
}
