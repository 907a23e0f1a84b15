use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::db::from_sql_int;
use crate::db::models::{PreprocessedStateDetailsRecord, StateUpdateRecord};
use crate::db::repository::{
    L2TransactionRepository, PreprocessedStateDetailsRepository, StateUpdateRepository,
    UserTransactionRepository, WithdrawableAssetRepository,
};
use crate::error::{SyncError, SyncResult};

/// Maintains `preprocessed_state_details`: one row per state update with
/// point-in-time counts and cumulative L2 statistics.
///
/// Every method runs on the caller's connection so the read of the
/// previous record and the write of the next one share a transaction.
#[derive(Debug, Clone)]
pub struct StateDetailsPreprocessor {
    details: PreprocessedStateDetailsRepository,
    state_updates: StateUpdateRepository,
    user_transactions: UserTransactionRepository,
    withdrawable_assets: WithdrawableAssetRepository,
    l2_transactions: L2TransactionRepository,
}

impl StateDetailsPreprocessor {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            details: PreprocessedStateDetailsRepository::new(pool.clone()),
            state_updates: StateUpdateRepository::new(pool.clone()),
            user_transactions: UserTransactionRepository::new(pool.clone()),
            withdrawable_assets: WithdrawableAssetRepository::new(pool.clone()),
            l2_transactions: L2TransactionRepository::new(pool),
        }
    }

    /// Appends the record for `state_update`, then fills in L2 statistics
    /// for it and any older record still waiting for L2 data.
    pub async fn preprocess_next_state_update(
        &self,
        conn: &mut SqliteConnection,
        state_update: &StateUpdateRecord,
    ) -> SyncResult<()> {
        let state_update_id = from_sql_int(state_update.id)?;
        let block_number = from_sql_int(state_update.block_number)?;

        let previous_block = if state_update_id > 1 {
            let previous = self
                .state_updates
                .find_by_id(conn, state_update_id - 1)
                .await?
                .ok_or_else(|| {
                    SyncError::invariant(
                        format!("State update {} missing before {state_update_id}", state_update_id - 1),
                        None,
                    )
                })?;
            from_sql_int(previous.block_number)?
        } else {
            0
        };

        let record = PreprocessedStateDetailsRecord {
            id: 0,
            state_update_id,
            state_transition_hash: state_update.state_transition_hash.clone(),
            block_number,
            timestamp: state_update.timestamp,
            forced_transaction_count: self
                .user_transactions
                .count_forced_in_blocks(conn, previous_block, block_number)
                .await?,
            withdrawable_asset_update_count: self
                .withdrawable_assets
                .count_in_blocks(conn, previous_block, block_number)
                .await?,
            l2_transactions_statistics: None,
            cumulative_l2_transactions_statistics: None,
        };
        self.details.add(conn, &record).await?;
        debug!(
            state_update_id,
            forced = record.forced_transaction_count,
            withdrawable = record.withdrawable_asset_update_count,
            "Preprocessed state update"
        );

        self.catch_up_l2_transactions(conn, state_update_id).await?;
        Ok(())
    }

    /// Computes L2 statistics for records up to `up_to_state_update_id`,
    /// bounded by the latest state update with L2 data.
    ///
    /// Returns the number of records updated.
    pub async fn catch_up_l2_transactions(
        &self,
        conn: &mut SqliteConnection,
        up_to_state_update_id: u64,
    ) -> SyncResult<usize> {
        let Some(latest_with_l2) = self.l2_transactions.find_latest_state_update_id(conn).await? else {
            return Ok(0);
        };
        let target = up_to_state_update_id.min(latest_with_l2);

        let pending = self
            .details
            .get_all_without_l2_statistics_up_to(conn, target)
            .await?;
        for record in &pending {
            let statistics = self
                .l2_transactions
                .get_statistics_by_state_update_id(conn, record.state_update_id)
                .await?;
            let cumulative = if record.state_update_id == 1 {
                statistics
            } else {
                let previous_id = record.state_update_id - 1;
                let previous = self
                    .details
                    .find_by_state_update_id(conn, previous_id)
                    .await?
                    .and_then(|previous| previous.cumulative_l2_transactions_statistics)
                    .ok_or_else(|| {
                        SyncError::invariant(
                            format!(
                                "Cumulative L2 statistics missing for state update {previous_id} \
                                 while catching up {}",
                                record.state_update_id
                            ),
                            None,
                        )
                    })?;
                previous + statistics
            };
            self.details
                .update_l2_statistics(conn, record.id, statistics, cumulative)
                .await?;
        }

        if !pending.is_empty() {
            debug!(count = pending.len(), target, "Caught up L2 transaction statistics");
        }
        Ok(pending.len())
    }

    /// Deletes the record of `state_update_id`.
    pub async fn rollback_one_state_update(
        &self,
        conn: &mut SqliteConnection,
        state_update_id: u64,
    ) -> SyncResult<()> {
        self.details.delete_by_state_update_id(conn, state_update_id).await?;
        Ok(())
    }
}
