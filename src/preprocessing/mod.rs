//! Incremental statistics over the state update sequence.
//!
//! [`Preprocessor::sync`] walks the preprocessed tables toward the synced
//! cursor one state update at a time: backward (rollback) when the last
//! preprocessed record is no longer canonical, forward otherwise. Each step
//! runs in its own transaction.
//!
//! Cumulative statistics satisfy `cumulative(n) = cumulative(n - 1) + point(n)`
//! with `cumulative(1) = point(1)`. L2 data can lag behind the chain, so
//! records are first written without L2 statistics and completed later by
//! [`Preprocessor::catch_up_l2_transactions`].

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{info, instrument};

use crate::db::from_sql_int;
use crate::db::models::StateUpdateRecord;
use crate::db::repository::{self, PreprocessedStateDetailsRepository, StateUpdateRepository};
use crate::error::SyncResult;

mod state_details;
mod user_statistics;

pub use state_details::StateDetailsPreprocessor;
pub use user_statistics::UserL2StatisticsPreprocessor;

/// Preprocessing entry point used by the scheduler.
#[async_trait]
pub trait PreprocessorSync: Send + Sync {
    /// Aligns the preprocessed tables with everything synced up to `cursor`.
    async fn sync(&self, cursor: u64) -> SyncResult<()>;
}

/// Next step toward the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Direction {
    Forward(StateUpdateRecord),
    Backward(u64),
    NotNeeded,
}

/// Drives [`StateDetailsPreprocessor`] and [`UserL2StatisticsPreprocessor`].
#[derive(Debug, Clone)]
pub struct Preprocessor {
    pool: SqlitePool,
    details: PreprocessedStateDetailsRepository,
    state_updates: StateUpdateRepository,
    state_details: StateDetailsPreprocessor,
    user_statistics: UserL2StatisticsPreprocessor,
}

impl Preprocessor {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            details: PreprocessedStateDetailsRepository::new(pool.clone()),
            state_updates: StateUpdateRepository::new(pool.clone()),
            state_details: StateDetailsPreprocessor::new(pool.clone()),
            user_statistics: UserL2StatisticsPreprocessor::new(pool.clone()),
            pool,
        }
    }

    async fn direction(&self, conn: &mut SqliteConnection, cursor: u64) -> SyncResult<Direction> {
        let next_id = match self.details.find_last(conn).await? {
            None => 1,
            Some(last) => {
                if last.block_number > cursor {
                    return Ok(Direction::Backward(last.state_update_id));
                }
                let canonical = self
                    .state_updates
                    .find_by_id(conn, last.state_update_id)
                    .await?
                    .is_some_and(|update| update.state_transition_hash == last.state_transition_hash);
                if !canonical {
                    return Ok(Direction::Backward(last.state_update_id));
                }
                last.state_update_id + 1
            }
        };

        match self.state_updates.find_by_id(conn, next_id).await? {
            Some(update) if from_sql_int(update.block_number)? <= cursor => Ok(Direction::Forward(update)),
            _ => Ok(Direction::NotNeeded),
        }
    }

    /// Fills in L2 statistics that arrived after their state update was
    /// preprocessed.
    #[instrument(skip(self))]
    pub async fn catch_up_l2_transactions(&self) -> SyncResult<()> {
        let mut tx = repository::begin(&self.pool).await?;
        if let Some(last) = self.details.find_last(&mut tx).await? {
            self.state_details
                .catch_up_l2_transactions(&mut tx, last.state_update_id)
                .await?;
            self.user_statistics.catch_up(&mut tx, last.state_update_id).await?;
        }
        repository::commit(tx).await
    }
}

#[async_trait]
impl PreprocessorSync for Preprocessor {
    #[instrument(skip(self))]
    async fn sync(&self, cursor: u64) -> SyncResult<()> {
        let mut forward = 0u64;
        let mut backward = 0u64;
        loop {
            let mut tx = repository::begin(&self.pool).await?;
            match self.direction(&mut tx, cursor).await? {
                Direction::Backward(state_update_id) => {
                    self.state_details
                        .rollback_one_state_update(&mut tx, state_update_id)
                        .await?;
                    self.user_statistics
                        .rollback_one_state_update(&mut tx, state_update_id)
                        .await?;
                    backward += 1;
                }
                Direction::Forward(update) => {
                    let state_update_id = from_sql_int(update.id)?;
                    self.state_details
                        .preprocess_next_state_update(&mut tx, &update)
                        .await?;
                    self.user_statistics.catch_up(&mut tx, state_update_id).await?;
                    forward += 1;
                }
                Direction::NotNeeded => break,
            }
            repository::commit(tx).await?;
        }
        if forward + backward > 0 {
            info!(cursor, forward, backward, "Preprocessing done");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use crate::db::models::{L2TransactionRecord, L2TransactionStatistics};
    use crate::db::repository::{L2TransactionRepository, PreprocessedUserL2StatisticsRepository};

    async fn add_state_update(pool: &SqlitePool, id: i64, block_number: i64, hash: &str) {
        let mut tx = repository::begin(pool).await.expect("begin");
        StateUpdateRepository::new(pool.clone())
            .add(
                &mut tx,
                &[StateUpdateRecord {
                    id,
                    block_number,
                    transaction_hash: format!("0x{id:064x}"),
                    state_transition_hash: hash.to_string(),
                    sequence_number: id.to_string(),
                    batch_id: id.to_string(),
                    vault_root: "0x01".to_string(),
                    order_root: "0x02".to_string(),
                    timestamp: block_number * 10,
                }],
            )
            .await
            .expect("add");
        repository::commit(tx).await.expect("commit");
    }

    async fn add_l2(pool: &SqlitePool, state_update_id: i64, kind: &str, key: &str, count: usize) {
        let repository = L2TransactionRepository::new(pool.clone());
        for i in 0..count {
            repository
                .add(&L2TransactionRecord {
                    id: 0,
                    state_update_id,
                    transaction_id: state_update_id * 100 + i as i64,
                    kind: kind.to_string(),
                    stark_key_a: Some(key.to_string()),
                    stark_key_b: None,
                    is_replaced: false,
                })
                .await
                .expect("add l2");
        }
    }

    fn deposits(n: u64) -> L2TransactionStatistics {
        let mut stats = L2TransactionStatistics::default();
        stats.record("Deposit", n);
        stats
    }

    #[tokio::test]
    async fn test_forward_then_backward() {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        add_state_update(&pool, 1, 110, "0xa1").await;
        add_state_update(&pool, 2, 120, "0xa2").await;
        add_state_update(&pool, 3, 130, "0xa3").await;
        for id in 1..=3 {
            add_l2(&pool, id, "Deposit", "0x01", 1).await;
        }
        let preprocessor = Preprocessor::new(pool.clone());
        let details = PreprocessedStateDetailsRepository::new(pool.clone());
        let users = PreprocessedUserL2StatisticsRepository::new(pool.clone());

        preprocessor.sync(125).await.expect("sync");
        let ids: Vec<_> = details.get_all().await.expect("all").iter().map(|d| d.state_update_id).collect();
        assert_eq!(ids, vec![1, 2]);

        preprocessor.sync(130).await.expect("sync");
        assert_eq!(details.get_all().await.expect("all").len(), 3);
        let user_ids: Vec<_> = users
            .get_all_by_stark_key("0x01")
            .await
            .expect("user")
            .iter()
            .map(|u| u.state_update_id)
            .collect();
        assert_eq!(user_ids, vec![1, 2, 3]);

        preprocessor.sync(115).await.expect("sync");
        let ids: Vec<_> = details.get_all().await.expect("all").iter().map(|d| d.state_update_id).collect();
        assert_eq!(ids, vec![1]);
        let remaining = users.get_all_by_stark_key("0x01").await.expect("user");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].state_update_id, 1);
        assert_eq!(remaining[0].cumulative_l2_transactions_statistics, deposits(1));
    }

    #[tokio::test]
    async fn test_replaced_state_update_is_rolled_back_and_redone() {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        add_state_update(&pool, 1, 110, "0xa1").await;
        add_state_update(&pool, 2, 120, "0xa2").await;
        let preprocessor = Preprocessor::new(pool.clone());
        preprocessor.sync(200).await.expect("sync");

        // Reorg replaces update 2 with a different fact at a lower block
        StateUpdateRepository::new(pool.clone()).delete_all_after(110).await.expect("delete");
        add_state_update(&pool, 2, 115, "0xb2").await;
        preprocessor.sync(200).await.expect("sync");

        let all = PreprocessedStateDetailsRepository::new(pool).get_all().await.expect("all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].state_transition_hash, "0xb2");
        assert_eq!(all[1].block_number, 115);
    }

    #[tokio::test]
    async fn test_cumulative_with_lagging_l2_data() {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        for id in 1..=3 {
            add_state_update(&pool, id, 100 + id * 10, &format!("0xa{id}")).await;
        }
        add_l2(&pool, 1, "Deposit", "0x01", 2).await;
        let preprocessor = Preprocessor::new(pool.clone());
        let details = PreprocessedStateDetailsRepository::new(pool.clone());

        preprocessor.sync(200).await.expect("sync");
        let all = details.get_all().await.expect("all");
        assert_eq!(all[0].cumulative_l2_transactions_statistics, Some(deposits(2)));
        assert_eq!(all[1].l2_transactions_statistics, None);
        assert_eq!(all[2].l2_transactions_statistics, None);

        add_l2(&pool, 2, "Deposit", "0x01", 3).await;
        add_l2(&pool, 3, "Deposit", "0x02", 1).await;
        preprocessor.catch_up_l2_transactions().await.expect("catch up");

        let all = details.get_all().await.expect("all");
        assert_eq!(all[1].l2_transactions_statistics, Some(deposits(3)));
        assert_eq!(all[1].cumulative_l2_transactions_statistics, Some(deposits(5)));
        assert_eq!(all[2].cumulative_l2_transactions_statistics, Some(deposits(6)));
        for pair in all.windows(2) {
            let previous = pair[0].cumulative_l2_transactions_statistics.expect("cumulative");
            let current = pair[1].l2_transactions_statistics.expect("point");
            assert_eq!(pair[1].cumulative_l2_transactions_statistics, Some(previous + current));
        }

        let users = PreprocessedUserL2StatisticsRepository::new(pool);
        let first = users.get_all_by_stark_key("0x01").await.expect("user");
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].cumulative_l2_transactions_statistics, deposits(5));
        let second = users.get_all_by_stark_key("0x02").await.expect("user");
        assert_eq!(second[0].cumulative_l2_transactions_statistics, deposits(1));
    }

    #[tokio::test]
    async fn test_missing_previous_cumulative_is_invariant_error() {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        add_state_update(&pool, 1, 110, "0xa1").await;
        add_state_update(&pool, 2, 120, "0xa2").await;
        let preprocessor = Preprocessor::new(pool.clone());
        preprocessor.sync(200).await.expect("sync");

        add_l2(&pool, 2, "Trade", "0x01", 1).await;
        let mut tx = repository::begin(&pool).await.expect("begin");
        PreprocessedStateDetailsRepository::new(pool.clone())
            .delete_by_state_update_id(&mut tx, 1)
            .await
            .expect("delete");
        let state_details = StateDetailsPreprocessor::new(pool.clone());
        let result = state_details.catch_up_l2_transactions(&mut tx, 2).await;
        assert!(matches!(result, Err(crate::error::SyncError::InvariantError { .. })));
    }
}
