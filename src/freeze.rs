//! Freeze status tracking.
//!
//! The exchange becomes *freezable* when a forced request has waited longer
//! than the grace period without being included in a state update, and
//! *frozen* once `LogFrozen` is observed on chain. `frozen` is terminal.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::db::key_value::FREEZE_STATUS;
use crate::db::repository::{StateUpdateRepository, UserTransactionRepository};
use crate::db::{from_sql_int, KeyValueStore};
use crate::error::SyncResult;
use crate::model::FreezeStatus;
use crate::rpc::EthereumClient;

/// Default time an operator has to serve a forced request.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Persists the freeze status.
#[async_trait]
pub trait FreezeStatusUpdater: Send + Sync {
    /// Recomputes the status from collected data and stores it.
    async fn update_freeze_status(&self) -> SyncResult<FreezeStatus>;

    /// Raises the stored status to at least `status`; returns the stored value.
    async fn set_freeze_status(&self, status: FreezeStatus) -> SyncResult<FreezeStatus>;
}

/// Derives the freeze status from pending forced requests.
pub struct FreezeCheckService {
    client: Arc<dyn EthereumClient>,
    key_values: KeyValueStore,
    state_updates: StateUpdateRepository,
    user_transactions: UserTransactionRepository,
    grace_period: Duration,
}

impl FreezeCheckService {
    #[must_use]
    pub fn new(client: Arc<dyn EthereumClient>, pool: SqlitePool, grace_period: Duration) -> Self {
        Self {
            client,
            key_values: KeyValueStore::new(pool.clone()),
            state_updates: StateUpdateRepository::new(pool.clone()),
            user_transactions: UserTransactionRepository::new(pool),
            grace_period,
        }
    }

    /// Currently stored status.
    pub async fn freeze_status(&self) -> SyncResult<FreezeStatus> {
        self.key_values
            .find_by_key_with_default(FREEZE_STATUS, FreezeStatus::NotFrozen)
            .await
    }

    /// Status implied by the oldest forced request not yet covered by a
    /// state update.
    async fn compute_status(&self) -> SyncResult<FreezeStatus> {
        let last_update_block = match self.state_updates.find_last().await? {
            Some(update) => from_sql_int(update.block_number)?,
            None => 0,
        };
        let Some(oldest) = self
            .user_transactions
            .find_oldest_forced_after(last_update_block)
            .await?
        else {
            return Ok(FreezeStatus::NotFrozen);
        };

        let head = self.client.get_block_number().await?;
        let now = self.client.get_block_timestamp(head).await?;
        let waited = now.saturating_sub(from_sql_int(oldest.timestamp)?);
        if waited > self.grace_period.as_secs() {
            warn!(
                transaction_hash = %oldest.transaction_hash,
                block_number = oldest.block_number,
                waited_secs = waited,
                "Forced request outlived the grace period"
            );
            Ok(FreezeStatus::Freezable)
        } else {
            Ok(FreezeStatus::NotFrozen)
        }
    }

    async fn store(&self, previous: FreezeStatus, status: FreezeStatus) -> SyncResult<()> {
        if previous != status {
            info!(from = %previous, to = %status, "Freeze status changed");
            self.key_values.add_or_update(FREEZE_STATUS, &status).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl FreezeStatusUpdater for FreezeCheckService {
    #[instrument(skip(self))]
    async fn update_freeze_status(&self) -> SyncResult<FreezeStatus> {
        let current = self.freeze_status().await?;
        if current == FreezeStatus::Frozen {
            return Ok(current);
        }
        let status = self.compute_status().await?;
        self.store(current, status).await?;
        Ok(status)
    }

    #[instrument(skip(self))]
    async fn set_freeze_status(&self, status: FreezeStatus) -> SyncResult<FreezeStatus> {
        let current = self.freeze_status().await?;
        let escalated = current.max(status);
        self.store(current, escalated).await?;
        Ok(escalated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::MockChain;
    use crate::db::create_pool;
    use crate::db::models::{StateUpdateRecord, UserTransactionAddRecord, UserTransactionData};
    use crate::db::repository;

    async fn service_with_head(head_block: u64) -> (FreezeCheckService, SqlitePool) {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        let mut chain = MockChain::default();
        // Head block number derives from the stored logs
        chain.logs.push(alloy::rpc::types::Log {
            block_number: Some(head_block),
            ..Default::default()
        });
        let service = FreezeCheckService::new(Arc::new(chain), pool.clone(), Duration::from_secs(100));
        (service, pool)
    }

    async fn add_forced(pool: &SqlitePool, block_number: i64, timestamp: i64) {
        let mut tx = repository::begin(pool).await.expect("begin");
        UserTransactionRepository::new(pool.clone())
            .add(
                &mut tx,
                &UserTransactionAddRecord {
                    block_number,
                    transaction_hash: format!("0x{block_number:064x}"),
                    log_index: 0,
                    timestamp,
                    data: UserTransactionData::FullWithdrawal {
                        stark_key: "0x01".to_string(),
                        vault_id: "1".to_string(),
                    },
                },
            )
            .await
            .expect("add");
        repository::commit(tx).await.expect("commit");
    }

    async fn add_state_update(pool: &SqlitePool, block_number: i64) {
        let mut tx = repository::begin(pool).await.expect("begin");
        StateUpdateRepository::new(pool.clone())
            .add(
                &mut tx,
                &[StateUpdateRecord {
                    id: 1,
                    block_number,
                    transaction_hash: "0xaa".to_string(),
                    state_transition_hash: "0xbb".to_string(),
                    sequence_number: "1".to_string(),
                    batch_id: "1".to_string(),
                    vault_root: "0x01".to_string(),
                    order_root: "0x02".to_string(),
                    timestamp: 0,
                }],
            )
            .await
            .expect("add");
        repository::commit(tx).await.expect("commit");
    }

    #[tokio::test]
    async fn test_no_pending_requests_is_not_frozen() {
        let (service, _pool) = service_with_head(50).await;
        assert_eq!(service.update_freeze_status().await.expect("update"), FreezeStatus::NotFrozen);
    }

    #[tokio::test]
    async fn test_old_pending_request_is_freezable() {
        // Head timestamp is 50 * 10 = 500
        let (service, pool) = service_with_head(50).await;
        add_forced(&pool, 20, 300).await;
        assert_eq!(service.update_freeze_status().await.expect("update"), FreezeStatus::Freezable);
        assert_eq!(service.freeze_status().await.expect("read"), FreezeStatus::Freezable);
    }

    #[tokio::test]
    async fn test_request_within_grace_period_is_not_frozen() {
        let (service, pool) = service_with_head(50).await;
        add_forced(&pool, 20, 450).await;
        assert_eq!(service.update_freeze_status().await.expect("update"), FreezeStatus::NotFrozen);
    }

    #[tokio::test]
    async fn test_request_covered_by_state_update_is_not_pending() {
        let (service, pool) = service_with_head(50).await;
        add_forced(&pool, 20, 300).await;
        add_state_update(&pool, 30).await;
        assert_eq!(service.update_freeze_status().await.expect("update"), FreezeStatus::NotFrozen);
    }

    #[tokio::test]
    async fn test_frozen_is_terminal() {
        let (service, pool) = service_with_head(50).await;
        assert_eq!(
            service.set_freeze_status(FreezeStatus::Frozen).await.expect("set"),
            FreezeStatus::Frozen
        );
        assert_eq!(
            service.set_freeze_status(FreezeStatus::Freezable).await.expect("set"),
            FreezeStatus::Frozen
        );
        add_state_update(&pool, 30).await;
        assert_eq!(service.update_freeze_status().await.expect("update"), FreezeStatus::Frozen);
    }
}
