use std::sync::Arc;

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::{sort_logs, BlockTimestamps, Collector, LogMeta};
use crate::db::models::{hash_to_hex, word_to_hex, StateUpdateRecord};
use crate::db::repository::{self, StateTransitionFactRepository, StateUpdateRepository};
use crate::db::to_sql_int;
use crate::error::{SyncError, SyncResult};
use crate::events::{decode_log, LogRootUpdate};
use crate::model::BlockRange;
use crate::rpc::{EthereumClient, LogFilter};

/// Collects `LogRootUpdate` into sequentially numbered state updates.
///
/// Each root update is joined to the state transition fact emitted by the
/// same transaction, so facts for the range must be collected first.
pub struct StateUpdateCollector {
    client: Arc<dyn EthereumClient>,
    pool: SqlitePool,
    state_updates: StateUpdateRepository,
    facts: StateTransitionFactRepository,
    address: Address,
}

impl StateUpdateCollector {
    #[must_use]
    pub fn new(client: Arc<dyn EthereumClient>, pool: SqlitePool, address: Address) -> Self {
        Self {
            client,
            state_updates: StateUpdateRepository::new(pool.clone()),
            facts: StateTransitionFactRepository::new(pool.clone()),
            pool,
            address,
        }
    }
}

#[async_trait]
impl Collector for StateUpdateCollector {
    type Record = StateUpdateRecord;

    fn name(&self) -> &'static str {
        "state-updates"
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn collect(&self, range: &BlockRange) -> SyncResult<Vec<StateUpdateRecord>> {
        let filter = LogFilter::new(self.address, [LogRootUpdate::SIGNATURE_HASH]);
        let mut logs = self.client.get_logs_in_range(range, &filter).await?;
        sort_logs(&mut logs);

        // Chain reads happen before the transaction is opened
        let mut timestamps = BlockTimestamps::new(Arc::clone(&self.client));
        let mut decoded = Vec::with_capacity(logs.len());
        for log in &logs {
            let meta = LogMeta::of(log)?;
            let event: LogRootUpdate = decode_log(log)?;
            let timestamp = timestamps.get(meta.block_number).await?;
            decoded.push((meta, event, timestamp));
        }

        let mut tx = repository::begin(&self.pool).await?;
        let last_id = self.state_updates.find_last_id(&mut tx).await?.unwrap_or(0);
        let mut records = Vec::with_capacity(decoded.len());
        for (offset, (meta, event, timestamp)) in (1u64..).zip(decoded) {
            let transaction_hash = hash_to_hex(meta.transaction_hash);
            let fact = self
                .facts
                .find_by_transaction_hash(&mut tx, &transaction_hash)
                .await?
                .ok_or_else(|| {
                    SyncError::decoding(
                        format!(
                            "No state transition fact for root update in transaction {transaction_hash} at block {}",
                            meta.block_number
                        ),
                        None,
                    )
                })?;
            records.push(StateUpdateRecord {
                id: to_sql_int(last_id + offset)?,
                block_number: meta.block_number_sql()?,
                transaction_hash,
                state_transition_hash: fact.hash,
                sequence_number: event.sequenceNumber.to_string(),
                batch_id: event.batchId.to_string(),
                vault_root: word_to_hex(event.vaultRoot),
                order_root: word_to_hex(event.orderRoot),
                timestamp,
            });
        }
        self.state_updates.add(&mut tx, &records).await?;
        repository::commit(tx).await?;

        debug!(count = records.len(), first_id = last_id + 1, "Collected state updates");
        Ok(records)
    }

    async fn discard_after(&self, block_number: u64) -> SyncResult<u64> {
        self.state_updates.delete_all_after(block_number).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::testing::{log_of, MockChain};
    use crate::collectors::StateTransitionFactCollector;
    use crate::db::create_pool;
    use crate::events::{LogStateTransitionFact, PERPETUAL_ADDRESS};
    use alloy::primitives::{B256, U256};
    use alloy::rpc::types::Log;

    fn update_logs(block_number: u64, tx: u8, sequence: u64) -> Vec<Log> {
        let tx_hash = B256::with_last_byte(tx);
        let fact = LogStateTransitionFact {
            stateTransitionFact: B256::repeat_byte(tx),
        };
        let root = LogRootUpdate {
            sequenceNumber: U256::from(sequence),
            batchId: U256::from(sequence + 1000),
            vaultRoot: U256::from(7),
            orderRoot: U256::from(8),
        };
        vec![
            log_of(PERPETUAL_ADDRESS, &fact, block_number, 0, tx_hash),
            log_of(PERPETUAL_ADDRESS, &root, block_number, 1, tx_hash),
        ]
    }

    #[tokio::test]
    async fn test_ids_are_sequential_across_calls() {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        let mut logs = update_logs(110, 1, 11);
        logs.extend(update_logs(120, 2, 12));
        logs.extend(update_logs(160, 3, 13));
        let chain: Arc<dyn EthereumClient> = Arc::new(MockChain::with_logs(logs));
        let facts = StateTransitionFactCollector::new(Arc::clone(&chain), pool.clone(), PERPETUAL_ADDRESS);
        let updates = StateUpdateCollector::new(chain, pool, PERPETUAL_ADDRESS);

        for range in [BlockRange::new(100, 150), BlockRange::new(150, 200)] {
            facts.collect(&range).await.expect("facts");
            updates.collect(&range).await.expect("updates");
        }

        let stored = updates.state_updates.get_all().await.expect("all");
        let ids: Vec<_> = stored.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(stored[0].state_transition_hash, hash_to_hex(B256::repeat_byte(1)));
        assert_eq!(stored[2].sequence_number, "13");
        assert_eq!(stored[2].batch_id, "1013");
        assert_eq!(stored[1].timestamp, 1200);
    }

    #[tokio::test]
    async fn test_missing_fact_is_decoding_error() {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        let chain = MockChain::with_logs(update_logs(110, 1, 11));
        let updates = StateUpdateCollector::new(Arc::new(chain), pool, PERPETUAL_ADDRESS);

        let result = updates.collect(&BlockRange::new(100, 150)).await;
        assert!(matches!(result, Err(SyncError::DecodingError { .. })));
    }
}
