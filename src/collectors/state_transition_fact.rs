use std::sync::Arc;

use alloy::primitives::Address;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::{sort_logs, Collector, LogMeta};
use crate::db::models::StateTransitionFactRecord;
use crate::db::repository::{self, StateTransitionFactRepository};
use crate::error::SyncResult;
use crate::events::{decode_log, LogStateTransitionFact};
use crate::model::BlockRange;
use crate::rpc::{EthereumClient, LogFilter};

/// Collects `LogStateTransitionFact` from the perpetual contract.
pub struct StateTransitionFactCollector {
    client: Arc<dyn EthereumClient>,
    pool: SqlitePool,
    repository: StateTransitionFactRepository,
    address: Address,
}

impl StateTransitionFactCollector {
    #[must_use]
    pub fn new(client: Arc<dyn EthereumClient>, pool: SqlitePool, address: Address) -> Self {
        Self {
            client,
            repository: StateTransitionFactRepository::new(pool.clone()),
            pool,
            address,
        }
    }
}

#[async_trait]
impl Collector for StateTransitionFactCollector {
    type Record = StateTransitionFactRecord;

    fn name(&self) -> &'static str {
        "state-transition-facts"
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn collect(&self, range: &BlockRange) -> SyncResult<Vec<StateTransitionFactRecord>> {
        let filter = LogFilter::new(self.address, [LogStateTransitionFact::SIGNATURE_HASH]);
        let mut logs = self.client.get_logs_in_range(range, &filter).await?;
        sort_logs(&mut logs);

        let mut records = logs
            .iter()
            .map(|log| {
                let meta = LogMeta::of(log)?;
                let event: LogStateTransitionFact = decode_log(log)?;
                Ok(StateTransitionFactRecord::new(
                    meta.block_number_sql()?,
                    meta.transaction_hash,
                    meta.log_index_sql()?,
                    event.stateTransitionFact,
                ))
            })
            .collect::<SyncResult<Vec<_>>>()?;

        let mut tx = repository::begin(&self.pool).await?;
        let ids = self.repository.add(&mut tx, &records).await?;
        repository::commit(tx).await?;

        for (record, id) in records.iter_mut().zip(ids) {
            record.id = id;
        }
        debug!(count = records.len(), "Collected state transition facts");
        Ok(records)
    }

    async fn discard_after(&self, block_number: u64) -> SyncResult<u64> {
        self.repository.delete_all_after(block_number).await
    }
}
