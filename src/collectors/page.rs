use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{hex, Address, B256};
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::{sort_logs, Collector, LogMeta};
use crate::db::models::{hash_to_hex, word_to_hex, PageRecord};
use crate::db::repository::{self, PageRepository};
use crate::error::{SyncError, SyncResult};
use crate::events::{decode_log, registerContinuousMemoryPageCall, LogMemoryPageFactContinuous};
use crate::model::BlockRange;
use crate::rpc::{EthereumClient, LogFilter};

/// Collects continuous memory pages from the fact registry.
///
/// The event only carries the hashes, so the page content is decoded from
/// the calldata of the registering transaction.
pub struct PageCollector {
    client: Arc<dyn EthereumClient>,
    pool: SqlitePool,
    repository: PageRepository,
    address: Address,
}

impl PageCollector {
    #[must_use]
    pub fn new(client: Arc<dyn EthereumClient>, pool: SqlitePool, address: Address) -> Self {
        Self {
            client,
            repository: PageRepository::new(pool.clone()),
            pool,
            address,
        }
    }

    /// Page words as one string of 64-hex-digit words.
    async fn page_data(&self, transaction_hash: B256) -> SyncResult<String> {
        let transaction = self.client.get_transaction(transaction_hash).await?;
        let call = registerContinuousMemoryPageCall::abi_decode(&transaction.input, true).map_err(|e| {
            SyncError::decoding(
                format!("Failed to decode memory page calldata of transaction {transaction_hash}"),
                Some(Box::new(e)),
            )
        })?;
        Ok(call
            .values
            .iter()
            .map(|value| hex::encode(value.to_be_bytes::<32>()))
            .collect())
    }
}

#[async_trait]
impl Collector for PageCollector {
    type Record = PageRecord;

    fn name(&self) -> &'static str {
        "pages"
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn collect(&self, range: &BlockRange) -> SyncResult<Vec<PageRecord>> {
        let filter = LogFilter::new(self.address, [LogMemoryPageFactContinuous::SIGNATURE_HASH]);
        let mut logs = self.client.get_logs_in_range(range, &filter).await?;
        sort_logs(&mut logs);

        // One transaction may register several pages
        let mut data_by_transaction: HashMap<B256, String> = HashMap::new();
        let mut records = Vec::with_capacity(logs.len());
        for log in &logs {
            let meta = LogMeta::of(log)?;
            let event: LogMemoryPageFactContinuous = decode_log(log)?;
            let data = match data_by_transaction.get(&meta.transaction_hash) {
                Some(data) => data.clone(),
                None => {
                    let data = self.page_data(meta.transaction_hash).await?;
                    data_by_transaction.insert(meta.transaction_hash, data.clone());
                    data
                }
            };
            records.push(PageRecord {
                id: 0,
                block_number: meta.block_number_sql()?,
                transaction_hash: hash_to_hex(meta.transaction_hash),
                log_index: meta.log_index_sql()?,
                fact_hash: hash_to_hex(event.factHash),
                page_hash: word_to_hex(event.memoryHash),
                data,
            });
        }

        let mut tx = repository::begin(&self.pool).await?;
        let ids = self.repository.add(&mut tx, &records).await?;
        repository::commit(tx).await?;

        for (record, id) in records.iter_mut().zip(ids) {
            record.id = id;
        }
        debug!(count = records.len(), "Collected memory pages");
        Ok(records)
    }

    async fn discard_after(&self, block_number: u64) -> SyncResult<u64> {
        self.repository.delete_all_after(block_number).await
    }
}
