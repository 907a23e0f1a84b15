//! Event collectors.
//!
//! One collector per log topic family. Each fetches logs for a block range,
//! decodes them into typed records, persists them in a single transaction
//! and returns them in chain order. `discard_after` removes everything a
//! collector stored above a block.
//!
//! A log that fails to decode fails the whole call; nothing from that range
//! is written.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::B256;
use alloy::rpc::types::Log;
use async_trait::async_trait;

use crate::db::to_sql_int;
use crate::error::{SyncError, SyncResult};
use crate::model::BlockRange;
use crate::rpc::EthereumClient;

mod page;
mod state_transition_fact;
mod state_update;
mod user_transaction;

pub use page::PageCollector;
pub use state_transition_fact::StateTransitionFactCollector;
pub use state_update::StateUpdateCollector;
pub use user_transaction::{CollectOptions, UserTransactionAddresses, UserTransactionCollector};

/// Uniform collector contract.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Record type produced by [`Collector::collect`].
    type Record: Send;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Collects and persists every matching event in `range`.
    async fn collect(&self, range: &BlockRange) -> SyncResult<Vec<Self::Record>>;

    /// Deletes records in blocks above `block_number`; returns the number removed.
    async fn discard_after(&self, block_number: u64) -> SyncResult<u64>;
}

/// Position of a log on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LogMeta {
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl LogMeta {
    /// Reads the position of a mined log.
    pub(crate) fn of(log: &Log) -> SyncResult<Self> {
        let missing = |field: &str| {
            SyncError::decoding(
                format!(
                    "Log from {} is missing its {field}",
                    log.inner.address
                ),
                None,
            )
        };
        Ok(Self {
            block_number: log.block_number.ok_or_else(|| missing("block number"))?,
            transaction_hash: log.transaction_hash.ok_or_else(|| missing("transaction hash"))?,
            log_index: log.log_index.ok_or_else(|| missing("log index"))?,
        })
    }

    pub(crate) fn block_number_sql(&self) -> SyncResult<i64> {
        to_sql_int(self.block_number)
    }

    pub(crate) fn log_index_sql(&self) -> SyncResult<i64> {
        to_sql_int(self.log_index)
    }
}

/// Sorts logs into chain order. Logs without a position sort first and are
/// rejected later by [`LogMeta::of`].
pub(crate) fn sort_logs(logs: &mut [Log]) {
    logs.sort_by_key(|log| (log.block_number, log.log_index));
}

/// Block timestamps fetched during one collection call.
pub(crate) struct BlockTimestamps {
    client: Arc<dyn EthereumClient>,
    cache: HashMap<u64, u64>,
}

impl BlockTimestamps {
    pub(crate) fn new(client: Arc<dyn EthereumClient>) -> Self {
        Self {
            client,
            cache: HashMap::new(),
        }
    }

    /// Timestamp of `block_number` as stored in the database.
    pub(crate) async fn get(&mut self, block_number: u64) -> SyncResult<i64> {
        let timestamp = match self.cache.get(&block_number) {
            Some(timestamp) => *timestamp,
            None => {
                let timestamp = self.client.get_block_timestamp(block_number).await?;
                self.cache.insert(block_number, timestamp);
                timestamp
            }
        };
        to_sql_int(timestamp)
    }
}
