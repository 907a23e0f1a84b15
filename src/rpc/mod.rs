//! Chain access for the synchronizer.
//!
//! Everything above this module talks to the chain through the
//! [`EthereumClient`] trait so tests can substitute an in-memory chain.
//! [`AlloyEthereumClient`] is the production implementation over HTTP.

use alloy::primitives::{Address, Bytes, B256};
use alloy::rpc::types::Log;
use async_trait::async_trait;

use crate::error::SyncResult;
use crate::model::{BlockRange, BlockRecord};

pub mod http;

pub use http::{create_provider, AlloyEthereumClient, Provider};

/// Address and topic-0 alternatives for `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    /// Emitting contract
    pub address: Address,
    /// Event signatures, any of which matches
    pub topics: Vec<B256>,
}

impl LogFilter {
    #[must_use]
    pub fn new(address: Address, topics: impl IntoIterator<Item = B256>) -> Self {
        Self {
            address,
            topics: topics.into_iter().collect(),
        }
    }
}

/// The parts of a transaction the collectors need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub hash: B256,
    /// `None` while pending
    pub block_number: Option<u64>,
    /// Calldata
    pub input: Bytes,
}

/// Read-only chain access.
#[async_trait]
pub trait EthereumClient: Send + Sync {
    /// Current head block number.
    async fn get_block_number(&self) -> SyncResult<u64>;

    /// Block header fields for `number`.
    async fn get_block(&self, number: u64) -> SyncResult<BlockRecord>;

    /// Timestamp of block `number` in Unix seconds.
    async fn get_block_timestamp(&self, number: u64) -> SyncResult<u64> {
        Ok(self.get_block(number).await?.timestamp)
    }

    /// Logs in `range` matching `filter`, in chain order.
    async fn get_logs_in_range(&self, range: &BlockRange, filter: &LogFilter) -> SyncResult<Vec<Log>>;

    /// Transaction by hash.
    async fn get_transaction(&self, hash: B256) -> SyncResult<TransactionRecord>;
}
