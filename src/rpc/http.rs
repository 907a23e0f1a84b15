//! HTTP provider and the Alloy-backed [`EthereumClient`].
//!
//! ## Example
//!
//! ```no_run
//! use starkex_sync::rpc::{AlloyEthereumClient, EthereumClient};
//! use starkex_sync::error::SyncResult;
//!
//! # async fn example() -> SyncResult<()> {
//! let client = AlloyEthereumClient::connect("https://eth-mainnet.g.alchemy.com/v2/API_KEY").await?;
//! let head = client.get_block_number().await?;
//! println!("Current block: {head}");
//! # Ok(())
//! # }
//! ```

use alloy::consensus::Transaction as _;
use alloy::primitives::B256;
use alloy::providers::{Provider as _, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, Filter, Log};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::{EthereumClient, LogFilter, TransactionRecord};
use crate::error::{SyncError, SyncResult};
use crate::model::{BlockRange, BlockRecord};

/// HTTP provider type.
pub type Provider = RootProvider<Http<Client>>;

/// Node error fragments meaning the log query returned too much data.
const TOO_MANY_RESULTS: &[&str] = &[
    "query returned more than",
    "Log response size exceeded",
    "response size exceeded",
    "block range is too wide",
    "exceed maximum block range",
];

/// Creates an HTTP provider.
///
/// # Errors
///
/// Returns an RPC error if the URL cannot be parsed.
#[allow(clippy::unused_async)]
#[instrument(skip(rpc_url), fields(rpc_host = tracing::field::Empty))]
pub async fn create_provider(rpc_url: &str) -> SyncResult<Provider> {
    info!("Initializing RPC provider");

    // Logged without the API key
    let host = rpc_url.split("/v2/").next().unwrap_or("unknown");
    tracing::Span::current().record("rpc_host", host);

    let url = rpc_url.parse().map_err(|e| {
        let msg = if rpc_url.starts_with("http") {
            format!("Failed to parse RPC URL: '{rpc_url}'")
        } else {
            format!(
                "Invalid RPC URL: '{rpc_url}'. Expected format: 'https://eth-mainnet.g.alchemy.com/v2/YOUR_KEY'"
            )
        };
        SyncError::rpc(msg, Some(Box::new(e)))
    })?;

    let provider = ProviderBuilder::new().on_http(url);
    info!("RPC provider initialized successfully");
    Ok(provider)
}

/// [`EthereumClient`] over an Alloy HTTP provider.
#[derive(Debug, Clone)]
pub struct AlloyEthereumClient {
    provider: Provider,
}

impl AlloyEthereumClient {
    #[must_use]
    pub const fn new(provider: Provider) -> Self {
        Self { provider }
    }

    /// Connects to `rpc_url`.
    pub async fn connect(rpc_url: &str) -> SyncResult<Self> {
        Ok(Self::new(create_provider(rpc_url).await?))
    }

    fn is_too_many_results(error: &str) -> bool {
        TOO_MANY_RESULTS.iter().any(|fragment| error.contains(fragment))
    }

    async fn fetch_logs(&self, range: &BlockRange, filter: &LogFilter) -> Result<Vec<Log>, String> {
        let Some(to_block) = range.to_block() else {
            return Ok(Vec::new());
        };
        let query = Filter::new()
            .address(filter.address)
            .event_signature(filter.topics.clone())
            .from_block(range.start())
            .to_block(to_block);
        self.provider.get_logs(&query).await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl EthereumClient for AlloyEthereumClient {
    #[instrument(skip(self))]
    async fn get_block_number(&self) -> SyncResult<u64> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| SyncError::rpc("Failed to fetch latest block number", Some(Box::new(e))))
    }

    #[instrument(skip(self))]
    async fn get_block(&self, number: u64) -> SyncResult<BlockRecord> {
        let block = self
            .provider
            .get_block_by_number(number.into(), BlockTransactionsKind::Hashes)
            .await
            .map_err(|e| SyncError::rpc(format!("Failed to fetch block {number}"), Some(Box::new(e))))?
            .ok_or_else(|| SyncError::rpc(format!("Block {number} not found"), None))?;
        Ok(BlockRecord::from_block(&block))
    }

    /// Splits the range in half and retries whenever the node refuses to
    /// return that many logs.
    #[instrument(skip(self, filter), fields(range = %range, address = %filter.address))]
    async fn get_logs_in_range(&self, range: &BlockRange, filter: &LogFilter) -> SyncResult<Vec<Log>> {
        match self.fetch_logs(range, filter).await {
            Ok(logs) => {
                debug!(count = logs.len(), "Fetched logs");
                Ok(logs)
            }
            Err(error) if Self::is_too_many_results(&error) && range.len() > 1 => {
                let (left, right) = range.split_at(range.start() + range.len() / 2);
                warn!(%left, %right, "Log query too large, splitting range");
                let mut logs = self.get_logs_in_range(&left, filter).await?;
                logs.extend(self.get_logs_in_range(&right, filter).await?);
                Ok(logs)
            }
            Err(error) => Err(SyncError::rpc(
                format!("Failed to fetch logs in {range} for {}: {error}", filter.address),
                None,
            )),
        }
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, hash: B256) -> SyncResult<TransactionRecord> {
        let tx = self
            .provider
            .get_transaction_by_hash(hash)
            .await
            .map_err(|e| SyncError::rpc(format!("Failed to fetch transaction {hash}"), Some(Box::new(e))))?
            .ok_or_else(|| SyncError::rpc(format!("Transaction {hash} not found"), None))?;
        Ok(TransactionRecord {
            hash,
            block_number: tx.block_number,
            input: tx.input().clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_results_detection() {
        assert!(AlloyEthereumClient::is_too_many_results(
            "server returned an error response: error code -32005: query returned more than 10000 results"
        ));
        assert!(AlloyEthereumClient::is_too_many_results("Log response size exceeded."));
        assert!(!AlloyEthereumClient::is_too_many_results("connection refused"));
    }

    #[tokio::test]
    async fn test_create_provider_invalid_url() {
        let result = create_provider("not-a-valid-url").await;
        assert!(matches!(result, Err(SyncError::RpcError { .. })));
    }

    #[tokio::test]
    #[ignore = "Requires valid RPC_URL environment variable"]
    async fn test_get_block_number_integration() {
        let rpc_url = std::env::var("RPC_URL").unwrap_or_else(|_| "http://localhost:8545".to_string());
        if let Ok(client) = AlloyEthereumClient::connect(&rpc_url).await {
            assert!(client.get_block_number().await.is_ok());
        }
    }
}
