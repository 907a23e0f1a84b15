use std::sync::Arc;

use alloy::primitives::{Address, B256, I256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, info, instrument};

use super::{sort_logs, BlockTimestamps, Collector, LogMeta};
use crate::db::models::{
    address_to_hex, hash_to_hex, word_to_hex, UserTransactionAddRecord, UserTransactionData,
    WithdrawableAssetRecord,
};
use crate::db::repository::{self, UserTransactionRepository, WithdrawableAssetRepository};
use crate::error::{SyncError, SyncResult};
use crate::events::{
    decode_log, LogEscapeVerified, LogForcedTradeRequest, LogForcedWithdrawalRequest, LogFrozen,
    LogFullWithdrawalRequest, LogMintWithdrawalPerformed, LogWithdrawalPerformed,
    LogWithdrawalWithTokenIdPerformed,
};
use crate::freeze::FreezeStatusUpdater;
use crate::model::{BlockRange, FreezeStatus};
use crate::rpc::{EthereumClient, LogFilter};

/// Contracts watched by [`UserTransactionCollector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserTransactionAddresses {
    pub perpetual: Address,
    /// Escapes are only collected when set
    pub escape_verifier: Option<Address>,
    /// Asset credited by a verified escape
    pub collateral_asset: B256,
}

/// Per-call switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectOptions {
    /// Leave `withdrawable_assets` untouched
    pub skip_withdrawable_assets: bool,
}

/// Collects forced requests, finalized withdrawals, verified escapes and the
/// freeze notice.
pub struct UserTransactionCollector {
    client: Arc<dyn EthereumClient>,
    pool: SqlitePool,
    user_transactions: UserTransactionRepository,
    withdrawable_assets: WithdrawableAssetRepository,
    addresses: UserTransactionAddresses,
    freeze: Arc<dyn FreezeStatusUpdater>,
}

const PERPETUAL_TOPICS: [B256; 7] = [
    LogForcedWithdrawalRequest::SIGNATURE_HASH,
    LogForcedTradeRequest::SIGNATURE_HASH,
    LogFullWithdrawalRequest::SIGNATURE_HASH,
    LogWithdrawalPerformed::SIGNATURE_HASH,
    LogWithdrawalWithTokenIdPerformed::SIGNATURE_HASH,
    LogMintWithdrawalPerformed::SIGNATURE_HASH,
    LogFrozen::SIGNATURE_HASH,
];

fn to_delta(amount: U256) -> SyncResult<I256> {
    I256::try_from(amount).map_err(|e| {
        SyncError::decoding(format!("amount {amount} does not fit a balance delta"), Some(Box::new(e)))
    })
}

impl UserTransactionCollector {
    #[must_use]
    pub fn new(
        client: Arc<dyn EthereumClient>,
        pool: SqlitePool,
        addresses: UserTransactionAddresses,
        freeze: Arc<dyn FreezeStatusUpdater>,
    ) -> Self {
        Self {
            client,
            user_transactions: UserTransactionRepository::new(pool.clone()),
            withdrawable_assets: WithdrawableAssetRepository::new(pool.clone()),
            pool,
            addresses,
            freeze,
        }
    }

    fn filters(&self) -> Vec<LogFilter> {
        let mut filters = vec![LogFilter::new(self.addresses.perpetual, PERPETUAL_TOPICS)];
        if let Some(escape_verifier) = self.addresses.escape_verifier {
            filters.push(LogFilter::new(escape_verifier, [LogEscapeVerified::SIGNATURE_HASH]));
        }
        filters
    }

    /// Decoded payload plus the withdrawable balance change it implies.
    fn decode(&self, log: &Log) -> SyncResult<(UserTransactionData, Option<(String, String, I256)>)> {
        let topic = log.topics().first().copied().unwrap_or_default();
        let decoded = match topic {
            LogForcedWithdrawalRequest::SIGNATURE_HASH => {
                let event: LogForcedWithdrawalRequest = decode_log(log)?;
                let data = UserTransactionData::ForcedWithdrawal {
                    stark_key: word_to_hex(event.starkKey),
                    position_id: event.positionId.to_string(),
                    quantized_amount: event.quantizedAmount.to_string(),
                };
                (data, None)
            }
            LogForcedTradeRequest::SIGNATURE_HASH => {
                let event: LogForcedTradeRequest = decode_log(log)?;
                let data = UserTransactionData::ForcedTrade {
                    stark_key_a: word_to_hex(event.starkKeyA),
                    stark_key_b: word_to_hex(event.starkKeyB),
                    position_id_a: event.positionIdA.to_string(),
                    position_id_b: event.positionIdB.to_string(),
                    collateral_asset_id: word_to_hex(event.collateralAssetId),
                    synthetic_asset_id: word_to_hex(event.syntheticAssetId),
                    collateral_amount: event.amountCollateral.to_string(),
                    synthetic_amount: event.amountSynthetic.to_string(),
                    is_a_buying_synthetic: event.aIsBuyingSynthetic,
                    nonce: event.nonce.to_string(),
                };
                (data, None)
            }
            LogFullWithdrawalRequest::SIGNATURE_HASH => {
                let event: LogFullWithdrawalRequest = decode_log(log)?;
                let data = UserTransactionData::FullWithdrawal {
                    stark_key: word_to_hex(event.starkKey),
                    vault_id: event.vaultId.to_string(),
                };
                (data, None)
            }
            LogWithdrawalPerformed::SIGNATURE_HASH => {
                let event: LogWithdrawalPerformed = decode_log(log)?;
                let stark_key = word_to_hex(event.ownerKey);
                let asset_hash = word_to_hex(event.assetType);
                let delta = (stark_key.clone(), asset_hash.clone(), -to_delta(event.quantizedAmount)?);
                let data = UserTransactionData::Withdraw {
                    stark_key,
                    asset_type: asset_hash,
                    non_quantized_amount: event.nonQuantizedAmount.to_string(),
                    quantized_amount: event.quantizedAmount.to_string(),
                    recipient: address_to_hex(event.recipient),
                };
                (data, Some(delta))
            }
            LogWithdrawalWithTokenIdPerformed::SIGNATURE_HASH => {
                let event: LogWithdrawalWithTokenIdPerformed = decode_log(log)?;
                let stark_key = word_to_hex(event.ownerKey);
                let asset_id = word_to_hex(event.assetId);
                let delta = (stark_key.clone(), asset_id.clone(), -to_delta(event.quantizedAmount)?);
                let data = UserTransactionData::WithdrawWithTokenId {
                    stark_key,
                    asset_type: word_to_hex(event.assetType),
                    token_id: event.tokenId.to_string(),
                    asset_id,
                    non_quantized_amount: event.nonQuantizedAmount.to_string(),
                    quantized_amount: event.quantizedAmount.to_string(),
                    recipient: address_to_hex(event.recipient),
                };
                (data, Some(delta))
            }
            LogMintWithdrawalPerformed::SIGNATURE_HASH => {
                let event: LogMintWithdrawalPerformed = decode_log(log)?;
                let stark_key = word_to_hex(event.ownerKey);
                let asset_id = word_to_hex(event.assetId);
                let delta = (stark_key.clone(), asset_id.clone(), -to_delta(event.quantizedAmount)?);
                let data = UserTransactionData::MintWithdraw {
                    stark_key,
                    asset_type: word_to_hex(event.assetType),
                    non_quantized_amount: event.nonQuantizedAmount.to_string(),
                    quantized_amount: event.quantizedAmount.to_string(),
                    asset_id,
                };
                (data, Some(delta))
            }
            LogEscapeVerified::SIGNATURE_HASH => {
                let event: LogEscapeVerified = decode_log(log)?;
                let stark_key = word_to_hex(event.publicKey);
                let delta = (
                    stark_key.clone(),
                    hash_to_hex(self.addresses.collateral_asset),
                    event.withdrawalAmount,
                );
                let data = UserTransactionData::VerifyEscape {
                    stark_key,
                    withdrawal_amount: event.withdrawalAmount.to_string(),
                    shared_state_hash: hash_to_hex(event.sharedStateHash),
                    position_id: event.positionId.to_string(),
                };
                (data, Some(delta))
            }
            LogFrozen::SIGNATURE_HASH => {
                let _: LogFrozen = decode_log(log)?;
                (UserTransactionData::FreezeRequest, None)
            }
            other => {
                return Err(SyncError::decoding(
                    format!(
                        "Unexpected topic {other} from {} at block {:?}",
                        log.inner.address, log.block_number
                    ),
                    None,
                ))
            }
        };
        Ok(decoded)
    }

    /// Collects `range`, optionally leaving withdrawable assets alone.
    #[instrument(skip(self), fields(range = %range))]
    pub async fn collect_with(
        &self,
        range: &BlockRange,
        options: CollectOptions,
    ) -> SyncResult<Vec<UserTransactionAddRecord>> {
        let mut logs = Vec::new();
        for filter in self.filters() {
            logs.extend(self.client.get_logs_in_range(range, &filter).await?);
        }
        sort_logs(&mut logs);

        let mut timestamps = BlockTimestamps::new(Arc::clone(&self.client));
        let mut records = Vec::with_capacity(logs.len());
        let mut withdrawable = Vec::new();
        for log in &logs {
            let meta = LogMeta::of(log)?;
            let (data, delta) = self.decode(log)?;
            let record = UserTransactionAddRecord {
                block_number: meta.block_number_sql()?,
                transaction_hash: hash_to_hex(meta.transaction_hash),
                log_index: meta.log_index_sql()?,
                timestamp: timestamps.get(meta.block_number).await?,
                data,
            };
            if let Some((stark_key, asset_hash, balance_delta)) = delta {
                withdrawable.push(WithdrawableAssetRecord::new(
                    record.block_number,
                    record.transaction_hash.clone(),
                    record.timestamp,
                    stark_key,
                    asset_hash,
                    balance_delta,
                ));
            }
            records.push(record);
        }

        let mut tx = repository::begin(&self.pool).await?;
        for record in &records {
            self.user_transactions.add(&mut tx, record).await?;
        }
        if !options.skip_withdrawable_assets {
            for record in &withdrawable {
                self.withdrawable_assets.add(&mut tx, record).await?;
            }
        }
        repository::commit(tx).await?;

        if records.iter().any(|r| r.data == UserTransactionData::FreezeRequest) {
            info!("Exchange frozen on chain");
            self.freeze.set_freeze_status(FreezeStatus::Frozen).await?;
        }
        debug!(count = records.len(), withdrawable = withdrawable.len(), "Collected user transactions");
        Ok(records)
    }

    /// Removes every user transaction. Withdrawable assets are kept.
    pub async fn delete_all(&self) -> SyncResult<u64> {
        self.user_transactions.delete_all().await
    }
}

#[async_trait]
impl Collector for UserTransactionCollector {
    type Record = UserTransactionAddRecord;

    fn name(&self) -> &'static str {
        "user-transactions"
    }

    async fn collect(&self, range: &BlockRange) -> SyncResult<Vec<UserTransactionAddRecord>> {
        self.collect_with(range, CollectOptions::default()).await
    }

    async fn discard_after(&self, block_number: u64) -> SyncResult<u64> {
        let removed = self.user_transactions.delete_all_after(block_number).await?;
        Ok(removed + self.withdrawable_assets.delete_all_after(block_number).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::collectors::testing::{log_of, MockChain};
    use crate::db::create_pool;
    use crate::events::PERPETUAL_ADDRESS;
    use alloy::primitives::address;

    const ESCAPE_VERIFIER: Address = address!("000000000000000000000000000000000000fed0");

    #[derive(Default)]
    struct RecordingFreeze {
        requested: Mutex<Vec<FreezeStatus>>,
    }

    #[async_trait]
    impl FreezeStatusUpdater for RecordingFreeze {
        async fn update_freeze_status(&self) -> SyncResult<FreezeStatus> {
            Ok(FreezeStatus::NotFrozen)
        }

        async fn set_freeze_status(&self, status: FreezeStatus) -> SyncResult<FreezeStatus> {
            self.requested.lock().expect("lock").push(status);
            Ok(status)
        }
    }

    fn addresses() -> UserTransactionAddresses {
        UserTransactionAddresses {
            perpetual: PERPETUAL_ADDRESS,
            escape_verifier: Some(ESCAPE_VERIFIER),
            collateral_asset: B256::with_last_byte(0xcc),
        }
    }

    async fn collector(chain: MockChain) -> (UserTransactionCollector, Arc<MockChain>, Arc<RecordingFreeze>) {
        let pool = create_pool("sqlite::memory:").await.expect("pool");
        let chain = Arc::new(chain);
        let freeze = Arc::new(RecordingFreeze::default());
        let collector = UserTransactionCollector::new(
            Arc::clone(&chain) as Arc<dyn EthereumClient>,
            pool,
            addresses(),
            Arc::clone(&freeze) as Arc<dyn FreezeStatusUpdater>,
        );
        (collector, chain, freeze)
    }

    fn forced_withdrawal(block_number: u64, log_index: u64, key: u64) -> Log {
        let event = LogForcedWithdrawalRequest {
            starkKey: U256::from(key),
            positionId: U256::from(key),
            quantizedAmount: U256::from(key),
        };
        log_of(PERPETUAL_ADDRESS, &event, block_number, log_index, B256::with_last_byte(key as u8))
    }

    #[tokio::test]
    async fn test_withdrawal_writes_negative_withdrawable_delta() {
        let event = LogWithdrawalPerformed {
            ownerKey: U256::from(0x123),
            assetType: U256::from(0xa1b2),
            nonQuantizedAmount: U256::from(111),
            quantizedAmount: U256::from(222),
            recipient: address!("0000000000000000000000000000000000000456"),
        };
        let chain = MockChain::with_logs(vec![log_of(PERPETUAL_ADDRESS, &event, 150, 0, B256::with_last_byte(0xab))]);
        let (collector, _, _) = collector(chain).await;

        let records = collector.collect(&BlockRange::new(100, 200)).await.expect("collect");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp, 1500);
        assert_eq!(
            records[0].data,
            UserTransactionData::Withdraw {
                stark_key: word_to_hex(U256::from(0x123)),
                asset_type: word_to_hex(U256::from(0xa1b2)),
                non_quantized_amount: "111".to_string(),
                quantized_amount: "222".to_string(),
                recipient: "0x0000000000000000000000000000000000000456".to_string(),
            }
        );

        let assets = collector.withdrawable_assets.get_all().await.expect("assets");
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].balance_delta, "-222");
        assert_eq!(assets[0].asset_hash, word_to_hex(U256::from(0xa1b2)));
    }

    #[tokio::test]
    async fn test_escape_verified_credits_collateral() {
        let event = LogEscapeVerified {
            publicKey: U256::from(0x123),
            withdrawalAmount: I256::try_from(123i64).expect("fits"),
            sharedStateHash: B256::with_last_byte(0xfe),
            positionId: U256::from(88),
        };
        let chain = MockChain::with_logs(vec![log_of(ESCAPE_VERIFIER, &event, 151, 0, B256::with_last_byte(0xab))]);
        let (collector, chain, _) = collector(chain).await;

        let records = collector.collect(&BlockRange::new(100, 200)).await.expect("collect");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].data.type_name(), "VerifyEscape");

        let filters = chain.filters();
        assert_eq!(filters.len(), 2);
        assert_eq!(filters[1], LogFilter::new(ESCAPE_VERIFIER, [LogEscapeVerified::SIGNATURE_HASH]));

        let assets = collector.withdrawable_assets.get_all().await.expect("assets");
        assert_eq!(assets[0].balance_delta, "123");
        assert_eq!(assets[0].asset_hash, hash_to_hex(B256::with_last_byte(0xcc)));
    }

    #[tokio::test]
    async fn test_frozen_escalates_freeze_status() {
        let chain = MockChain::with_logs(vec![log_of(PERPETUAL_ADDRESS, &LogFrozen {}, 151, 0, B256::with_last_byte(1))]);
        let (collector, _, freeze) = collector(chain).await;

        let records = collector.collect(&BlockRange::new(100, 200)).await.expect("collect");
        assert_eq!(records[0].data, UserTransactionData::FreezeRequest);
        assert_eq!(*freeze.requested.lock().expect("lock"), vec![FreezeStatus::Frozen]);
    }

    #[tokio::test]
    async fn test_counts_add_up_across_ranges() {
        let logs = vec![
            forced_withdrawal(110, 0, 1),
            forced_withdrawal(110, 1, 2),
            forced_withdrawal(150, 0, 3),
            forced_withdrawal(150, 1, 4),
            forced_withdrawal(150, 2, 5),
            forced_withdrawal(190, 0, 6),
        ];
        let (collector, _, _) = collector(MockChain::with_logs(logs)).await;

        let mut total = 0;
        for range in BlockRange::new(100, 200).chunks(34) {
            total += collector.collect(&range).await.expect("collect").len();
        }
        assert_eq!(total, 6);
        assert_eq!(collector.user_transactions.count().await.expect("count"), 6);
    }

    #[tokio::test]
    async fn test_events_in_one_block_keep_log_order() {
        let logs = vec![forced_withdrawal(150, 2, 3), forced_withdrawal(150, 0, 1), forced_withdrawal(150, 1, 2)];
        let (collector, _, _) = collector(MockChain::with_logs(logs)).await;

        let records = collector.collect(&BlockRange::new(100, 200)).await.expect("collect");
        let order: Vec<_> = records.iter().map(|r| r.log_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_skip_withdrawable_assets() {
        let event = LogMintWithdrawalPerformed {
            ownerKey: U256::from(1),
            assetType: U256::from(2),
            nonQuantizedAmount: U256::from(3),
            quantizedAmount: U256::from(4),
            assetId: U256::from(5),
        };
        let chain = MockChain::with_logs(vec![log_of(PERPETUAL_ADDRESS, &event, 150, 0, B256::with_last_byte(1))]);
        let (collector, _, _) = collector(chain).await;

        let options = CollectOptions {
            skip_withdrawable_assets: true,
        };
        collector.collect_with(&BlockRange::new(100, 200), options).await.expect("collect");
        assert!(collector.withdrawable_assets.get_all().await.expect("assets").is_empty());
        assert_eq!(collector.user_transactions.count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_discard_removes_both_tables() {
        let event = LogWithdrawalPerformed {
            ownerKey: U256::from(1),
            assetType: U256::from(2),
            nonQuantizedAmount: U256::from(3),
            quantizedAmount: U256::from(4),
            recipient: Address::ZERO,
        };
        let chain = MockChain::with_logs(vec![
            forced_withdrawal(120, 0, 1),
            log_of(PERPETUAL_ADDRESS, &event, 160, 0, B256::with_last_byte(9)),
        ]);
        let (collector, _, _) = collector(chain).await;
        collector.collect(&BlockRange::new(100, 200)).await.expect("collect");

        assert_eq!(collector.discard_after(150).await.expect("discard"), 2);
        assert_eq!(collector.user_transactions.count().await.expect("count"), 1);
        assert!(collector.withdrawable_assets.get_all().await.expect("assets").is_empty());
    }
}
