//! Database models that map to SQL tables.
//!
//! These structures represent rows in the database and provide
//! conversions from decoded chain data to database representations.
//! Hashes and 256-bit words are kept as `0x`-prefixed lowercase hex
//! strings; amounts are kept as decimal strings.

use std::ops::Add;

use alloy::primitives::{Address, B256, I256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Formats a 32-byte hash as `0x`-prefixed lowercase hex.
#[must_use]
pub fn hash_to_hex(hash: B256) -> String {
    format!("{hash:?}")
}

/// Formats a 256-bit word as a 32-byte `0x` hex string (stark keys, asset hashes).
#[must_use]
pub fn word_to_hex(word: U256) -> String {
    hash_to_hex(B256::from(word.to_be_bytes::<32>()))
}

/// Parses a stored 32-byte hex hash.
pub fn parse_hash(raw: &str) -> SyncResult<B256> {
    raw.parse()
        .map_err(|e| SyncError::decoding(format!("invalid hash '{raw}'"), Some(Box::new(e))))
}

/// A `LogStateTransitionFact` occurrence.
///
/// Maps to the `state_transition_facts` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StateTransitionFactRecord {
    /// Database-assigned unique identifier
    pub id: i64,
    /// Block containing the log
    pub block_number: i64,
    /// Transaction that emitted the log
    pub transaction_hash: String,
    /// Position of the log in the block
    pub log_index: i64,
    /// The state transition fact
    pub hash: String,
}

impl StateTransitionFactRecord {
    /// Creates an unsaved record.
    #[must_use]
    pub fn new(block_number: i64, transaction_hash: B256, log_index: i64, hash: B256) -> Self {
        Self {
            id: 0,
            block_number,
            transaction_hash: hash_to_hex(transaction_hash),
            log_index,
            hash: hash_to_hex(hash),
        }
    }
}

/// A continuous memory page registered with the fact registry.
///
/// Maps to the `pages` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PageRecord {
    pub id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    /// Fact hash from the registry event
    pub fact_hash: String,
    /// Memory hash of the page
    pub page_hash: String,
    /// Concatenated 64-hex-digit words, no `0x` prefix
    pub data: String,
}

/// A state update anchored by `LogRootUpdate`.
///
/// Maps to the `state_updates` table. Ids are sequential from 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct StateUpdateRecord {
    /// Sequential state update id
    pub id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    /// Fact emitted in the same transaction
    pub state_transition_hash: String,
    /// Decimal sequence number from the event
    pub sequence_number: String,
    /// Decimal batch id from the event
    pub batch_id: String,
    pub vault_root: String,
    pub order_root: String,
    /// Block timestamp (Unix seconds)
    pub timestamp: i64,
}

/// Decoded payload of a user transaction.
///
/// Serialized into the `data` column with a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum UserTransactionData {
    /// `LogForcedWithdrawalRequest`
    ForcedWithdrawal {
        stark_key: String,
        position_id: String,
        quantized_amount: String,
    },
    /// `LogForcedTradeRequest`
    ForcedTrade {
        stark_key_a: String,
        stark_key_b: String,
        position_id_a: String,
        position_id_b: String,
        collateral_asset_id: String,
        synthetic_asset_id: String,
        collateral_amount: String,
        synthetic_amount: String,
        is_a_buying_synthetic: bool,
        nonce: String,
    },
    /// `LogFullWithdrawalRequest`
    FullWithdrawal { stark_key: String, vault_id: String },
    /// `LogWithdrawalPerformed`
    Withdraw {
        stark_key: String,
        asset_type: String,
        non_quantized_amount: String,
        quantized_amount: String,
        recipient: String,
    },
    /// `LogWithdrawalWithTokenIdPerformed`
    WithdrawWithTokenId {
        stark_key: String,
        asset_type: String,
        token_id: String,
        asset_id: String,
        non_quantized_amount: String,
        quantized_amount: String,
        recipient: String,
    },
    /// `LogMintWithdrawalPerformed`
    MintWithdraw {
        stark_key: String,
        asset_type: String,
        non_quantized_amount: String,
        quantized_amount: String,
        asset_id: String,
    },
    /// `LogEscapeVerified`
    VerifyEscape {
        stark_key: String,
        withdrawal_amount: String,
        shared_state_hash: String,
        position_id: String,
    },
    /// `LogFrozen`
    FreezeRequest,
}

impl UserTransactionData {
    /// Value of the `type` column.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::ForcedWithdrawal { .. } => "ForcedWithdrawal",
            Self::ForcedTrade { .. } => "ForcedTrade",
            Self::FullWithdrawal { .. } => "FullWithdrawal",
            Self::Withdraw { .. } => "Withdraw",
            Self::WithdrawWithTokenId { .. } => "WithdrawWithTokenId",
            Self::MintWithdraw { .. } => "MintWithdraw",
            Self::VerifyEscape { .. } => "VerifyEscape",
            Self::FreezeRequest => "FreezeRequest",
        }
    }

    /// Primary stark key involved, if any.
    #[must_use]
    pub fn stark_key_a(&self) -> Option<&str> {
        match self {
            Self::ForcedWithdrawal { stark_key, .. }
            | Self::FullWithdrawal { stark_key, .. }
            | Self::Withdraw { stark_key, .. }
            | Self::WithdrawWithTokenId { stark_key, .. }
            | Self::MintWithdraw { stark_key, .. }
            | Self::VerifyEscape { stark_key, .. } => Some(stark_key),
            Self::ForcedTrade { stark_key_a, .. } => Some(stark_key_a),
            Self::FreezeRequest => None,
        }
    }

    /// Counterparty stark key for forced trades.
    #[must_use]
    pub fn stark_key_b(&self) -> Option<&str> {
        match self {
            Self::ForcedTrade { stark_key_b, .. } => Some(stark_key_b),
            _ => None,
        }
    }
}

/// A user transaction as collected from L1, before it is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTransactionAddRecord {
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    /// Block timestamp (Unix seconds)
    pub timestamp: i64,
    pub data: UserTransactionData,
}

/// Maps to the `user_transactions` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserTransactionRecord {
    pub id: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub stark_key_a: Option<String>,
    pub stark_key_b: Option<String>,
    pub block_number: i64,
    pub transaction_hash: String,
    pub log_index: i64,
    pub timestamp: i64,
    /// JSON-encoded [`UserTransactionData`]
    pub data: String,
}

impl UserTransactionRecord {
    /// Decodes the JSON payload.
    pub fn data(&self) -> SyncResult<UserTransactionData> {
        serde_json::from_str(&self.data).map_err(|e| {
            SyncError::decoding(
                format!("invalid user transaction payload in row {}", self.id),
                Some(Box::new(e)),
            )
        })
    }
}

/// A change to the assets a user can withdraw on L1.
///
/// Maps to the `withdrawable_assets` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct WithdrawableAssetRecord {
    pub id: i64,
    pub block_number: i64,
    pub transaction_hash: String,
    pub timestamp: i64,
    pub stark_key: String,
    pub asset_hash: String,
    /// Signed decimal amount
    pub balance_delta: String,
}

impl WithdrawableAssetRecord {
    /// Creates an unsaved record.
    #[must_use]
    pub fn new(
        block_number: i64,
        transaction_hash: String,
        timestamp: i64,
        stark_key: String,
        asset_hash: String,
        balance_delta: I256,
    ) -> Self {
        Self {
            id: 0,
            block_number,
            transaction_hash,
            timestamp,
            stark_key,
            asset_hash,
            balance_delta: balance_delta.to_string(),
        }
    }

    /// Parses the signed balance delta.
    pub fn balance_delta(&self) -> SyncResult<I256> {
        self.balance_delta.parse().map_err(|e| {
            SyncError::decoding(
                format!("invalid balance delta '{}'", self.balance_delta),
                Some(Box::new(e)),
            )
        })
    }
}

/// An L2 transaction included in a state update.
///
/// Maps to the `l2_transactions` table, which is filled by the off-chain feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct L2TransactionRecord {
    pub id: i64,
    pub state_update_id: i64,
    pub transaction_id: i64,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub stark_key_a: Option<String>,
    pub stark_key_b: Option<String>,
    pub is_replaced: bool,
}

/// Per-type L2 transaction counts.
///
/// Stored as camelCase JSON. Addition is field-wise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct L2TransactionStatistics {
    pub deposit_count: u64,
    pub withdrawal_to_address_count: u64,
    pub forced_withdrawal_count: u64,
    pub trade_count: u64,
    pub forced_trade_count: u64,
    pub transfer_count: u64,
    pub conditional_transfer_count: u64,
    pub liquidate_count: u64,
    pub deleverage_count: u64,
    pub funding_tick_count: u64,
    pub oracle_prices_tick_count: u64,
    pub multi_transaction_count: u64,
    pub replaced_transactions_count: u64,
}

impl L2TransactionStatistics {
    /// Adds `count` transactions of L2 type `kind`. Unknown types are ignored.
    pub fn record(&mut self, kind: &str, count: u64) {
        let slot = match kind {
            "Deposit" => &mut self.deposit_count,
            "WithdrawalToAddress" => &mut self.withdrawal_to_address_count,
            "ForcedWithdrawal" => &mut self.forced_withdrawal_count,
            "Trade" => &mut self.trade_count,
            "ForcedTrade" => &mut self.forced_trade_count,
            "Transfer" => &mut self.transfer_count,
            "ConditionalTransfer" => &mut self.conditional_transfer_count,
            "Liquidate" => &mut self.liquidate_count,
            "Deleverage" => &mut self.deleverage_count,
            "FundingTick" => &mut self.funding_tick_count,
            "OraclePricesTick" => &mut self.oracle_prices_tick_count,
            "MultiTransaction" => &mut self.multi_transaction_count,
            _ => return,
        };
        *slot += count;
    }

    /// Total non-replaced transactions.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.deposit_count
            + self.withdrawal_to_address_count
            + self.forced_withdrawal_count
            + self.trade_count
            + self.forced_trade_count
            + self.transfer_count
            + self.conditional_transfer_count
            + self.liquidate_count
            + self.deleverage_count
            + self.funding_tick_count
            + self.oracle_prices_tick_count
            + self.multi_transaction_count
    }

    pub(crate) fn to_json(self) -> SyncResult<String> {
        serde_json::to_string(&self).map_err(|e| {
            SyncError::database("Failed to encode L2 transaction statistics", Some(Box::new(e)))
        })
    }

    pub(crate) fn from_json(raw: &str) -> SyncResult<Self> {
        serde_json::from_str(raw).map_err(|e| {
            SyncError::decoding("invalid L2 transaction statistics", Some(Box::new(e)))
        })
    }
}

impl Add for L2TransactionStatistics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            deposit_count: self.deposit_count + rhs.deposit_count,
            withdrawal_to_address_count: self.withdrawal_to_address_count
                + rhs.withdrawal_to_address_count,
            forced_withdrawal_count: self.forced_withdrawal_count + rhs.forced_withdrawal_count,
            trade_count: self.trade_count + rhs.trade_count,
            forced_trade_count: self.forced_trade_count + rhs.forced_trade_count,
            transfer_count: self.transfer_count + rhs.transfer_count,
            conditional_transfer_count: self.conditional_transfer_count
                + rhs.conditional_transfer_count,
            liquidate_count: self.liquidate_count + rhs.liquidate_count,
            deleverage_count: self.deleverage_count + rhs.deleverage_count,
            funding_tick_count: self.funding_tick_count + rhs.funding_tick_count,
            oracle_prices_tick_count: self.oracle_prices_tick_count + rhs.oracle_prices_tick_count,
            multi_transaction_count: self.multi_transaction_count + rhs.multi_transaction_count,
            replaced_transactions_count: self.replaced_transactions_count
                + rhs.replaced_transactions_count,
        }
    }
}

/// One preprocessed row per state update.
///
/// Maps to the `preprocessed_state_details` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedStateDetailsRecord {
    pub id: i64,
    pub state_update_id: u64,
    pub state_transition_hash: String,
    pub block_number: u64,
    pub timestamp: i64,
    pub forced_transaction_count: u64,
    pub withdrawable_asset_update_count: u64,
    /// Point-in-time L2 statistics, `None` until L2 data arrives
    pub l2_transactions_statistics: Option<L2TransactionStatistics>,
    /// Running total up to and including this state update
    pub cumulative_l2_transactions_statistics: Option<L2TransactionStatistics>,
}

/// Raw row of `preprocessed_state_details`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PreprocessedStateDetailsRow {
    pub id: i64,
    pub state_update_id: i64,
    pub state_transition_hash: String,
    pub block_number: i64,
    pub timestamp: i64,
    pub forced_transaction_count: i64,
    pub withdrawable_asset_update_count: i64,
    pub l2_transactions_statistics: Option<String>,
    pub cumulative_l2_transactions_statistics: Option<String>,
}

impl TryFrom<PreprocessedStateDetailsRow> for PreprocessedStateDetailsRecord {
    type Error = SyncError;

    fn try_from(row: PreprocessedStateDetailsRow) -> SyncResult<Self> {
        Ok(Self {
            id: row.id,
            state_update_id: crate::db::from_sql_int(row.state_update_id)?,
            state_transition_hash: row.state_transition_hash,
            block_number: crate::db::from_sql_int(row.block_number)?,
            timestamp: row.timestamp,
            forced_transaction_count: crate::db::from_sql_int(row.forced_transaction_count)?,
            withdrawable_asset_update_count: crate::db::from_sql_int(
                row.withdrawable_asset_update_count,
            )?,
            l2_transactions_statistics: row
                .l2_transactions_statistics
                .as_deref()
                .map(L2TransactionStatistics::from_json)
                .transpose()?,
            cumulative_l2_transactions_statistics: row
                .cumulative_l2_transactions_statistics
                .as_deref()
                .map(L2TransactionStatistics::from_json)
                .transpose()?,
        })
    }
}

/// Per-user L2 statistics for one state update.
///
/// Maps to `preprocessed_user_l2_transactions_statistics`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocessedUserL2StatisticsRecord {
    pub state_update_id: u64,
    pub stark_key: String,
    pub l2_transactions_statistics: L2TransactionStatistics,
    pub cumulative_l2_transactions_statistics: L2TransactionStatistics,
}

/// Raw row of `preprocessed_user_l2_transactions_statistics`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PreprocessedUserL2StatisticsRow {
    pub state_update_id: i64,
    pub stark_key: String,
    pub l2_transactions_statistics: String,
    pub cumulative_l2_transactions_statistics: String,
}

impl TryFrom<PreprocessedUserL2StatisticsRow> for PreprocessedUserL2StatisticsRecord {
    type Error = SyncError;

    fn try_from(row: PreprocessedUserL2StatisticsRow) -> SyncResult<Self> {
        Ok(Self {
            state_update_id: crate::db::from_sql_int(row.state_update_id)?,
            stark_key: row.stark_key,
            l2_transactions_statistics: L2TransactionStatistics::from_json(
                &row.l2_transactions_statistics,
            )?,
            cumulative_l2_transactions_statistics: L2TransactionStatistics::from_json(
                &row.cumulative_l2_transactions_statistics,
            )?,
        })
    }
}

/// Formats an address for storage.
#[must_use]
pub fn address_to_hex(address: Address) -> String {
    format!("{address:?}")
}
