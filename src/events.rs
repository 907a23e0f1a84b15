//! StarkEx contract events with compile-time type safety.
//!
//! Event and calldata layouts are generated with Alloy's `sol!` macro, so
//! topics and field decoding always match the Solidity signatures.
//!
//! ## Contracts
//!
//! - **Perpetual** ([`IStarkPerpetual`]): state transition facts, root
//!   updates, forced requests, withdrawals and the freeze notice
//! - **Memory page fact registry** ([`IMemoryPageFactRegistry`]): continuous
//!   memory pages and the `registerContinuousMemoryPage` call that carries
//!   their data
//! - **Escape verifier** ([`IEscapeVerifier`]): verified escapes
//!
//! ## Example
//!
//! ```
//! use alloy::primitives::{LogData, U256};
//! use alloy::sol_types::SolEvent;
//! use starkex_sync::events::LogFullWithdrawalRequest;
//!
//! let event = LogFullWithdrawalRequest {
//!     starkKey: U256::from(1),
//!     vaultId: U256::from(2),
//! };
//! let data: LogData = event.encode_log_data();
//! let decoded = LogFullWithdrawalRequest::decode_log_data(&data, true).unwrap();
//! assert_eq!(decoded.vaultId, U256::from(2));
//! ```

use alloy::primitives::{address, b256, Address, LogData, B256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::error::{SyncError, SyncResult};

sol! {
    /// StarkEx perpetual exchange contract.
    interface IStarkPerpetual {
        /// A state transition fact was registered by the verifier.
        event LogStateTransitionFact(bytes32 stateTransitionFact);

        /// The exchange state root was updated.
        event LogRootUpdate(uint256 sequenceNumber, uint256 batchId, uint256 vaultRoot, uint256 orderRoot);

        event LogForcedWithdrawalRequest(uint256 starkKey, uint256 positionId, uint256 quantizedAmount);

        event LogForcedTradeRequest(
            uint256 starkKeyA,
            uint256 starkKeyB,
            uint256 positionIdA,
            uint256 positionIdB,
            uint256 collateralAssetId,
            uint256 syntheticAssetId,
            uint256 amountCollateral,
            uint256 amountSynthetic,
            bool aIsBuyingSynthetic,
            uint256 nonce
        );

        event LogFullWithdrawalRequest(uint256 starkKey, uint256 vaultId);

        event LogWithdrawalPerformed(
            uint256 ownerKey,
            uint256 assetType,
            uint256 nonQuantizedAmount,
            uint256 quantizedAmount,
            address recipient
        );

        event LogWithdrawalWithTokenIdPerformed(
            uint256 ownerKey,
            uint256 assetType,
            uint256 tokenId,
            uint256 assetId,
            uint256 nonQuantizedAmount,
            uint256 quantizedAmount,
            address recipient
        );

        event LogMintWithdrawalPerformed(
            uint256 ownerKey,
            uint256 assetType,
            uint256 nonQuantizedAmount,
            uint256 quantizedAmount,
            uint256 assetId
        );

        /// The exchange was frozen.
        event LogFrozen();
    }

    /// Fact registry for memory pages.
    interface IMemoryPageFactRegistry {
        event LogMemoryPageFactContinuous(bytes32 factHash, uint256 memoryHash, uint256 prod);

        function registerContinuousMemoryPage(
            uint256 startAddr,
            uint256[] values,
            uint256 z,
            uint256 alpha,
            uint256 prime
        );
    }

    /// Escape verifier used once the exchange is frozen.
    interface IEscapeVerifier {
        event LogEscapeVerified(
            uint256 publicKey,
            int256 withdrawalAmount,
            bytes32 sharedStateHash,
            uint256 positionId
        );
    }
}

pub use IEscapeVerifier::LogEscapeVerified;
pub use IMemoryPageFactRegistry::{registerContinuousMemoryPageCall, LogMemoryPageFactContinuous};
pub use IStarkPerpetual::{
    LogForcedTradeRequest, LogForcedWithdrawalRequest, LogFrozen, LogFullWithdrawalRequest,
    LogMintWithdrawalPerformed, LogRootUpdate, LogStateTransitionFact, LogWithdrawalPerformed,
    LogWithdrawalWithTokenIdPerformed,
};

/// dYdX perpetual contract on Ethereum mainnet.
pub const PERPETUAL_ADDRESS: Address = address!("D54f502e184B6B739d7D27a6410a67dc462D69c8");

/// Memory page fact registry on Ethereum mainnet.
pub const REGISTRY_ADDRESS: Address = address!("EfbCcE4659db72eC6897F46783303708cf9ACef8");

/// dYdX USDC collateral asset type, credited by verified escapes.
pub const COLLATERAL_ASSET_HASH: B256 =
    b256!("02893294412a4c8f915f75892b395ebbf6859ec246ec365c3b1f56f47c3a0a5d");

/// Decodes `log` as event `E`.
///
/// # Errors
///
/// Returns [`SyncError::DecodingError`] with the block and transaction of the
/// offending log if the topics or data do not match.
pub fn decode_log<E: SolEvent>(log: &Log) -> SyncResult<E> {
    let data = LogData::new_unchecked(log.topics().to_vec(), log.data().data.clone());
    E::decode_log_data(&data, true).map_err(|e| {
        SyncError::decoding(
            format!(
                "Failed to decode {} at block {:?}, transaction {:?}",
                E::SIGNATURE,
                log.block_number,
                log.transaction_hash
            ),
            Some(Box::new(e)),
        )
    })
}
