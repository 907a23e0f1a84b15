//! Configuration management for the StarkEx synchronizer.
//!
//! This module handles loading and validating configuration from environment variables
//! using the `dotenvy` crate. Invalid values surface as [`SyncError::ConfigError`].
//!
//! ## Environment Variables
//!
//! Required (one of):
//! - `RPC_URL`: Ethereum JSON-RPC endpoint
//! - `ALCHEMY_API_KEY`: Alchemy API key, used to build a mainnet URL
//!
//! Optional (with defaults):
//! - `DATABASE_URL`: SQLite database (default: `sqlite:./starkex-sync.db`)
//! - `EARLIEST_BLOCK`: Cursor used before the first sync (default: 11813207)
//! - `MAX_BLOCK_NUMBER`: Highest block that may be synced (default: unlimited)
//! - `PERPETUAL_ADDRESS`: Perpetual contract (default: dYdX mainnet)
//! - `REGISTRY_ADDRESS`: Memory page fact registry (default: mainnet registry)
//! - `ESCAPE_VERIFIER_ADDRESS`: Escape verifier contract (default: not watched)
//! - `COLLATERAL_ASSET_HASH`: Asset credited by verified escapes (default: dYdX USDC)
//! - `POLL_INTERVAL_SECS`: Chain head polling interval (default: 12)
//! - `FREEZE_GRACE_PERIOD_SECS`: Forced request grace period (default: 7 days)
//! - `REORG_WINDOW`: Block hashes retained for reorg detection (default: 1000)
//!
//! ## Example
//!
//! ```no_run
//! use starkex_sync::config::Config;
//! use starkex_sync::error::SyncResult;
//!
//! # fn main() -> SyncResult<()> {
//! let config = Config::from_env()?;
//! println!("Database: {}", config.database_url());
//! # Ok(())
//! # }
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, B256};

use crate::error::{SyncError, SyncResult};
use crate::events::{COLLATERAL_ASSET_HASH, PERPETUAL_ADDRESS, REGISTRY_ADDRESS};
use crate::freeze::DEFAULT_GRACE_PERIOD;

/// First block of the dYdX perpetual deployment.
pub const DEFAULT_EARLIEST_BLOCK: u64 = 11_813_207;

/// Default SQLite location.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:./starkex-sync.db";

/// Main configuration struct for the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Ethereum JSON-RPC endpoint
    rpc_url: String,

    /// SQLite connection string
    database_url: String,

    /// Cursor used when none is persisted
    earliest_block: u64,

    /// Ceiling for synced blocks
    max_block_number: Option<u64>,

    /// Perpetual contract emitting state updates and user transactions
    perpetual_address: Address,

    /// Memory page fact registry
    registry_address: Address,

    /// Escape verifier, if escapes should be collected
    escape_verifier_address: Option<Address>,

    /// Asset credited by a verified escape
    collateral_asset: B256,

    /// Chain head polling interval in seconds
    poll_interval_secs: u64,

    /// Forced request grace period in seconds
    freeze_grace_period_secs: u64,

    /// Number of recent block hashes kept
    reorg_window: u64,
}

fn parse<T>(name: &str, value: &str) -> SyncResult<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.trim().parse::<T>().map_err(|e| {
        SyncError::config(format!("{name} has an invalid value: {value}"), Some(Box::new(e)))
    })
}

impl Config {
    /// Configuration with mainnet defaults for everything but the RPC URL.
    #[must_use]
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            earliest_block: DEFAULT_EARLIEST_BLOCK,
            max_block_number: None,
            perpetual_address: PERPETUAL_ADDRESS,
            registry_address: REGISTRY_ADDRESS,
            escape_verifier_address: None,
            collateral_asset: COLLATERAL_ASSET_HASH,
            poll_interval_secs: 12,
            freeze_grace_period_secs: DEFAULT_GRACE_PERIOD.as_secs(),
            reorg_window: 1000,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Loads `.env` first if present.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ConfigError`] if no RPC endpoint is configured or
    /// a value does not parse.
    pub fn from_env() -> SyncResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SyncResult<Self> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let rpc_url = match (var("RPC_URL"), var("ALCHEMY_API_KEY")) {
            (Some(url), _) => url,
            (None, Some(key)) if key != "your_alchemy_api_key_here" => {
                format!("https://eth-mainnet.g.alchemy.com/v2/{key}")
            }
            _ => {
                return Err(SyncError::config(
                    "RPC_URL or ALCHEMY_API_KEY environment variable is required",
                    None,
                ))
            }
        };

        let mut config = Self::new(rpc_url);
        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(value) = var("EARLIEST_BLOCK") {
            config.earliest_block = parse("EARLIEST_BLOCK", &value)?;
        }
        config.max_block_number = var("MAX_BLOCK_NUMBER")
            .map(|value| parse("MAX_BLOCK_NUMBER", &value))
            .transpose()?;
        if let Some(value) = var("PERPETUAL_ADDRESS") {
            config.perpetual_address = parse("PERPETUAL_ADDRESS", &value)?;
        }
        if let Some(value) = var("REGISTRY_ADDRESS") {
            config.registry_address = parse("REGISTRY_ADDRESS", &value)?;
        }
        config.escape_verifier_address = var("ESCAPE_VERIFIER_ADDRESS")
            .map(|value| parse("ESCAPE_VERIFIER_ADDRESS", &value))
            .transpose()?;
        if let Some(value) = var("COLLATERAL_ASSET_HASH") {
            config.collateral_asset = parse("COLLATERAL_ASSET_HASH", &value)?;
        }
        if let Some(value) = var("POLL_INTERVAL_SECS") {
            config.poll_interval_secs = parse("POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = var("FREEZE_GRACE_PERIOD_SECS") {
            config.freeze_grace_period_secs = parse("FREEZE_GRACE_PERIOD_SECS", &value)?;
        }
        if let Some(value) = var("REORG_WINDOW") {
            config.reorg_window = parse("REORG_WINDOW", &value)?;
        }

        if config.poll_interval_secs == 0 {
            return Err(SyncError::config("POLL_INTERVAL_SECS must be greater than zero", None));
        }
        Ok(config)
    }

    /// Overrides the database location.
    #[must_use]
    pub fn with_database_url(mut self, database_url: impl Into<String>) -> Self {
        self.database_url = database_url.into();
        self
    }

    /// Overrides the earliest block.
    #[must_use]
    pub const fn with_earliest_block(mut self, earliest_block: u64) -> Self {
        self.earliest_block = earliest_block;
        self
    }

    /// Get the Ethereum RPC URL.
    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Get the earliest block.
    #[must_use]
    pub const fn earliest_block(&self) -> u64 {
        self.earliest_block
    }

    /// Get the block ceiling.
    #[must_use]
    pub const fn max_block_number(&self) -> Option<u64> {
        self.max_block_number
    }

    /// Get the perpetual contract address.
    #[must_use]
    pub const fn perpetual_address(&self) -> Address {
        self.perpetual_address
    }

    /// Get the memory page fact registry address.
    #[must_use]
    pub const fn registry_address(&self) -> Address {
        self.registry_address
    }

    /// Get the escape verifier address.
    #[must_use]
    pub const fn escape_verifier_address(&self) -> Option<Address> {
        self.escape_verifier_address
    }

    /// Get the collateral asset hash.
    #[must_use]
    pub const fn collateral_asset(&self) -> B256 {
        self.collateral_asset
    }

    /// Get the polling interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Get the freeze grace period.
    #[must_use]
    pub const fn freeze_grace_period(&self) -> Duration {
        Duration::from_secs(self.freeze_grace_period_secs)
    }

    /// Get the reorg window in blocks.
    #[must_use]
    pub const fn reorg_window(&self) -> u64 {
        self.reorg_window
    }
}
