//! # StarkEx State Synchronizer
//!
//! Indexes a StarkEx perpetual exchange from Ethereum using
//! [Alloy](https://github.com/alloy-rs/alloy) and SQLite.
//!
//! The synchronizer follows the chain head, collects the exchange's on-chain
//! events per block range, keeps derived statistics in step with the synced
//! cursor and tracks whether the exchange can be frozen. Reorgs are handled
//! by discarding everything above the common ancestor and syncing again.
//!
//! ## Architecture
//!
//! 1. **Chain access** ([`rpc`]) - [`rpc::EthereumClient`] seam over Alloy
//! 2. **Block following** ([`sync::block_downloader`]) - canonical blocks and reorgs
//! 3. **Orchestration** ([`sync`]) - pure reducer plus a single-worker job queue
//! 4. **Collection** ([`collectors`]) - typed event decoding and persistence
//! 5. **Preprocessing** ([`preprocessing`]) - cumulative statistics per state update
//! 6. **Freeze check** ([`freeze`]) - forced request deadline tracking
//! 7. **Persistence** ([`db`]) - SQLite repositories and the cursor store
//!
//! ## Quick Start
//!
//! ```bash
//! RPC_URL=https://... starkex-sync run
//! starkex-sync status
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`error::SyncResult<T>`](error::SyncResult):
//!
//! ```rust
//! use starkex_sync::error::{SyncError, SyncResult};
//!
//! fn example() -> SyncResult<()> {
//!     Err(SyncError::invariant("missing previous statistics", None))
//! }
//! # assert!(example().is_err());
//! ```

#![forbid(unsafe_code)]

pub mod app;
pub mod cli;
pub mod collectors;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod freeze;
pub mod migrator;
pub mod model;
pub mod observability;
pub mod preprocessing;
pub mod rpc;
pub mod sync;
