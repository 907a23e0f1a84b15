//! Shared fixtures for integration tests: a scriptable chain, a block source
//! fed by hand and recording stand-ins for the scheduler's collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use starkex_sync::error::{SyncError, SyncResult};
use starkex_sync::events::{
    registerContinuousMemoryPageCall, LogForcedWithdrawalRequest, LogMemoryPageFactContinuous,
    LogRootUpdate, LogStateTransitionFact, PERPETUAL_ADDRESS, REGISTRY_ADDRESS,
};
use starkex_sync::freeze::FreezeStatusUpdater;
use starkex_sync::model::{BlockRange, BlockRecord, FreezeStatus};
use starkex_sync::preprocessing::PreprocessorSync;
use starkex_sync::rpc::{EthereumClient, LogFilter, TransactionRecord};
use starkex_sync::sync::{BlockEvent, BlockSource, DataSync};
use tokio::sync::{mpsc, oneshot};

/// Hash of block `number` on the canonical (`false`) or forked branch.
pub fn block_hash(number: u64, forked: bool) -> B256 {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&number.to_be_bytes());
    bytes[31] = u8::from(forked);
    B256::from(bytes)
}

/// Block on the canonical branch. Timestamps are `number * 10`.
pub fn block(number: u64) -> BlockRecord {
    BlockRecord::new(number, block_hash(number, false), block_hash(number.saturating_sub(1), false), number * 10)
}

#[derive(Default)]
struct ChainState {
    head: u64,
    logs: Vec<Log>,
    calldata: HashMap<B256, Bytes>,
    fork_from: Option<u64>,
}

/// In-memory chain with a movable head and an optional fork point.
#[derive(Default)]
pub struct TestChain {
    state: Mutex<ChainState>,
}

impl TestChain {
    pub fn new(head: u64) -> Self {
        let chain = Self::default();
        chain.set_head(head);
        chain
    }

    pub fn set_head(&self, head: u64) {
        self.state.lock().expect("lock").head = head;
    }

    /// Blocks at or above `number` switch to the forked branch.
    pub fn fork_from(&self, number: u64) {
        self.state.lock().expect("lock").fork_from = Some(number);
    }

    pub fn push_log(&self, log: Log) {
        self.state.lock().expect("lock").logs.push(log);
    }

    /// Drops every log at or above `number`.
    pub fn remove_logs_from(&self, number: u64) {
        self.state
            .lock()
            .expect("lock")
            .logs
            .retain(|log| log.block_number.is_some_and(|n| n < number));
    }

    pub fn set_calldata(&self, transaction_hash: B256, input: Bytes) {
        self.state.lock().expect("lock").calldata.insert(transaction_hash, input);
    }

    /// Adds a state update (fact and root update in one transaction) at
    /// `block_number`.
    pub fn add_state_update(&self, block_number: u64, sequence_number: u64) {
        let transaction_hash = B256::from(U256::from(block_number * 1000 + sequence_number));
        let fact = LogStateTransitionFact {
            stateTransitionFact: B256::from(U256::from(0xfac7_0000 + sequence_number)),
        };
        let root = LogRootUpdate {
            sequenceNumber: U256::from(sequence_number),
            batchId: U256::from(sequence_number + 1000),
            vaultRoot: U256::from(0xaa00 + sequence_number),
            orderRoot: U256::from(0xbb00 + sequence_number),
        };
        self.push_log(log_of(PERPETUAL_ADDRESS, &fact, block_number, 0, transaction_hash));
        self.push_log(log_of(PERPETUAL_ADDRESS, &root, block_number, 1, transaction_hash));
    }

    /// Registers a memory page with `words` at `block_number`.
    pub fn add_page(&self, block_number: u64, words: &[u64]) {
        let transaction_hash = B256::from(U256::from(block_number * 1000 + 999));
        let call = registerContinuousMemoryPageCall {
            startAddr: U256::from(1),
            values: words.iter().map(|w| U256::from(*w)).collect(),
            z: U256::from(2),
            alpha: U256::from(3),
            prime: U256::from(5),
        };
        let event = LogMemoryPageFactContinuous {
            factHash: B256::from(U256::from(0x9a9e_0000 + block_number)),
            memoryHash: U256::from(0x3e3_0000 + block_number),
            prod: U256::from(7),
        };
        self.set_calldata(transaction_hash, call.abi_encode().into());
        self.push_log(log_of(REGISTRY_ADDRESS, &event, block_number, 2, transaction_hash));
    }

    /// Adds a forced withdrawal request by `stark_key` at `block_number`.
    pub fn add_forced_withdrawal(&self, block_number: u64, stark_key: u64) {
        let event = LogForcedWithdrawalRequest {
            starkKey: U256::from(stark_key),
            positionId: U256::from(stark_key + 1),
            quantizedAmount: U256::from(100),
        };
        let transaction_hash = B256::from(U256::from(block_number * 1000 + 500 + stark_key));
        self.push_log(log_of(PERPETUAL_ADDRESS, &event, block_number, 3, transaction_hash));
    }

    fn block_record(state: &ChainState, number: u64) -> BlockRecord {
        let forked = |n: u64| state.fork_from.is_some_and(|f| n >= f);
        let parent = number.saturating_sub(1);
        BlockRecord::new(number, block_hash(number, forked(number)), block_hash(parent, forked(parent)), number * 10)
    }
}

#[async_trait]
impl EthereumClient for TestChain {
    async fn get_block_number(&self) -> SyncResult<u64> {
        Ok(self.state.lock().expect("lock").head)
    }

    async fn get_block(&self, number: u64) -> SyncResult<BlockRecord> {
        let state = self.state.lock().expect("lock");
        if number > state.head {
            return Err(SyncError::rpc(format!("Block {number} not found"), None));
        }
        Ok(Self::block_record(&state, number))
    }

    async fn get_logs_in_range(&self, range: &BlockRange, filter: &LogFilter) -> SyncResult<Vec<Log>> {
        let state = self.state.lock().expect("lock");
        Ok(state
            .logs
            .iter()
            .filter(|log| log.inner.address == filter.address)
            .filter(|log| log.topics().first().is_some_and(|t| filter.topics.contains(t)))
            .filter(|log| log.block_number.is_some_and(|n| range.contains(n)))
            .cloned()
            .collect())
    }

    async fn get_transaction(&self, hash: B256) -> SyncResult<TransactionRecord> {
        let state = self.state.lock().expect("lock");
        let input = state
            .calldata
            .get(&hash)
            .cloned()
            .ok_or_else(|| SyncError::rpc(format!("Transaction {hash} not found"), None))?;
        let block_number = state
            .logs
            .iter()
            .find(|log| log.transaction_hash == Some(hash))
            .and_then(|log| log.block_number);
        Ok(TransactionRecord {
            hash,
            block_number,
            input,
        })
    }
}

/// Encodes `event` as a mined log.
pub fn log_of<E: SolEvent>(
    address: Address,
    event: &E,
    block_number: u64,
    log_index: u64,
    transaction_hash: B256,
) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_number: Some(block_number),
        transaction_hash: Some(transaction_hash),
        log_index: Some(log_index),
        ..Default::default()
    }
}

/// Block source driven by the test.
#[derive(Default)]
pub struct ManualBlockSource {
    known: Mutex<Vec<BlockRecord>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BlockEvent>>>,
}

impl ManualBlockSource {
    pub fn with_known_blocks(blocks: Vec<BlockRecord>) -> Self {
        Self {
            known: Mutex::new(blocks),
            ..Default::default()
        }
    }

    pub fn emit(&self, event: BlockEvent) {
        for subscriber in self.subscribers.lock().expect("lock").iter() {
            let _ = subscriber.send(event.clone());
        }
    }
}

#[async_trait]
impl BlockSource for ManualBlockSource {
    async fn get_known_blocks(&self, since_block: u64) -> SyncResult<Vec<BlockRecord>> {
        Ok(self
            .known
            .lock()
            .expect("lock")
            .iter()
            .filter(|block| block.number > since_block)
            .cloned()
            .collect())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<BlockEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.lock().expect("lock").push(sender);
        receiver
    }
}

/// Call observed by [`RecordingDataSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCall {
    Sync(BlockRange, bool),
    Discard(u64),
}

/// Records calls; can fail or hold the next syncs.
#[derive(Default)]
pub struct RecordingDataSync {
    calls: Mutex<Vec<DataCall>>,
    failures: Mutex<u32>,
    panics: Mutex<bool>,
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl RecordingDataSync {
    pub fn calls(&self) -> Vec<DataCall> {
        self.calls.lock().expect("lock").clone()
    }

    pub fn syncs(&self) -> Vec<BlockRange> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DataCall::Sync(range, _) => Some(range),
                DataCall::Discard(_) => None,
            })
            .collect()
    }

    /// The next `count` syncs fail.
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock().expect("lock") = count;
    }

    /// The next sync panics instead of returning.
    pub fn panic_next(&self) {
        *self.panics.lock().expect("lock") = true;
    }

    /// The next sync waits until the returned sender fires.
    pub fn hold_next_sync(&self) -> oneshot::Sender<()> {
        let (sender, receiver) = oneshot::channel();
        *self.gate.lock().expect("lock") = Some(receiver);
        sender
    }
}

#[async_trait]
impl DataSync for RecordingDataSync {
    #[allow(clippy::panic)]
    async fn sync(&self, range: &BlockRange, is_tip: bool) -> SyncResult<()> {
        self.calls.lock().expect("lock").push(DataCall::Sync(*range, is_tip));
        let panics = std::mem::take(&mut *self.panics.lock().expect("lock"));
        if panics {
            panic!("injected panic while syncing {range}");
        }
        let gate = self.gate.lock().expect("lock").take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let mut failures = self.failures.lock().expect("lock");
        if *failures > 0 {
            *failures -= 1;
            return Err(SyncError::rpc("injected failure", None));
        }
        Ok(())
    }

    async fn discard_after(&self, block_number: u64) -> SyncResult<()> {
        self.calls.lock().expect("lock").push(DataCall::Discard(block_number));
        Ok(())
    }
}

/// Records every cursor it is asked to preprocess to.
#[derive(Default)]
pub struct RecordingPreprocessor {
    cursors: Mutex<Vec<u64>>,
}

impl RecordingPreprocessor {
    pub fn cursors(&self) -> Vec<u64> {
        self.cursors.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PreprocessorSync for RecordingPreprocessor {
    async fn sync(&self, cursor: u64) -> SyncResult<()> {
        self.cursors.lock().expect("lock").push(cursor);
        Ok(())
    }
}

/// Freeze check that never changes status.
#[derive(Default)]
pub struct StaticFreeze;

#[async_trait]
impl FreezeStatusUpdater for StaticFreeze {
    async fn update_freeze_status(&self) -> SyncResult<FreezeStatus> {
        Ok(FreezeStatus::NotFrozen)
    }

    async fn set_freeze_status(&self, status: FreezeStatus) -> SyncResult<FreezeStatus> {
        Ok(status)
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(description: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(condition(), "timed out waiting for: {description}");
}
