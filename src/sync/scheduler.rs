//! Orchestrates the sync machine.
//!
//! The scheduler owns the [`SyncState`], feeds it actions and runs every
//! effect it emits on a single-worker [`JobQueue`]. Effects therefore run
//! one at a time in emission order, and a discard produced by a reorg is
//! always applied before blocks above the common ancestor are synced again.
//!
//! The persisted cursor (`lastBlockNumberSynced`) only moves forward after
//! all writes for a range succeeded.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::block_downloader::BlockSource;
use super::data_sync::DataSync;
use super::job_queue::{panic_message, JobQueue};
use super::reducer::{reduce, SyncAction, SyncEffect, SyncState};
use crate::db::key_value::LAST_BLOCK_NUMBER_SYNCED;
use crate::db::KeyValueStore;
use crate::error::SyncResult;
use crate::freeze::FreezeStatusUpdater;
use crate::model::BlockRange;
use crate::preprocessing::PreprocessorSync;

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Cursor used when none is persisted
    pub earliest_block: u64,
    /// Syncs reaching past this block are dropped, stalling progress
    pub max_block_number: Option<u64>,
}

/// Collaborators of the scheduler.
pub struct SchedulerDeps {
    pub key_values: KeyValueStore,
    pub data_sync: Arc<dyn DataSync>,
    pub preprocessor: Arc<dyn PreprocessorSync>,
    pub freeze: Arc<dyn FreezeStatusUpdater>,
    pub block_source: Arc<dyn BlockSource>,
}

struct Inner {
    state: Mutex<SyncState>,
    queue: JobQueue,
    deps: SchedulerDeps,
    options: SchedulerOptions,
}

/// Drives collection, preprocessing and freeze checks from block events.
///
/// Cloning is cheap; clones share state and queue.
#[derive(Clone)]
pub struct SyncScheduler {
    inner: Arc<Inner>,
}

impl SyncScheduler {
    /// Creates an uninitialized scheduler. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(deps: SchedulerDeps, options: SchedulerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SyncState::default()),
                queue: JobQueue::new(),
                deps,
                options,
            }),
        }
    }

    /// Current machine state.
    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Highest number of effects ever observed running at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.inner.queue.max_concurrency()
    }

    /// Resolves once no effect is queued or running.
    pub async fn wait_idle(&self) {
        self.inner.queue.wait_idle().await;
    }

    /// Reads the cursor, reconciles derived data with it and starts
    /// following the block source.
    ///
    /// Returns the task forwarding block events; it ends when the source
    /// closes its channel.
    #[instrument(skip(self))]
    pub async fn start(&self) -> SyncResult<JoinHandle<()>> {
        let deps = &self.inner.deps;
        let last_synced = deps
            .key_values
            .find_by_key_with_default(LAST_BLOCK_NUMBER_SYNCED, self.inner.options.earliest_block)
            .await?;
        info!(last_synced, "Starting sync scheduler");

        deps.data_sync.discard_after(last_synced).await?;
        deps.preprocessor.sync(last_synced).await?;
        deps.freeze.update_freeze_status().await?;

        // Subscribe first so no block between the snapshot and the
        // subscription is missed; duplicates are harmless to the reducer.
        let mut events = deps.block_source.subscribe();
        let known_blocks = deps.block_source.get_known_blocks(last_synced).await?;
        self.dispatch(SyncAction::Initialized {
            last_synced,
            known_blocks,
        });

        let scheduler = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                scheduler.dispatch(event.into());
            }
            debug!("Block source closed");
        }))
    }

    /// Feeds `action` to the machine and queues the resulting effect.
    pub fn dispatch(&self, action: SyncAction) {
        let name = action.name();
        let effect = {
            let mut state = self.inner.state.lock().unwrap_or_else(PoisonError::into_inner);
            let (next, effect) = reduce(*state, action);
            *state = next;
            effect
        };
        debug!(action = name, effect = ?effect, "Dispatched");

        if let Some(effect) = effect {
            let scheduler = self.clone();
            self.inner.queue.push(async move {
                match effect {
                    SyncEffect::Sync(range) => scheduler.handle_sync(range).await,
                    SyncEffect::DiscardAfter(block_number) => scheduler.handle_discard(block_number).await,
                }
            });
        }
    }

    #[instrument(skip(self), fields(range = %range))]
    async fn handle_sync(&self, range: BlockRange) {
        if let (Some(max), Some(last)) = (self.inner.options.max_block_number, range.to_block()) {
            if last > max {
                info!(max_block_number = max, "Range exceeds max block number, sync skipped");
                return;
            }
        }

        match AssertUnwindSafe(self.sync(range)).catch_unwind().await {
            Ok(Ok(())) => self.dispatch(SyncAction::SyncSucceeded),
            Ok(Err(e)) => {
                error!(error = %e, transient = e.is_transient(), "Sync failed");
                self.dispatch(SyncAction::SyncFailed(range));
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "Sync panicked");
                self.dispatch(SyncAction::SyncFailed(range));
            }
        }
    }

    async fn sync(&self, range: BlockRange) -> SyncResult<()> {
        let deps = &self.inner.deps;
        let is_tip = self.state().is_tip(range.end());

        // Clear anything a failed earlier attempt left behind
        deps.data_sync.discard_after(range.start().saturating_sub(1)).await?;
        deps.data_sync.sync(&range, is_tip).await?;

        let cursor = range.end().saturating_sub(1);
        deps.key_values.add_or_update(LAST_BLOCK_NUMBER_SYNCED, &cursor).await?;
        deps.preprocessor.sync(cursor).await?;
        deps.freeze.update_freeze_status().await?;
        info!(cursor, is_tip, "Sync succeeded");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn handle_discard(&self, block_number: u64) {
        match AssertUnwindSafe(self.discard(block_number)).catch_unwind().await {
            Ok(Ok(())) => self.dispatch(SyncAction::DiscardAfterSucceeded(block_number)),
            Ok(Err(e)) => {
                error!(error = %e, transient = e.is_transient(), "Discard failed");
                self.dispatch(SyncAction::DiscardAfterFailed);
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "Discard panicked");
                self.dispatch(SyncAction::DiscardAfterFailed);
            }
        }
    }

    async fn discard(&self, block_number: u64) -> SyncResult<()> {
        let deps = &self.inner.deps;
        let cursor = deps
            .key_values
            .find_by_key_with_default(LAST_BLOCK_NUMBER_SYNCED, self.inner.options.earliest_block)
            .await?;
        // A reorg above the cursor does not move it forward
        let cursor = cursor.min(block_number);
        warn!(block_number, cursor, "Discarding data after reorg");

        deps.key_values.add_or_update(LAST_BLOCK_NUMBER_SYNCED, &cursor).await?;
        deps.preprocessor.sync(cursor).await?;
        deps.data_sync.discard_after(block_number).await?;
        deps.freeze.update_freeze_status().await?;
        Ok(())
    }
}
