//! Runs every collector over a block range in dependency order.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{info, instrument, warn};

use crate::collectors::{
    Collector, PageCollector, StateTransitionFactCollector, StateUpdateCollector,
    UserTransactionCollector,
};
use crate::db::repository::StateUpdateRepository;
use crate::error::{SyncError, SyncResult};
use crate::model::BlockRange;

/// Collection work driven by the scheduler.
#[async_trait]
pub trait DataSync: Send + Sync {
    /// Collects `range`. `is_tip` marks a range ending at the chain head.
    async fn sync(&self, range: &BlockRange, is_tip: bool) -> SyncResult<()>;

    /// Removes collected data above `block_number`.
    async fn discard_after(&self, block_number: u64) -> SyncResult<()>;
}

/// [`DataSync`] over the four collectors.
pub struct DataSyncService {
    facts: StateTransitionFactCollector,
    pages: PageCollector,
    state_updates: StateUpdateCollector,
    user_transactions: Arc<UserTransactionCollector>,
    state_update_repository: StateUpdateRepository,
}

impl DataSyncService {
    #[must_use]
    pub fn new(
        pool: SqlitePool,
        facts: StateTransitionFactCollector,
        pages: PageCollector,
        state_updates: StateUpdateCollector,
        user_transactions: Arc<UserTransactionCollector>,
    ) -> Self {
        Self {
            facts,
            pages,
            state_updates,
            user_transactions,
            state_update_repository: StateUpdateRepository::new(pool),
        }
    }

    /// State update ids must run from 1 without gaps.
    async fn check_state_update_ids(&self) -> SyncResult<()> {
        let (count, max_id) = self.state_update_repository.count_and_max_id().await?;
        let max_id = max_id.unwrap_or(0);
        if count != max_id {
            return Err(SyncError::invariant(
                format!("State update ids are not contiguous: {count} rows, highest id {max_id}"),
                None,
            ));
        }
        Ok(())
    }
}

/// Runs one collector; failures carry the collector's name.
async fn collect<C: Collector>(collector: &C, range: &BlockRange) -> SyncResult<Vec<C::Record>> {
    collector.collect(range).await.map_err(|e| {
        warn!(collector = collector.name(), %range, error = %e, "Collector failed");
        e.context(collector.name())
    })
}

#[async_trait]
impl DataSync for DataSyncService {
    #[instrument(skip(self), fields(range = %range))]
    async fn sync(&self, range: &BlockRange, is_tip: bool) -> SyncResult<()> {
        let facts = collect(&self.facts, range).await?;
        let pages = collect(&self.pages, range).await?;
        let state_updates = collect(&self.state_updates, range).await?;
        let user_transactions = collect(self.user_transactions.as_ref(), range).await?;

        if is_tip {
            self.check_state_update_ids().await?;
        }

        info!(
            facts = facts.len(),
            pages = pages.len(),
            state_updates = state_updates.len(),
            user_transactions = user_transactions.len(),
            "Range synced"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn discard_after(&self, block_number: u64) -> SyncResult<()> {
        let mut removed = 0;
        removed += self.facts.discard_after(block_number).await?;
        removed += self.pages.discard_after(block_number).await?;
        removed += self.state_updates.discard_after(block_number).await?;
        removed += self.user_transactions.discard_after(block_number).await?;
        if removed > 0 {
            info!(removed, "Discarded collected data");
        }
        Ok(())
    }
}
