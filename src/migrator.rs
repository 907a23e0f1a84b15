//! One-time data backfills keyed by `softwareMigrationNumber`.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::collectors::{CollectOptions, UserTransactionCollector};
use crate::db::key_value::{LAST_BLOCK_NUMBER_SYNCED, SOFTWARE_MIGRATION_NUMBER};
use crate::db::KeyValueStore;
use crate::error::SyncResult;
use crate::model::BlockRange;

/// Blocks collected per backfill step.
pub const MIGRATION_CHUNK_SIZE: u64 = 500_000;

/// Re-collects user transactions from scratch once per database.
pub struct UserTransactionMigrator {
    key_values: KeyValueStore,
    collector: Arc<UserTransactionCollector>,
    earliest_block: u64,
}

impl UserTransactionMigrator {
    #[must_use]
    pub const fn new(key_values: KeyValueStore, collector: Arc<UserTransactionCollector>, earliest_block: u64) -> Self {
        Self {
            key_values,
            collector,
            earliest_block,
        }
    }

    /// Runs the backfill unless it already ran.
    ///
    /// Returns `true` when user transactions were re-collected.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> SyncResult<bool> {
        let migration_number = self
            .key_values
            .find_by_key_with_default(SOFTWARE_MIGRATION_NUMBER, 0)
            .await?;
        if migration_number >= 1 {
            return Ok(false);
        }

        let migrated = match self.key_values.find_by_key(LAST_BLOCK_NUMBER_SYNCED).await? {
            Some(last_synced) => {
                self.migrate_user_transactions(last_synced).await?;
                true
            }
            None => false,
        };
        self.key_values.add_or_update(SOFTWARE_MIGRATION_NUMBER, &1).await?;
        Ok(migrated)
    }

    async fn migrate_user_transactions(&self, last_synced: u64) -> SyncResult<()> {
        info!(last_synced, "User transactions migration started");
        let removed = self.collector.delete_all().await?;
        info!(removed, "Cleared user transactions");

        let options = CollectOptions {
            skip_withdrawable_assets: true,
        };
        let mut collected = 0;
        for range in BlockRange::new(self.earliest_block, last_synced + 1).chunks(MIGRATION_CHUNK_SIZE) {
            info!(range = %range, "Collecting user transactions");
            collected += self.collector.collect_with(&range, options).await?.len();
        }
        info!(collected, "User transactions migration finished");
        Ok(())
    }
}
