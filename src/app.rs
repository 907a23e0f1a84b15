//! Wiring of the synchronizer components.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tracing::info;

use crate::collectors::{
    PageCollector, StateTransitionFactCollector, StateUpdateCollector, UserTransactionAddresses,
    UserTransactionCollector,
};
use crate::config::Config;
use crate::db::{create_pool, KeyValueStore};
use crate::error::SyncResult;
use crate::freeze::FreezeCheckService;
use crate::migrator::UserTransactionMigrator;
use crate::preprocessing::Preprocessor;
use crate::rpc::{AlloyEthereumClient, EthereumClient};
use crate::sync::{
    BlockDownloader, BlockDownloaderOptions, DataSyncService, SchedulerDeps, SchedulerOptions,
    SyncScheduler,
};

/// Fully wired synchronizer.
pub struct Application {
    pub pool: SqlitePool,
    pub key_values: KeyValueStore,
    pub downloader: Arc<BlockDownloader>,
    pub scheduler: SyncScheduler,
    pub preprocessor: Arc<Preprocessor>,
    pub freeze: Arc<FreezeCheckService>,
    pub migrator: UserTransactionMigrator,
}

impl Application {
    /// Connects to the configured node and database.
    ///
    /// # Errors
    ///
    /// Returns an error if the RPC URL is invalid or the database cannot be
    /// opened.
    pub async fn connect(config: &Config) -> SyncResult<Self> {
        let client = Arc::new(AlloyEthereumClient::connect(config.rpc_url()).await?);
        let pool = create_pool(config.database_url()).await?;
        Ok(Self::from_parts(config, client, pool))
    }

    /// Wires every component around an existing client and pool.
    #[must_use]
    pub fn from_parts(config: &Config, client: Arc<dyn EthereumClient>, pool: SqlitePool) -> Self {
        let key_values = KeyValueStore::new(pool.clone());
        let freeze = Arc::new(FreezeCheckService::new(
            Arc::clone(&client),
            pool.clone(),
            config.freeze_grace_period(),
        ));

        let user_transactions = Arc::new(UserTransactionCollector::new(
            Arc::clone(&client),
            pool.clone(),
            UserTransactionAddresses {
                perpetual: config.perpetual_address(),
                escape_verifier: config.escape_verifier_address(),
                collateral_asset: config.collateral_asset(),
            },
            Arc::clone(&freeze) as _,
        ));
        let data_sync = Arc::new(DataSyncService::new(
            pool.clone(),
            StateTransitionFactCollector::new(Arc::clone(&client), pool.clone(), config.perpetual_address()),
            PageCollector::new(Arc::clone(&client), pool.clone(), config.registry_address()),
            StateUpdateCollector::new(Arc::clone(&client), pool.clone(), config.perpetual_address()),
            Arc::clone(&user_transactions),
        ));

        let downloader = Arc::new(BlockDownloader::new(
            client,
            pool.clone(),
            BlockDownloaderOptions {
                poll_interval: config.poll_interval(),
                reorg_window: config.reorg_window(),
                ..BlockDownloaderOptions::default()
            },
        ));
        let preprocessor = Arc::new(Preprocessor::new(pool.clone()));

        let scheduler = SyncScheduler::new(
            SchedulerDeps {
                key_values: key_values.clone(),
                data_sync,
                preprocessor: Arc::clone(&preprocessor) as _,
                freeze: Arc::clone(&freeze) as _,
                block_source: Arc::clone(&downloader) as _,
            },
            SchedulerOptions {
                earliest_block: config.earliest_block(),
                max_block_number: config.max_block_number(),
            },
        );
        let migrator = UserTransactionMigrator::new(key_values.clone(), user_transactions, config.earliest_block());

        Self {
            pool,
            key_values,
            downloader,
            scheduler,
            preprocessor,
            freeze,
            migrator,
        }
    }

    /// Runs pending migrations, starts the scheduler and begins polling.
    ///
    /// Returns the scheduler's event forwarding task and the polling task.
    ///
    /// # Errors
    ///
    /// Returns an error if the migration or the scheduler start fails.
    pub async fn start(&self) -> SyncResult<(JoinHandle<()>, JoinHandle<()>)> {
        if self.migrator.migrate().await? {
            info!("User transaction migration applied");
        }
        let forwarder = self.scheduler.start().await?;
        let downloader = Arc::clone(&self.downloader);
        let poller = tokio::spawn(async move { downloader.run().await });
        Ok((forwarder, poller))
    }
}
