//! Chain head follower and reorg detector.
//!
//! [`BlockDownloader`] polls the head, stores every canonical block hash in
//! `known_blocks` and checks that each new block links to the stored hash of
//! its parent. On a mismatch it walks back through the stored hashes until
//! the chain agrees again (the common ancestor), rewrites the stored hashes
//! and emits a single [`BlockEvent::Reorg`] with the new canonical blocks.
//!
//! ## Delivery contract
//!
//! Events are delivered to every subscriber in chain order: a `Reorg` always
//! precedes any `NewBlock` built on top of it, and `NewBlock` numbers are
//! strictly increasing between reorgs.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::reducer::SyncAction;
use crate::db::repository::{self, KnownBlockRepository};
use crate::error::SyncResult;
use crate::model::BlockRecord;
use crate::rpc::EthereumClient;

/// Notification from a [`BlockSource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockEvent {
    /// A block extending the canonical chain.
    NewBlock(BlockRecord),
    /// New canonical blocks starting right after the common ancestor.
    Reorg(Vec<BlockRecord>),
}

impl From<BlockEvent> for SyncAction {
    fn from(event: BlockEvent) -> Self {
        match event {
            BlockEvent::NewBlock(block) => Self::NewBlockFound(block),
            BlockEvent::Reorg(blocks) => Self::ReorgOccurred(blocks),
        }
    }
}

/// Source of canonical blocks for the scheduler.
#[async_trait]
pub trait BlockSource: Send + Sync {
    /// Known canonical blocks above `since_block`, ascending.
    async fn get_known_blocks(&self, since_block: u64) -> SyncResult<Vec<BlockRecord>>;

    /// Registers a subscriber. Events are delivered in chain order.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<BlockEvent>;
}

/// Polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDownloaderOptions {
    /// Delay between head polls
    pub poll_interval: Duration,
    /// Number of recent block hashes kept for reorg detection
    pub reorg_window: u64,
    /// Upper bound for the retry delay after failed polls
    pub max_backoff: Duration,
}

impl Default for BlockDownloaderOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(12),
            reorg_window: 1000,
            max_backoff: Duration::from_secs(60),
        }
    }
}

/// [`BlockSource`] polling an [`EthereumClient`].
pub struct BlockDownloader {
    client: Arc<dyn EthereumClient>,
    pool: SqlitePool,
    known_blocks: KnownBlockRepository,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<BlockEvent>>>,
    options: BlockDownloaderOptions,
}

impl BlockDownloader {
    #[must_use]
    pub fn new(client: Arc<dyn EthereumClient>, pool: SqlitePool, options: BlockDownloaderOptions) -> Self {
        Self {
            client,
            known_blocks: KnownBlockRepository::new(pool.clone()),
            pool,
            subscribers: Mutex::new(Vec::new()),
            options,
        }
    }

    fn emit(&self, event: &BlockEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Fetches everything between the stored tip and the chain head.
    ///
    /// Returns the number of events emitted.
    #[instrument(skip(self))]
    pub async fn poll_once(&self) -> SyncResult<usize> {
        let head = self.client.get_block_number().await?;
        let Some(mut previous) = self.known_blocks.find_last().await? else {
            let block = self.client.get_block(head).await?;
            info!(block_number = head, hash = %block.hash, "Seeding known blocks with chain head");
            self.store(0, std::slice::from_ref(&block), false).await?;
            self.emit(&BlockEvent::NewBlock(block));
            return Ok(1);
        };

        let mut emitted = 0;
        for number in previous.number + 1..=head {
            let block = self.client.get_block(number).await?;
            if block.parent_hash == previous.hash {
                debug!(block_number = number, hash = %block.hash, "New block");
                self.store(number, std::slice::from_ref(&block), false).await?;
                previous = block.clone();
                self.emit(&BlockEvent::NewBlock(block));
            } else {
                let blocks = self.find_reorged_blocks(block).await?;
                let ancestor = blocks.first().map_or(0, |b| b.number.saturating_sub(1));
                warn!(
                    ancestor,
                    depth = number - ancestor,
                    "Chain reorganization detected"
                );
                self.store(ancestor, &blocks, true).await?;
                if let Some(last) = blocks.last() {
                    previous = last.clone();
                }
                self.emit(&BlockEvent::Reorg(blocks));
            }
            emitted += 1;
        }

        let pruned = self
            .known_blocks
            .prune_before(head.saturating_sub(self.options.reorg_window))
            .await?;
        if pruned > 0 {
            debug!(pruned, "Pruned known blocks");
        }
        Ok(emitted)
    }

    /// Walks back from `block` until its ancestry matches a stored hash.
    ///
    /// Returns the new canonical blocks above the common ancestor, ascending.
    async fn find_reorged_blocks(&self, block: BlockRecord) -> SyncResult<Vec<BlockRecord>> {
        let mut parent_hash = block.parent_hash;
        let mut number = block.number.saturating_sub(1);
        let mut blocks = vec![block];

        while number > 0 {
            match self.known_blocks.find_by_number(number).await? {
                Some(stored) if stored.hash == parent_hash => break,
                Some(_) => {
                    let replacement = self.client.get_block(number).await?;
                    parent_hash = replacement.parent_hash;
                    blocks.push(replacement);
                    number -= 1;
                }
                None => {
                    warn!(block_number = number, "Reorg deeper than the stored window");
                    break;
                }
            }
        }

        blocks.reverse();
        Ok(blocks)
    }

    /// Stores `blocks`, first dropping everything above `ancestor` on reorg.
    async fn store(&self, ancestor: u64, blocks: &[BlockRecord], reorg: bool) -> SyncResult<()> {
        let mut tx = repository::begin(&self.pool).await?;
        if reorg {
            self.known_blocks.delete_after(&mut tx, ancestor).await?;
        }
        for block in blocks {
            self.known_blocks.add_or_replace(&mut tx, block).await?;
        }
        repository::commit(tx).await
    }

    /// Polls forever, backing off exponentially with ±25% jitter after
    /// failures.
    pub async fn run(&self) {
        let mut delay = self.options.poll_interval;
        loop {
            match self.poll_once().await {
                Ok(_) => delay = self.options.poll_interval,
                Err(e) => {
                    warn!(error = %e, retry_in = ?delay, "Polling the chain head failed");
                    tokio::time::sleep(delay).await;

                    delay = std::cmp::min(delay * 2, self.options.max_backoff);
                    let jitter_factor = 0.25 * (rand::random::<f64>() - 0.5);
                    let jitter_ms = (delay.as_millis() as f64 * jitter_factor).round() as i64;
                    delay = if jitter_ms >= 0 {
                        delay + Duration::from_millis(jitter_ms.unsigned_abs())
                    } else {
                        delay.saturating_sub(Duration::from_millis(jitter_ms.unsigned_abs()))
                    };
                    continue;
                }
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

#[async_trait]
impl BlockSource for BlockDownloader {
    async fn get_known_blocks(&self, since_block: u64) -> SyncResult<Vec<BlockRecord>> {
        self.known_blocks.get_all_after(since_block).await
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<BlockEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sender);
        receiver
    }
}
