//! Block following and sync orchestration.
//!
//! - [`block_downloader`]: canonical block source with reorg detection
//! - [`reducer`]: pure sync state machine
//! - [`job_queue`]: single-worker effect executor
//! - [`data_sync`]: collectors run per block range
//! - [`scheduler`]: wires the above together

pub mod block_downloader;
pub mod data_sync;
pub mod job_queue;
pub mod reducer;
pub mod scheduler;

pub use block_downloader::{BlockDownloader, BlockDownloaderOptions, BlockEvent, BlockSource};
pub use data_sync::{DataSync, DataSyncService};
pub use job_queue::JobQueue;
pub use reducer::{reduce, SyncAction, SyncEffect, SyncState};
pub use scheduler::{SchedulerDeps, SchedulerOptions, SyncScheduler};
