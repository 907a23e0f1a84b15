//! Single-worker job queue.
//!
//! Jobs are executed strictly one after another in intake order. The queue
//! records the highest concurrency it has ever observed so callers can check
//! that no two jobs overlapped.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error};

type Job = BoxFuture<'static, ()>;

#[derive(Debug, Default)]
struct Counters {
    running: AtomicUsize,
    max_running: AtomicUsize,
    completed: AtomicUsize,
}

/// Serialized executor with exactly one worker task.
///
/// Dropping the queue closes the intake; jobs already queued still run.
#[derive(Debug)]
pub struct JobQueue {
    intake: mpsc::UnboundedSender<Job>,
    pending: Arc<watch::Sender<usize>>,
    counters: Arc<Counters>,
}

impl JobQueue {
    /// Spawns the worker. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let (intake, mut jobs) = mpsc::unbounded_channel::<Job>();
        let (pending, _) = watch::channel(0usize);
        let pending = Arc::new(pending);
        let counters = Arc::new(Counters::default());

        {
            let pending = Arc::clone(&pending);
            let counters = Arc::clone(&counters);
            tokio::spawn(async move {
                while let Some(job) = jobs.recv().await {
                    let running = counters.running.fetch_add(1, Ordering::SeqCst) + 1;
                    counters.max_running.fetch_max(running, Ordering::SeqCst);

                    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                        error!(
                            panic = %panic_message(panic.as_ref()),
                            "Job panicked; continuing with next job"
                        );
                    }

                    counters.running.fetch_sub(1, Ordering::SeqCst);
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                    pending.send_modify(|n| *n = n.saturating_sub(1));
                }
                debug!("Job queue intake closed");
            });
        }

        Self {
            intake,
            pending,
            counters,
        }
    }

    /// Appends a job. Returns `false` if the worker is gone.
    pub fn push<F>(&self, job: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.pending.send_modify(|n| *n += 1);
        if self.intake.send(job.boxed()).is_err() {
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            error!("Job queue worker has stopped; job dropped");
            return false;
        }
        true
    }

    /// Jobs queued or running.
    #[must_use]
    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    /// Highest number of jobs ever observed running at once.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.counters.max_running.load(Ordering::SeqCst)
    }

    /// Jobs finished since creation, including panicked ones.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    /// Resolves once no job is queued or running.
    pub async fn wait_idle(&self) {
        let mut rx = self.pending.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_order_one_at_a_time() {
        let queue = JobQueue::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u64 {
            let seen = Arc::clone(&seen);
            queue.push(async move {
                tokio::time::sleep(Duration::from_millis(5 - i)).await;
                seen.lock().unwrap().push(i);
            });
        }
        queue.wait_idle().await;

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(queue.max_concurrency(), 1);
        assert_eq!(queue.completed(), 5);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_panicking_job_does_not_stop_worker() {
        let queue = JobQueue::new();
        let ran = Arc::new(AtomicUsize::new(0));

        queue.push(async { panic!("boom") });
        let counter = Arc::clone(&ran);
        queue.push(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        queue.wait_idle().await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.completed(), 2);
    }

    #[tokio::test]
    async fn test_wait_idle_on_empty_queue_returns() {
        let queue = JobQueue::new();
        queue.wait_idle().await;
        assert_eq!(queue.pending(), 0);
    }
}
