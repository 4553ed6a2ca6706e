//! Fixed-size worker pool over a bounded job channel.
//!
//! # Example
//!
//! ```rust,ignore
//! let pool = WorkerPool::new("memory-writes", 10, 1000, |event: MemoryEvent| async move {
//!     store.write(event).await?;
//!     Ok(())
//! });
//! pool.submit(event).await?;
//! pool.stop().await;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::isolation::run_isolated;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("pool stopped")]
    Stopped,
}

pub type WorkerPoolResult<T> = Result<T, WorkerPoolError>;

type JobHandler<J> = Arc<dyn Fn(J) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

/// Job outcome totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerPoolStats {
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
}

impl WorkerPoolStats {
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.panicked
    }
}

/// N persistent workers draining one bounded channel.
///
/// Handler errors are logged and counted. A panicking handler is caught per
/// job; the worker that ran it keeps serving the queue.
pub struct WorkerPool<J> {
    name: String,
    sender: Mutex<Option<mpsc::Sender<J>>>,
    /// Held across the joins so a concurrent `stop` waits for the first
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new<F, Fut>(name: impl Into<String>, workers: usize, queue_size: usize, handler: F) -> Self
    where
        F: Fn(J) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let handler: JobHandler<J> =
            Arc::new(move |job| -> BoxFuture<'static, anyhow::Result<()>> {
                Box::pin(handler(job))
            });
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    name.clone(),
                    worker_id,
                    rx.clone(),
                    handler.clone(),
                    counters.clone(),
                ))
            })
            .collect();

        debug!(pool = %name, workers = workers.max(1), queue_size, "Worker pool started");

        Self {
            name,
            sender: Mutex::new(Some(tx)),
            workers: tokio::sync::Mutex::new(handles),
            counters,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `job`, waiting while the queue is full. Fails fast once the
    /// pool is stopped.
    pub async fn submit(&self, job: J) -> WorkerPoolResult<()> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(WorkerPoolError::Stopped);
        };
        sender.send(job).await.map_err(|_| WorkerPoolError::Stopped)
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Close intake, let queued and running jobs finish, and wait for every
    /// worker to exit. Every caller returns only once the workers are gone.
    pub async fn stop(&self) {
        drop(self.sender.lock().take());

        let mut workers = self.workers.lock().await;
        if workers.is_empty() {
            return;
        }
        for handle in workers.drain(..) {
            if let Err(e) = handle.await {
                error!(pool = %self.name, error = %e, "Worker task ended abnormally");
            }
        }
        debug!(pool = %self.name, stats = ?self.stats(), "Worker pool stopped");
    }

    pub fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker<J: Send + 'static>(
    pool: String,
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<J>>>,
    handler: JobHandler<J>,
    counters: Arc<Counters>,
) {
    loop {
        let job = rx.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };

        match run_isolated(|| (*handler)(job)).await {
            Ok(Ok(())) => {
                counters.succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(pool = %pool, worker_id, error = %e, "Job handler failed");
            }
            Err(message) => {
                counters.panicked.fetch_add(1, Ordering::Relaxed);
                error!(pool = %pool, worker_id, panic = %message, "Job handler panicked");
            }
        }
    }
    debug!(pool = %pool, worker_id, "Worker exited");
}
