//! Bounded FIFO feeding one session's synthesis consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The caller's lifetime ended while waiting
    #[error("queue wait cancelled")]
    Cancelled,

    /// The queue was closed for good
    #[error("queue closed")]
    Closed,

    /// Nothing arrived within the pop timeout
    #[error("queue pop timed out")]
    Timeout,
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Bounded multi-producer, single-consumer FIFO.
///
/// `push` waits while the queue is full and `pop` waits while it is empty;
/// both observe a [`CancellationToken`]. Waiters register with their
/// [`Notify`] before re-checking state, so no wakeup is lost between the
/// check and the wait.
pub struct JobQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    space: Notify,
    ready: Notify,
    closed: AtomicBool,
}

impl<T> JobQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            space: Notify::new(),
            ready: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue `item`, waiting for space while the queue is full.
    pub async fn push(&self, item: T, cancel: &CancellationToken) -> QueueResult<()> {
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_closed() {
                return Err(QueueError::Closed);
            }
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            {
                let mut items = self.items.lock();
                if items.len() < self.capacity {
                    items.push_back(item);
                    drop(items);
                    self.ready.notify_one();
                    return Ok(());
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Dequeue the oldest item, waiting up to `timeout` (forever if `None`).
    ///
    /// Items still queued when the queue is closed are not returned; a
    /// closed queue reports [`QueueError::Closed`].
    pub async fn pop(&self, cancel: &CancellationToken, timeout: Option<Duration>) -> QueueResult<T> {
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }
            if self.is_closed() {
                return Err(QueueError::Closed);
            }

            let popped = self.items.lock().pop_front();
            if let Some(item) = popped {
                self.space.notify_one();
                return Ok(item);
            }

            let expired = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(QueueError::Cancelled),
                _ = &mut notified => {}
                _ = expired => return Err(QueueError::Timeout),
            }
        }
    }

    /// Discard every queued item and return how many were dropped.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut items = self.items.lock();
            let n = items.len();
            items.clear();
            n
        };
        if dropped > 0 {
            self.space.notify_waiters();
        }
        dropped
    }

    /// Close the queue. Pending and future pushes and pops fail with
    /// [`QueueError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.space.notify_waiters();
        self.ready.notify_waiters();
    }
}
