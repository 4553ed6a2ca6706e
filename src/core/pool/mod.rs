//! Keyed, lease-counted cache of expensive provider instances.
//!
//! A [`ResourcePool`] owns one instance per `(kind, instance key)`. The first
//! [`ResourcePool::acquire`] for a key constructs the instance through the
//! pool's [`ResourceFactory`]; later acquisitions share it. Instances are
//! destroyed only by [`ResourcePool::invalidate`] or
//! [`ResourcePool::shutdown`], never by releasing a lease.
//!
//! # Example
//!
//! ```rust,ignore
//! use voicebridge::core::pool::TtsPool;
//!
//! let pool = TtsPool::for_tts();
//! let lease = pool.acquire(&settings.pool_key(), &settings).await?;
//! let frames = lease.text_to_speech_stream(&cancel, "hello", format).await?;
//! pool.release(lease);
//! ```

mod tts;

use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

pub use tts::{TtsPool, TtsProviderFactory};

/// Boxed construction failure returned by a factory.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Family of provider resource held by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Tts,
    Asr,
    Vad,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tts => "tts",
            Self::Asr => "asr",
            Self::Vad => "vad",
        };
        f.write_str(name)
    }
}

/// Identity of one pooled instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PoolKey {
    pub kind: ResourceKind,
    pub instance: String,
}

impl PoolKey {
    pub fn new(kind: ResourceKind, instance: impl Into<String>) -> Self {
        Self {
            kind,
            instance: instance.into(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.instance)
    }
}

/// Errors returned by [`ResourcePool`] operations
#[derive(Debug, Error)]
pub enum PoolError {
    /// The factory failed to build the instance; nothing was cached
    #[error("Failed to construct pooled resource {key}: {source}")]
    Construction {
        key: PoolKey,
        #[source]
        source: BoxError,
    },

    /// The pool no longer hands out leases
    #[error("Resource pool is shut down")]
    ShutDown,

    /// The entry was invalidated while waiting for a lease slot
    #[error("Pooled resource {0} was invalidated")]
    Invalidated(PoolKey),
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Builds and tears down the instances held by a pool.
#[async_trait]
pub trait ResourceFactory<R, C>: Send + Sync
where
    R: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    /// Construct a new instance. May perform network or model-load work.
    async fn create(&self, config: &C) -> Result<R, BoxError>;

    /// Maximum simultaneous leases per instance, or `None` when the
    /// resource is fully reentrant. Defaults to exclusive leasing.
    fn max_concurrent_leases(&self) -> Option<usize> {
        Some(1)
    }

    /// Release external resources held by an instance leaving the pool.
    async fn destroy(&self, _resource: &R) {}
}

struct PoolEntry<R> {
    key: PoolKey,
    resource: R,
    created_at: Instant,
    last_used: Mutex<Instant>,
    leases: AtomicUsize,
    permits: Option<Arc<Semaphore>>,
}

impl<R> PoolEntry<R> {
    fn new(key: PoolKey, resource: R, max_leases: Option<usize>) -> Self {
        let now = Instant::now();
        Self {
            key,
            resource,
            created_at: now,
            last_used: Mutex::new(now),
            leases: AtomicUsize::new(0),
            permits: max_leases.map(|n| Arc::new(Semaphore::new(n.max(1)))),
        }
    }

    fn stats(&self) -> PoolEntryStats {
        PoolEntryStats {
            key: self.key.clone(),
            leases: self.leases.load(Ordering::Acquire),
            created_at: self.created_at,
            last_used: *self.last_used.lock(),
        }
    }
}

/// Snapshot of one pooled instance.
#[derive(Debug, Clone)]
pub struct PoolEntryStats {
    pub key: PoolKey,
    pub leases: usize,
    pub created_at: Instant,
    pub last_used: Instant,
}

/// Temporary right to use a pooled instance.
///
/// Dropping a lease releases it. [`ResourcePool::release`] consumes the
/// lease, so a lease can never be released twice.
pub struct Lease<R> {
    entry: Arc<PoolEntry<R>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<R> Lease<R> {
    pub fn key(&self) -> &PoolKey {
        &self.entry.key
    }
}

impl<R> Deref for Lease<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.entry.resource
    }
}

impl<R> Drop for Lease<R> {
    fn drop(&mut self) {
        // Saturating: the counter never wraps below zero.
        let _ = self
            .entry
            .leases
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        *self.entry.last_used.lock() = Instant::now();
    }
}

impl<R> fmt::Debug for Lease<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("key", &self.entry.key).finish()
    }
}

type Slot<R> = Arc<OnceCell<Arc<PoolEntry<R>>>>;

/// Lazily populated, lease-counted instance cache for one resource kind.
pub struct ResourcePool<R, C> {
    kind: ResourceKind,
    factory: Arc<dyn ResourceFactory<R, C>>,
    slots: Mutex<HashMap<String, Slot<R>>>,
    shut_down: AtomicBool,
}

impl<R, C> ResourcePool<R, C>
where
    R: Send + Sync + 'static,
    C: Send + Sync + 'static,
{
    pub fn new(kind: ResourceKind, factory: Arc<dyn ResourceFactory<R, C>>) -> Self {
        Self {
            kind,
            factory,
            slots: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Lease the instance for `instance`, constructing it from `config` on a
    /// miss. Concurrent misses for one key construct exactly once.
    pub async fn acquire(&self, instance: &str, config: &C) -> PoolResult<Lease<R>> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }

        let key = PoolKey::new(self.kind, instance);
        let slot = self
            .slots
            .lock()
            .entry(instance.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let created = slot
            .get_or_try_init(|| async {
                debug!(pool_key = %key, "Constructing pooled resource");
                let resource = self.factory.create(config).await?;
                info!(pool_key = %key, "Pooled resource created");
                Ok::<_, BoxError>(Arc::new(PoolEntry::new(
                    key.clone(),
                    resource,
                    self.factory.max_concurrent_leases(),
                )))
            })
            .await;

        let entry = match created {
            Ok(entry) => entry.clone(),
            Err(source) => {
                let mut slots = self.slots.lock();
                let is_same_empty_slot = slots
                    .get(instance)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !current.initialized());
                if is_same_empty_slot {
                    slots.remove(instance);
                }
                error!(pool_key = %key, error = %source, "Failed to construct pooled resource");
                return Err(PoolError::Construction { key, source });
            }
        };

        if self.shut_down.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown);
        }

        let permit = match &entry.permits {
            Some(permits) => Some(
                permits
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| PoolError::Invalidated(key.clone()))?,
            ),
            None => None,
        };

        let leases = entry.leases.fetch_add(1, Ordering::AcqRel) + 1;
        *entry.last_used.lock() = Instant::now();
        debug!(pool_key = %key, leases, "Pooled resource leased");

        Ok(Lease {
            entry,
            _permit: permit,
        })
    }

    /// Return a lease. A lease whose entry is no longer pooled here is
    /// dropped without touching any pooled counter.
    pub fn release(&self, lease: Lease<R>) {
        let pooled = self
            .slots
            .lock()
            .get(&lease.entry.key.instance)
            .and_then(|slot| slot.get())
            .is_some_and(|entry| Arc::ptr_eq(entry, &lease.entry));

        if pooled {
            debug!(pool_key = %lease.entry.key, "Pooled resource released");
        } else {
            warn!(pool_key = %lease.entry.key, "Released lease does not belong to a live pool entry");
        }
        drop(lease);
    }

    /// Remove one instance from the pool and destroy it. Outstanding leases
    /// keep the instance alive until they are dropped.
    pub async fn invalidate(&self, instance: &str) -> bool {
        let slot = self.slots.lock().remove(instance);
        let Some(entry) = slot.and_then(|slot| slot.get().cloned()) else {
            return false;
        };

        if let Some(permits) = &entry.permits {
            permits.close();
        }
        info!(
            pool_key = %entry.key,
            leases = entry.leases.load(Ordering::Acquire),
            "Invalidating pooled resource"
        );
        self.factory.destroy(&entry.resource).await;
        true
    }

    /// Stop leasing and destroy every pooled instance.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let entries: Vec<_> = self
            .slots
            .lock()
            .drain()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();

        info!(kind = %self.kind, count = entries.len(), "Shutting down resource pool");
        for entry in entries {
            if let Some(permits) = &entry.permits {
                permits.close();
            }
            self.factory.destroy(&entry.resource).await;
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Snapshot of every constructed instance.
    pub fn stats(&self) -> Vec<PoolEntryStats> {
        self.slots
            .lock()
            .values()
            .filter_map(|slot| slot.get().map(|entry| entry.stats()))
            .collect()
    }

    /// Lease count for one instance, if it is pooled.
    pub fn lease_count(&self, instance: &str) -> Option<usize> {
        self.slots
            .lock()
            .get(instance)
            .and_then(|slot| slot.get())
            .map(|entry| entry.leases.load(Ordering::Acquire))
    }
}
