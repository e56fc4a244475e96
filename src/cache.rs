//! Reference-counted resource cache with single-flight loading
//!
//! Every key moves through a small state machine:
//! - absent: nothing cached, the next `load` starts a flight
//! - `Slot::Pending`: a flight is running, new `load`s join it
//! - `Slot::Ready`: the value is cached, new `load`s share it
//! - detached: removed by `delete` (or never cached after a failure), still
//!   alive while outstanding `Ref`s hold it
//!
//! Each entry carries one reference for the cache itself plus one per `Ref`.
//! The value is released exactly once, when the last reference goes away,
//! and never before its flight has finished.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Value owned by the cache, cleaned up when its last reference is released
pub trait Resource: Send + Sync + 'static {
    fn release(&self);
}

/// Builds values for keys that are not cached yet
#[async_trait]
pub trait Storage<K, V>: Send + Sync + 'static {
    async fn load(&self, key: K) -> anyhow::Result<V>;
}

#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("waiting for resource was canceled")]
    Canceled,
    #[error("cannot load resource: {0:#}")]
    Load(Arc<anyhow::Error>),
    #[error("resource loader panicked: {0}")]
    Panicked(String),
}

struct Entry<V> {
    refs: AtomicUsize,
    outcome: OnceLock<Result<V, CacheError>>,
    done: watch::Sender<bool>,
    released: AtomicBool,
}

impl<V: Resource> Entry<V> {
    fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            // One reference for the cache, one for the caller that started the flight.
            refs: AtomicUsize::new(2),
            outcome: OnceLock::new(),
            done,
            released: AtomicBool::new(false),
        }
    }

    fn acquire(&self) {
        let prev = self.refs.fetch_add(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "acquired released resource");
    }

    fn release(&self) {
        let prev = self
            .refs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |refs| refs.checked_sub(1));
        if prev != Ok(1) {
            return;
        }
        if let Some(Ok(value)) = self.outcome.get() {
            if !self.released.swap(true, Ordering::AcqRel) {
                value.release();
            }
        }
    }
}

enum Slot<V> {
    Pending(Arc<Entry<V>>),
    Ready(Arc<Entry<V>>),
}

struct Inner<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
    storage: Arc<dyn Storage<K, V>>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Resource,
{
    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn complete(&self, key: K, entry: Arc<Entry<V>>, outcome: Result<V, CacheError>) {
        let failed = outcome.is_err();
        if let Err(err) = &outcome {
            warn!("Resource load failed: {}", err);
        }
        let _ = entry.outcome.set(outcome);
        let cached = {
            let mut slots = self.slots();
            let current = matches!(
                slots.get(&key),
                Some(Slot::Pending(pending)) if Arc::ptr_eq(pending, &entry)
            );
            if current && failed {
                slots.remove(&key);
            } else if current {
                slots.insert(key, Slot::Ready(entry.clone()));
            }
            current && !failed
        };
        entry.done.send_replace(true);
        if !cached {
            entry.release();
        }
    }
}

/// Keyed cache of shared resources
pub struct Manager<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Manager<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V> Manager<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + std::fmt::Debug + 'static,
    V: Resource,
{
    pub fn new(storage: Arc<dyn Storage<K, V>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                storage,
            }),
        }
    }

    /// Reference the resource for `key`, starting a load if nobody has.
    ///
    /// Returns immediately; use [`Ref::get`] to wait for the value.
    /// Must be called from within a tokio runtime.
    pub fn load(&self, key: K) -> Ref<V> {
        let entry = {
            let mut slots = self.inner.slots();
            if let Some(Slot::Ready(entry) | Slot::Pending(entry)) = slots.get(&key) {
                entry.acquire();
                return Ref::new(entry.clone());
            }
            let entry = Arc::new(Entry::new());
            slots.insert(key.clone(), Slot::Pending(entry.clone()));
            entry
        };
        debug!("Loading resource {:?}", key);
        let inner = self.inner.clone();
        let flight = entry.clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(inner.storage.load(key.clone()))
                .catch_unwind()
                .await;
            let outcome = match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(CacheError::Load(Arc::new(err))),
                Err(panic) => Err(CacheError::Panicked(panic_message(panic.as_ref()))),
            };
            inner.complete(key, flight, outcome);
        });
        Ref::new(entry)
    }

    /// Load and wait for the resource; the reference is dropped on failure.
    pub async fn load_sync(&self, key: K, cancel: &CancellationToken) -> Result<Ref<V>, CacheError> {
        let resource = self.load(key);
        resource.get(cancel).await?;
        Ok(resource)
    }

    /// Remove a key, loaded or still loading; outstanding references keep
    /// the old resource alive and the next `load` starts a new flight.
    pub fn delete(&self, key: &K) -> bool {
        let slot = self.inner.slots().remove(key);
        match slot {
            Some(Slot::Ready(entry)) => {
                entry.release();
                true
            }
            // The flight drops the cache reference once it completes.
            Some(Slot::Pending(_)) => true,
            None => false,
        }
    }

    /// Number of cached (ready) resources
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }
}

/// Counted reference to a cache entry; released on drop
pub struct Ref<V: Resource> {
    entry: Option<Arc<Entry<V>>>,
}

impl<V: Resource> Ref<V> {
    fn new(entry: Arc<Entry<V>>) -> Self {
        Self { entry: Some(entry) }
    }

    /// Wait for the value, giving up when `cancel` fires.
    ///
    /// Cancellation only affects this waiter; the load keeps running for others.
    pub async fn get(&self, cancel: &CancellationToken) -> Result<&V, CacheError> {
        let Some(entry) = self.entry.as_ref() else {
            return Err(CacheError::Canceled);
        };
        if entry.outcome.get().is_none() {
            let mut done = entry.done.subscribe();
            tokio::select! {
                biased;
                _ = done.wait_for(|done| *done) => {}
                _ = cancel.cancelled() => return Err(CacheError::Canceled),
            }
        }
        match entry.outcome.get() {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(err.clone()),
            None => Err(CacheError::Canceled),
        }
    }

    /// Value of a reference obtained from [`Manager::load_sync`]
    pub fn value(&self) -> Option<&V> {
        match self.entry.as_ref()?.outcome.get()? {
            Ok(value) => Some(value),
            Err(_) => None,
        }
    }

    pub fn release(mut self) {
        self.release_entry();
    }

    fn release_entry(&mut self) {
        if let Some(entry) = self.entry.take() {
            entry.release();
        }
    }
}

impl<V: Resource> fmt::Debug for Ref<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ref")
            .field("ready", &self.value().is_some())
            .finish()
    }
}

impl<V: Resource> Drop for Ref<V> {
    fn drop(&mut self) {
        self.release_entry();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
