//! Process registry and reference-counted singletons
//!
//! The process registry is the tier-0 state of the runtime: a byte-keyed map
//! of subsystem singletons that every component in the process reaches
//! through one process-global slot. Tier-1 and tier-2 state publish their own
//! [`Singleton`] slots in it, so there is exactly one instance of each per
//! process no matter how many loadable modules link against this crate.
//!
//! All acquire/relinquish operations are serialized by a single process-wide
//! lock. The map itself sits behind the [`RegistryStore`] trait so tests can
//! substitute their own store.

use crate::status::{KilnResult, Status};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, LazyLock};

/// Value stored in the process registry
pub type RegistryValue = Arc<dyn Any + Send + Sync>;

/// Process-wide lifecycle lock
///
/// Reentrant so that acquiring tier-2 state may acquire tier-1 state and the
/// process registry while already holding it.
static LIFECYCLE_LOCK: LazyLock<ReentrantMutex<()>> = LazyLock::new(|| ReentrantMutex::new(()));

/// The process registry singleton slot
static PROCESS_REGISTRY: LazyLock<Singleton<ProcessRegistry>> = LazyLock::new(Singleton::new);

/// Hold the process-wide lifecycle lock
pub(crate) fn lifecycle_lock() -> ReentrantMutexGuard<'static, ()> {
    LIFECYCLE_LOCK.lock()
}

/// Storage backend of the process registry
pub trait RegistryStore: Send {
    /// Add an entry; fails with `Exists` if the key is present
    fn add(&mut self, key: &[u8], value: RegistryValue) -> KilnResult<()>;

    /// Look up an entry; fails with `NotExists` if the key is absent
    fn get(&self, key: &[u8]) -> KilnResult<RegistryValue>;

    /// Remove an entry; fails with `NotExists` if the key is absent
    fn remove(&mut self, key: &[u8]) -> KilnResult<RegistryValue>;

    /// Number of entries
    fn len(&self) -> usize;

    /// Check whether the store has no entries
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default registry store: a list scanned linearly, newest entry first
///
/// The registry only ever holds a handful of subsystem singletons.
#[derive(Default)]
pub struct LinearStore {
    entries: VecDeque<(Box<[u8]>, RegistryValue)>,
}

impl LinearStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    fn position(&self, key: &[u8]) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.as_ref() == key)
    }

    /// Iterate over keys, newest first
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.entries.iter().map(|(k, _)| k.as_ref())
    }
}

impl RegistryStore for LinearStore {
    fn add(&mut self, key: &[u8], value: RegistryValue) -> KilnResult<()> {
        if self.position(key).is_some() {
            return Err(Status::Exists);
        }
        self.entries.push_front((key.into(), value));
        Ok(())
    }

    fn get(&self, key: &[u8]) -> KilnResult<RegistryValue> {
        self.position(key)
            .map(|index| self.entries[index].1.clone())
            .ok_or(Status::NotExists)
    }

    fn remove(&mut self, key: &[u8]) -> KilnResult<RegistryValue> {
        let index = self.position(key).ok_or(Status::NotExists)?;
        self.entries
            .remove(index)
            .map(|(_, value)| value)
            .ok_or(Status::NotExists)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct SingletonEntry<T> {
    value: Arc<T>,
    references: usize,
}

/// A lazily constructed, reference-counted singleton slot
///
/// The value is constructed by the first [`acquire`](Singleton::acquire) and
/// torn down by the [`relinquish`](Singleton::relinquish) that brings the
/// count back to zero.
pub struct Singleton<T> {
    slot: Mutex<Option<SingletonEntry<T>>>,
}

impl<T> Singleton<T> {
    /// Create an empty slot
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Acquire the singleton, constructing it with `make` if absent
    pub fn acquire<F>(&self, make: F) -> KilnResult<Arc<T>>
    where
        F: FnOnce() -> KilnResult<T>,
    {
        let _guard = lifecycle_lock();

        if let Some(entry) = self.slot.lock().as_mut() {
            entry.references += 1;
            return Ok(entry.value.clone());
        }

        // `make` runs with the slot unlocked and may acquire other singletons
        let value = Arc::new(make()?);
        *self.slot.lock() = Some(SingletonEntry {
            value: value.clone(),
            references: 1,
        });
        Ok(value)
    }

    /// Relinquish one reference, running `teardown` when the count hits zero
    ///
    /// Fails with `OperationInvalid` if the singleton is not acquired.
    pub fn relinquish<F>(&self, teardown: F) -> KilnResult<()>
    where
        F: FnOnce(Arc<T>),
    {
        let _guard = lifecycle_lock();

        let released = {
            let mut slot = self.slot.lock();
            let entry = slot.as_mut().ok_or(Status::OperationInvalid)?;
            entry.references -= 1;
            if entry.references == 0 {
                slot.take().map(|entry| entry.value)
            } else {
                None
            }
        };

        if let Some(value) = released {
            teardown(value);
        }
        Ok(())
    }

    /// Current reference count (0 when not constructed)
    pub fn references(&self) -> usize {
        self.slot
            .lock()
            .as_ref()
            .map(|entry| entry.references)
            .unwrap_or(0)
    }

    /// Get the singleton without acquiring a reference
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.lock().as_ref().map(|entry| entry.value.clone())
    }
}

impl<T> Default for Singleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to the process registry
pub type ProcessHandle = Arc<ProcessRegistry>;

/// Byte-keyed registry of process-wide singletons
pub struct ProcessRegistry {
    store: Mutex<Box<dyn RegistryStore>>,
}

impl ProcessRegistry {
    /// Create a registry backed by a [`LinearStore`]
    pub fn new() -> Self {
        Self::with_store(Box::new(LinearStore::new()))
    }

    /// Create a registry backed by a custom store
    pub fn with_store(store: Box<dyn RegistryStore>) -> Self {
        Self {
            store: Mutex::new(store),
        }
    }

    /// Acquire the process-wide registry, creating it on first use
    pub fn acquire() -> KilnResult<ProcessHandle> {
        PROCESS_REGISTRY.acquire(|| {
            tracing::debug!("process registry created");
            Ok(ProcessRegistry::new())
        })
    }

    /// Relinquish one reference to the process-wide registry
    ///
    /// The registry and all its entries are destroyed when the count reaches
    /// zero. Fails with `OperationInvalid` if it is not acquired.
    pub fn relinquish() -> KilnResult<()> {
        PROCESS_REGISTRY.relinquish(|registry| {
            tracing::debug!(entries = registry.len(), "process registry destroyed");
        })
    }

    /// Number of outstanding references to the process-wide registry
    pub fn references() -> usize {
        PROCESS_REGISTRY.references()
    }

    /// Add an entry; fails with `Exists` if the key is present
    pub fn add(&self, key: &[u8], value: RegistryValue) -> KilnResult<()> {
        self.store.lock().add(key, value)
    }

    /// Look up an entry; fails with `NotExists` if the key is absent
    pub fn get(&self, key: &[u8]) -> KilnResult<RegistryValue> {
        self.store.lock().get(key)
    }

    /// Remove an entry; fails with `NotExists` if the key is absent
    pub fn remove(&self, key: &[u8]) -> KilnResult<RegistryValue> {
        self.store.lock().remove(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Check whether the registry has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the entry under `key` as a `T`, inserting `make()` if absent
    ///
    /// Fails with `ArgumentTypeInvalid` if the key holds a different type.
    pub fn get_or_insert_with<T, F>(&self, key: &[u8], make: F) -> KilnResult<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let mut store = self.store.lock();
        let value = match store.get(key) {
            Ok(value) => value,
            Err(Status::NotExists) => {
                let value: RegistryValue = Arc::new(make());
                store.add(key, value.clone())?;
                value
            }
            Err(status) => return Err(status),
        };
        value
            .downcast::<T>()
            .map_err(|_| Status::ArgumentTypeInvalid)
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}
