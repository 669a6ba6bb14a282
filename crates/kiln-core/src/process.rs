//! Tier-1 process state
//!
//! [`Core`] holds the state every runtime component in the process shares:
//! the jump-target chain and status cell used by deep APIs, the process exit
//! flag, the loaded-library table and named storage. It is a reference
//! counted singleton published in the [`ProcessRegistry`].

use crate::defaults::CORE_REGISTRY_KEY;
use crate::library::{Library, LibraryPort, LibraryTable, NativeLibraryPort, RawLibrary};
use crate::registry::{lifecycle_lock, ProcessRegistry, Singleton};
use crate::status::{JumpStack, JumpTarget, KilnResult, Status};
use parking_lot::{Mutex, MutexGuard};
use rustc_hash::FxHashMap;
use std::any::Any;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tier-1 configuration
#[derive(Clone)]
pub struct CoreOptions {
    /// Platform binding used to load libraries
    pub library_port: Arc<dyn LibraryPort>,
}

impl CoreOptions {
    /// Use a custom library port
    pub fn with_library_port(mut self, port: Arc<dyn LibraryPort>) -> Self {
        self.library_port = port;
        self
    }
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            library_port: Arc::new(NativeLibraryPort),
        }
    }
}

/// Process-wide storage addressed by name
#[derive(Default)]
pub struct NamedStorage {
    entries: FxHashMap<String, Box<dyn Any + Send>>,
}

impl NamedStorage {
    /// Store `value` under `name`; fails with `Exists` if the name is taken
    pub fn allocate<T: Any + Send>(&mut self, name: &str, value: T) -> KilnResult<()> {
        if self.entries.contains_key(name) {
            return Err(Status::Exists);
        }
        self.entries.insert(name.to_string(), Box::new(value));
        Ok(())
    }

    /// Borrow the value under `name`
    pub fn get<T: Any>(&self, name: &str) -> KilnResult<&T> {
        self.entries
            .get(name)
            .ok_or(Status::NotExists)?
            .downcast_ref::<T>()
            .ok_or(Status::ArgumentTypeInvalid)
    }

    /// Mutably borrow the value under `name`
    pub fn get_mut<T: Any>(&mut self, name: &str) -> KilnResult<&mut T> {
        self.entries
            .get_mut(name)
            .ok_or(Status::NotExists)?
            .downcast_mut::<T>()
            .ok_or(Status::ArgumentTypeInvalid)
    }

    /// Drop the value under `name`
    pub fn deallocate(&mut self, name: &str) -> KilnResult<()> {
        self.entries
            .remove(name)
            .map(|_| ())
            .ok_or(Status::NotExists)
    }

    /// Check whether `name` is allocated
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of allocated names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check whether nothing is allocated
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Tier-1 process state
pub struct Core {
    jumps: Mutex<JumpStack>,
    status: Mutex<Status>,
    exit_requested: AtomicBool,
    libraries: Mutex<LibraryTable>,
    storage: Mutex<NamedStorage>,
}

impl Core {
    /// Create standalone process state (not published in the registry)
    pub fn new(options: CoreOptions) -> Self {
        Self {
            jumps: Mutex::new(JumpStack::new()),
            status: Mutex::new(Status::NoError),
            exit_requested: AtomicBool::new(false),
            libraries: Mutex::new(LibraryTable::new(options.library_port)),
            storage: Mutex::new(NamedStorage::default()),
        }
    }

    fn slot(registry: &ProcessRegistry) -> KilnResult<Arc<Singleton<Core>>> {
        registry.get_or_insert_with(CORE_REGISTRY_KEY, Singleton::new)
    }

    /// Acquire the process-wide state with default options
    pub fn acquire() -> KilnResult<Arc<Core>> {
        Self::acquire_with(CoreOptions::default())
    }

    /// Acquire the process-wide state
    ///
    /// `options` only take effect if this call constructs the state.
    /// Each successful acquire holds one process registry reference.
    pub fn acquire_with(options: CoreOptions) -> KilnResult<Arc<Core>> {
        let _guard = lifecycle_lock();

        let registry = ProcessRegistry::acquire()?;
        let acquired = Self::slot(&registry).and_then(|slot| {
            slot.acquire(|| {
                tracing::debug!("process state created");
                Ok(Core::new(options))
            })
        });

        if acquired.is_err() {
            ProcessRegistry::relinquish()?;
        }
        acquired
    }

    /// Relinquish one reference to the process-wide state
    ///
    /// Fails with `OperationInvalid` if it is not acquired.
    pub fn relinquish() -> KilnResult<()> {
        let _guard = lifecycle_lock();

        let registry = ProcessRegistry::acquire()?;
        let released = Self::slot(&registry).and_then(|slot| {
            slot.relinquish(|core| {
                if !core.jumps.lock().is_empty() {
                    tracing::warn!("process state destroyed with pushed jump targets");
                }
                tracing::debug!("process state destroyed");
            })
        });
        ProcessRegistry::relinquish()?;

        released?;
        ProcessRegistry::relinquish()
    }

    /// Number of outstanding references to the process-wide state
    pub fn references() -> usize {
        let _guard = lifecycle_lock();
        match ProcessRegistry::acquire() {
            Ok(registry) => {
                let count = Self::slot(&registry)
                    .map(|slot| slot.references())
                    .unwrap_or(0);
                if let Err(status) = ProcessRegistry::relinquish() {
                    tracing::error!(%status, "failed to release process registry");
                }
                count
            }
            Err(_) => 0,
        }
    }

    /// Push a recovery frame
    pub fn push_jump_target(&self) -> JumpTarget {
        self.jumps.lock().push()
    }

    /// Pop a recovery frame; fails with `StackCorruption` if it is not the top
    pub fn pop_jump_target(&self, target: JumpTarget) -> KilnResult<()> {
        self.jumps.lock().pop(target)
    }

    /// Number of pushed recovery frames
    pub fn jump_depth(&self) -> usize {
        self.jumps.lock().depth()
    }

    /// Record a failure for the innermost recovery frame
    ///
    /// Returns `status` so callers can write `Err(core.jump(status))`.
    pub fn jump(&self, status: Status) -> Status {
        *self.status.lock() = status;
        if self.jumps.lock().is_empty() {
            tracing::warn!(%status, "jump with no pushed jump target");
        }
        status
    }

    /// Last recorded status
    pub fn status(&self) -> Status {
        *self.status.lock()
    }

    /// Reset the status cell to `NoError`
    pub fn clear_status(&self) {
        *self.status.lock() = Status::NoError;
    }

    /// Run `f` inside a fresh recovery frame
    ///
    /// On failure every frame pushed inside `f` and not popped is discarded,
    /// the status is recorded and the error returned.
    pub fn protect<T, F>(&self, f: F) -> KilnResult<T>
    where
        F: FnOnce() -> KilnResult<T>,
    {
        let target = self.push_jump_target();
        match f() {
            Ok(value) => {
                self.pop_jump_target(target)?;
                Ok(value)
            }
            Err(status) => {
                self.jumps.lock().unwind_to(target.depth() - 1);
                *self.status.lock() = status;
                Err(status)
            }
        }
    }

    /// Ask the process to exit at the next opportunity
    pub fn request_exit(&self) {
        self.exit_requested.store(true, Ordering::SeqCst);
    }

    /// Check whether an exit was requested
    pub fn is_exit_requested(&self) -> bool {
        self.exit_requested.load(Ordering::SeqCst)
    }

    /// Load a library, reusing an already loaded one for the same path
    pub fn load_library(&self, path: &Path) -> KilnResult<Library> {
        self.libraries.lock().load(path)
    }

    /// Find a loaded library by native handle
    pub fn find_library(&self, raw: RawLibrary) -> Option<Library> {
        self.libraries.lock().find(raw)
    }

    /// Number of loaded libraries
    pub fn library_count(&self) -> usize {
        self.libraries.lock().len()
    }

    /// Lock the named storage
    pub fn storage(&self) -> MutexGuard<'_, NamedStorage> {
        self.storage.lock()
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new(CoreOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protect_success_pops_frame() {
        let core = Core::default();
        let value = core.protect(|| Ok(5)).unwrap();
        assert_eq!(value, 5);
        assert_eq!(core.jump_depth(), 0);
        assert_eq!(core.status(), Status::NoError);
    }

    #[test]
    fn test_protect_failure_unwinds_and_records() {
        let core = Core::default();
        let result: KilnResult<()> = core.protect(|| {
            // Frames pushed inside and never popped are skipped by the jump
            let _inner = core.push_jump_target();
            let _deeper = core.push_jump_target();
            Err(core.jump(Status::Overflow))
        });
        assert_eq!(result, Err(Status::Overflow));
        assert_eq!(core.jump_depth(), 0);
        assert_eq!(core.status(), Status::Overflow);

        core.clear_status();
        assert_eq!(core.status(), Status::NoError);
    }

    #[test]
    fn test_protect_nested() {
        let core = Core::default();
        let outer: KilnResult<u32> = core.protect(|| {
            let inner: KilnResult<u32> = core.protect(|| Err(Status::NotExists));
            assert_eq!(inner, Err(Status::NotExists));
            assert_eq!(core.jump_depth(), 1);
            Ok(1)
        });
        assert_eq!(outer, Ok(1));
        assert_eq!(core.jump_depth(), 0);
    }

    #[test]
    fn test_pop_out_of_order() {
        let core = Core::default();
        let outer = core.push_jump_target();
        let inner = core.push_jump_target();
        assert_eq!(core.pop_jump_target(outer), Err(Status::StackCorruption));
        core.pop_jump_target(inner).unwrap();
        core.pop_jump_target(outer).unwrap();
    }

    #[test]
    fn test_jump_without_target_records_status() {
        let core = Core::default();
        assert_eq!(core.jump(Status::Aborted), Status::Aborted);
        assert_eq!(core.status(), Status::Aborted);
    }

    #[test]
    fn test_exit_flag() {
        let core = Core::default();
        assert!(!core.is_exit_requested());
        core.request_exit();
        assert!(core.is_exit_requested());
    }

    #[test]
    fn test_named_storage() {
        let core = Core::default();
        core.storage().allocate("counter", 1u64).unwrap();
        assert_eq!(
            core.storage().allocate("counter", 2u64),
            Err(Status::Exists)
        );

        *core.storage().get_mut::<u64>("counter").unwrap() += 1;
        assert_eq!(*core.storage().get::<u64>("counter").unwrap(), 2);
        assert_eq!(
            core.storage().get::<String>("counter").err(),
            Some(Status::ArgumentTypeInvalid)
        );

        core.storage().deallocate("counter").unwrap();
        assert_eq!(core.storage().deallocate("counter"), Err(Status::NotExists));
        assert!(core.storage().is_empty());
    }
}
