//! Collector hook lists
//!
//! Hooks are kept in registration order. A hook can be removed while a pass
//! over its list is running (through [`HookHandle::remove`]); the entry is
//! only marked dead and skipped, and dead entries are purged once the pass
//! is over.

use crate::status::{KilnResult, Status};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Handle returned when a hook is registered
#[derive(Debug, Clone)]
pub struct HookHandle {
    id: u64,
    dead: Arc<AtomicBool>,
}

impl HookHandle {
    /// Registration id, unique per list
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Mark the hook removed; it will not be called again
    pub fn remove(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    /// Check whether the hook was removed
    pub fn is_removed(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

struct HookEntry<F> {
    id: u64,
    dead: Arc<AtomicBool>,
    callback: F,
}

impl<F> HookEntry<F> {
    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }
}

pub(crate) struct HookList<F> {
    entries: Vec<HookEntry<F>>,
    next_id: u64,
}

impl<F> HookList<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn add(&mut self, callback: F) -> HookHandle {
        let id = self.next_id;
        self.next_id += 1;
        let dead = Arc::new(AtomicBool::new(false));
        self.entries.push(HookEntry {
            id,
            dead: dead.clone(),
            callback,
        });
        HookHandle { id, dead }
    }

    /// Remove the hook registered under `handle`
    ///
    /// Fails with `NotExists` if it was already removed.
    pub(crate) fn remove(&mut self, handle: &HookHandle) -> KilnResult<()> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == handle.id && !entry.is_dead())
            .ok_or(Status::NotExists)?;
        self.entries[index].dead.store(true, Ordering::SeqCst);
        self.entries.remove(index);
        Ok(())
    }

    /// Call `f` on every live hook, then purge the dead ones
    pub(crate) fn notify(&mut self, mut f: impl FnMut(&mut F)) {
        for entry in self.entries.iter_mut() {
            // Re-checked per entry: an earlier hook may have removed this one
            if entry.is_dead() {
                continue;
            }
            f(&mut entry.callback);
        }
    }

    pub(crate) fn purge(&mut self) {
        self.entries.retain(|entry| !entry.is_dead());
    }

    /// Number of live hooks
    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|entry| !entry.is_dead()).count()
    }
}
