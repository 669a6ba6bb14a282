//! Object locks (pins)
//!
//! Locking an object pins it: while its lock count is positive it is a GC
//! root. Counts nest, so an object locked twice needs two unlocks before it
//! can be collected again.

use crate::gc::{Marker, RootSet};
use crate::object::ObjectRef;
use crate::status::{KilnResult, Status};
use rustc_hash::FxHashMap;

/// Lock counts by object
#[derive(Debug, Default)]
pub struct Locks {
    counts: FxHashMap<ObjectRef, u32>,
}

impl Locks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the lock count of `object`
    ///
    /// Fails with `Overflow` if the count is already at its maximum.
    pub fn lock(&mut self, object: ObjectRef) -> KilnResult<u32> {
        let count = self.counts.entry(object).or_insert(0);
        *count = count.checked_add(1).ok_or(Status::Overflow)?;
        Ok(*count)
    }

    /// Decrement the lock count of `object`
    ///
    /// Fails with `NotExists` if the object was never locked and with
    /// `Underflow` if its count is already zero.
    pub fn unlock(&mut self, object: ObjectRef) -> KilnResult<u32> {
        let count = self.counts.get_mut(&object).ok_or(Status::NotExists)?;
        *count = count.checked_sub(1).ok_or(Status::Underflow)?;
        Ok(*count)
    }

    /// Current lock count of `object`
    pub fn count(&self, object: ObjectRef) -> u32 {
        self.counts.get(&object).copied().unwrap_or(0)
    }

    /// Iterate over objects with a positive lock count
    pub fn pinned(&self) -> impl Iterator<Item = ObjectRef> + '_ {
        self.counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(object, _)| *object)
    }

    /// Drop the entry for a reclaimed object, returning its count
    pub fn forget(&mut self, object: ObjectRef) -> Option<u32> {
        self.counts.remove(&object)
    }

    /// Number of tracked objects
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Check whether no object is tracked
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl RootSet for Locks {
    fn visit_roots(&self, marker: &mut Marker<'_>) {
        for object in self.pinned() {
            marker.visit_object(object);
        }
    }
}
