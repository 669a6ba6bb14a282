//! Dispatch tables
//!
//! A dispatch table is a fixed-size array of optional method slots. A child
//! type's table starts as a copy of its parent's and is at least as large,
//! so slot indices are stable down the hierarchy.

use super::Types;
use crate::gc::Gc;
use crate::object::ObjectRef;
use crate::status::{KilnResult, Status};
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// A dispatched method
pub type Method =
    Arc<dyn Fn(&mut MethodContext<'_>, ObjectRef, &[Value]) -> KilnResult<Value> + Send + Sync>;

/// Slot indices of the root object type
pub mod slots {
    /// `getHashValue() -> Integer32`
    pub const GET_HASH_VALUE: usize = 0;
    /// `isEqualTo(other) -> Boolean`
    pub const IS_EQUAL_TO: usize = 1;
    /// `isNotEqualTo(other) -> Boolean`
    pub const IS_NOT_EQUAL_TO: usize = 2;
    /// Number of root slots
    pub const OBJECT_DISPATCH_SIZE: usize = 3;
}

/// A type's method table
#[derive(Clone, Default)]
pub struct Dispatch {
    slots: Vec<Option<Method>>,
}

impl Dispatch {
    /// Create a table of `size` empty slots
    pub fn with_size(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check whether the table has no slots
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get the method in `slot`
    pub fn get(&self, slot: usize) -> Option<&Method> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Install `method` in `slot`
    pub fn set<F>(&mut self, slot: usize, method: F) -> KilnResult<()>
    where
        F: Fn(&mut MethodContext<'_>, ObjectRef, &[Value]) -> KilnResult<Value>
            + Send
            + Sync
            + 'static,
    {
        let entry = self.slots.get_mut(slot).ok_or(Status::ArgumentOutOfRange)?;
        *entry = Some(Arc::new(method));
        Ok(())
    }

    /// Empty `slot`
    pub fn clear(&mut self, slot: usize) -> KilnResult<()> {
        let entry = self.slots.get_mut(slot).ok_or(Status::ArgumentOutOfRange)?;
        *entry = None;
        Ok(())
    }

    /// Overlay `parent`'s slots onto the prefix of this table
    pub(crate) fn inherit(&mut self, parent: &Dispatch) -> KilnResult<()> {
        if parent.len() > self.len() {
            return Err(Status::ArgumentValueInvalid);
        }
        self.slots[..parent.len()].clone_from_slice(&parent.slots);
        Ok(())
    }

    /// Resolve `slot` to a method
    pub fn resolve(&self, slot: usize) -> KilnResult<Method> {
        match self.slots.get(slot) {
            None => Err(Status::MethodNotFound),
            Some(None) => Err(Status::MethodNotImplemented),
            Some(Some(method)) => Ok(method.clone()),
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let populated: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|_| i))
            .collect();
        f.debug_struct("Dispatch")
            .field("len", &self.slots.len())
            .field("populated", &populated)
            .finish()
    }
}

/// What a method sees of the runtime while it runs
pub struct MethodContext<'a> {
    /// Type registry
    pub types: &'a Types,
    /// Collector and heap
    pub gc: &'a mut Gc,
}

impl<'a> MethodContext<'a> {
    /// Create a context over a registry and heap
    pub fn new(types: &'a Types, gc: &'a mut Gc) -> Self {
        Self { types, gc }
    }

    /// Call `slot` on `receiver` through its type's dispatch
    pub fn call(&mut self, receiver: ObjectRef, slot: usize, args: &[Value]) -> KilnResult<Value> {
        let ty = self.gc.type_of(receiver)?;
        let method = self.types.resolve_method(ty, slot)?;
        method(self, receiver, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn void_method(_: &mut MethodContext<'_>, _: ObjectRef, _: &[Value]) -> KilnResult<Value> {
        Ok(Value::Void)
    }

    #[test]
    fn test_set_and_resolve() {
        let mut dispatch = Dispatch::with_size(2);
        dispatch.set(0, void_method).unwrap();

        assert!(dispatch.resolve(0).is_ok());
        assert_eq!(dispatch.resolve(1).err(), Some(Status::MethodNotImplemented));
        assert_eq!(dispatch.resolve(2).err(), Some(Status::MethodNotFound));
        assert_eq!(dispatch.set(2, void_method), Err(Status::ArgumentOutOfRange));
    }

    #[test]
    fn test_inherit_prefix() {
        let mut parent = Dispatch::with_size(2);
        parent.set(1, void_method).unwrap();

        let mut child = Dispatch::with_size(4);
        child.inherit(&parent).unwrap();
        assert!(child.get(0).is_none());
        assert!(child.get(1).is_some());
        assert!(child.get(3).is_none());

        let mut small = Dispatch::with_size(1);
        assert_eq!(small.inherit(&parent), Err(Status::ArgumentValueInvalid));
    }

    #[test]
    fn test_clear() {
        let mut dispatch = Dispatch::with_size(1);
        dispatch.set(0, void_method).unwrap();
        dispatch.clear(0).unwrap();
        assert!(dispatch.get(0).is_none());
    }
}
