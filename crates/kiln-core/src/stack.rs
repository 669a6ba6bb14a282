//! Operand stack
//!
//! A bounded LIFO of values shared by native code running on the VM. Every
//! value on the stack is a GC root.

use crate::defaults::DEFAULT_STACK_CAPACITY;
use crate::gc::{Marker, RootSet};
use crate::status::{KilnResult, Status};
use crate::value::Value;

/// Bounded operand stack
#[derive(Debug)]
pub struct Stack {
    values: Vec<Value>,
    capacity: usize,
}

impl Stack {
    /// Create a stack with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_STACK_CAPACITY)
    }

    /// Create a stack holding at most `capacity` values
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Push a value
    ///
    /// # Errors
    ///
    /// Returns `StackOverflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: Value) -> KilnResult<()> {
        if self.values.len() >= self.capacity {
            return Err(Status::StackOverflow);
        }
        self.values.push(value);
        Ok(())
    }

    /// Pop the top value
    ///
    /// # Errors
    ///
    /// Returns `StackUnderflow` if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> KilnResult<Value> {
        self.values.pop().ok_or(Status::StackUnderflow)
    }

    /// Top value without popping it
    #[inline]
    pub fn peek(&self) -> KilnResult<Value> {
        self.values.last().copied().ok_or(Status::StackUnderflow)
    }

    /// Value `depth` slots below the top (0 is the top)
    pub fn peek_at(&self, depth: usize) -> KilnResult<Value> {
        let len = self.values.len();
        if depth >= len {
            return Err(Status::StackIndexOutOfBounds);
        }
        Ok(self.values[len - 1 - depth])
    }

    /// Value at absolute `index` (0 is the bottom)
    pub fn get(&self, index: usize) -> KilnResult<Value> {
        self.values
            .get(index)
            .copied()
            .ok_or(Status::StackIndexOutOfBounds)
    }

    /// Overwrite the value at absolute `index`
    pub fn set(&mut self, index: usize, value: Value) -> KilnResult<()> {
        let slot = self
            .values
            .get_mut(index)
            .ok_or(Status::StackIndexOutOfBounds)?;
        *slot = value;
        Ok(())
    }

    /// Number of values on the stack
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check whether the stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Maximum number of values
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Remove every value
    pub fn clear(&mut self) {
        self.values.clear();
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl RootSet for Stack {
    fn visit_roots(&self, marker: &mut Marker<'_>) {
        for value in &self.values {
            marker.visit_value(value);
        }
    }
}
