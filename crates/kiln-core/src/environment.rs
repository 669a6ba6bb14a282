//! Global environment
//!
//! Named global values. Every value bound here is a GC root.

use crate::gc::{Marker, RootSet};
use crate::status::{KilnResult, Status};
use crate::value::Value;
use rustc_hash::FxHashMap;

/// Global name bindings
#[derive(Debug, Default)]
pub struct GlobalEnvironment {
    bindings: FxHashMap<String, Value>,
}

impl GlobalEnvironment {
    /// Create an empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new name; fails with `Exists` if it is already bound
    pub fn define(&mut self, name: &str, value: Value) -> KilnResult<()> {
        if self.bindings.contains_key(name) {
            return Err(Status::Exists);
        }
        self.bindings.insert(name.to_string(), value);
        Ok(())
    }

    /// Rebind an existing name; fails with `NotExists` if it is unbound
    pub fn set(&mut self, name: &str, value: Value) -> KilnResult<()> {
        let slot = self.bindings.get_mut(name).ok_or(Status::NotExists)?;
        *slot = value;
        Ok(())
    }

    /// Value bound to `name`
    pub fn get(&self, name: &str) -> KilnResult<Value> {
        self.bindings.get(name).copied().ok_or(Status::NotExists)
    }

    /// Unbind `name`, returning its value
    pub fn remove(&mut self, name: &str) -> KilnResult<Value> {
        self.bindings.remove(name).ok_or(Status::NotExists)
    }

    /// Check whether `name` is bound
    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check whether nothing is bound
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl RootSet for GlobalEnvironment {
    fn visit_roots(&self, marker: &mut Marker<'_>) {
        for value in self.bindings.values() {
            marker.visit_value(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_define_get_set_remove() {
        let mut env = GlobalEnvironment::new();
        env.define("answer", Value::Integer32(41)).unwrap();
        assert_eq!(env.define("answer", Value::Void), Err(Status::Exists));

        env.set("answer", Value::Integer32(42)).unwrap();
        assert_eq!(env.get("answer"), Ok(Value::Integer32(42)));

        assert_eq!(env.remove("answer"), Ok(Value::Integer32(42)));
        assert_eq!(env.get("answer"), Err(Status::NotExists));
        assert_eq!(env.set("answer", Value::Void), Err(Status::NotExists));
        assert_eq!(env.remove("answer"), Err(Status::NotExists));
        assert!(env.is_empty());
    }
}
