//! Runtime values
//!
//! A [`Value`] is a small copyable cell. Primitive values carry their payload
//! inline; managed objects are referenced through [`ObjectRef`] handles.

use crate::object::ObjectRef;
use crate::status::KilnResult;
use crate::types::TypeRef;
use std::fmt;

/// Signature of a native function value
pub type NativeFn = fn(&[Value]) -> KilnResult<Value>;

/// A native function that can be stored in a [`Value`]
#[derive(Clone, Copy)]
pub struct NativeFunction(pub NativeFn);

impl NativeFunction {
    /// Call the function
    pub fn call(&self, args: &[Value]) -> KilnResult<Value> {
        (self.0)(args)
    }
}

impl PartialEq for NativeFunction {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::fn_addr_eq(self.0, other.0)
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunction({:p})", self.0 as *const ())
    }
}

/// A runtime value
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Value {
    /// No value
    #[default]
    Void,
    /// Boolean
    Boolean(bool),
    /// 32-bit signed integer
    Integer32(i32),
    /// 32-bit float
    Float32(f32),
    /// A type
    Type(TypeRef),
    /// A managed object
    Object(ObjectRef),
    /// A native function
    NativeFunction(NativeFunction),
}

impl Value {
    /// Check whether this is `Void`
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Value::Void)
    }

    /// Get the object reference, if this is an object
    #[inline]
    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(object) => Some(*object),
            _ => None,
        }
    }

    /// Get the boolean, if this is a boolean
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the integer, if this is an integer
    #[inline]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Integer32(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the float, if this is a float
    #[inline]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Float32(f) => Some(*f),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer32(i)
    }
}

impl From<f32> for Value {
    fn from(f: f32) -> Self {
        Value::Float32(f)
    }
}

impl From<ObjectRef> for Value {
    fn from(object: ObjectRef) -> Self {
        Value::Object(object)
    }
}

impl From<TypeRef> for Value {
    fn from(ty: TypeRef) -> Self {
        Value::Type(ty)
    }
}
