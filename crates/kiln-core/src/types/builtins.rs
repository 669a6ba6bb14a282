//! Built-in types
//!
//! The root object type `Kiln.Object` and the primitive types every runtime
//! has. The root type's dispatch provides identity hashing and identity
//! equality; `isNotEqualTo` is defined through `isEqualTo` so overriding the
//! latter is enough.

use super::{slots, MethodContext, TypeDescriptor, TypeRef, Types};
use crate::defaults::OBJECT_TYPE_NAME;
use crate::object::{ObjectRef, OBJECT_HEADER_SIZE};
use crate::status::{KilnResult, Status};
use crate::value::Value;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// Handles of the built-in types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinTypes {
    /// `Kiln.Object`
    pub object: TypeRef,
    /// `Kiln.Void`
    pub void: TypeRef,
    /// `Kiln.Boolean`
    pub boolean: TypeRef,
    /// `Kiln.Integer32`
    pub integer32: TypeRef,
    /// `Kiln.Float32`
    pub float32: TypeRef,
    /// `Kiln.Type`
    pub type_: TypeRef,
    /// `Kiln.ForeignProcedure`
    pub foreign_procedure: TypeRef,
}

impl BuiltinTypes {
    pub(super) fn register(types: &mut Types) -> KilnResult<Self> {
        let object = types.create_root_type(
            OBJECT_TYPE_NAME,
            TypeDescriptor::new()
                .with_instance_size(OBJECT_HEADER_SIZE)
                .with_dispatch_size(slots::OBJECT_DISPATCH_SIZE)
                .with_dispatch_initialize(|dispatch| {
                    dispatch.set(slots::GET_HASH_VALUE, get_hash_value)?;
                    dispatch.set(slots::IS_EQUAL_TO, is_equal_to)?;
                    dispatch.set(slots::IS_NOT_EQUAL_TO, is_not_equal_to)
                }),
        )?;

        let mut primitive = |name: &str| types.create_primitive_type(name, TypeDescriptor::new());
        Ok(Self {
            object,
            void: primitive("Kiln.Void")?,
            boolean: primitive("Kiln.Boolean")?,
            integer32: primitive("Kiln.Integer32")?,
            float32: primitive("Kiln.Float32")?,
            type_: primitive("Kiln.Type")?,
            foreign_procedure: primitive("Kiln.ForeignProcedure")?,
        })
    }
}

/// Identity hash of an object handle
pub(crate) fn identity_hash(object: ObjectRef) -> i32 {
    let mut hasher = FxHasher::default();
    object.hash(&mut hasher);
    hasher.finish() as i32
}

fn get_hash_value(_: &mut MethodContext<'_>, receiver: ObjectRef, args: &[Value]) -> KilnResult<Value> {
    if !args.is_empty() {
        return Err(Status::NumberOfArgumentsInvalid);
    }
    Ok(Value::Integer32(identity_hash(receiver)))
}

fn is_equal_to(_: &mut MethodContext<'_>, receiver: ObjectRef, args: &[Value]) -> KilnResult<Value> {
    let [other] = args else {
        return Err(Status::NumberOfArgumentsInvalid);
    };
    Ok(Value::Boolean(*other == Value::Object(receiver)))
}

fn is_not_equal_to(ctx: &mut MethodContext<'_>, receiver: ObjectRef, args: &[Value]) -> KilnResult<Value> {
    match ctx.call(receiver, slots::IS_EQUAL_TO, args)? {
        Value::Boolean(equal) => Ok(Value::Boolean(!equal)),
        _ => Err(Status::ConversionFailed),
    }
}
