//! Type registry
//!
//! Types live in an arena addressed by [`TypeRef`] and are found by name
//! through a hashed name table (bucket lists compared byte-for-byte). Object
//! types form a single-inheritance hierarchy rooted at `Kiln.Object`; each
//! object type owns a [`Dispatch`] table built eagerly when the type is
//! created, parent first. Primitive types describe inline values and have no
//! parent, children or dispatch.
//!
//! Teardown runs in two phases: dispatch tables are uninitialized post-order
//! (children before parents), then types are destroyed leaves-first until no
//! type is left.

mod builtins;
mod descriptor;
mod dispatch;

pub use builtins::BuiltinTypes;
pub use descriptor::{
    ConstructFn, DispatchInitializeFn, DispatchUninitializeFn, FinalizeFn, PostCreateTypeFn,
    PreDestroyTypeFn, TypeDescriptor, TypeDestroyedFn, VisitFn,
};
pub use dispatch::{slots, Dispatch, Method, MethodContext};

use crate::gc::Gc;
use crate::object::OBJECT_HEADER_SIZE;
use crate::process::Core;
use crate::status::{KilnResult, Status};
use crate::value::Value;
use rustc_hash::{FxHashMap, FxHasher};
use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

/// Handle to a registered type
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef(u32);

impl TypeRef {
    /// Build a handle from an arena index
    pub fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Arena index
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeRef({})", self.0)
    }
}

/// Kind of a registered type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Describes inline values
    Primitive,
    /// Describes managed objects
    Object,
}

struct ObjectType {
    parent: Option<TypeRef>,
    children: Vec<TypeRef>,
    dispatch: Option<Dispatch>,
    post_create_invoked: bool,
}

struct TypeRecord {
    name: String,
    kind: TypeKind,
    descriptor: TypeDescriptor,
    object: Option<ObjectType>,
}

fn name_hash(name: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(name);
    hasher.finish()
}

/// Registry of all types
pub struct Types {
    core: Arc<Core>,
    records: Vec<Option<TypeRecord>>,
    names: FxHashMap<u64, Vec<TypeRef>>,
    builtins: Option<BuiltinTypes>,
}

impl Types {
    /// Create an empty registry
    pub fn new(core: Arc<Core>) -> Self {
        Self {
            core,
            records: Vec::new(),
            names: FxHashMap::default(),
            builtins: None,
        }
    }

    /// Create a registry with the built-in types registered
    pub fn startup(core: Arc<Core>) -> KilnResult<Self> {
        let mut types = Self::new(core);
        let builtins = BuiltinTypes::register(&mut types)?;
        types.builtins = Some(builtins);
        tracing::debug!(types = types.len(), "type registry started");
        Ok(types)
    }

    /// Built-in types; fails with `OperationInvalid` before startup
    pub fn builtins(&self) -> KilnResult<&BuiltinTypes> {
        self.builtins.as_ref().ok_or(Status::OperationInvalid)
    }

    /// The root object type
    pub fn object_type(&self) -> KilnResult<TypeRef> {
        Ok(self.builtins()?.object)
    }

    fn record(&self, ty: TypeRef) -> KilnResult<&TypeRecord> {
        self.records
            .get(ty.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(Status::NotExists)
    }

    fn record_mut(&mut self, ty: TypeRef) -> KilnResult<&mut TypeRecord> {
        self.records
            .get_mut(ty.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(Status::NotExists)
    }

    fn object_record(&self, ty: TypeRef) -> KilnResult<&ObjectType> {
        self.record(ty)?
            .object
            .as_ref()
            .ok_or(Status::ArgumentTypeInvalid)
    }

    fn object_record_mut(&mut self, ty: TypeRef) -> KilnResult<&mut ObjectType> {
        self.record_mut(ty)?
            .object
            .as_mut()
            .ok_or(Status::ArgumentTypeInvalid)
    }

    /// Look up a type by name
    pub fn get(&self, name: &str) -> Option<TypeRef> {
        self.names
            .get(&name_hash(name.as_bytes()))?
            .iter()
            .copied()
            .find(|ty| {
                self.record(*ty)
                    .map(|record| record.name.as_bytes() == name.as_bytes())
                    .unwrap_or(false)
            })
    }

    /// Check whether `ty` is registered
    pub fn contains(&self, ty: TypeRef) -> bool {
        self.record(ty).is_ok()
    }

    /// Name of a type
    pub fn name(&self, ty: TypeRef) -> KilnResult<&str> {
        Ok(&self.record(ty)?.name)
    }

    /// Kind of a type
    pub fn kind(&self, ty: TypeRef) -> KilnResult<TypeKind> {
        Ok(self.record(ty)?.kind)
    }

    /// Check whether `ty` is an object type
    pub fn is_object_type(&self, ty: TypeRef) -> bool {
        self.object_record(ty).is_ok()
    }

    /// Descriptor a type was created with
    pub fn descriptor(&self, ty: TypeRef) -> KilnResult<&TypeDescriptor> {
        Ok(&self.record(ty)?.descriptor)
    }

    /// Parent of an object type (`None` for the root)
    pub fn parent(&self, ty: TypeRef) -> KilnResult<Option<TypeRef>> {
        Ok(self.object_record(ty)?.parent)
    }

    /// Direct children of an object type
    pub fn children(&self, ty: TypeRef) -> KilnResult<&[TypeRef]> {
        Ok(&self.object_record(ty)?.children)
    }

    /// `ty` followed by its ancestors, most derived first
    pub fn ancestors(&self, ty: TypeRef) -> KilnResult<Vec<TypeRef>> {
        let mut chain = vec![ty];
        let mut current = self.parent(ty)?;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.parent(parent)?;
        }
        Ok(chain)
    }

    /// Check whether `ty` is `ancestor` or derives from it
    pub fn is_subtype_of(&self, ty: TypeRef, ancestor: TypeRef) -> bool {
        let mut current = Some(ty);
        while let Some(t) = current {
            if t == ancestor {
                return true;
            }
            current = self.parent(t).ok().flatten();
        }
        false
    }

    /// Instance size of an object type, header included
    pub fn instance_size(&self, ty: TypeRef) -> KilnResult<usize> {
        self.object_record(ty)?;
        Ok(self
            .record(ty)?
            .descriptor
            .instance_size
            .unwrap_or(OBJECT_HEADER_SIZE))
    }

    /// Dispatch table of an object type, if initialized
    pub fn dispatch(&self, ty: TypeRef) -> Option<&Dispatch> {
        self.object_record(ty).ok()?.dispatch.as_ref()
    }

    /// Resolve `slot` of `ty`'s dispatch to a method
    ///
    /// Resolution reads the built table only. After
    /// [`Types::ensure_dispatch_uninitialized`] this fails with
    /// `DispatchNotExists` until [`Types::ensure_dispatch_initialized`]
    /// rebuilds it.
    pub fn resolve_method(&self, ty: TypeRef, slot: usize) -> KilnResult<Method> {
        self.dispatch(ty)
            .ok_or(Status::DispatchNotExists)?
            .resolve(slot)
    }

    /// Type of a value
    pub fn type_of_value(&self, gc: &Gc, value: &Value) -> KilnResult<TypeRef> {
        let builtins = self.builtins()?;
        Ok(match value {
            Value::Void => builtins.void,
            Value::Boolean(_) => builtins.boolean,
            Value::Integer32(_) => builtins.integer32,
            Value::Float32(_) => builtins.float32,
            Value::Type(_) => builtins.type_,
            Value::NativeFunction(_) => builtins.foreign_procedure,
            Value::Object(object) => gc.type_of(*object)?,
        })
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.records.iter().filter(|r| r.is_some()).count()
    }

    /// Check whether no type is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over registered types in creation order
    pub fn iter(&self) -> impl Iterator<Item = TypeRef> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_some())
            .map(|(i, _)| TypeRef(i as u32))
    }

    fn insert(&mut self, name: &str, kind: TypeKind, descriptor: TypeDescriptor, object: Option<ObjectType>) -> TypeRef {
        let ty = TypeRef(self.records.len() as u32);
        self.records.push(Some(TypeRecord {
            name: name.to_string(),
            kind,
            descriptor,
            object,
        }));
        self.names
            .entry(name_hash(name.as_bytes()))
            .or_default()
            .push(ty);
        ty
    }

    /// Remove a record from the arena, the name table and its parent's children
    fn unlink(&mut self, ty: TypeRef) -> Option<TypeRecord> {
        let record = self.records.get_mut(ty.0 as usize)?.take()?;

        let hash = name_hash(record.name.as_bytes());
        if let Some(bucket) = self.names.get_mut(&hash) {
            bucket.retain(|t| *t != ty);
            if bucket.is_empty() {
                self.names.remove(&hash);
            }
        }

        if let Some(parent) = record.object.as_ref().and_then(|o| o.parent) {
            if let Ok(parent) = self.object_record_mut(parent) {
                parent.children.retain(|t| *t != ty);
            }
        }
        Some(record)
    }

    /// Register a primitive type
    ///
    /// Fails with `Exists` if the name is taken.
    pub fn create_primitive_type(&mut self, name: &str, descriptor: TypeDescriptor) -> KilnResult<TypeRef> {
        if self.get(name).is_some() {
            return Err(Status::Exists);
        }

        let post_create = descriptor.post_create_type.clone();
        let ty = self.insert(name, TypeKind::Primitive, descriptor, None);

        if let Some(post_create) = post_create {
            if let Err(status) = post_create(ty, &self.core) {
                self.unlink(ty);
                return Err(status);
            }
        }

        tracing::trace!(name, ?ty, "primitive type created");
        Ok(ty)
    }

    /// Register an object type deriving from `parent`
    ///
    /// Fails with `Exists` if the name is taken and with `ArgumentValueInvalid`
    /// if `parent` is not an object type. The post-create hook runs once and
    /// the dispatch table is built before this returns; if either fails the
    /// type is removed again and nothing is left registered.
    pub fn create_object_type(
        &mut self,
        name: &str,
        parent: TypeRef,
        descriptor: TypeDescriptor,
    ) -> KilnResult<TypeRef> {
        if !self.is_object_type(parent) {
            return Err(Status::ArgumentValueInvalid);
        }
        self.create_object_type_impl(name, Some(parent), descriptor)
    }

    pub(crate) fn create_root_type(&mut self, name: &str, descriptor: TypeDescriptor) -> KilnResult<TypeRef> {
        self.create_object_type_impl(name, None, descriptor)
    }

    fn create_object_type_impl(
        &mut self,
        name: &str,
        parent: Option<TypeRef>,
        mut descriptor: TypeDescriptor,
    ) -> KilnResult<TypeRef> {
        if self.get(name).is_some() {
            return Err(Status::Exists);
        }

        if let Some(parent) = parent {
            let parent_descriptor = &self.record(parent)?.descriptor;
            if descriptor.instance_size.is_none() {
                descriptor.instance_size = parent_descriptor.instance_size;
            }
            if descriptor.dispatch_size.is_none() {
                descriptor.dispatch_size = parent_descriptor.dispatch_size;
            }
        }
        if descriptor
            .instance_size
            .is_some_and(|size| size < OBJECT_HEADER_SIZE)
        {
            return Err(Status::ArgumentValueInvalid);
        }

        let ty = self.insert(
            name,
            TypeKind::Object,
            descriptor,
            Some(ObjectType {
                parent,
                children: Vec::new(),
                dispatch: None,
                post_create_invoked: false,
            }),
        );
        if let Some(parent) = parent {
            self.object_record_mut(parent)?.children.push(ty);
        }

        if let Err(status) = self.on_post_create_type(ty) {
            self.unlink(ty);
            tracing::debug!(name, %status, "object type creation rolled back");
            return Err(status);
        }

        tracing::trace!(name, ?ty, ?parent, "object type created");
        Ok(ty)
    }

    fn on_post_create_type(&mut self, ty: TypeRef) -> KilnResult<()> {
        if !self.object_record(ty)?.post_create_invoked {
            if let Some(post_create) = self.record(ty)?.descriptor.post_create_type.clone() {
                post_create(ty, &self.core)?;
            }
            self.object_record_mut(ty)?.post_create_invoked = true;
        }
        self.ensure_dispatch_initialized(ty)
    }

    /// Build `ty`'s dispatch table if it is not built yet
    ///
    /// The parent's table is built first and copied into the prefix; the
    /// type's own initializer then overrides or fills slots. Fails with
    /// `ArgumentValueInvalid` if the dispatch size is smaller than the
    /// parent's.
    pub fn ensure_dispatch_initialized(&mut self, ty: TypeRef) -> KilnResult<()> {
        let object = self.object_record(ty)?;
        if object.dispatch.is_some() {
            return Ok(());
        }
        let parent = object.parent;

        let descriptor = &self.record(ty)?.descriptor;
        let size = descriptor.dispatch_size.unwrap_or(0);
        let initialize = descriptor.dispatch_initialize.clone();

        let mut dispatch = Dispatch::with_size(size);
        if let Some(parent) = parent {
            self.ensure_dispatch_initialized(parent)?;
            let parent_dispatch = self
                .object_record(parent)?
                .dispatch
                .as_ref()
                .ok_or(Status::DispatchNotExists)?;
            dispatch.inherit(parent_dispatch)?;
        }

        if let Some(initialize) = initialize {
            initialize(&mut dispatch)?;
        }

        self.object_record_mut(ty)?.dispatch = Some(dispatch);
        Ok(())
    }

    /// Tear down `ty`'s dispatch table and those of all its descendants
    ///
    /// Children are torn down before their parent.
    pub fn ensure_dispatch_uninitialized(&mut self, ty: TypeRef) -> KilnResult<()> {
        let children = self.object_record(ty)?.children.clone();
        for child in children {
            self.ensure_dispatch_uninitialized(child)?;
        }

        let uninitialize = self.record(ty)?.descriptor.dispatch_uninitialize.clone();
        if let Some(mut dispatch) = self.object_record_mut(ty)?.dispatch.take() {
            if let Some(uninitialize) = uninitialize {
                uninitialize(&mut dispatch);
            }
        }
        Ok(())
    }

    fn destroy(&mut self, ty: TypeRef) {
        let pre_destroy = self
            .record(ty)
            .ok()
            .and_then(|record| record.descriptor.pre_destroy_type.clone());
        if let Some(pre_destroy) = pre_destroy {
            pre_destroy(ty, &self.core);
        }

        if let Some(record) = self.unlink(ty) {
            tracing::trace!(name = %record.name, ?ty, "type destroyed");
            let notify = record.descriptor.type_destroyed.clone();
            let name = record.name.clone();
            // Dropping the record releases the library it pins
            drop(record);
            if let Some(notify) = notify {
                notify(&name);
            }
        }
    }

    /// Destroy every type
    ///
    /// All dispatch tables are uninitialized first (post-order from each root
    /// object type), then types without children are destroyed repeatedly
    /// until none remain.
    pub fn uninitialize(&mut self) {
        let roots: Vec<TypeRef> = self
            .iter()
            .filter(|ty| matches!(self.parent(*ty), Ok(None)))
            .collect();
        for root in roots {
            if let Err(status) = self.ensure_dispatch_uninitialized(root) {
                tracing::error!(?root, %status, "failed to uninitialize dispatch");
            }
        }

        loop {
            let leaves: Vec<TypeRef> = self
                .iter()
                .filter(|ty| self.children(*ty).map(|c| c.is_empty()).unwrap_or(true))
                .collect();
            if leaves.is_empty() {
                break;
            }
            for ty in leaves {
                self.destroy(ty);
            }
        }

        self.builtins = None;
        tracing::debug!("type registry uninitialized");
    }
}
