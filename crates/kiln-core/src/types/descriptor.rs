//! Type descriptors
//!
//! A [`TypeDescriptor`] carries everything a caller supplies when creating a
//! type: sizes and the optional lifecycle callbacks. Callbacks are shared
//! closures so descriptors can be cloned and callbacks invoked while the
//! registry is borrowed.

use super::{Dispatch, TypeRef};
use crate::gc::Marker;
use crate::library::Library;
use crate::object::{Layer, ObjectRef};
use crate::process::Core;
use crate::status::KilnResult;
use crate::value::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Build a type's layer of a freshly allocated object
pub type ConstructFn = Arc<dyn Fn(ObjectRef, &[Value]) -> KilnResult<Layer> + Send + Sync>;

/// Report the references held by a type's layer
pub type VisitFn = Arc<dyn Fn(&(dyn Any + Send), &mut Marker<'_>) + Send + Sync>;

/// Release a type's layer of an object being reclaimed
pub type FinalizeFn = Arc<dyn Fn(ObjectRef, &mut (dyn Any + Send)) + Send + Sync>;

/// Populate the type's own dispatch slots
pub type DispatchInitializeFn = Arc<dyn Fn(&mut Dispatch) -> KilnResult<()> + Send + Sync>;

/// Release resources held by the type's dispatch
pub type DispatchUninitializeFn = Arc<dyn Fn(&mut Dispatch) + Send + Sync>;

/// Run once after a type is registered
pub type PostCreateTypeFn = Arc<dyn Fn(TypeRef, &Core) -> KilnResult<()> + Send + Sync>;

/// Run before a type is destroyed
pub type PreDestroyTypeFn = Arc<dyn Fn(TypeRef, &Core) + Send + Sync>;

/// Run after a type is destroyed, with its name
pub type TypeDestroyedFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything supplied when creating a type
#[derive(Clone, Default)]
pub struct TypeDescriptor {
    /// Instance size in bytes, header included (`None` inherits the parent's)
    pub instance_size: Option<usize>,
    /// Dispatch slot count (`None` inherits the parent's)
    pub dispatch_size: Option<usize>,
    /// Layer constructor
    pub construct: Option<ConstructFn>,
    /// Reference visitor
    pub visit: Option<VisitFn>,
    /// Layer finalizer
    pub finalize: Option<FinalizeFn>,
    /// Dispatch initializer
    pub dispatch_initialize: Option<DispatchInitializeFn>,
    /// Dispatch uninitializer
    pub dispatch_uninitialize: Option<DispatchUninitializeFn>,
    /// Post-creation hook
    pub post_create_type: Option<PostCreateTypeFn>,
    /// Pre-destruction hook
    pub pre_destroy_type: Option<PreDestroyTypeFn>,
    /// Notification after destruction
    pub type_destroyed: Option<TypeDestroyedFn>,
    /// Library the type's code lives in; kept loaded while the type exists
    pub library: Option<Library>,
}

impl TypeDescriptor {
    /// Create an empty descriptor
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the instance size
    pub fn with_instance_size(mut self, size: usize) -> Self {
        self.instance_size = Some(size);
        self
    }

    /// Set the dispatch slot count
    pub fn with_dispatch_size(mut self, size: usize) -> Self {
        self.dispatch_size = Some(size);
        self
    }

    /// Set the layer constructor
    pub fn with_construct<F>(mut self, f: F) -> Self
    where
        F: Fn(ObjectRef, &[Value]) -> KilnResult<Layer> + Send + Sync + 'static,
    {
        self.construct = Some(Arc::new(f));
        self
    }

    /// Set the reference visitor
    pub fn with_visit<F>(mut self, f: F) -> Self
    where
        F: Fn(&(dyn Any + Send), &mut Marker<'_>) + Send + Sync + 'static,
    {
        self.visit = Some(Arc::new(f));
        self
    }

    /// Set the layer finalizer
    pub fn with_finalize<F>(mut self, f: F) -> Self
    where
        F: Fn(ObjectRef, &mut (dyn Any + Send)) + Send + Sync + 'static,
    {
        self.finalize = Some(Arc::new(f));
        self
    }

    /// Set the dispatch initializer
    pub fn with_dispatch_initialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Dispatch) -> KilnResult<()> + Send + Sync + 'static,
    {
        self.dispatch_initialize = Some(Arc::new(f));
        self
    }

    /// Set the dispatch uninitializer
    pub fn with_dispatch_uninitialize<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Dispatch) + Send + Sync + 'static,
    {
        self.dispatch_uninitialize = Some(Arc::new(f));
        self
    }

    /// Set the post-creation hook
    pub fn with_post_create_type<F>(mut self, f: F) -> Self
    where
        F: Fn(TypeRef, &Core) -> KilnResult<()> + Send + Sync + 'static,
    {
        self.post_create_type = Some(Arc::new(f));
        self
    }

    /// Set the pre-destruction hook
    pub fn with_pre_destroy_type<F>(mut self, f: F) -> Self
    where
        F: Fn(TypeRef, &Core) + Send + Sync + 'static,
    {
        self.pre_destroy_type = Some(Arc::new(f));
        self
    }

    /// Set the destruction notification
    pub fn with_type_destroyed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.type_destroyed = Some(Arc::new(f));
        self
    }

    /// Keep `library` loaded while the type exists
    pub fn with_library(mut self, library: Library) -> Self {
        self.library = Some(library);
        self
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("instance_size", &self.instance_size)
            .field("dispatch_size", &self.dispatch_size)
            .field("has_construct", &self.construct.is_some())
            .field("has_visit", &self.visit.is_some())
            .field("has_finalize", &self.finalize.is_some())
            .field("library", &self.library)
            .finish()
    }
}
