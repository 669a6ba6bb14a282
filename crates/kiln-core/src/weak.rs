//! Weak references
//!
//! A weak reference is a managed object of type `Kiln.WeakReference` that
//! observes another object without keeping it alive. When the target is
//! reclaimed, every weak reference to it is cleared and then reads `Void`.
//! Weak references themselves are ordinary objects and are collected like
//! any other.

use crate::defaults::WEAK_REFERENCE_TYPE_NAME;
use crate::gc::{Gc, HookHandle};
use crate::object::{Layer, ObjectRef};
use crate::status::{KilnResult, Status};
use crate::types::{TypeDescriptor, TypeRef, Types};
use crate::value::Value;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;

type WeakCell = Arc<Mutex<Option<ObjectRef>>>;

struct WeakEntry {
    handle: ObjectRef,
    cell: WeakCell,
}

/// Weak references by target
#[derive(Default)]
struct WeakTable {
    targets: FxHashMap<ObjectRef, Vec<WeakEntry>>,
}

impl WeakTable {
    fn insert(&mut self, target: ObjectRef, handle: ObjectRef, cell: WeakCell) {
        self.targets
            .entry(target)
            .or_default()
            .push(WeakEntry { handle, cell });
    }

    fn remove_handle(&mut self, target: ObjectRef, handle: ObjectRef) {
        if let Some(entries) = self.targets.get_mut(&target) {
            entries.retain(|entry| entry.handle != handle);
            if entries.is_empty() {
                self.targets.remove(&target);
            }
        }
    }

    fn clear_target(&mut self, target: ObjectRef) -> usize {
        let entries = self.targets.remove(&target).unwrap_or_default();
        for entry in &entries {
            *entry.cell.lock() = None;
        }
        entries.len()
    }

    fn len(&self) -> usize {
        self.targets.values().map(Vec::len).sum()
    }
}

/// Layer of a weak reference object
struct WeakReferenceLayer {
    cell: WeakCell,
}

/// Weak reference subsystem
pub struct WeakReferences {
    table: Arc<Mutex<WeakTable>>,
    ty: TypeRef,
    finalize_hook: HookHandle,
}

impl WeakReferences {
    /// Register the weak reference type and the target finalize hook
    pub fn startup(types: &mut Types, gc: &mut Gc) -> KilnResult<Self> {
        let table: Arc<Mutex<WeakTable>> = Arc::default();

        let construct_table = table.clone();
        let finalize_table = table.clone();
        let ty = types.create_object_type(
            WEAK_REFERENCE_TYPE_NAME,
            types.object_type()?,
            TypeDescriptor::new()
                .with_construct(move |handle, args| {
                    let target = match args {
                        [Value::Object(target)] => Some(*target),
                        [Value::Void] => None,
                        [_] => return Err(Status::ArgumentTypeInvalid),
                        _ => return Err(Status::NumberOfArgumentsInvalid),
                    };
                    let cell: WeakCell = Arc::new(Mutex::new(target));
                    if let Some(target) = target {
                        construct_table.lock().insert(target, handle, cell.clone());
                    }
                    Ok(Box::new(WeakReferenceLayer { cell }) as Layer)
                })
                .with_finalize(move |handle, layer| {
                    let Some(layer) = layer.downcast_mut::<WeakReferenceLayer>() else {
                        return;
                    };
                    let target = layer.cell.lock().take();
                    if let Some(target) = target {
                        finalize_table.lock().remove_handle(target, handle);
                    }
                }),
        )?;

        let hook_table = table.clone();
        let finalize_hook = gc.add_finalize_hook(move |object| {
            let cleared = hook_table.lock().clear_target(object);
            if cleared > 0 {
                tracing::trace!(?object, cleared, "weak references cleared");
            }
        });

        Ok(Self {
            table,
            ty,
            finalize_hook,
        })
    }

    /// The `Kiln.WeakReference` type
    pub fn weak_reference_type(&self) -> TypeRef {
        self.ty
    }

    /// Create a weak reference to `target` (an object, or `Void` for an empty reference)
    ///
    /// Fails with `ArgumentValueInvalid` if `target` is not a live object.
    pub fn create(&self, types: &Types, gc: &mut Gc, target: Value) -> KilnResult<ObjectRef> {
        match target {
            Value::Object(object) if !gc.contains(object) => return Err(Status::ArgumentValueInvalid),
            Value::Object(_) | Value::Void => {}
            _ => return Err(Status::ArgumentTypeInvalid),
        }
        gc.allocate(types, self.ty, &[target])
    }

    /// Current target of a weak reference, or `Void` once the target is gone
    pub fn get(&self, gc: &Gc, handle: ObjectRef) -> KilnResult<Value> {
        let layer = gc.layer::<WeakReferenceLayer>(handle, self.ty)?;
        let target = *layer.cell.lock();
        Ok(target.map(Value::Object).unwrap_or(Value::Void))
    }

    /// Number of live weak references with a live target
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Check whether no weak reference has a live target
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove the finalize hook
    pub fn shutdown(self, gc: &mut Gc) -> KilnResult<()> {
        let remaining = self.len();
        if remaining > 0 {
            tracing::debug!(remaining, "weak references outstanding at shutdown");
        }
        gc.remove_finalize_hook(&self.finalize_hook)
    }
}
