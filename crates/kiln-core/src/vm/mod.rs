//! Tier-2 virtual machine state
//!
//! A [`Vm`] composes the runtime components (type registry, collector,
//! locks, weak references, operand stack, global environment and modules)
//! on top of the tier-1 [`Core`]. Components start in a fixed order and shut
//! down in reverse; loaded modules are unloaded, last first, before any
//! component stops.
//!
//! The methods on [`Vm`] form the deep API: on failure they also record the
//! status in the core's status cell for the innermost recovery frame (see
//! [`Core::protect`]).

mod components;
mod options;

pub use options::{ComponentEvent, LifecycleObserver, ResourceLimits, VmOptions};

use crate::defaults::VM_REGISTRY_KEY;
use crate::environment::GlobalEnvironment;
use crate::gc::{Gc, GcRunStats, Rooted};
use crate::module::{for_each_library, Module, NativeModule};
use crate::object::ObjectRef;
use crate::process::Core;
use crate::registry::{lifecycle_lock, ProcessRegistry, Singleton};
use crate::stack::Stack;
use crate::status::{KilnResult, Status};
use crate::types::{slots, MethodContext, TypeDescriptor, TypeRef, Types};
use crate::value::Value;
use components::{VmParts, COMPONENTS};
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;
use std::sync::Arc;

/// Shared handle to the process-wide VM
pub type VmHandle = Arc<Mutex<Vm>>;

/// Tier-2 virtual machine state
pub struct Vm {
    core: Arc<Core>,
    options: VmOptions,
    parts: VmParts,
    running: bool,
}

impl Vm {
    /// Start a standalone VM on `core` (not published in the registry)
    pub fn startup(core: Arc<Core>, options: VmOptions) -> KilnResult<Vm> {
        let parts = components::start(&core, &options)?;
        tracing::info!(components = COMPONENTS.len(), "vm started");
        Ok(Vm {
            core,
            options,
            parts,
            running: true,
        })
    }

    fn slot(registry: &ProcessRegistry) -> KilnResult<Arc<Singleton<Mutex<Vm>>>> {
        registry.get_or_insert_with(VM_REGISTRY_KEY, Singleton::new)
    }

    /// Acquire the process-wide VM with default options
    pub fn acquire() -> KilnResult<VmHandle> {
        Self::acquire_with(VmOptions::default())
    }

    /// Acquire the process-wide VM
    ///
    /// `options` only take effect if this call starts the VM. Each
    /// successful acquire holds one reference to the process-wide [`Core`].
    pub fn acquire_with(options: VmOptions) -> KilnResult<VmHandle> {
        let _guard = lifecycle_lock();

        let core = Core::acquire()?;
        let acquired = ProcessRegistry::acquire().and_then(|registry| {
            let acquired = Self::slot(&registry)
                .and_then(|slot| slot.acquire(|| Vm::startup(core, options).map(Mutex::new)));
            ProcessRegistry::relinquish()?;
            acquired
        });

        if acquired.is_err() {
            Core::relinquish()?;
        }
        acquired
    }

    /// Relinquish one reference to the process-wide VM
    ///
    /// The VM shuts down when the count reaches zero. Fails with
    /// `OperationInvalid` if it is not acquired.
    pub fn relinquish() -> KilnResult<()> {
        let _guard = lifecycle_lock();

        let registry = ProcessRegistry::acquire()?;
        let released = Self::slot(&registry).and_then(|slot| slot.relinquish(|vm| vm.lock().teardown()));
        ProcessRegistry::relinquish()?;

        released?;
        Core::relinquish()
    }

    /// Shut the VM down
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;

        let modules = self
            .parts
            .modules
            .as_mut()
            .map(|modules| modules.drain_reverse())
            .unwrap_or_default();
        for mut module in modules {
            tracing::debug!(module = module.name(), "unloading module");
            module.unload(self);
        }

        components::stop(&mut self.parts, COMPONENTS.len(), &self.options);
        tracing::info!("vm stopped");
    }

    /// Record a failure with the core and pass the result through
    fn deep<T>(&self, result: KilnResult<T>) -> KilnResult<T> {
        result.map_err(|status| self.core.jump(status))
    }

    /// Tier-1 state this VM runs on
    pub fn core(&self) -> &Arc<Core> {
        &self.core
    }

    /// Options the VM was started with
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// Check whether the VM is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Type registry
    pub fn types(&self) -> KilnResult<&Types> {
        self.parts.types()
    }

    /// Type registry, mutably
    pub fn types_mut(&mut self) -> KilnResult<&mut Types> {
        self.parts.types_mut()
    }

    /// Collector and heap
    pub fn gc(&self) -> KilnResult<&Gc> {
        self.parts.gc()
    }

    /// Registry and heap together, as methods see them
    pub fn method_context(&mut self) -> KilnResult<MethodContext<'_>> {
        let (types, gc) = self.parts.types_and_gc()?;
        Ok(MethodContext::new(types, gc))
    }

    /// Look up a type by name; fails with `NotExists`
    pub fn get_type(&self, name: &str) -> KilnResult<TypeRef> {
        let result = self
            .parts
            .types()
            .and_then(|types| types.get(name).ok_or(Status::NotExists));
        self.deep(result)
    }

    /// Type of a value
    pub fn type_of(&self, value: &Value) -> KilnResult<TypeRef> {
        let result = self
            .parts
            .types()
            .and_then(|types| types.type_of_value(self.parts.gc()?, value));
        self.deep(result)
    }

    /// Register an object type deriving from `parent`
    pub fn create_object_type(
        &mut self,
        name: &str,
        parent: TypeRef,
        descriptor: TypeDescriptor,
    ) -> KilnResult<TypeRef> {
        let result = self
            .parts
            .types_mut()
            .and_then(|types| types.create_object_type(name, parent, descriptor));
        self.deep(result)
    }

    /// Register a primitive type
    pub fn create_primitive_type(&mut self, name: &str, descriptor: TypeDescriptor) -> KilnResult<TypeRef> {
        let result = self
            .parts
            .types_mut()
            .and_then(|types| types.create_primitive_type(name, descriptor));
        self.deep(result)
    }

    /// Allocate an object of `ty`
    ///
    /// Weak references go through the same target checks as
    /// [`Vm::create_weak_reference`].
    pub fn allocate(&mut self, ty: TypeRef, args: &[Value]) -> KilnResult<ObjectRef> {
        let VmParts { types, gc, weak, .. } = &mut self.parts;
        let result = match (types.as_ref(), gc.as_mut(), weak.as_ref()) {
            (Some(types), Some(gc), Some(weak)) if ty == weak.weak_reference_type() => match args {
                [target] => weak.create(types, gc, *target),
                _ => Err(Status::NumberOfArgumentsInvalid),
            },
            (Some(types), Some(gc), _) => gc.allocate(types, ty, args),
            _ => Err(Status::OperationInvalid),
        };
        self.deep(result)
    }

    /// Borrow the layer `ty` contributes to `object`
    pub fn layer<T: std::any::Any>(&self, object: ObjectRef, ty: TypeRef) -> KilnResult<&T> {
        let result = self.parts.gc().and_then(|gc| gc.layer::<T>(object, ty));
        self.deep(result)
    }

    /// Mutably borrow the layer `ty` contributes to `object`
    pub fn layer_mut<T: std::any::Any>(&mut self, object: ObjectRef, ty: TypeRef) -> KilnResult<&mut T> {
        let core = self.core.clone();
        self.parts
            .gc
            .as_mut()
            .ok_or(Status::OperationInvalid)
            .and_then(|gc| gc.layer_mut::<T>(object, ty))
            .map_err(|status| core.jump(status))
    }

    /// Run a full collection
    pub fn run_gc(&mut self) -> KilnResult<GcRunStats> {
        let result = self.parts.types_and_gc().map(|(types, gc)| gc.run(types));
        self.deep(result)
    }

    /// Lock (pin) a live object; returns the new lock count
    ///
    /// Fails with `NotExists` if the object is not live and `Overflow` if its
    /// count is at its maximum.
    pub fn lock(&mut self, object: ObjectRef) -> KilnResult<u32> {
        let result = self.parts.gc().and_then(|gc| {
            if !gc.contains(object) {
                return Err(Status::NotExists);
            }
            self.parts.locks()?.lock().lock(object)
        });
        self.deep(result)
    }

    /// Unlock an object; returns the new lock count
    ///
    /// Fails with `NotExists` if the object was never locked and `Underflow`
    /// if its count is already zero.
    pub fn unlock(&mut self, object: ObjectRef) -> KilnResult<u32> {
        let result = self
            .parts
            .locks()
            .and_then(|locks| locks.lock().unlock(object));
        self.deep(result)
    }

    /// Current lock count of an object
    pub fn lock_count(&self, object: ObjectRef) -> KilnResult<u32> {
        let result = self.parts.locks().map(|locks| locks.lock().count(object));
        self.deep(result)
    }

    /// Create a weak reference to `target` (an object, or `Void`)
    pub fn create_weak_reference(&mut self, target: Value) -> KilnResult<ObjectRef> {
        let VmParts { types, gc, weak, .. } = &mut self.parts;
        let result = match (types.as_ref(), gc.as_mut(), weak.as_ref()) {
            (Some(types), Some(gc), Some(weak)) => weak.create(types, gc, target),
            _ => Err(Status::OperationInvalid),
        };
        self.deep(result)
    }

    /// Target of a weak reference, or `Void` once the target is reclaimed
    pub fn weak_reference_target(&self, handle: ObjectRef) -> KilnResult<Value> {
        let result = self
            .parts
            .weak()
            .and_then(|weak| weak.get(self.parts.gc()?, handle));
        self.deep(result)
    }

    /// Lock the operand stack
    pub fn stack(&self) -> KilnResult<MutexGuard<'_, Stack>> {
        self.parts.stack().map(Rooted::lock)
    }

    /// Push a value on the operand stack
    pub fn push(&mut self, value: Value) -> KilnResult<()> {
        let result = self.parts.stack().and_then(|stack| stack.lock().push(value));
        self.deep(result)
    }

    /// Pop the top of the operand stack
    pub fn pop(&mut self) -> KilnResult<Value> {
        let result = self.parts.stack().and_then(|stack| stack.lock().pop());
        self.deep(result)
    }

    /// Top of the operand stack
    pub fn peek(&self) -> KilnResult<Value> {
        let result = self.parts.stack().and_then(|stack| stack.lock().peek());
        self.deep(result)
    }

    /// Lock the global environment
    pub fn globals(&self) -> KilnResult<MutexGuard<'_, GlobalEnvironment>> {
        self.parts.environment().map(Rooted::lock)
    }

    /// Bind a new global
    pub fn define_global(&mut self, name: &str, value: Value) -> KilnResult<()> {
        let result = self
            .parts
            .environment()
            .and_then(|env| env.lock().define(name, value));
        self.deep(result)
    }

    /// Rebind an existing global
    pub fn set_global(&mut self, name: &str, value: Value) -> KilnResult<()> {
        let result = self
            .parts
            .environment()
            .and_then(|env| env.lock().set(name, value));
        self.deep(result)
    }

    /// Value of a global
    pub fn get_global(&self, name: &str) -> KilnResult<Value> {
        let result = self.parts.environment().and_then(|env| env.lock().get(name));
        self.deep(result)
    }

    /// Unbind a global
    pub fn remove_global(&mut self, name: &str) -> KilnResult<Value> {
        let result = self.parts.environment().and_then(|env| env.lock().remove(name));
        self.deep(result)
    }

    /// Call dispatch `slot` on `receiver`
    ///
    /// Fails with `DispatchNotExists` if the receiver's type has no dispatch,
    /// `MethodNotFound` if `slot` is beyond it and `MethodNotImplemented` if
    /// the slot is empty.
    pub fn call_method(&mut self, receiver: ObjectRef, slot: usize, args: &[Value]) -> KilnResult<Value> {
        let result = self
            .parts
            .types_and_gc()
            .and_then(|(types, gc)| MethodContext::new(types, gc).call(receiver, slot, args));
        self.deep(result)
    }

    /// Hash value of an object (`getHashValue`)
    pub fn hash_value(&mut self, receiver: ObjectRef) -> KilnResult<i32> {
        let result = self.call_method(receiver, slots::GET_HASH_VALUE, &[])?;
        let hash = result.as_i32().ok_or(Status::ConversionFailed);
        self.deep(hash)
    }

    /// Equality of an object and a value (`isEqualTo`)
    pub fn is_equal_to(&mut self, receiver: ObjectRef, other: Value) -> KilnResult<bool> {
        let result = self.call_method(receiver, slots::IS_EQUAL_TO, &[other])?;
        let equal = result.as_bool().ok_or(Status::ConversionFailed);
        self.deep(equal)
    }

    /// Inequality of an object and a value (`isNotEqualTo`)
    pub fn is_not_equal_to(&mut self, receiver: ObjectRef, other: Value) -> KilnResult<bool> {
        let result = self.call_method(receiver, slots::IS_NOT_EQUAL_TO, &[other])?;
        let not_equal = result.as_bool().ok_or(Status::ConversionFailed);
        self.deep(not_equal)
    }

    /// Load `module` and keep it until shutdown
    ///
    /// Fails with `Exists` if a module with the same name is loaded.
    pub fn register_module(&mut self, module: Box<dyn Module>) -> KilnResult<()> {
        let result = self.register_module_impl(module);
        self.deep(result)
    }

    fn register_module_impl(&mut self, mut module: Box<dyn Module>) -> KilnResult<()> {
        if self.parts.modules()?.contains(module.name()) {
            return Err(Status::Exists);
        }
        module.load(self)?;
        tracing::info!(module = module.name(), "module loaded");
        self.parts.modules_mut()?.push(module);
        Ok(())
    }

    /// Names of loaded modules, in load order
    pub fn module_names(&self) -> KilnResult<Vec<String>> {
        let result = self.parts.modules().map(|modules| modules.names());
        self.deep(result)
    }

    /// Load every native module found in `dir`; returns how many loaded
    ///
    /// Libraries that cannot be loaded or do not export the module entry
    /// points are skipped, as are modules whose load fails.
    pub fn discover_modules(&mut self, dir: &Path) -> KilnResult<usize> {
        let mut paths = Vec::new();
        let listed = for_each_library(dir, |path| {
            paths.push(path.to_path_buf());
            Ok(())
        });
        self.deep(listed)?;

        let mut loaded = 0;
        for path in paths {
            let module = match self.core.load_library(&path).and_then(NativeModule::probe) {
                Ok(module) => module,
                Err(status) => {
                    tracing::debug!(path = %path.display(), %status, "not a module library");
                    continue;
                }
            };

            let name = module.name().to_string();
            match self.register_module_impl(Box::new(module)) {
                Ok(()) => loaded += 1,
                Err(status) => tracing::warn!(module = %name, %status, "module failed to load"),
            }
        }
        Ok(loaded)
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm() -> Vm {
        Vm::startup(Arc::new(Core::default()), VmOptions::default()).unwrap()
    }

    #[test]
    fn test_startup_registers_builtin_types() {
        let vm = vm();
        assert!(vm.get_type("Kiln.Object").is_ok());
        assert!(vm.get_type("Kiln.WeakReference").is_ok());
        assert_eq!(vm.get_type("Missing"), Err(Status::NotExists));
        assert_eq!(vm.core().status(), Status::NotExists);
    }

    #[test]
    fn test_type_of_values() {
        let mut vm = vm();
        let object_ty = vm.get_type("Kiln.Object").unwrap();
        let object = vm.allocate(object_ty, &[]).unwrap();

        assert_eq!(vm.type_of(&Value::Object(object)), Ok(object_ty));
        assert_eq!(
            vm.type_of(&Value::Integer32(1)),
            vm.get_type("Kiln.Integer32")
        );
        assert_eq!(vm.type_of(&Value::Void), vm.get_type("Kiln.Void"));
    }

    #[test]
    fn test_root_methods() {
        let mut vm = vm();
        let object_ty = vm.get_type("Kiln.Object").unwrap();
        let a = vm.allocate(object_ty, &[]).unwrap();
        let b = vm.allocate(object_ty, &[]).unwrap();

        assert!(vm.is_equal_to(a, Value::Object(a)).unwrap());
        assert!(!vm.is_equal_to(a, Value::Object(b)).unwrap());
        assert!(vm.is_not_equal_to(a, Value::Object(b)).unwrap());
        assert_eq!(vm.hash_value(a), vm.hash_value(a));
        assert_eq!(
            vm.call_method(a, slots::IS_EQUAL_TO, &[]),
            Err(Status::NumberOfArgumentsInvalid)
        );
    }

    #[test]
    fn test_call_method_errors() {
        let mut vm = vm();
        let object_ty = vm.get_type("Kiln.Object").unwrap();
        let sparse = vm
            .create_object_type("Test.Sparse", object_ty, TypeDescriptor::new().with_dispatch_size(5))
            .unwrap();
        let object = vm.allocate(sparse, &[]).unwrap();

        assert_eq!(vm.call_method(object, 4, &[]), Err(Status::MethodNotImplemented));
        assert_eq!(vm.call_method(object, 5, &[]), Err(Status::MethodNotFound));

        vm.run_gc().unwrap();
        assert_eq!(vm.call_method(object, 0, &[]), Err(Status::NotExists));
    }

    #[test]
    fn test_overridden_equality_drives_inequality() {
        let mut vm = vm();
        let object_ty = vm.get_type("Kiln.Object").unwrap();
        let always_equal = vm
            .create_object_type(
                "Test.AlwaysEqual",
                object_ty,
                TypeDescriptor::new().with_dispatch_initialize(|dispatch| {
                    dispatch.set(slots::IS_EQUAL_TO, |_, _, _| Ok(Value::Boolean(true)))
                }),
            )
            .unwrap();
        let object = vm.allocate(always_equal, &[]).unwrap();

        assert!(vm.is_equal_to(object, Value::Integer32(3)).unwrap());
        assert!(!vm.is_not_equal_to(object, Value::Integer32(3)).unwrap());
    }

    #[test]
    fn test_lock_requires_live_object() {
        let mut vm = vm();
        let object_ty = vm.get_type("Kiln.Object").unwrap();
        let object = vm.allocate(object_ty, &[]).unwrap();
        vm.run_gc().unwrap();

        assert_eq!(vm.lock(object), Err(Status::NotExists));
        assert_eq!(vm.unlock(object), Err(Status::NotExists));
    }

    #[test]
    fn test_globals_and_stack_are_roots() {
        let mut vm = vm();
        let object_ty = vm.get_type("Kiln.Object").unwrap();
        let global = vm.allocate(object_ty, &[]).unwrap();
        let pushed = vm.allocate(object_ty, &[]).unwrap();
        let garbage = vm.allocate(object_ty, &[]).unwrap();

        vm.define_global("g", Value::Object(global)).unwrap();
        vm.push(Value::Object(pushed)).unwrap();
        vm.run_gc().unwrap();

        let gc = vm.gc().unwrap();
        assert!(gc.contains(global));
        assert!(gc.contains(pushed));
        assert!(!gc.contains(garbage));

        vm.remove_global("g").unwrap();
        vm.pop().unwrap();
        vm.run_gc().unwrap();
        assert!(vm.gc().unwrap().is_empty());
    }

    #[test]
    fn test_stack_capacity_option() {
        let mut vm = Vm::startup(
            Arc::new(Core::default()),
            VmOptions::default().with_stack_capacity(1),
        )
        .unwrap();
        vm.push(Value::Void).unwrap();
        assert_eq!(vm.push(Value::Void), Err(Status::StackOverflow));
        assert_eq!(vm.core().status(), Status::StackOverflow);
    }

    #[test]
    fn test_object_limit_option() {
        let mut vm = Vm::startup(
            Arc::new(Core::default()),
            VmOptions::default().with_limits(ResourceLimits::with_object_limit(1)),
        )
        .unwrap();
        let object_ty = vm.get_type("Kiln.Object").unwrap();
        vm.allocate(object_ty, &[]).unwrap();
        assert_eq!(vm.allocate(object_ty, &[]), Err(Status::AllocationFailed));
    }
}
