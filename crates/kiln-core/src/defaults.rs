//! Default constants for runtime configuration.

/// Default capacity of the operand stack, in values.
pub const DEFAULT_STACK_CAPACITY: usize = 64 * 1024;

/// Registry key of the tier-1 process state.
pub const CORE_REGISTRY_KEY: &[u8] = b"kiln.core";

/// Registry key of the tier-2 virtual machine state.
pub const VM_REGISTRY_KEY: &[u8] = b"kiln.vm";

/// Name of the root object type.
pub const OBJECT_TYPE_NAME: &str = "Kiln.Object";

/// Name of the weak reference type.
pub const WEAK_REFERENCE_TYPE_NAME: &str = "Kiln.WeakReference";

/// Exported symbol returning a native module's name.
pub const MODULE_GET_NAME_SYMBOL: &str = "kiln_module_get_name";

/// Exported symbol loading a native module.
pub const MODULE_LOAD_SYMBOL: &str = "kiln_module_load";

/// Exported symbol unloading a native module.
pub const MODULE_UNLOAD_SYMBOL: &str = "kiln_module_unload";
