//! Kiln Core Runtime
//!
//! This crate provides the managed-object runtime substrate:
//! - Tri-color mark/sweep garbage collector with externally contributed roots
//! - Dynamic type registry with inheritance-aware dispatch tables
//! - Object model (typed layers, tagged values, virtual dispatch calls)
//! - Tiered process state (process registry, tier-1 [`Core`], tier-2 [`Vm`])
//! - Locks (pinning), weak references, operand stack, global environment
//! - Modules, including native modules loaded from dynamic libraries

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod defaults;
pub mod environment;
pub mod gc;
pub mod library;
pub mod locks;
pub mod module;
pub mod object;
pub mod process;
pub mod registry;
pub mod stack;
pub mod status;
pub mod types;
pub mod value;
pub mod vm;
pub mod weak;

pub use environment::GlobalEnvironment;
pub use gc::{Gc, GcRunStats, GcStats, HookHandle, Marker, RootSet, Rooted};
pub use library::{Library, LibraryPort, LoadError, NativeLibraryPort, RawLibrary};
pub use locks::Locks;
pub use module::{Module, Modules, NativeModule};
pub use object::{Color, Layer, ObjectHeader, ObjectRef, OBJECT_HEADER_SIZE};
pub use process::{Core, CoreOptions, NamedStorage};
pub use registry::{ProcessHandle, ProcessRegistry, RegistryStore, Singleton};
pub use stack::Stack;
pub use status::{JumpStack, JumpTarget, KilnResult, Status};
pub use types::{Dispatch, MethodContext, TypeDescriptor, TypeKind, TypeRef, Types};
pub use value::{NativeFunction, Value};
pub use vm::{ComponentEvent, ResourceLimits, Vm, VmHandle, VmOptions};
pub use weak::WeakReferences;
