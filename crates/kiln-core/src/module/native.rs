//! Native modules
//!
//! A native module is a dynamic library exporting three C entry points:
//!
//! - `kiln_module_get_name() -> *const c_char`: NUL-terminated module name
//! - `kiln_module_load(vm: *mut c_void) -> u32`: status code, 0 on success
//! - `kiln_module_unload(vm: *mut c_void)`
//!
//! The `vm` argument is a pointer to the loading [`Vm`]; the library must be
//! built against the same version of this crate to use it.

use super::Module;
use crate::defaults::{MODULE_GET_NAME_SYMBOL, MODULE_LOAD_SYMBOL, MODULE_UNLOAD_SYMBOL};
use crate::library::Library;
use crate::status::{KilnResult, Status};
use crate::vm::Vm;
use std::ffi::{c_char, c_void, CStr};

/// `kiln_module_get_name` entry point
pub type ModuleGetNameFn = unsafe extern "C" fn() -> *const c_char;

/// `kiln_module_load` entry point
pub type ModuleLoadFn = unsafe extern "C" fn(vm: *mut c_void) -> u32;

/// `kiln_module_unload` entry point
pub type ModuleUnloadFn = unsafe extern "C" fn(vm: *mut c_void);

/// A module implemented by a native library
pub struct NativeModule {
    name: String,
    load: ModuleLoadFn,
    unload: ModuleUnloadFn,
    // Keeps the entry points mapped
    library: Library,
}

impl NativeModule {
    /// Resolve the module entry points of `library`
    ///
    /// Fails with `NotExists` if any entry point is missing and with
    /// `InvalidEncoding` if the name is null or not UTF-8.
    pub fn probe(library: Library) -> KilnResult<Self> {
        // SAFETY: the symbol types match the documented module entry points.
        let (get_name, load, unload) = unsafe {
            (
                library.function::<ModuleGetNameFn>(MODULE_GET_NAME_SYMBOL)?,
                library.function::<ModuleLoadFn>(MODULE_LOAD_SYMBOL)?,
                library.function::<ModuleUnloadFn>(MODULE_UNLOAD_SYMBOL)?,
            )
        };

        let name_ptr = unsafe { get_name() };
        if name_ptr.is_null() {
            return Err(Status::InvalidEncoding);
        }
        let name = unsafe { CStr::from_ptr(name_ptr) }
            .to_str()
            .map_err(|_| Status::InvalidEncoding)?
            .to_string();

        Ok(Self {
            name,
            load,
            unload,
            library,
        })
    }

    /// Library the module was loaded from
    pub fn library(&self) -> &Library {
        &self.library
    }
}

impl Module for NativeModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn load(&mut self, vm: &mut Vm) -> KilnResult<()> {
        let code = unsafe { (self.load)(vm as *mut Vm as *mut c_void) };
        Status::from_code(code)
            .unwrap_or(Status::UnreachableCodeReached)
            .into_result()
    }

    fn unload(&mut self, vm: &mut Vm) {
        unsafe { (self.unload)(vm as *mut Vm as *mut c_void) }
    }
}

impl std::fmt::Debug for NativeModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeModule")
            .field("name", &self.name)
            .field("library", &self.library)
            .finish()
    }
}
