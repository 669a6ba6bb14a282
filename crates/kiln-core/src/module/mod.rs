//! Modules
//!
//! A module is a unit of code that extends the VM when loaded (typically by
//! registering types and globals) and cleans up when unloaded. Modules are
//! either implemented in Rust against the [`Module`] trait or discovered as
//! native libraries exporting the module entry points (see [`NativeModule`]).
//! Loaded modules are unloaded in reverse load order when the VM shuts down.

mod native;

pub use native::{ModuleGetNameFn, ModuleLoadFn, ModuleUnloadFn, NativeModule};

use crate::status::{KilnResult, Status};
use crate::vm::Vm;
use std::path::Path;

/// A loadable VM extension
pub trait Module: Send {
    /// Unique module name
    fn name(&self) -> &str;

    /// Extend the VM
    fn load(&mut self, vm: &mut Vm) -> KilnResult<()>;

    /// Undo what [`load`](Module::load) did
    fn unload(&mut self, vm: &mut Vm);
}

/// Loaded modules, in load order
#[derive(Default)]
pub struct Modules {
    loaded: Vec<Box<dyn Module>>,
}

impl Modules {
    /// Create an empty module list
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a module named `name` is loaded
    pub fn contains(&self, name: &str) -> bool {
        self.loaded.iter().any(|module| module.name() == name)
    }

    /// Names of loaded modules, in load order
    pub fn names(&self) -> Vec<String> {
        self.loaded
            .iter()
            .map(|module| module.name().to_string())
            .collect()
    }

    /// Number of loaded modules
    pub fn len(&self) -> usize {
        self.loaded.len()
    }

    /// Check whether no module is loaded
    pub fn is_empty(&self) -> bool {
        self.loaded.is_empty()
    }

    pub(crate) fn push(&mut self, module: Box<dyn Module>) {
        self.loaded.push(module);
    }

    /// Take every loaded module, last loaded first
    pub(crate) fn drain_reverse(&mut self) -> Vec<Box<dyn Module>> {
        let mut modules = std::mem::take(&mut self.loaded);
        modules.reverse();
        modules
    }
}

/// Call `f` with the path of every dynamic library in `dir`
///
/// Only regular files with the platform's library extension are reported.
/// Fails with `NotExists` if `dir` cannot be read.
pub fn for_each_library<F>(dir: &Path, mut f: F) -> KilnResult<()>
where
    F: FnMut(&Path) -> KilnResult<()>,
{
    let entries = std::fs::read_dir(dir).map_err(|error| {
        tracing::debug!(dir = %dir.display(), %error, "cannot read module directory");
        Status::NotExists
    })?;

    let mut paths: Vec<_> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext == std::env::consts::DLL_EXTENSION)
        })
        .collect();
    paths.sort();

    for path in paths {
        f(&path)?;
    }
    Ok(())
}
