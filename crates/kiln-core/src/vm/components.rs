//! VM components and their startup order
//!
//! Components start in table order and shut down in reverse. If a component
//! fails to start, exactly the components already started are shut down
//! again, in reverse, before the error is returned.

use super::options::{ComponentEvent, VmOptions};
use crate::environment::GlobalEnvironment;
use crate::gc::{Gc, HookHandle, Rooted};
use crate::locks::Locks;
use crate::module::Modules;
use crate::process::Core;
use crate::stack::Stack;
use crate::status::{KilnResult, Status};
use crate::types::Types;
use crate::weak::WeakReferences;
use std::sync::Arc;

pub(super) struct LocksComponent {
    pub(super) locks: Rooted<Locks>,
    finalize_hook: HookHandle,
}

/// Component state, filled in as components start
#[derive(Default)]
pub(super) struct VmParts {
    pub(super) types: Option<Types>,
    pub(super) gc: Option<Gc>,
    pub(super) locks: Option<LocksComponent>,
    pub(super) weak: Option<WeakReferences>,
    pub(super) stack: Option<Rooted<Stack>>,
    pub(super) environment: Option<Rooted<GlobalEnvironment>>,
    pub(super) modules: Option<Modules>,
}

fn not_started() -> Status {
    Status::OperationInvalid
}

impl VmParts {
    pub(super) fn types(&self) -> KilnResult<&Types> {
        self.types.as_ref().ok_or_else(not_started)
    }

    pub(super) fn types_mut(&mut self) -> KilnResult<&mut Types> {
        self.types.as_mut().ok_or_else(not_started)
    }

    pub(super) fn gc(&self) -> KilnResult<&Gc> {
        self.gc.as_ref().ok_or_else(not_started)
    }

    pub(super) fn types_and_gc(&mut self) -> KilnResult<(&Types, &mut Gc)> {
        match (self.types.as_ref(), self.gc.as_mut()) {
            (Some(types), Some(gc)) => Ok((types, gc)),
            _ => Err(not_started()),
        }
    }

    pub(super) fn locks(&self) -> KilnResult<&Rooted<Locks>> {
        self.locks
            .as_ref()
            .map(|component| &component.locks)
            .ok_or_else(not_started)
    }

    pub(super) fn weak(&self) -> KilnResult<&WeakReferences> {
        self.weak.as_ref().ok_or_else(not_started)
    }

    pub(super) fn stack(&self) -> KilnResult<&Rooted<Stack>> {
        self.stack.as_ref().ok_or_else(not_started)
    }

    pub(super) fn environment(&self) -> KilnResult<&Rooted<GlobalEnvironment>> {
        self.environment.as_ref().ok_or_else(not_started)
    }

    pub(super) fn modules(&self) -> KilnResult<&Modules> {
        self.modules.as_ref().ok_or_else(not_started)
    }

    pub(super) fn modules_mut(&mut self) -> KilnResult<&mut Modules> {
        self.modules.as_mut().ok_or_else(not_started)
    }
}

type StartupFn = fn(&mut VmParts, &Arc<Core>, &VmOptions) -> KilnResult<()>;
type ShutdownFn = fn(&mut VmParts);

pub(super) struct Component {
    pub(super) name: &'static str,
    startup: StartupFn,
    shutdown: ShutdownFn,
}

pub(super) const COMPONENTS: &[Component] = &[
    Component {
        name: "types",
        startup: types_startup,
        shutdown: types_shutdown,
    },
    Component {
        name: "gc",
        startup: gc_startup,
        shutdown: gc_shutdown,
    },
    Component {
        name: "locks",
        startup: locks_startup,
        shutdown: locks_shutdown,
    },
    Component {
        name: "weak_references",
        startup: weak_startup,
        shutdown: weak_shutdown,
    },
    Component {
        name: "stack",
        startup: stack_startup,
        shutdown: stack_shutdown,
    },
    Component {
        name: "global_environment",
        startup: environment_startup,
        shutdown: environment_shutdown,
    },
    Component {
        name: "modules",
        startup: modules_startup,
        shutdown: modules_shutdown,
    },
];

/// Start every component in order
pub(super) fn start(core: &Arc<Core>, options: &VmOptions) -> KilnResult<VmParts> {
    let mut parts = VmParts::default();
    for (started, component) in COMPONENTS.iter().enumerate() {
        if let Err(status) = (component.startup)(&mut parts, core, options) {
            tracing::error!(component = component.name, %status, "component startup failed");
            stop(&mut parts, started, options);
            return Err(status);
        }
        tracing::debug!(component = component.name, "component started");
        options.notify(ComponentEvent::Started(component.name));
    }
    Ok(parts)
}

/// Shut down the first `started` components in reverse order
pub(super) fn stop(parts: &mut VmParts, started: usize, options: &VmOptions) {
    for component in COMPONENTS[..started].iter().rev() {
        (component.shutdown)(parts);
        tracing::debug!(component = component.name, "component stopped");
        options.notify(ComponentEvent::Stopped(component.name));
    }
}

fn types_startup(parts: &mut VmParts, core: &Arc<Core>, _: &VmOptions) -> KilnResult<()> {
    parts.types = Some(Types::startup(core.clone())?);
    Ok(())
}

fn types_shutdown(parts: &mut VmParts) {
    if let Some(mut types) = parts.types.take() {
        types.uninitialize();
    }
}

fn gc_startup(parts: &mut VmParts, _: &Arc<Core>, options: &VmOptions) -> KilnResult<()> {
    parts.gc = Some(match options.limits.max_objects {
        Some(max) => Gc::with_max_objects(max),
        None => Gc::new(),
    });
    Ok(())
}

fn gc_shutdown(parts: &mut VmParts) {
    let Some(mut gc) = parts.gc.take() else {
        return;
    };
    // Every root source is gone by now, so this reclaims everything
    if let Some(types) = parts.types.as_ref() {
        gc.run(types);
    }
    if !gc.is_empty() {
        tracing::warn!(objects = gc.len(), "objects left unfinalized at shutdown");
    }
    let (pre_mark, finalize) = gc.hook_counts();
    if pre_mark + finalize > 0 {
        tracing::warn!(pre_mark, finalize, "collector hooks left registered at shutdown");
    }
}

fn locks_startup(parts: &mut VmParts, _: &Arc<Core>, _: &VmOptions) -> KilnResult<()> {
    let gc = parts.gc.as_mut().ok_or_else(not_started)?;
    let locks = Rooted::install(gc, Locks::new());

    let table = locks.shared();
    let finalize_hook = gc.add_finalize_hook(move |object| {
        // Only unlocked objects can be reclaimed; drop their stale entries
        if let Some(count) = table.lock().forget(object) {
            if count > 0 {
                tracing::warn!(?object, count, "locked object reclaimed");
            }
        }
    });

    parts.locks = Some(LocksComponent {
        locks,
        finalize_hook,
    });
    Ok(())
}

fn locks_shutdown(parts: &mut VmParts) {
    let Some(component) = parts.locks.take() else {
        return;
    };
    let outstanding: Vec<_> = component.locks.lock().pinned().collect();
    if !outstanding.is_empty() {
        tracing::warn!(count = outstanding.len(), objects = ?outstanding, "objects still locked at shutdown");
    }
    if let Some(gc) = parts.gc.as_mut() {
        if let Err(status) = gc.remove_finalize_hook(&component.finalize_hook) {
            tracing::error!(%status, "failed to remove lock finalize hook");
        }
        if let Err(status) = component.locks.uninstall(gc) {
            tracing::error!(%status, "failed to uninstall lock roots");
        }
    }
}

fn weak_startup(parts: &mut VmParts, _: &Arc<Core>, _: &VmOptions) -> KilnResult<()> {
    let (Some(types), Some(gc)) = (parts.types.as_mut(), parts.gc.as_mut()) else {
        return Err(not_started());
    };
    parts.weak = Some(WeakReferences::startup(types, gc)?);
    Ok(())
}

fn weak_shutdown(parts: &mut VmParts) {
    if let (Some(weak), Some(gc)) = (parts.weak.take(), parts.gc.as_mut()) {
        if let Err(status) = weak.shutdown(gc) {
            tracing::error!(%status, "weak reference shutdown failed");
        }
    }
}

fn stack_startup(parts: &mut VmParts, _: &Arc<Core>, options: &VmOptions) -> KilnResult<()> {
    if options.stack_capacity == 0 {
        return Err(Status::ArgumentValueInvalid);
    }
    let gc = parts.gc.as_mut().ok_or_else(not_started)?;
    parts.stack = Some(Rooted::install(gc, Stack::with_capacity(options.stack_capacity)));
    Ok(())
}

fn stack_shutdown(parts: &mut VmParts) {
    let Some(stack) = parts.stack.take() else {
        return;
    };
    let remaining = stack.lock().len();
    if remaining > 0 {
        tracing::warn!(remaining, "operand stack not empty at shutdown");
    }
    if let Some(gc) = parts.gc.as_mut() {
        if let Err(status) = stack.uninstall(gc) {
            tracing::error!(%status, "failed to uninstall stack roots");
        }
    }
}

fn environment_startup(parts: &mut VmParts, _: &Arc<Core>, _: &VmOptions) -> KilnResult<()> {
    let gc = parts.gc.as_mut().ok_or_else(not_started)?;
    parts.environment = Some(Rooted::install(gc, GlobalEnvironment::new()));
    Ok(())
}

fn environment_shutdown(parts: &mut VmParts) {
    let Some(environment) = parts.environment.take() else {
        return;
    };
    tracing::debug!(bindings = environment.lock().len(), "dropping global environment");
    if let Some(gc) = parts.gc.as_mut() {
        if let Err(status) = environment.uninstall(gc) {
            tracing::error!(%status, "failed to uninstall global environment roots");
        }
    }
}

fn modules_startup(parts: &mut VmParts, _: &Arc<Core>, _: &VmOptions) -> KilnResult<()> {
    parts.modules = Some(Modules::new());
    Ok(())
}

fn modules_shutdown(parts: &mut VmParts) {
    // Loaded modules are unloaded by the VM before its components stop
    if let Some(modules) = parts.modules.take() {
        if !modules.is_empty() {
            tracing::warn!(modules = ?modules.names(), "modules dropped without unloading");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_components_release_their_hooks() {
        let core = Arc::new(Core::default());
        let options = VmOptions::default();
        let mut parts = start(&core, &options).unwrap();
        let gc = parts.gc().unwrap();
        assert_eq!(gc.hook_counts(), (3, 2));

        // Everything above the collector, in reverse
        for component in COMPONENTS[2..].iter().rev() {
            (component.shutdown)(&mut parts);
        }
        assert_eq!(parts.gc().unwrap().hook_counts(), (0, 0));

        stop(&mut parts, 2, &options);
        assert!(parts.gc.is_none());
        assert!(parts.types.is_none());
    }
}
