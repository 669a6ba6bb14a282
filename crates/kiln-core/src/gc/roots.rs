//! GC root sources
//!
//! Components that hold references the collector must treat as live
//! implement [`RootSet`]. [`Rooted`] shares such a component between its
//! owner and a pre-mark hook that reports its roots on every collection.

use super::collector::{Gc, Marker};
use super::hooks::HookHandle;
use crate::status::KilnResult;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// A source of GC roots
pub trait RootSet {
    /// Report every root to `marker`
    fn visit_roots(&self, marker: &mut Marker<'_>);
}

/// A root source registered with a collector
pub struct Rooted<T> {
    inner: Arc<Mutex<T>>,
    hook: HookHandle,
}

impl<T: RootSet + Send + 'static> Rooted<T> {
    /// Share `value` and register a pre-mark hook reporting its roots
    pub fn install(gc: &mut Gc, value: T) -> Self {
        let inner = Arc::new(Mutex::new(value));
        let source = inner.clone();
        let hook = gc.add_pre_mark_hook(move |marker| source.lock().visit_roots(marker));
        Self { inner, hook }
    }

    /// Lock the root source
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }

    /// Shared handle to the root source
    pub fn shared(&self) -> Arc<Mutex<T>> {
        self.inner.clone()
    }

    /// Remove the pre-mark hook
    pub fn uninstall(self, gc: &mut Gc) -> KilnResult<Arc<Mutex<T>>> {
        gc.remove_pre_mark_hook(&self.hook)?;
        Ok(self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectRef;
    use crate::process::Core;
    use crate::types::Types;

    struct Pins(Vec<ObjectRef>);

    impl RootSet for Pins {
        fn visit_roots(&self, marker: &mut Marker<'_>) {
            for object in &self.0 {
                marker.visit_object(*object);
            }
        }
    }

    #[test]
    fn test_rooted_keeps_objects_alive() {
        let types = Types::startup(Arc::new(Core::default())).unwrap();
        let object_ty = types.object_type().unwrap();
        let mut gc = Gc::new();

        let kept = gc.allocate(&types, object_ty, &[]).unwrap();
        let dropped = gc.allocate(&types, object_ty, &[]).unwrap();
        let pins = Rooted::install(&mut gc, Pins(vec![kept]));

        gc.run(&types);
        assert!(gc.contains(kept));
        assert!(!gc.contains(dropped));

        pins.lock().0.clear();
        gc.run(&types);
        assert!(!gc.contains(kept));

        pins.uninstall(&mut gc).unwrap();
        assert_eq!(gc.hook_counts(), (0, 0));
    }
}
