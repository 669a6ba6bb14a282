//! Process-Wide State Tests
//!
//! The process registry, the tier-1 core and the tier-2 VM are process
//! singletons, so everything touching them lives in one test: tests in a
//! binary run concurrently and would otherwise observe each other's counts.

use kiln_core::defaults::{CORE_REGISTRY_KEY, VM_REGISTRY_KEY};
use kiln_core::{Core, ProcessRegistry, Status, Value, Vm};
use std::sync::Arc;

#[test]
fn test_process_wide_state_lifecycle() {
    // Registry: reference counting and byte-exact keys
    assert_eq!(ProcessRegistry::references(), 0);
    let registry = ProcessRegistry::acquire().unwrap();
    let again = ProcessRegistry::acquire().unwrap();
    assert!(Arc::ptr_eq(&registry, &again));
    assert_eq!(ProcessRegistry::references(), 2);

    registry.add(b"test.key", Arc::new(5u32)).unwrap();
    assert_eq!(registry.add(b"test.key", Arc::new(6u32)), Err(Status::Exists));
    assert_eq!(registry.get(b"test.KEY").err(), Some(Status::NotExists));
    let value = registry.get(b"test.key").unwrap();
    assert_eq!(value.downcast_ref::<u32>(), Some(&5));

    ProcessRegistry::relinquish().unwrap();
    ProcessRegistry::relinquish().unwrap();
    assert_eq!(ProcessRegistry::relinquish(), Err(Status::OperationInvalid));
    assert_eq!(ProcessRegistry::references(), 0);

    // A fresh registry starts empty
    let fresh = ProcessRegistry::acquire().unwrap();
    assert!(!Arc::ptr_eq(&registry, &fresh));
    assert!(fresh.is_empty());
    ProcessRegistry::relinquish().unwrap();

    // Core: one registry reference per core reference
    let core = Core::acquire().unwrap();
    assert_eq!(Core::references(), 1);
    assert_eq!(ProcessRegistry::references(), 1);
    Core::relinquish().unwrap();
    assert_eq!(Core::relinquish(), Err(Status::OperationInvalid));
    assert_eq!(ProcessRegistry::references(), 0);
    drop(core);

    // VM: shared instance, shut down by the last relinquish
    let first = Vm::acquire().unwrap();
    let second = Vm::acquire().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(Core::references(), 2);

    {
        let registry = ProcessRegistry::acquire().unwrap();
        assert!(registry.get(CORE_REGISTRY_KEY).is_ok());
        assert!(registry.get(VM_REGISTRY_KEY).is_ok());
        ProcessRegistry::relinquish().unwrap();
    }

    {
        let mut vm = first.lock();
        let core = Core::acquire().unwrap();
        assert!(Arc::ptr_eq(vm.core(), &core));
        Core::relinquish().unwrap();

        vm.define_global("answer", Value::Integer32(42)).unwrap();
    }
    assert_eq!(second.lock().get_global("answer"), Ok(Value::Integer32(42)));

    Vm::relinquish().unwrap();
    assert!(first.lock().is_running());
    Vm::relinquish().unwrap();
    assert!(!first.lock().is_running());

    assert_eq!(Core::references(), 0);
    assert_eq!(ProcessRegistry::references(), 0);
    assert_eq!(Vm::relinquish(), Err(Status::OperationInvalid));
    assert_eq!(ProcessRegistry::references(), 0);

    // Everything can be acquired again from scratch
    let restarted = Vm::acquire().unwrap();
    assert!(!Arc::ptr_eq(&first, &restarted));
    assert!(restarted.lock().get_global("answer").is_err());
    Vm::relinquish().unwrap();
    assert_eq!(ProcessRegistry::references(), 0);
}
