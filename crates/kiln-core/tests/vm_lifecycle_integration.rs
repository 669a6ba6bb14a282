//! VM Lifecycle Integration Tests
//!
//! Tests validate:
//! - Component startup order and reverse shutdown
//! - Rollback of partially started VMs
//! - Idempotent shutdown
//! - Recovery frames around deep operations
//!
//! These tests start standalone VMs; the process-wide VM is covered by
//! `process_singleton.rs`, which runs in its own process.

use kiln_core::{ComponentEvent, Core, Status, TypeDescriptor, Value, Vm, VmOptions};
use parking_lot::Mutex;
use std::sync::Arc;

const COMPONENTS: [&str; 7] = [
    "types",
    "gc",
    "locks",
    "weak_references",
    "stack",
    "global_environment",
    "modules",
];

fn recording(options: VmOptions) -> (VmOptions, Arc<Mutex<Vec<ComponentEvent>>>) {
    let events: Arc<Mutex<Vec<ComponentEvent>>> = Arc::default();
    let sink = events.clone();
    let options = options.with_observer(move |event| sink.lock().push(event));
    (options, events)
}

#[test]
fn test_components_start_in_order_and_stop_in_reverse() {
    let (options, events) = recording(VmOptions::default());
    let vm = Vm::startup(Arc::new(Core::default()), options).unwrap();
    assert!(vm.is_running());

    let started: Vec<_> = COMPONENTS.iter().copied().map(ComponentEvent::Started).collect();
    assert_eq!(*events.lock(), started);

    events.lock().clear();
    vm.shutdown();
    let stopped: Vec<_> = COMPONENTS
        .iter()
        .rev()
        .copied()
        .map(ComponentEvent::Stopped)
        .collect();
    assert_eq!(*events.lock(), stopped);
}

#[test]
fn test_failed_startup_rolls_back_started_components() {
    let (options, events) = recording(VmOptions::default().with_stack_capacity(0));
    let result = Vm::startup(Arc::new(Core::default()), options);
    assert!(result.is_err());

    assert_eq!(
        *events.lock(),
        vec![
            ComponentEvent::Started("types"),
            ComponentEvent::Started("gc"),
            ComponentEvent::Started("locks"),
            ComponentEvent::Started("weak_references"),
            ComponentEvent::Stopped("weak_references"),
            ComponentEvent::Stopped("locks"),
            ComponentEvent::Stopped("gc"),
            ComponentEvent::Stopped("types"),
        ]
    );
}

#[test]
fn test_startup_failure_status() {
    let result = Vm::startup(
        Arc::new(Core::default()),
        VmOptions::default().with_stack_capacity(0),
    );
    match result {
        Err(status) => assert_eq!(status, Status::ArgumentValueInvalid),
        Ok(_) => panic!("VM started with a zero-capacity stack"),
    }
}

#[test]
fn test_drop_after_shutdown_stops_once() {
    let (options, events) = recording(VmOptions::default());
    let vm = Vm::startup(Arc::new(Core::default()), options).unwrap();
    vm.shutdown();

    let stops = events
        .lock()
        .iter()
        .filter(|event| matches!(event, ComponentEvent::Stopped(_)))
        .count();
    assert_eq!(stops, COMPONENTS.len());
}

#[test]
fn test_drop_shuts_down() {
    let (options, events) = recording(VmOptions::default());
    {
        let _vm = Vm::startup(Arc::new(Core::default()), options).unwrap();
    }
    assert_eq!(events.lock().last(), Some(&ComponentEvent::Stopped("types")));
}

#[test]
fn test_shutdown_reclaims_outstanding_objects() {
    let finalized: Arc<Mutex<usize>> = Arc::default();
    let counter = finalized.clone();

    let mut vm = Vm::startup(Arc::new(Core::default()), VmOptions::default()).unwrap();
    let root = vm.get_type("Kiln.Object").unwrap();
    let tracked = vm
        .create_object_type(
            "Test.Tracked",
            root,
            TypeDescriptor::new().with_finalize(move |_, _| *counter.lock() += 1),
        )
        .unwrap();

    let locked = vm.allocate(tracked, &[]).unwrap();
    let pushed = vm.allocate(tracked, &[]).unwrap();
    let global = vm.allocate(tracked, &[]).unwrap();
    vm.lock(locked).unwrap();
    vm.push(Value::Object(pushed)).unwrap();
    vm.define_global("kept", Value::Object(global)).unwrap();

    // Leftovers are reported, not fatal
    vm.shutdown();
    assert_eq!(*finalized.lock(), 3);
}

// ===== Recovery frames =====

#[test]
fn test_protect_catches_deep_failure() {
    let vm = Vm::startup(Arc::new(Core::default()), VmOptions::default()).unwrap();
    let core = vm.core().clone();

    let result = core.protect(|| vm.get_type("Missing.Type"));
    assert_eq!(result, Err(Status::NotExists));
    assert_eq!(core.status(), Status::NotExists);
    assert_eq!(core.jump_depth(), 0);

    // Handled: clear and carry on
    core.clear_status();
    let found = core.protect(|| vm.get_type("Kiln.Object"));
    assert!(found.is_ok());
    assert_eq!(core.status(), Status::NoError);
}

#[test]
fn test_protect_reraise_reaches_outer_frame() {
    let mut vm = Vm::startup(Arc::new(Core::default()), VmOptions::default()).unwrap();
    let core = vm.core().clone();

    let outer: Result<(), Status> = core.protect(|| {
        let inner = core.protect(|| vm.pop());
        assert_eq!(inner, Err(Status::StackUnderflow));
        assert_eq!(core.jump_depth(), 1);
        // Re-raise
        inner.map(|_| ())
    });
    assert_eq!(outer, Err(Status::StackUnderflow));
    assert_eq!(core.jump_depth(), 0);
    assert_eq!(core.status(), Status::StackUnderflow);
}

#[test]
fn test_deep_failures_record_status() {
    let mut vm = Vm::startup(Arc::new(Core::default()), VmOptions::default()).unwrap();

    assert_eq!(vm.get_global("undefined"), Err(Status::NotExists));
    assert_eq!(vm.core().status(), Status::NotExists);

    vm.define_global("x", Value::Integer32(1)).unwrap();
    assert_eq!(vm.define_global("x", Value::Integer32(2)), Err(Status::Exists));
    assert_eq!(vm.core().status(), Status::Exists);

    assert_eq!(vm.peek(), Err(Status::StackUnderflow));
    assert_eq!(vm.core().status(), Status::StackUnderflow);
}
