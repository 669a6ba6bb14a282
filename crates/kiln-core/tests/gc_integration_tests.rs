//! Garbage Collector Integration Tests
//!
//! Collection driven through the VM surface. Tests validate:
//! - Reclamation of unreachable objects
//! - Roots contributed by locks, the operand stack and globals
//! - References traced through object layers, including cycles
//! - Weak reference clearing
//! - Finalization order and construction rollback
//!
//! # Running Tests
//! ```bash
//! cargo test --test gc_integration_tests
//! ```

use kiln_core::{Color, Core, Layer, ObjectRef, Status, TypeDescriptor, TypeRef, Value, Vm, VmOptions};
use parking_lot::Mutex;
use std::sync::Arc;

struct Node {
    next: Option<ObjectRef>,
}

fn vm() -> Vm {
    Vm::startup(Arc::new(Core::default()), VmOptions::default()).unwrap()
}

fn object_type(vm: &Vm) -> TypeRef {
    vm.get_type("Kiln.Object").unwrap()
}

fn node_type(vm: &mut Vm) -> TypeRef {
    let parent = object_type(vm);
    vm.create_object_type(
        "Test.Node",
        parent,
        TypeDescriptor::new()
            .with_construct(|_, args| {
                let next = args.first().and_then(Value::as_object);
                Ok(Box::new(Node { next }) as Layer)
            })
            .with_visit(|layer, marker| {
                if let Some(next) = layer.downcast_ref::<Node>().and_then(|node| node.next) {
                    marker.visit_object(next);
                }
            }),
    )
    .unwrap()
}

type Log = Arc<Mutex<Vec<String>>>;

fn logging_finalizer(log: &Log, entry: &'static str) -> TypeDescriptor {
    let log = log.clone();
    TypeDescriptor::new().with_finalize(move |_, _| log.lock().push(entry.to_string()))
}

// ===== Reachability =====

#[test]
fn test_unreachable_objects_are_reclaimed() {
    let mut vm = vm();
    let ty = object_type(&vm);
    for _ in 0..3 {
        vm.allocate(ty, &[]).unwrap();
    }
    assert_eq!(vm.gc().unwrap().len(), 3);

    let run = vm.run_gc().unwrap();
    assert_eq!(run.freed, 3);
    assert_eq!(run.live_objects, 0);
    assert!(vm.gc().unwrap().is_empty());
}

#[test]
fn test_objects_listed_newest_first() {
    let mut vm = vm();
    let ty = object_type(&vm);
    let a = vm.allocate(ty, &[]).unwrap();
    let b = vm.allocate(ty, &[]).unwrap();
    let c = vm.allocate(ty, &[]).unwrap();

    let listed: Vec<_> = vm.gc().unwrap().objects().collect();
    assert_eq!(listed, vec![c, b, a]);
}

#[test]
fn test_references_traced_through_layers() {
    let mut vm = vm();
    let node_ty = node_type(&mut vm);
    let tail = vm.allocate(node_ty, &[]).unwrap();
    let middle = vm.allocate(node_ty, &[Value::Object(tail)]).unwrap();
    let head = vm.allocate(node_ty, &[Value::Object(middle)]).unwrap();
    vm.define_global("head", Value::Object(head)).unwrap();

    let run = vm.run_gc().unwrap();
    assert_eq!(run.marked, 3);
    assert_eq!(run.freed, 0);
    for object in [head, middle, tail] {
        // Survivors go back to white for the next collection
        assert_eq!(vm.gc().unwrap().color(object), Ok(Color::White));
    }

    vm.set_global("head", Value::Void).unwrap();
    let run = vm.run_gc().unwrap();
    assert_eq!(run.freed, 3);
}

#[test]
fn test_cycle_collected_once_unreachable() {
    let mut vm = vm();
    let node_ty = node_type(&mut vm);
    let a = vm.allocate(node_ty, &[]).unwrap();
    let b = vm.allocate(node_ty, &[Value::Object(a)]).unwrap();
    vm.layer_mut::<Node>(a, node_ty).unwrap().next = Some(b);

    vm.lock(a).unwrap();
    vm.run_gc().unwrap();
    assert!(vm.gc().unwrap().contains(a));
    assert!(vm.gc().unwrap().contains(b));

    vm.unlock(a).unwrap();
    let run = vm.run_gc().unwrap();
    assert_eq!(run.freed, 2);
}

// ===== Locks =====

#[test]
fn test_locked_object_survives_until_fully_unlocked() {
    let mut vm = vm();
    let ty = object_type(&vm);
    let object = vm.allocate(ty, &[]).unwrap();

    assert_eq!(vm.lock(object), Ok(1));
    assert_eq!(vm.lock(object), Ok(2));
    vm.run_gc().unwrap();
    assert!(vm.gc().unwrap().contains(object));

    assert_eq!(vm.unlock(object), Ok(1));
    vm.run_gc().unwrap();
    assert!(vm.gc().unwrap().contains(object));

    assert_eq!(vm.unlock(object), Ok(0));
    assert_eq!(vm.unlock(object), Err(Status::Underflow));
    vm.run_gc().unwrap();
    assert!(!vm.gc().unwrap().contains(object));

    // The reclaimed object's entry is gone
    assert_eq!(vm.lock_count(object), Ok(0));
    assert_eq!(vm.unlock(object), Err(Status::NotExists));
}

#[test]
fn test_locked_object_stays_white_then_finalizes_once() {
    let visits: Arc<Mutex<usize>> = Arc::default();
    let finalized: Arc<Mutex<usize>> = Arc::default();
    let (visit_count, finalize_count) = (visits.clone(), finalized.clone());

    let mut vm = vm();
    let parent = object_type(&vm);
    let tracked = vm
        .create_object_type(
            "Test.Tracked",
            parent,
            TypeDescriptor::new()
                .with_visit(move |_, _| *visit_count.lock() += 1)
                .with_finalize(move |_, _| *finalize_count.lock() += 1),
        )
        .unwrap();

    let object = vm.allocate(tracked, &[]).unwrap();
    vm.lock(object).unwrap();
    vm.run_gc().unwrap();
    assert_eq!(vm.gc().unwrap().color(object), Ok(Color::White));
    assert_eq!(*visits.lock(), 1);
    assert_eq!(*finalized.lock(), 0);

    vm.unlock(object).unwrap();
    vm.run_gc().unwrap();
    assert_eq!(*finalized.lock(), 1);
    assert!(vm.gc().unwrap().objects().all(|listed| listed != object));

    // Nothing left to finalize a second time
    vm.run_gc().unwrap();
    assert_eq!(*finalized.lock(), 1);
}

#[test]
fn test_unlock_never_locked() {
    let mut vm = vm();
    let ty = object_type(&vm);
    let object = vm.allocate(ty, &[]).unwrap();
    assert_eq!(vm.unlock(object), Err(Status::NotExists));
    assert_eq!(vm.core().status(), Status::NotExists);
}

// ===== Weak references =====

#[test]
fn test_weak_reference_observes_without_retaining() {
    let mut vm = vm();
    let ty = object_type(&vm);
    let target = vm.allocate(ty, &[]).unwrap();
    let handle = vm.create_weak_reference(Value::Object(target)).unwrap();
    vm.define_global("weak", Value::Object(handle)).unwrap();

    vm.lock(target).unwrap();
    vm.run_gc().unwrap();
    assert_eq!(vm.weak_reference_target(handle), Ok(Value::Object(target)));

    vm.unlock(target).unwrap();
    vm.run_gc().unwrap();
    assert!(!vm.gc().unwrap().contains(target));
    assert!(vm.gc().unwrap().contains(handle));
    assert_eq!(vm.weak_reference_target(handle), Ok(Value::Void));
}

#[test]
fn test_weak_reference_dies_with_target() {
    let mut vm = vm();
    let ty = object_type(&vm);
    let target = vm.allocate(ty, &[]).unwrap();
    let first = vm.create_weak_reference(Value::Object(target)).unwrap();
    let second = vm.create_weak_reference(Value::Object(target)).unwrap();

    // Handle and target reclaimed in the same sweep
    let run = vm.run_gc().unwrap();
    assert_eq!(run.freed, 3);
    assert_eq!(vm.weak_reference_target(first), Err(Status::NotExists));
    assert_eq!(vm.weak_reference_target(second), Err(Status::NotExists));
}

#[test]
fn test_weak_reference_arguments() {
    let mut vm = vm();
    let empty = vm.create_weak_reference(Value::Void).unwrap();
    assert_eq!(vm.weak_reference_target(empty), Ok(Value::Void));

    assert_eq!(
        vm.create_weak_reference(Value::Integer32(7)),
        Err(Status::ArgumentTypeInvalid)
    );

    let ty = object_type(&vm);
    let dead = vm.allocate(ty, &[]).unwrap();
    vm.run_gc().unwrap();
    assert_eq!(
        vm.create_weak_reference(Value::Object(dead)),
        Err(Status::ArgumentValueInvalid)
    );
}

#[test]
fn test_weak_reference_allocated_directly() {
    let mut vm = vm();
    let weak_ty = vm.get_type("Kiln.WeakReference").unwrap();
    let ty = object_type(&vm);

    let dead = vm.allocate(ty, &[]).unwrap();
    vm.run_gc().unwrap();
    assert_eq!(
        vm.allocate(weak_ty, &[Value::Object(dead)]),
        Err(Status::ArgumentValueInvalid)
    );
    assert_eq!(
        vm.allocate(weak_ty, &[Value::Integer32(1)]),
        Err(Status::ArgumentTypeInvalid)
    );
    assert_eq!(vm.allocate(weak_ty, &[]), Err(Status::NumberOfArgumentsInvalid));
    assert!(vm.gc().unwrap().is_empty());

    let target = vm.allocate(ty, &[]).unwrap();
    let handle = vm.allocate(weak_ty, &[Value::Object(target)]).unwrap();
    vm.lock(handle).unwrap();
    assert_eq!(vm.weak_reference_target(handle), Ok(Value::Object(target)));
    vm.run_gc().unwrap();
    assert_eq!(vm.weak_reference_target(handle), Ok(Value::Void));
}

// ===== Finalization =====

#[test]
fn test_finalizers_run_derived_to_base() {
    let log: Log = Arc::default();
    let mut vm = vm();
    let root = object_type(&vm);
    let base = vm
        .create_object_type("Test.Base", root, logging_finalizer(&log, "base"))
        .unwrap();
    let derived = vm
        .create_object_type("Test.Derived", base, logging_finalizer(&log, "derived"))
        .unwrap();

    vm.allocate(derived, &[]).unwrap();
    vm.run_gc().unwrap();
    assert_eq!(*log.lock(), vec!["derived", "base"]);
}

#[test]
fn test_failed_construction_finalizes_built_layers() {
    let log: Log = Arc::default();
    let mut vm = vm();
    let root = object_type(&vm);
    let base = vm
        .create_object_type("Test.Base", root, logging_finalizer(&log, "base"))
        .unwrap();
    let failing = vm
        .create_object_type(
            "Test.Failing",
            base,
            logging_finalizer(&log, "failing").with_construct(|_, _| Err(Status::ArgumentValueInvalid)),
        )
        .unwrap();

    assert_eq!(vm.allocate(failing, &[]), Err(Status::ArgumentValueInvalid));
    assert_eq!(*log.lock(), vec!["base"]);
    assert!(vm.gc().unwrap().is_empty());
}

#[test]
fn test_statistics_accumulate_across_runs() {
    let mut vm = vm();
    let ty = object_type(&vm);
    vm.allocate(ty, &[]).unwrap();
    vm.run_gc().unwrap();
    vm.allocate(ty, &[]).unwrap();
    vm.allocate(ty, &[]).unwrap();
    vm.run_gc().unwrap();

    let stats = vm.gc().unwrap().stats().clone();
    assert_eq!(stats.collections, 2);
    assert_eq!(stats.objects_allocated, 3);
    assert_eq!(stats.objects_freed, 3);
    assert_eq!(stats.last_freed_count, 2);
    assert_eq!(stats.live_objects, 0);
}
