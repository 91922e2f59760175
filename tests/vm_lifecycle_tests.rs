mod common;

use std::cell::RefCell;
use wren_interop::prelude::*;
use wren_interop_sys::WrenHandle;

thread_local! {
    static RELEASED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Forwards to the mock and records which handle was released.
unsafe extern "C" fn recording_release_handle(vm: *mut WrenVM, handle: *mut WrenHandle) {
    RELEASED.with_borrow_mut(|released| released.push(handle as usize));
    unsafe { (wren_interop_mock::api().release_handle)(vm, handle) };
}

// =============================================================================
// VM identity
// =============================================================================

#[test]
fn test_lookup_vm_returns_a_view_until_disposed() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    let raw = vm.as_raw();

    let view = bridge.lookup_vm(raw).expect("registered vm");
    assert!(view.same_vm(&vm));
    assert!(!view.is_root());
    assert!(vm.is_root());
    assert_eq!(bridge.vm_count(), 1);

    vm.dispose();

    assert!(bridge.lookup_vm(raw).is_none());
    assert!(!view.is_alive());
    assert!(view.as_raw().is_null());
    assert_eq!(bridge.vm_count(), 0);
    assert!(matches!(
        view.interpret("main", "System.print(1)"),
        Err(BridgeError::UseAfterDispose { what: "vm", .. })
    ));
}

#[test]
fn test_services_do_not_see_each_others_vms() {
    let first = common::bridge();
    let second = common::bridge();
    let vm = common::vm(&first);

    assert!(!first.same_service(&second));
    assert!(first.same_service(&first.clone()));
    assert!(second.lookup_vm(vm.as_raw()).is_none());
    assert_eq!(second.vm_count(), 0);
    assert_eq!(first.vm_count(), 1);
}

#[test]
fn test_lookup_of_unknown_pointer_is_none() {
    let bridge = common::bridge();
    assert!(bridge.lookup_vm(std::ptr::null_mut()).is_none());
    assert!(bridge.lookup_vm(0x10 as *mut WrenVM).is_none());
}

#[test]
fn test_dropping_the_owner_disposes() {
    let bridge = common::bridge();
    let raw = {
        let vm = common::vm(&bridge);
        vm.as_raw()
    };

    assert!(bridge.lookup_vm(raw).is_none());
    assert_eq!(bridge.vm_count(), 0);
}

#[test]
fn test_disposing_a_view_keeps_the_vm_alive() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);

    let view = vm.clone();
    view.dispose();

    assert!(vm.is_alive());
    assert!(vm.interpret("main", "var x = 1").unwrap().is_success());
}

#[test]
fn test_heap_settings_are_accepted() {
    let bridge = common::bridge();
    let config = VmConfig::new()
        .with_initial_heap_size(4 * 1024 * 1024)
        .with_min_heap_size(512 * 1024)
        .with_heap_growth_percent(25);

    let vm = bridge.create_vm(config).unwrap();
    assert!(vm.is_alive());
}

// =============================================================================
// Call handles
// =============================================================================

#[test]
fn test_release_is_idempotent() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);

    let handle = vm.make_call_handle("update(_)").unwrap();
    assert!(handle.is_valid());
    assert_eq!(unsafe { wren_interop_mock::live_handle_count(vm.as_raw()) }, 1);

    handle.release();
    handle.release();

    assert!(!handle.is_valid());
    assert_eq!(vm.outstanding_handles(), 0);
    assert_eq!(unsafe { wren_interop_mock::live_handle_count(vm.as_raw()) }, 0);
    assert!(matches!(
        vm.call(&handle),
        Err(BridgeError::UseAfterDispose { what: "handle", .. })
    ));
}

#[test]
fn test_dropping_a_handle_releases_it() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);

    drop(vm.make_call_handle("update()").unwrap());

    assert_eq!(vm.outstanding_handles(), 0);
    assert_eq!(unsafe { wren_interop_mock::live_handle_count(vm.as_raw()) }, 0);
}

#[test]
fn test_handle_of_another_vm_is_rejected() {
    let bridge = common::bridge();
    let first = common::vm(&bridge);
    let second = common::vm(&bridge);

    let handle = first.make_call_handle("run()").unwrap();
    assert!(!handle.belongs_to(&second));

    let err = second.call(&handle).unwrap_err();
    assert!(matches!(err, BridgeError::CrossVmMisuse { operation: "call", .. }));
    assert!(err.is_fatal());

    second.ensure_slots(1).unwrap();
    let err = second.slot(0).set_handle(&handle).unwrap_err();
    assert!(matches!(err, BridgeError::CrossVmMisuse { .. }));
}

#[test]
fn test_value_handle_keeps_object_alive_across_collections() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    vm.ensure_slots(2).unwrap();
    let [list, item, ..] = vm.slots();

    list.set_new_list().unwrap();
    item.set_string("kept").unwrap();
    list.insert_in_list(-1, &item).unwrap();

    let handle = list.get_handle().unwrap();
    list.set_null().unwrap();
    vm.collect_garbage().unwrap();

    item.set_handle(&handle).unwrap();
    assert_eq!(item.list_count().unwrap(), 1);
    item.get_list_element(0, &list).unwrap();
    assert_eq!(list.get_string().unwrap(), "kept");
}

// =============================================================================
// Disposal policies
// =============================================================================

#[test]
fn test_force_release_frees_leaked_handles_before_the_vm() {
    let bridge = common::bridge();
    let vm = bridge
        .create_vm(VmConfig::default().with_leaked_handle_policy(LeakedHandlePolicy::ForceRelease))
        .unwrap();

    let first = vm.make_call_handle("a()").unwrap();
    let second = vm.make_call_handle("b()").unwrap();
    assert_eq!(vm.outstanding_handles(), 2);

    vm.dispose();

    let report = wren_interop_mock::last_free_report().expect("vm was freed");
    assert_eq!(report.leaked_handles, 0);
    assert!(!first.is_valid());
    assert!(!second.is_valid());

    // Releasing after the forced release must not reach the freed VM.
    first.release();
    drop(second);
}

#[test]
fn test_force_release_goes_newest_first() {
    let mut api = wren_interop_mock::api();
    api.release_handle = recording_release_handle;
    let bridge = Bridge::new(api);
    let vm = bridge
        .create_vm(VmConfig::default().with_leaked_handle_policy(LeakedHandlePolicy::ForceRelease))
        .unwrap();

    let handles: Vec<CallHandle> = ["a()", "b()", "c()"]
        .into_iter()
        .map(|signature| vm.make_call_handle(signature).unwrap())
        .collect();
    let created: Vec<usize> = handles.iter().map(CallHandle::addr).collect();
    RELEASED.with_borrow_mut(Vec::clear);

    vm.dispose();

    let released = RELEASED.with_borrow(Clone::clone);
    let expected: Vec<usize> = created.into_iter().rev().collect();
    assert_eq!(released, expected);

    // Already released by the VM; dropping them must not release again.
    drop(handles);
    assert_eq!(RELEASED.with_borrow(Vec::len), 3);
}

#[test]
#[should_panic(expected = "unreleased call handle")]
fn test_panic_policy_refuses_to_dispose_with_leaked_handles() {
    let bridge = common::bridge();
    let vm = bridge
        .create_vm(VmConfig::default().with_leaked_handle_policy(LeakedHandlePolicy::Panic))
        .unwrap();

    let _handle = vm.make_call_handle("a()").unwrap();
    vm.dispose();
}

#[test]
fn test_panic_policy_disposes_cleanly_once_handles_are_released() {
    let bridge = common::bridge();
    let vm = bridge
        .create_vm(VmConfig::default().with_leaked_handle_policy(LeakedHandlePolicy::Panic))
        .unwrap();

    let handle = vm.make_call_handle("a()").unwrap();
    handle.release();
    vm.dispose();

    assert_eq!(
        wren_interop_mock::last_free_report().map(|report| report.leaked_handles),
        Some(0)
    );
}

#[test]
fn test_handle_operations_after_dispose_fail() {
    let bridge = common::bridge();
    let vm = common::vm(&bridge);
    let view = vm.clone();
    vm.dispose();

    assert!(matches!(
        view.make_call_handle("a()"),
        Err(BridgeError::UseAfterDispose { .. })
    ));
    assert!(matches!(view.ensure_slots(1), Err(BridgeError::UseAfterDispose { .. })));
    assert!(matches!(
        view.slot(0).get_bool(),
        Err(BridgeError::UseAfterDispose { .. })
    ));
    assert!(view.collect_garbage().unwrap_err().is_fatal());
}
