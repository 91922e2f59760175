//! In-process stand-in for the native Wren VM.
//!
//! [`api`] returns a [`WrenApi`] table whose entry points drive a small
//! interpreter instead of `libwren`. It honours the host callbacks of the
//! configuration (write, error, module resolution and loading, foreign
//! binding), the slot API, call handles, and foreign object finalization,
//! which is enough to exercise a host bridge end to end without a C
//! toolchain.
//!
//! Only a subset of the language is understood; see the `script` module.

mod abi;
mod machine;
mod script;
mod value;

use std::cell::Cell;
use wren_interop_sys::{WrenApi, WrenVM};

/// What a VM still held when it was freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeReport {
    /// Handles the host never released.
    pub leaked_handles: usize,
    /// Foreign objects finalized over the VM's lifetime, including at free.
    pub finalized_objects: usize,
}

thread_local! {
    static LAST_FREE: Cell<Option<FreeReport>> = const { Cell::new(None) };
}

pub(crate) fn record_free_report(report: FreeReport) {
    log::trace!("mock vm freed: {report:?}");
    LAST_FREE.set(Some(report));
}

/// Report of the last VM freed on the current thread.
pub fn last_free_report() -> Option<FreeReport> {
    LAST_FREE.get()
}

/// Entry point table backed by the mock VM.
pub fn api() -> WrenApi {
    WrenApi {
        init_configuration: abi::init_configuration,
        new_vm: abi::new_vm,
        free_vm: abi::free_vm,
        collect_garbage: abi::collect_garbage,
        interpret: abi::interpret,
        get_user_data: abi::get_user_data,
        set_user_data: abi::set_user_data,
        make_call_handle: abi::make_call_handle,
        call: abi::call,
        release_handle: abi::release_handle,
        get_slot_count: abi::get_slot_count,
        ensure_slots: abi::ensure_slots,
        get_slot_type: abi::get_slot_type,
        get_slot_bool: abi::get_slot_bool,
        get_slot_bytes: abi::get_slot_bytes,
        get_slot_double: abi::get_slot_double,
        get_slot_foreign: abi::get_slot_foreign,
        get_slot_string: abi::get_slot_string,
        get_slot_handle: abi::get_slot_handle,
        set_slot_bool: abi::set_slot_bool,
        set_slot_bytes: abi::set_slot_bytes,
        set_slot_double: abi::set_slot_double,
        set_slot_new_foreign: abi::set_slot_new_foreign,
        set_slot_new_list: abi::set_slot_new_list,
        set_slot_new_map: abi::set_slot_new_map,
        set_slot_null: abi::set_slot_null,
        set_slot_string: abi::set_slot_string,
        set_slot_handle: abi::set_slot_handle,
        get_list_count: abi::get_list_count,
        get_list_element: abi::get_list_element,
        set_list_element: abi::set_list_element,
        insert_in_list: abi::insert_in_list,
        get_map_count: abi::get_map_count,
        get_map_contains_key: abi::get_map_contains_key,
        get_map_value: abi::get_map_value,
        set_map_value: abi::set_map_value,
        remove_map_value: abi::remove_map_value,
        get_variable: abi::get_variable,
        has_variable: abi::has_variable,
        has_module: abi::has_module,
        abort_fiber: abi::abort_fiber,
    }
}

/// Number of handles the VM currently holds for the host.
///
/// # Safety
/// `vm` must be a live VM created through [`api`].
pub unsafe fn live_handle_count(vm: *mut WrenVM) -> usize {
    unsafe { &*(vm as *const machine::MockVm) }.state.borrow().handles.len()
}

/// Number of foreign objects not yet finalized.
///
/// # Safety
/// `vm` must be a live VM created through [`api`].
pub unsafe fn live_foreign_count(vm: *mut WrenVM) -> usize {
    unsafe { &*(vm as *const machine::MockVm) }.state.borrow().heap.foreign_count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;
    use wren_interop_sys::*;

    #[test]
    fn interprets_and_frees_without_callbacks() {
        let api = api();
        let mut config = WrenConfiguration::default();
        unsafe {
            (api.init_configuration)(&mut config);
            let vm = (api.new_vm)(&mut config);
            let module = CString::new("main").unwrap();
            let source = CString::new("var answer = 42").unwrap();
            assert_eq!(
                (api.interpret)(vm, module.as_ptr(), source.as_ptr()),
                WrenInterpretResult_WREN_RESULT_SUCCESS
            );

            let name = CString::new("answer").unwrap();
            assert!((api.has_variable)(vm, module.as_ptr(), name.as_ptr()));
            (api.ensure_slots)(vm, 1);
            (api.get_variable)(vm, module.as_ptr(), name.as_ptr(), 0);
            assert_eq!((api.get_slot_double)(vm, 0), 42.0);

            let handle = (api.get_slot_handle)(vm, 0);
            assert_eq!(live_handle_count(vm), 1);
            (api.free_vm)(vm);
            assert!(!handle.is_null());
        }
        assert_eq!(
            last_free_report(),
            Some(FreeReport {
                leaked_handles: 1,
                finalized_objects: 0
            })
        );
    }

    #[test]
    fn list_indices_wrap_from_the_end() {
        let api = api();
        let mut config = WrenConfiguration::default();
        unsafe {
            let vm = (api.new_vm)(&mut config);
            (api.ensure_slots)(vm, 2);
            (api.set_slot_new_list)(vm, 0);
            for value in [1.0, 2.0, 3.0] {
                (api.set_slot_double)(vm, 1, value);
                (api.insert_in_list)(vm, 0, -1, 1);
            }
            assert_eq!((api.get_list_count)(vm, 0), 3);
            (api.get_list_element)(vm, 0, -1, 1);
            assert_eq!((api.get_slot_double)(vm, 1), 3.0);
            (api.set_slot_null)(vm, 1);
            (api.get_list_element)(vm, 0, 7, 1);
            assert_eq!((api.get_slot_type)(vm, 1), WrenType_WREN_TYPE_NULL);
            assert!((api.get_slot_foreign)(vm, 0) == ptr::null_mut());
            (api.free_vm)(vm);
        }
    }
}
