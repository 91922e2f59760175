//! Raw C ABI of the Wren virtual machine.
//!
//! The layouts mirror Wren 0.4.0's `wren.h`, except that foreign allocators,
//! finalizers and methods receive the opaque user data handed back from the
//! bind callbacks (`WrenForeignMethod`, `WrenForeignClassMethods`), so one
//! fixed function can serve every class and method.
//!
//! Nothing here is safe to call directly. The [`WrenApi`] table gathers every
//! native entry point so that callers can be pointed at the linked library
//! ([`WrenApi::linked`], feature `link`) or at an in-process substitute.

#![allow(non_camel_case_types, non_upper_case_globals, non_snake_case)]

use std::os::raw::{c_char, c_int, c_uint, c_void};

/// Opaque native VM.
#[repr(C)]
pub struct WrenVM {
    _private: [u8; 0],
}

/// Opaque native handle pinning one VM value.
#[repr(C)]
pub struct WrenHandle {
    _private: [u8; 0],
}

pub type WrenInterpretResult = c_uint;
pub const WrenInterpretResult_WREN_RESULT_SUCCESS: WrenInterpretResult = 0;
pub const WrenInterpretResult_WREN_RESULT_COMPILE_ERROR: WrenInterpretResult = 1;
pub const WrenInterpretResult_WREN_RESULT_RUNTIME_ERROR: WrenInterpretResult = 2;

pub type WrenErrorType = c_uint;
pub const WrenErrorType_WREN_ERROR_COMPILE: WrenErrorType = 0;
pub const WrenErrorType_WREN_ERROR_RUNTIME: WrenErrorType = 1;
pub const WrenErrorType_WREN_ERROR_STACK_TRACE: WrenErrorType = 2;

pub type WrenType = c_uint;
pub const WrenType_WREN_TYPE_BOOL: WrenType = 0;
pub const WrenType_WREN_TYPE_NUM: WrenType = 1;
pub const WrenType_WREN_TYPE_FOREIGN: WrenType = 2;
pub const WrenType_WREN_TYPE_LIST: WrenType = 3;
pub const WrenType_WREN_TYPE_MAP: WrenType = 4;
pub const WrenType_WREN_TYPE_NULL: WrenType = 5;
pub const WrenType_WREN_TYPE_STRING: WrenType = 6;
pub const WrenType_WREN_TYPE_UNKNOWN: WrenType = 7;

pub type WrenReallocateFn = unsafe extern "C" fn(
    memory: *mut c_void,
    new_size: usize,
    user_data: *mut c_void,
) -> *mut c_void;

pub type WrenForeignMethodFn = unsafe extern "C" fn(vm: *mut WrenVM, user_data: *mut c_void);

pub type WrenFinalizerFn = unsafe extern "C" fn(data: *mut c_void, user_data: *mut c_void);

pub type WrenResolveModuleFn = unsafe extern "C" fn(
    vm: *mut WrenVM,
    importer: *const c_char,
    name: *const c_char,
) -> *const c_char;

pub type WrenLoadModuleCompleteFn =
    unsafe extern "C" fn(vm: *mut WrenVM, name: *const c_char, result: WrenLoadModuleResult);

pub type WrenLoadModuleFn =
    unsafe extern "C" fn(vm: *mut WrenVM, name: *const c_char) -> WrenLoadModuleResult;

pub type WrenBindForeignMethodFn = unsafe extern "C" fn(
    vm: *mut WrenVM,
    module: *const c_char,
    class_name: *const c_char,
    is_static: bool,
    signature: *const c_char,
) -> WrenForeignMethod;

pub type WrenBindForeignClassFn = unsafe extern "C" fn(
    vm: *mut WrenVM,
    module: *const c_char,
    class_name: *const c_char,
) -> WrenForeignClassMethods;

pub type WrenWriteFn = unsafe extern "C" fn(vm: *mut WrenVM, text: *const c_char);

pub type WrenErrorFn = unsafe extern "C" fn(
    vm: *mut WrenVM,
    type_: WrenErrorType,
    module: *const c_char,
    line: c_int,
    message: *const c_char,
);

/// Result of a module load request. The VM calls `on_complete` once it no
/// longer needs `source`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct WrenLoadModuleResult {
    pub source: *const c_char,
    pub on_complete: Option<WrenLoadModuleCompleteFn>,
    pub user_data: *mut c_void,
}

impl Default for WrenLoadModuleResult {
    fn default() -> Self {
        Self {
            source: std::ptr::null(),
            on_complete: None,
            user_data: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct WrenForeignMethod {
    pub execute: Option<WrenForeignMethodFn>,
    pub user_data: *mut c_void,
}

impl Default for WrenForeignMethod {
    fn default() -> Self {
        Self {
            execute: None,
            user_data: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct WrenForeignClassMethods {
    pub allocate: Option<WrenForeignMethodFn>,
    pub allocate_user_data: *mut c_void,
    pub finalize: Option<WrenFinalizerFn>,
    pub finalize_user_data: *mut c_void,
}

impl Default for WrenForeignClassMethods {
    fn default() -> Self {
        Self {
            allocate: None,
            allocate_user_data: std::ptr::null_mut(),
            finalize: None,
            finalize_user_data: std::ptr::null_mut(),
        }
    }
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct WrenConfiguration {
    pub reallocate_fn: Option<WrenReallocateFn>,
    pub resolve_module_fn: Option<WrenResolveModuleFn>,
    pub load_module_fn: Option<WrenLoadModuleFn>,
    pub bind_foreign_method_fn: Option<WrenBindForeignMethodFn>,
    pub bind_foreign_class_fn: Option<WrenBindForeignClassFn>,
    pub write_fn: Option<WrenWriteFn>,
    pub error_fn: Option<WrenErrorFn>,
    pub initial_heap_size: usize,
    pub min_heap_size: usize,
    pub heap_growth_percent: c_int,
    pub user_data: *mut c_void,
}

impl Default for WrenConfiguration {
    fn default() -> Self {
        Self {
            reallocate_fn: None,
            resolve_module_fn: None,
            load_module_fn: None,
            bind_foreign_method_fn: None,
            bind_foreign_class_fn: None,
            write_fn: None,
            error_fn: None,
            initial_heap_size: 1024 * 1024 * 10,
            min_heap_size: 1024 * 1024,
            heap_growth_percent: 50,
            user_data: std::ptr::null_mut(),
        }
    }
}

/// Table of native entry points.
///
/// Field order follows the sections of `wren.h`. Every pointer must stay
/// callable for as long as any VM created through the table is alive.
#[derive(Debug, Copy, Clone)]
pub struct WrenApi {
    // ========== VM LIFECYCLE ==========
    pub init_configuration: unsafe extern "C" fn(config: *mut WrenConfiguration),
    pub new_vm: unsafe extern "C" fn(config: *mut WrenConfiguration) -> *mut WrenVM,
    pub free_vm: unsafe extern "C" fn(vm: *mut WrenVM),
    pub collect_garbage: unsafe extern "C" fn(vm: *mut WrenVM),
    pub interpret: unsafe extern "C" fn(
        vm: *mut WrenVM,
        module: *const c_char,
        source: *const c_char,
    ) -> WrenInterpretResult,
    pub get_user_data: unsafe extern "C" fn(vm: *mut WrenVM) -> *mut c_void,
    pub set_user_data: unsafe extern "C" fn(vm: *mut WrenVM, user_data: *mut c_void),

    // ========== HANDLES ==========
    pub make_call_handle:
        unsafe extern "C" fn(vm: *mut WrenVM, signature: *const c_char) -> *mut WrenHandle,
    pub call: unsafe extern "C" fn(vm: *mut WrenVM, method: *mut WrenHandle) -> WrenInterpretResult,
    pub release_handle: unsafe extern "C" fn(vm: *mut WrenVM, handle: *mut WrenHandle),

    // ========== SLOTS ==========
    pub get_slot_count: unsafe extern "C" fn(vm: *mut WrenVM) -> c_int,
    pub ensure_slots: unsafe extern "C" fn(vm: *mut WrenVM, num_slots: c_int),
    pub get_slot_type: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> WrenType,
    pub get_slot_bool: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> bool,
    pub get_slot_bytes:
        unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int, length: *mut c_int) -> *const c_char,
    pub get_slot_double: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> f64,
    pub get_slot_foreign: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> *mut c_void,
    pub get_slot_string: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> *const c_char,
    pub get_slot_handle: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> *mut WrenHandle,
    pub set_slot_bool: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int, value: bool),
    pub set_slot_bytes:
        unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int, bytes: *const c_char, length: usize),
    pub set_slot_double: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int, value: f64),
    pub set_slot_new_foreign: unsafe extern "C" fn(
        vm: *mut WrenVM,
        slot: c_int,
        class_slot: c_int,
        size: usize,
    ) -> *mut c_void,
    pub set_slot_new_list: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int),
    pub set_slot_new_map: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int),
    pub set_slot_null: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int),
    pub set_slot_string: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int, text: *const c_char),
    pub set_slot_handle: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int, handle: *mut WrenHandle),

    // ========== LISTS ==========
    pub get_list_count: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> c_int,
    pub get_list_element:
        unsafe extern "C" fn(vm: *mut WrenVM, list_slot: c_int, index: c_int, element_slot: c_int),
    pub set_list_element:
        unsafe extern "C" fn(vm: *mut WrenVM, list_slot: c_int, index: c_int, element_slot: c_int),
    pub insert_in_list:
        unsafe extern "C" fn(vm: *mut WrenVM, list_slot: c_int, index: c_int, element_slot: c_int),

    // ========== MAPS ==========
    pub get_map_count: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int) -> c_int,
    pub get_map_contains_key:
        unsafe extern "C" fn(vm: *mut WrenVM, map_slot: c_int, key_slot: c_int) -> bool,
    pub get_map_value:
        unsafe extern "C" fn(vm: *mut WrenVM, map_slot: c_int, key_slot: c_int, value_slot: c_int),
    pub set_map_value:
        unsafe extern "C" fn(vm: *mut WrenVM, map_slot: c_int, key_slot: c_int, value_slot: c_int),
    pub remove_map_value: unsafe extern "C" fn(
        vm: *mut WrenVM,
        map_slot: c_int,
        key_slot: c_int,
        removed_value_slot: c_int,
    ),

    // ========== MODULES AND FIBERS ==========
    pub get_variable: unsafe extern "C" fn(
        vm: *mut WrenVM,
        module: *const c_char,
        name: *const c_char,
        slot: c_int,
    ),
    pub has_variable:
        unsafe extern "C" fn(vm: *mut WrenVM, module: *const c_char, name: *const c_char) -> bool,
    pub has_module: unsafe extern "C" fn(vm: *mut WrenVM, module: *const c_char) -> bool,
    pub abort_fiber: unsafe extern "C" fn(vm: *mut WrenVM, slot: c_int),
}

#[cfg(feature = "link")]
mod linked {
    use super::*;

    #[link(name = "wren")]
    unsafe extern "C" {
        pub fn wrenInitConfiguration(configuration: *mut WrenConfiguration);
        pub fn wrenNewVM(configuration: *mut WrenConfiguration) -> *mut WrenVM;
        pub fn wrenFreeVM(vm: *mut WrenVM);
        pub fn wrenCollectGarbage(vm: *mut WrenVM);
        pub fn wrenInterpret(
            vm: *mut WrenVM,
            module: *const c_char,
            source: *const c_char,
        ) -> WrenInterpretResult;
        pub fn wrenGetUserData(vm: *mut WrenVM) -> *mut c_void;
        pub fn wrenSetUserData(vm: *mut WrenVM, user_data: *mut c_void);
        pub fn wrenMakeCallHandle(vm: *mut WrenVM, signature: *const c_char) -> *mut WrenHandle;
        pub fn wrenCall(vm: *mut WrenVM, method: *mut WrenHandle) -> WrenInterpretResult;
        pub fn wrenReleaseHandle(vm: *mut WrenVM, handle: *mut WrenHandle);
        pub fn wrenGetSlotCount(vm: *mut WrenVM) -> c_int;
        pub fn wrenEnsureSlots(vm: *mut WrenVM, num_slots: c_int);
        pub fn wrenGetSlotType(vm: *mut WrenVM, slot: c_int) -> WrenType;
        pub fn wrenGetSlotBool(vm: *mut WrenVM, slot: c_int) -> bool;
        pub fn wrenGetSlotBytes(vm: *mut WrenVM, slot: c_int, length: *mut c_int) -> *const c_char;
        pub fn wrenGetSlotDouble(vm: *mut WrenVM, slot: c_int) -> f64;
        pub fn wrenGetSlotForeign(vm: *mut WrenVM, slot: c_int) -> *mut c_void;
        pub fn wrenGetSlotString(vm: *mut WrenVM, slot: c_int) -> *const c_char;
        pub fn wrenGetSlotHandle(vm: *mut WrenVM, slot: c_int) -> *mut WrenHandle;
        pub fn wrenSetSlotBool(vm: *mut WrenVM, slot: c_int, value: bool);
        pub fn wrenSetSlotBytes(vm: *mut WrenVM, slot: c_int, bytes: *const c_char, length: usize);
        pub fn wrenSetSlotDouble(vm: *mut WrenVM, slot: c_int, value: f64);
        pub fn wrenSetSlotNewForeign(
            vm: *mut WrenVM,
            slot: c_int,
            class_slot: c_int,
            size: usize,
        ) -> *mut c_void;
        pub fn wrenSetSlotNewList(vm: *mut WrenVM, slot: c_int);
        pub fn wrenSetSlotNewMap(vm: *mut WrenVM, slot: c_int);
        pub fn wrenSetSlotNull(vm: *mut WrenVM, slot: c_int);
        pub fn wrenSetSlotString(vm: *mut WrenVM, slot: c_int, text: *const c_char);
        pub fn wrenSetSlotHandle(vm: *mut WrenVM, slot: c_int, handle: *mut WrenHandle);
        pub fn wrenGetListCount(vm: *mut WrenVM, slot: c_int) -> c_int;
        pub fn wrenGetListElement(vm: *mut WrenVM, list_slot: c_int, index: c_int, element_slot: c_int);
        pub fn wrenSetListElement(vm: *mut WrenVM, list_slot: c_int, index: c_int, element_slot: c_int);
        pub fn wrenInsertInList(vm: *mut WrenVM, list_slot: c_int, index: c_int, element_slot: c_int);
        pub fn wrenGetMapCount(vm: *mut WrenVM, slot: c_int) -> c_int;
        pub fn wrenGetMapContainsKey(vm: *mut WrenVM, map_slot: c_int, key_slot: c_int) -> bool;
        pub fn wrenGetMapValue(vm: *mut WrenVM, map_slot: c_int, key_slot: c_int, value_slot: c_int);
        pub fn wrenSetMapValue(vm: *mut WrenVM, map_slot: c_int, key_slot: c_int, value_slot: c_int);
        pub fn wrenRemoveMapValue(
            vm: *mut WrenVM,
            map_slot: c_int,
            key_slot: c_int,
            removed_value_slot: c_int,
        );
        pub fn wrenGetVariable(
            vm: *mut WrenVM,
            module: *const c_char,
            name: *const c_char,
            slot: c_int,
        );
        pub fn wrenHasVariable(vm: *mut WrenVM, module: *const c_char, name: *const c_char) -> bool;
        pub fn wrenHasModule(vm: *mut WrenVM, module: *const c_char) -> bool;
        pub fn wrenAbortFiber(vm: *mut WrenVM, slot: c_int);
    }
}

#[cfg(feature = "link")]
pub use linked::*;

#[cfg(feature = "link")]
impl WrenApi {
    /// Entry points of the linked `libwren`.
    pub fn linked() -> Self {
        Self {
            init_configuration: wrenInitConfiguration,
            new_vm: wrenNewVM,
            free_vm: wrenFreeVM,
            collect_garbage: wrenCollectGarbage,
            interpret: wrenInterpret,
            get_user_data: wrenGetUserData,
            set_user_data: wrenSetUserData,
            make_call_handle: wrenMakeCallHandle,
            call: wrenCall,
            release_handle: wrenReleaseHandle,
            get_slot_count: wrenGetSlotCount,
            ensure_slots: wrenEnsureSlots,
            get_slot_type: wrenGetSlotType,
            get_slot_bool: wrenGetSlotBool,
            get_slot_bytes: wrenGetSlotBytes,
            get_slot_double: wrenGetSlotDouble,
            get_slot_foreign: wrenGetSlotForeign,
            get_slot_string: wrenGetSlotString,
            get_slot_handle: wrenGetSlotHandle,
            set_slot_bool: wrenSetSlotBool,
            set_slot_bytes: wrenSetSlotBytes,
            set_slot_double: wrenSetSlotDouble,
            set_slot_new_foreign: wrenSetSlotNewForeign,
            set_slot_new_list: wrenSetSlotNewList,
            set_slot_new_map: wrenSetSlotNewMap,
            set_slot_null: wrenSetSlotNull,
            set_slot_string: wrenSetSlotString,
            set_slot_handle: wrenSetSlotHandle,
            get_list_count: wrenGetListCount,
            get_list_element: wrenGetListElement,
            set_list_element: wrenSetListElement,
            insert_in_list: wrenInsertInList,
            get_map_count: wrenGetMapCount,
            get_map_contains_key: wrenGetMapContainsKey,
            get_map_value: wrenGetMapValue,
            set_map_value: wrenSetMapValue,
            remove_map_value: wrenRemoveMapValue,
            get_variable: wrenGetVariable,
            has_variable: wrenHasVariable,
            has_module: wrenHasModule,
            abort_fiber: wrenAbortFiber,
        }
    }
}
