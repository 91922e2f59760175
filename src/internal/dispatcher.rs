//! Fixed native entry points.
//!
//! Every VM gets the same function pointers. Each trampoline maps the VM
//! pointer back to its host state through the process-wide [`HandleTable`]
//! and then to the listener or binding it needs. Pointers the table does not
//! know, and listeners that were never set, fall back to the default the
//! native VM expects instead of failing.

use crate::core::bridge::BridgeShared;
use crate::core::error::{BridgeError, BridgeResult, fatal};
use crate::core::vm::{Vm, VmInner};
use crate::internal::handle_table::HandleTable;
use crate::internal::utils::read_cstring;
use crate::types::callbacks::{ErrorInfo, MethodSignature};
use crate::types::enums::ErrorKind;
use crate::types::foreign::{ClassKey, ForeignPtr, MethodKey};
use std::ffi::{CString, c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;
use wren_interop_sys::{
    WrenConfiguration, WrenErrorType, WrenForeignClassMethods, WrenForeignMethod,
    WrenLoadModuleResult, WrenVM,
};

/// Points every callback of `config` at the trampolines in this module.
pub(crate) fn install(config: &mut WrenConfiguration) {
    config.reallocate_fn = Some(cvoid_reallocate);
    config.resolve_module_fn = Some(cvoid_resolve_module);
    config.load_module_fn = Some(cvoid_load_module);
    config.bind_foreign_method_fn = Some(cvoid_bind_foreign_method);
    config.bind_foreign_class_fn = Some(cvoid_bind_foreign_class);
    config.write_fn = Some(cvoid_write);
    config.error_fn = Some(cvoid_error);
}

fn lookup(vm: *mut WrenVM, callback: &str) -> Option<Arc<VmInner>> {
    let inner = HandleTable::global().lookup_vm(vm as usize);
    if inner.is_none() {
        log::warn!("{callback} callback for unmanaged vm {:#x}", vm as usize);
    }
    inner
}

/// Turns the result of a foreign delegate into what the script sees.
fn settle(vm: &Vm, result: BridgeResult<()>, what: &str) {
    let Err(err) = result else {
        return;
    };
    if err.is_fatal() {
        fatal(err);
    }
    log::debug!("vm {:#x}: {what} raised a script error: {err}", vm.addr());
    if let Err(abort_err) = vm.abort_fiber_with_message(&err.to_string()) {
        log::error!(
            "vm {:#x}: could not report '{err}' to the script: {abort_err}",
            vm.addr()
        );
    }
}

/// Copies `text` into memory owned by the native allocator.
fn copy_to_native(text: &str) -> *const c_char {
    let bytes = text.as_bytes();
    let memory = unsafe { cvoid_reallocate(ptr::null_mut(), bytes.len() + 1, ptr::null_mut()) };
    if memory.is_null() {
        return ptr::null();
    }
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), memory.cast::<u8>(), bytes.len());
        *memory.cast::<u8>().add(bytes.len()) = 0;
    }
    memory.cast::<c_char>()
}

// ========== MEMORY ==========

unsafe extern "C" fn cvoid_reallocate(
    memory: *mut c_void,
    new_size: usize,
    _user_data: *mut c_void,
) -> *mut c_void {
    unsafe {
        if new_size == 0 {
            libc::free(memory);
            return ptr::null_mut();
        }
        libc::realloc(memory, new_size)
    }
}

// ========== OUTPUT ==========

unsafe extern "C" fn cvoid_write(vm: *mut WrenVM, text: *const c_char) {
    let Some(inner) = lookup(vm, "write") else {
        return;
    };
    let Some(listener) = inner.listeners().write else {
        return;
    };
    let text = unsafe { read_cstring(text) }.unwrap_or_default();
    listener(&Vm::view(inner), &*text);
}

unsafe extern "C" fn cvoid_error(
    vm: *mut WrenVM,
    type_: WrenErrorType,
    module: *const c_char,
    line: c_int,
    message: *const c_char,
) {
    let Some(inner) = lookup(vm, "error") else {
        return;
    };
    let info = ErrorInfo {
        kind: ErrorKind::from(type_),
        module: unsafe { read_cstring(module) }.map(|module| module.into_owned()),
        line,
        message: unsafe { read_cstring(message) }
            .map(|message| message.into_owned())
            .unwrap_or_default(),
    };
    match inner.listeners().error {
        Some(listener) => listener(&Vm::view(inner), &info),
        None => log::debug!("vm {:#x}: unhandled {:?} error: {}", inner.addr(), info.kind, info.message),
    }
}

// ========== MODULES ==========

unsafe extern "C" fn cvoid_resolve_module(
    vm: *mut WrenVM,
    importer: *const c_char,
    name: *const c_char,
) -> *const c_char {
    let Some(name) = (unsafe { read_cstring(name) }) else {
        return ptr::null();
    };
    let resolver = lookup(vm, "resolve module")
        .and_then(|inner| inner.listeners().resolve_module.map(|resolver| (inner, resolver)));
    let Some((inner, resolver)) = resolver else {
        return copy_to_native(&name);
    };

    let importer = unsafe { read_cstring(importer) }.unwrap_or_default();
    match resolver(&Vm::view(inner), &*importer, &*name) {
        Some(resolved) => copy_to_native(&resolved),
        None => ptr::null(),
    }
}

unsafe extern "C" fn cvoid_load_module(vm: *mut WrenVM, name: *const c_char) -> WrenLoadModuleResult {
    let Some(inner) = lookup(vm, "load module") else {
        return WrenLoadModuleResult::default();
    };
    let Some(loader) = inner.listeners().load_module else {
        return WrenLoadModuleResult::default();
    };
    let Some(name) = (unsafe { read_cstring(name) }) else {
        return WrenLoadModuleResult::default();
    };

    let Some(source) = loader(&Vm::view(inner), &*name) else {
        return WrenLoadModuleResult::default();
    };
    match CString::new(source) {
        Ok(source) => WrenLoadModuleResult {
            source: source.into_raw(),
            on_complete: Some(cvoid_load_module_complete),
            user_data: ptr::null_mut(),
        },
        Err(err) => {
            log::warn!("source of module '{name}' is not loadable: {err}");
            WrenLoadModuleResult::default()
        }
    }
}

unsafe extern "C" fn cvoid_load_module_complete(
    _vm: *mut WrenVM,
    _name: *const c_char,
    result: WrenLoadModuleResult,
) {
    if !result.source.is_null() {
        drop(unsafe { CString::from_raw(result.source as *mut c_char) });
    }
}

// ========== BINDING ==========

unsafe extern "C" fn cvoid_bind_foreign_method(
    vm: *mut WrenVM,
    module: *const c_char,
    class_name: *const c_char,
    is_static: bool,
    signature: *const c_char,
) -> WrenForeignMethod {
    let Some(inner) = lookup(vm, "bind foreign method") else {
        return WrenForeignMethod::default();
    };
    let Some(binder) = inner.listeners().bind_foreign_method else {
        return WrenForeignMethod::default();
    };
    let signature = MethodSignature {
        module: unsafe { read_cstring(module) }.unwrap_or_default().into_owned(),
        class_name: unsafe { read_cstring(class_name) }.unwrap_or_default().into_owned(),
        is_static,
        signature: unsafe { read_cstring(signature) }.unwrap_or_default().into_owned(),
    };

    let bridge = inner.bridge().clone();
    let Some(key) = binder(&Vm::view(inner), &signature) else {
        return WrenForeignMethod::default();
    };
    if bridge.bindings().resolve_method(key).is_none() {
        log::warn!(
            "binder returned unknown method key {} for {}.{}",
            key.get(),
            signature.class_name,
            signature.signature
        );
        return WrenForeignMethod::default();
    }
    WrenForeignMethod {
        execute: Some(cvoid_execute),
        user_data: key.as_user_data(),
    }
}

unsafe extern "C" fn cvoid_bind_foreign_class(
    vm: *mut WrenVM,
    module: *const c_char,
    class_name: *const c_char,
) -> WrenForeignClassMethods {
    let Some(inner) = lookup(vm, "bind foreign class") else {
        return WrenForeignClassMethods::default();
    };
    let Some(binder) = inner.listeners().bind_foreign_class else {
        return WrenForeignClassMethods::default();
    };
    let module = unsafe { read_cstring(module) }.unwrap_or_default();
    let class_name = unsafe { read_cstring(class_name) }.unwrap_or_default();

    let bridge = inner.bridge().clone();
    let Some(key) = binder(&Vm::view(inner), &*module, &*class_name) else {
        return WrenForeignClassMethods::default();
    };
    if bridge.bindings().resolve_class(key).is_none() {
        log::warn!("binder returned unknown class key {} for {module}.{class_name}", key.get());
        return WrenForeignClassMethods::default();
    }
    WrenForeignClassMethods {
        allocate: Some(cvoid_allocate),
        allocate_user_data: key.as_user_data(),
        finalize: Some(cvoid_finalize),
        finalize_user_data: key.as_user_data(),
    }
}

// ========== FOREIGN CALLS ==========

unsafe extern "C" fn cvoid_allocate(vm: *mut WrenVM, user_data: *mut c_void) {
    let Some(inner) = lookup(vm, "allocate") else {
        return;
    };
    let view = Vm::view(inner);
    let binding = ClassKey::from_user_data(user_data)
        .and_then(|key| view.bridge().bindings().resolve_class(key));
    let Some(binding) = binding else {
        settle(&view, Err(unknown_binding("class", user_data)), "allocator");
        return;
    };
    let result = (binding.allocator())(&view);
    settle(&view, result, "allocator");
}

unsafe extern "C" fn cvoid_finalize(data: *mut c_void, user_data: *mut c_void) {
    if data.is_null() {
        return;
    }
    let tag = unsafe { data.cast::<usize>().read_unaligned() };
    if tag == 0 {
        log::warn!("finalizing untagged foreign object {:#x}", data as usize);
        return;
    }
    // The tag is the address of the bridge service that created the object.
    // That service outlives the VM, and the VM outlives its objects.
    let shared = unsafe { &*(tag as *const BridgeShared) };
    let finalizer = ClassKey::from_user_data(user_data)
        .and_then(|key| shared.bindings.resolve_class(key))
        .and_then(|binding| binding.finalizer().cloned());
    shared.foreign.finalize(ForeignPtr::from_raw(data), finalizer.as_ref());
}

unsafe extern "C" fn cvoid_execute(vm: *mut WrenVM, user_data: *mut c_void) {
    let Some(inner) = lookup(vm, "foreign method") else {
        return;
    };
    let view = Vm::view(inner);
    let binding = MethodKey::from_user_data(user_data)
        .and_then(|key| view.bridge().bindings().resolve_method(key));
    let Some(binding) = binding else {
        settle(&view, Err(unknown_binding("method", user_data)), "foreign method");
        return;
    };

    #[cfg(feature = "profiling")]
    profiling::scope!("foreign method", binding.label().unwrap_or("<unlabelled>"));

    let result = (binding.method())(&view);
    settle(&view, result, "foreign method");
}

fn unknown_binding(what: &str, user_data: *mut c_void) -> BridgeError {
    BridgeError::script(format!(
        "no foreign {what} is registered under key {}",
        user_data as usize
    ))
}
