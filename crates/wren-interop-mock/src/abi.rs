//! `extern "C"` entry points with the signatures of `wren.h`.

use crate::machine::{MockHandle, MockVm};
use crate::value::{Obj, Value};
use crate::{FreeReport, record_free_report};
use std::ffi::{CStr, c_void};
use std::os::raw::{c_char, c_int};
use wren_interop_sys::*;

/// # Safety
/// `vm` must come from [`new_vm`] and not have been freed.
unsafe fn machine<'a>(vm: *mut WrenVM) -> &'a MockVm {
    unsafe { &*(vm as *const MockVm) }
}

unsafe fn text(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

// ========== VM LIFECYCLE ==========

pub(crate) unsafe extern "C" fn init_configuration(config: *mut WrenConfiguration) {
    unsafe { *config = WrenConfiguration::default() };
}

pub(crate) unsafe extern "C" fn new_vm(config: *mut WrenConfiguration) -> *mut WrenVM {
    let config = unsafe { *config };
    Box::into_raw(Box::new(MockVm::new(config))) as *mut WrenVM
}

pub(crate) unsafe extern "C" fn free_vm(vm: *mut WrenVM) {
    let machine = unsafe { Box::from_raw(vm as *mut MockVm) };
    let leaked_handles = machine.shutdown();
    record_free_report(FreeReport {
        leaked_handles,
        finalized_objects: machine.finalized.get(),
    });
}

pub(crate) unsafe extern "C" fn collect_garbage(vm: *mut WrenVM) {
    unsafe { machine(vm) }.collect_garbage();
}

pub(crate) unsafe extern "C" fn interpret(
    vm: *mut WrenVM,
    module: *const c_char,
    source: *const c_char,
) -> WrenInterpretResult {
    let (module, source) = unsafe { (text(module), text(source)) };
    unsafe { machine(vm) }.interpret(&module, &source)
}

pub(crate) unsafe extern "C" fn get_user_data(vm: *mut WrenVM) -> *mut c_void {
    unsafe { machine(vm) }.user_data.get()
}

pub(crate) unsafe extern "C" fn set_user_data(vm: *mut WrenVM, user_data: *mut c_void) {
    unsafe { machine(vm) }.user_data.set(user_data);
}

// ========== HANDLES ==========

fn store_handle(machine: &MockVm, handle: MockHandle) -> *mut WrenHandle {
    let boxed = Box::new(handle);
    let raw = &*boxed as *const MockHandle as *mut WrenHandle;
    machine.state.borrow_mut().handles.insert(raw as usize, boxed);
    raw
}

pub(crate) unsafe extern "C" fn make_call_handle(
    vm: *mut WrenVM,
    signature: *const c_char,
) -> *mut WrenHandle {
    let signature = unsafe { text(signature) };
    let arity = signature.chars().filter(|&c| c == '_').count();
    store_handle(unsafe { machine(vm) }, MockHandle::Method { signature, arity })
}

pub(crate) unsafe extern "C" fn call(vm: *mut WrenVM, method: *mut WrenHandle) -> WrenInterpretResult {
    let machine = unsafe { machine(vm) };
    let handle = machine.state.borrow().handles.get(&(method as usize)).map(|h| (**h).clone());
    match handle {
        Some(MockHandle::Method { signature, arity }) => machine.call(&signature, arity),
        _ => WrenInterpretResult_WREN_RESULT_RUNTIME_ERROR,
    }
}

pub(crate) unsafe extern "C" fn release_handle(vm: *mut WrenVM, handle: *mut WrenHandle) {
    unsafe { machine(vm) }
        .state
        .borrow_mut()
        .handles
        .remove(&(handle as usize));
}

// ========== SLOTS ==========

pub(crate) unsafe extern "C" fn get_slot_count(vm: *mut WrenVM) -> c_int {
    unsafe { machine(vm) }.state.borrow().slots.len() as c_int
}

pub(crate) unsafe extern "C" fn ensure_slots(vm: *mut WrenVM, num_slots: c_int) {
    let wanted = usize::try_from(num_slots).unwrap_or(0);
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    if state.slots.len() < wanted {
        state.slots.resize(wanted, Value::Null);
    }
}

pub(crate) unsafe extern "C" fn get_slot_type(vm: *mut WrenVM, slot: c_int) -> WrenType {
    let state = unsafe { machine(vm) }.state.borrow();
    match state.slot(slot) {
        Value::Null => WrenType_WREN_TYPE_NULL,
        Value::Bool(_) => WrenType_WREN_TYPE_BOOL,
        Value::Num(_) => WrenType_WREN_TYPE_NUM,
        Value::Str(_) => WrenType_WREN_TYPE_STRING,
        Value::Obj(id) => match state.heap.get(id) {
            Some(Obj::List(_)) => WrenType_WREN_TYPE_LIST,
            Some(Obj::Map(_)) => WrenType_WREN_TYPE_MAP,
            Some(Obj::Foreign { .. }) => WrenType_WREN_TYPE_FOREIGN,
            _ => WrenType_WREN_TYPE_UNKNOWN,
        },
    }
}

pub(crate) unsafe extern "C" fn get_slot_bool(vm: *mut WrenVM, slot: c_int) -> bool {
    matches!(unsafe { machine(vm) }.state.borrow().slot(slot), Value::Bool(true))
}

pub(crate) unsafe extern "C" fn get_slot_bytes(
    vm: *mut WrenVM,
    slot: c_int,
    length: *mut c_int,
) -> *const c_char {
    // The slot keeps the buffer alive after the clone is dropped.
    match unsafe { machine(vm) }.state.borrow().slot(slot) {
        Value::Str(buffer) => {
            if !length.is_null() {
                unsafe { *length = (buffer.len() - 1) as c_int };
            }
            buffer.as_ptr().cast()
        }
        _ => std::ptr::null(),
    }
}

pub(crate) unsafe extern "C" fn get_slot_double(vm: *mut WrenVM, slot: c_int) -> f64 {
    match unsafe { machine(vm) }.state.borrow().slot(slot) {
        Value::Num(value) => value,
        _ => 0.0,
    }
}

pub(crate) unsafe extern "C" fn get_slot_foreign(vm: *mut WrenVM, slot: c_int) -> *mut c_void {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let Value::Obj(id) = state.slot(slot) else {
        return std::ptr::null_mut();
    };
    match state.heap.get_mut(id) {
        Some(Obj::Foreign { data, .. }) => data.as_mut_ptr().cast(),
        _ => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn get_slot_string(vm: *mut WrenVM, slot: c_int) -> *const c_char {
    unsafe { get_slot_bytes(vm, slot, std::ptr::null_mut()) }
}

pub(crate) unsafe extern "C" fn get_slot_handle(vm: *mut WrenVM, slot: c_int) -> *mut WrenHandle {
    let machine = unsafe { machine(vm) };
    let value = machine.state.borrow().slot(slot);
    store_handle(machine, MockHandle::Value(value))
}

pub(crate) unsafe extern "C" fn set_slot_bool(vm: *mut WrenVM, slot: c_int, value: bool) {
    unsafe { machine(vm) }.state.borrow_mut().set_slot(slot, Value::Bool(value));
}

pub(crate) unsafe extern "C" fn set_slot_bytes(
    vm: *mut WrenVM,
    slot: c_int,
    bytes: *const c_char,
    length: usize,
) {
    let bytes = if bytes.is_null() || length == 0 {
        &[][..]
    } else {
        unsafe { std::slice::from_raw_parts(bytes.cast::<u8>(), length) }
    };
    unsafe { machine(vm) }.state.borrow_mut().set_slot(slot, Value::string(bytes));
}

pub(crate) unsafe extern "C" fn set_slot_double(vm: *mut WrenVM, slot: c_int, value: f64) {
    unsafe { machine(vm) }.state.borrow_mut().set_slot(slot, Value::Num(value));
}

pub(crate) unsafe extern "C" fn set_slot_new_foreign(
    vm: *mut WrenVM,
    slot: c_int,
    class_slot: c_int,
    size: usize,
) -> *mut c_void {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let class = match state.slot(class_slot) {
        Value::Obj(id) if state.heap.class(id).is_some_and(|c| c.is_foreign) => id,
        _ => return std::ptr::null_mut(),
    };
    let words = size.div_ceil(size_of::<u64>()).max(1);
    let id = state.alloc_into(
        slot,
        Obj::Foreign {
            class,
            data: vec![0u64; words].into_boxed_slice(),
        },
    );
    match state.heap.get_mut(id) {
        Some(Obj::Foreign { data, .. }) => data.as_mut_ptr().cast(),
        _ => std::ptr::null_mut(),
    }
}

pub(crate) unsafe extern "C" fn set_slot_new_list(vm: *mut WrenVM, slot: c_int) {
    unsafe { machine(vm) }.state.borrow_mut().alloc_into(slot, Obj::List(Vec::new()));
}

pub(crate) unsafe extern "C" fn set_slot_new_map(vm: *mut WrenVM, slot: c_int) {
    unsafe { machine(vm) }.state.borrow_mut().alloc_into(slot, Obj::Map(Vec::new()));
}

pub(crate) unsafe extern "C" fn set_slot_null(vm: *mut WrenVM, slot: c_int) {
    unsafe { machine(vm) }.state.borrow_mut().set_slot(slot, Value::Null);
}

pub(crate) unsafe extern "C" fn set_slot_string(vm: *mut WrenVM, slot: c_int, text: *const c_char) {
    let bytes = if text.is_null() {
        Vec::new()
    } else {
        unsafe { CStr::from_ptr(text) }.to_bytes().to_vec()
    };
    unsafe { machine(vm) }.state.borrow_mut().set_slot(slot, Value::string(&bytes));
}

pub(crate) unsafe extern "C" fn set_slot_handle(vm: *mut WrenVM, slot: c_int, handle: *mut WrenHandle) {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let value = match state.handles.get(&(handle as usize)).map(|h| h.as_ref()) {
        Some(MockHandle::Value(value)) => value.clone(),
        _ => Value::Null,
    };
    state.set_slot(slot, value);
}

// ========== LISTS ==========

fn list_index(index: c_int, count: usize, inserting: bool) -> Option<usize> {
    let count = count as i64;
    let upper = if inserting { count + 1 } else { count };
    let index = index as i64;
    let resolved = if index < 0 { upper + index } else { index };
    (0..upper).contains(&resolved).then_some(resolved as usize)
}

pub(crate) unsafe extern "C" fn get_list_count(vm: *mut WrenVM, slot: c_int) -> c_int {
    let state = unsafe { machine(vm) }.state.borrow();
    match state.slot(slot).obj_id().and_then(|id| state.heap.get(id)) {
        Some(Obj::List(items)) => items.len() as c_int,
        _ => 0,
    }
}

pub(crate) unsafe extern "C" fn get_list_element(
    vm: *mut WrenVM,
    list_slot: c_int,
    index: c_int,
    element_slot: c_int,
) {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let element = match state.slot(list_slot).obj_id().and_then(|id| state.heap.get(id)) {
        Some(Obj::List(items)) => list_index(index, items.len(), false).map(|i| items[i].clone()),
        _ => None,
    };
    if let Some(element) = element {
        state.set_slot(element_slot, element);
    }
}

pub(crate) unsafe extern "C" fn set_list_element(
    vm: *mut WrenVM,
    list_slot: c_int,
    index: c_int,
    element_slot: c_int,
) {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let element = state.slot(element_slot);
    let Some(id) = state.slot(list_slot).obj_id() else {
        return;
    };
    if let Some(Obj::List(items)) = state.heap.get_mut(id) {
        if let Some(i) = list_index(index, items.len(), false) {
            items[i] = element;
        }
    }
}

pub(crate) unsafe extern "C" fn insert_in_list(
    vm: *mut WrenVM,
    list_slot: c_int,
    index: c_int,
    element_slot: c_int,
) {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let element = state.slot(element_slot);
    let Some(id) = state.slot(list_slot).obj_id() else {
        return;
    };
    if let Some(Obj::List(items)) = state.heap.get_mut(id) {
        if let Some(i) = list_index(index, items.len(), true) {
            items.insert(i, element);
        }
    }
}

// ========== MAPS ==========

/// Runs `f` on the map in `map_slot` together with the current slots.
unsafe fn with_map<R>(
    vm: *mut WrenVM,
    map_slot: c_int,
    f: impl FnOnce(&mut Vec<(Value, Value)>, &mut Vec<Value>) -> R,
) -> Option<R> {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let id = state.slot(map_slot).obj_id()?;
    let mut slots = std::mem::take(&mut state.slots);
    let result = match state.heap.get_mut(id) {
        Some(Obj::Map(entries)) => Some(f(entries, &mut slots)),
        _ => None,
    };
    state.slots = slots;
    result
}

fn slot_value(slots: &[Value], index: c_int) -> Value {
    usize::try_from(index)
        .ok()
        .and_then(|i| slots.get(i))
        .cloned()
        .unwrap_or(Value::Null)
}

fn store(slots: &mut [Value], index: c_int, value: Value) {
    if let Some(slot) = usize::try_from(index).ok().and_then(|i| slots.get_mut(i)) {
        *slot = value;
    }
}

pub(crate) unsafe extern "C" fn get_map_count(vm: *mut WrenVM, slot: c_int) -> c_int {
    unsafe { with_map(vm, slot, |entries, _| entries.len() as c_int) }.unwrap_or(0)
}

pub(crate) unsafe extern "C" fn get_map_contains_key(vm: *mut WrenVM, map_slot: c_int, key_slot: c_int) -> bool {
    unsafe {
        with_map(vm, map_slot, |entries, slots| {
            let key = slot_value(slots, key_slot);
            entries.iter().any(|(k, _)| *k == key)
        })
    }
    .unwrap_or(false)
}

pub(crate) unsafe extern "C" fn get_map_value(
    vm: *mut WrenVM,
    map_slot: c_int,
    key_slot: c_int,
    value_slot: c_int,
) {
    unsafe {
        with_map(vm, map_slot, |entries, slots| {
            let key = slot_value(slots, key_slot);
            let value = entries
                .iter()
                .find(|(k, _)| *k == key)
                .map_or(Value::Null, |(_, v)| v.clone());
            store(slots, value_slot, value);
        });
    }
}

pub(crate) unsafe extern "C" fn set_map_value(
    vm: *mut WrenVM,
    map_slot: c_int,
    key_slot: c_int,
    value_slot: c_int,
) {
    unsafe {
        with_map(vm, map_slot, |entries, slots| {
            let key = slot_value(slots, key_slot);
            let value = slot_value(slots, value_slot);
            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = value,
                None => entries.push((key, value)),
            }
        });
    }
}

pub(crate) unsafe extern "C" fn remove_map_value(
    vm: *mut WrenVM,
    map_slot: c_int,
    key_slot: c_int,
    removed_value_slot: c_int,
) {
    unsafe {
        with_map(vm, map_slot, |entries, slots| {
            let key = slot_value(slots, key_slot);
            let removed = entries
                .iter()
                .position(|(k, _)| *k == key)
                .map_or(Value::Null, |i| entries.remove(i).1);
            store(slots, removed_value_slot, removed);
        });
    }
}

// ========== MODULES AND FIBERS ==========

pub(crate) unsafe extern "C" fn get_variable(
    vm: *mut WrenVM,
    module: *const c_char,
    name: *const c_char,
    slot: c_int,
) {
    let (module, name) = unsafe { (text(module), text(name)) };
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    let value = state.variable(&module, &name).unwrap_or(Value::Null);
    state.set_slot(slot, value);
}

pub(crate) unsafe extern "C" fn has_variable(vm: *mut WrenVM, module: *const c_char, name: *const c_char) -> bool {
    let (module, name) = unsafe { (text(module), text(name)) };
    unsafe { machine(vm) }.state.borrow().variable(&module, &name).is_some()
}

pub(crate) unsafe extern "C" fn has_module(vm: *mut WrenVM, module: *const c_char) -> bool {
    let module = unsafe { text(module) };
    unsafe { machine(vm) }.state.borrow().modules.contains_key(&module)
}

pub(crate) unsafe extern "C" fn abort_fiber(vm: *mut WrenVM, slot: c_int) {
    let mut state = unsafe { machine(vm) }.state.borrow_mut();
    state.abort = Some(state.slot(slot));
}
