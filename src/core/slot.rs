//! Typed access to the VM's slot array.
//!
//! Slots are the only way values cross the boundary: foreign methods read
//! their arguments from them and write results back, and the host fills them
//! before [`Vm::call`](crate::core::vm::Vm::call).
//!
//! Every accessor checks, in order, that the VM is alive, that the index is
//! below the VM's current slot count, and (for typed reads) that the slot
//! holds the expected type. Nothing is read from the native side before those
//! checks pass. Slots are never grown implicitly; call
//! [`Vm::ensure_slots`](crate::core::vm::Vm::ensure_slots) first.

use crate::core::error::{BridgeError, BridgeResult};
use crate::core::handle::CallHandle;
use crate::core::vm::Vm;
use crate::types::enums::SlotType;
use crate::types::foreign::ForeignPtr;
use std::any::Any;
use std::ffi::{c_char, c_int};
use std::fmt;
use std::sync::Arc;
use wren_interop_sys::{WrenApi, WrenVM};

/// Size of the native block behind every foreign object: one pointer-width
/// tag identifying the bridge that owns the payload.
pub(crate) const FOREIGN_TAG_SIZE: usize = size_of::<usize>();

/// Coordinate of one slot of one VM.
#[derive(Clone, Copy)]
pub struct Slot<'vm> {
    vm: &'vm Vm,
    index: usize,
}

impl<'vm> Slot<'vm> {
    pub(crate) fn new(vm: &'vm Vm, index: usize) -> Self {
        Self { vm, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn vm(&self) -> &'vm Vm {
        self.vm
    }

    fn api(&self) -> &'vm WrenApi {
        self.vm.api()
    }

    /// Only meaningful after [`Slot::checked`], which bounds the index by
    /// the native slot count.
    pub(crate) fn c_index(&self) -> c_int {
        c_int::try_from(self.index).unwrap_or(c_int::MAX)
    }

    pub(crate) fn checked(&self, operation: &'static str) -> BridgeResult<*mut WrenVM> {
        let raw = self.vm.raw_checked(operation)?;
        let count = unsafe { (self.api().get_slot_count)(raw) }.max(0) as usize;
        if self.index >= count {
            return Err(BridgeError::SlotOutOfRange {
                index: self.index,
                count,
            });
        }
        Ok(raw)
    }

    pub(crate) fn ensure_same_vm(&self, vm: &Vm, operation: &'static str) -> BridgeResult<()> {
        if self.vm.same_vm(vm) {
            Ok(())
        } else {
            Err(BridgeError::CrossVmMisuse {
                operation,
                left: vm.addr(),
                right: self.vm.addr(),
            })
        }
    }

    fn raw_type(&self, raw: *mut WrenVM) -> SlotType {
        SlotType::from(unsafe { (self.api().get_slot_type)(raw, self.c_index()) })
    }

    fn expect_type(&self, raw: *mut WrenVM, expected: SlotType) -> BridgeResult<()> {
        let actual = self.raw_type(raw);
        if actual == expected {
            Ok(())
        } else {
            Err(BridgeError::SlotTypeMismatch {
                index: self.index,
                expected,
                actual,
            })
        }
    }

    pub fn slot_type(&self) -> BridgeResult<SlotType> {
        let raw = self.checked("slot_type")?;
        Ok(self.raw_type(raw))
    }

    pub fn is_null(&self) -> BridgeResult<bool> {
        Ok(self.slot_type()? == SlotType::Null)
    }

    // ========== PRIMITIVES ==========

    pub fn get_bool(&self) -> BridgeResult<bool> {
        let raw = self.checked("get_bool")?;
        self.expect_type(raw, SlotType::Bool)?;
        Ok(unsafe { (self.api().get_slot_bool)(raw, self.c_index()) })
    }

    pub fn set_bool(&self, value: bool) -> BridgeResult<()> {
        let raw = self.checked("set_bool")?;
        unsafe { (self.api().set_slot_bool)(raw, self.c_index(), value) };
        Ok(())
    }

    pub fn get_double(&self) -> BridgeResult<f64> {
        let raw = self.checked("get_double")?;
        self.expect_type(raw, SlotType::Number)?;
        Ok(unsafe { (self.api().get_slot_double)(raw, self.c_index()) })
    }

    pub fn set_double(&self, value: f64) -> BridgeResult<()> {
        let raw = self.checked("set_double")?;
        unsafe { (self.api().set_slot_double)(raw, self.c_index(), value) };
        Ok(())
    }

    /// Number rounded half away from zero, saturating at the `i32` range.
    pub fn get_int(&self) -> BridgeResult<i32> {
        Ok(self.get_double()?.round() as i32)
    }

    pub fn set_int(&self, value: i32) -> BridgeResult<()> {
        self.set_double(f64::from(value))
    }

    pub fn get_float(&self) -> BridgeResult<f32> {
        Ok(self.get_double()? as f32)
    }

    pub fn set_float(&self, value: f32) -> BridgeResult<()> {
        self.set_double(f64::from(value))
    }

    // ========== STRINGS ==========

    fn read_bytes(&self, raw: *mut WrenVM) -> Vec<u8> {
        let mut length: c_int = 0;
        let bytes = unsafe { (self.api().get_slot_bytes)(raw, self.c_index(), &mut length) };
        if bytes.is_null() || length <= 0 {
            return Vec::new();
        }
        unsafe { std::slice::from_raw_parts(bytes.cast::<u8>(), length as usize) }.to_vec()
    }

    pub fn get_string(&self) -> BridgeResult<String> {
        let raw = self.checked("get_string")?;
        self.expect_type(raw, SlotType::String)?;
        String::from_utf8(self.read_bytes(raw)).map_err(|err| err.utf8_error().into())
    }

    /// Like [`Slot::get_string`], but `null` reads as `None`.
    pub fn get_optional_string(&self) -> BridgeResult<Option<String>> {
        let raw = self.checked("get_optional_string")?;
        if self.raw_type(raw) == SlotType::Null {
            return Ok(None);
        }
        self.get_string().map(Some)
    }

    /// Stores `value` by length, so interior NUL bytes survive.
    pub fn set_string(&self, value: &str) -> BridgeResult<()> {
        self.set_bytes(value.as_bytes())
    }

    pub fn get_bytes(&self) -> BridgeResult<Vec<u8>> {
        let raw = self.checked("get_bytes")?;
        self.expect_type(raw, SlotType::String)?;
        Ok(self.read_bytes(raw))
    }

    pub fn set_bytes(&self, value: &[u8]) -> BridgeResult<()> {
        let raw = self.checked("set_bytes")?;
        unsafe {
            (self.api().set_slot_bytes)(
                raw,
                self.c_index(),
                value.as_ptr().cast::<c_char>(),
                value.len(),
            )
        };
        Ok(())
    }

    pub fn set_null(&self) -> BridgeResult<()> {
        let raw = self.checked("set_null")?;
        unsafe { (self.api().set_slot_null)(raw, self.c_index()) };
        Ok(())
    }

    // ========== HANDLES ==========

    /// Pins the value in this slot so it outlives the current call.
    pub fn get_handle(&self) -> BridgeResult<CallHandle> {
        let raw = self.checked("get_handle")?;
        let handle = unsafe { (self.api().get_slot_handle)(raw, self.c_index()) };
        CallHandle::adopt(self.vm.inner(), handle, "get_handle")
    }

    pub fn set_handle(&self, handle: &CallHandle) -> BridgeResult<()> {
        let raw = self.checked("set_handle")?;
        let handle = handle.checked_raw(self.vm, "set_handle")?;
        unsafe { (self.api().set_slot_handle)(raw, self.c_index(), handle) };
        Ok(())
    }

    // ========== LISTS ==========

    pub fn set_new_list(&self) -> BridgeResult<()> {
        let raw = self.checked("set_new_list")?;
        unsafe { (self.api().set_slot_new_list)(raw, self.c_index()) };
        Ok(())
    }

    pub fn list_count(&self) -> BridgeResult<usize> {
        let raw = self.checked("list_count")?;
        self.expect_type(raw, SlotType::List)?;
        Ok(unsafe { (self.api().get_list_count)(raw, self.c_index()) }.max(0) as usize)
    }

    fn list_operands(
        &self,
        element: &Slot<'_>,
        operation: &'static str,
    ) -> BridgeResult<(*mut WrenVM, usize)> {
        element.ensure_same_vm(self.vm, operation)?;
        let raw = self.checked(operation)?;
        element.checked(operation)?;
        self.expect_type(raw, SlotType::List)?;
        let count = unsafe { (self.api().get_list_count)(raw, self.c_index()) }.max(0) as usize;
        Ok((raw, count))
    }

    /// Copies element `index` of the list in this slot into `element`.
    /// Negative indices count from the end.
    pub fn get_list_element(&self, index: i32, element: &Slot<'_>) -> BridgeResult<()> {
        let (raw, count) = self.list_operands(element, "get_list_element")?;
        check_list_index(index, count, count)?;
        unsafe { (self.api().get_list_element)(raw, self.c_index(), index, element.c_index()) };
        Ok(())
    }

    pub fn set_list_element(&self, index: i32, element: &Slot<'_>) -> BridgeResult<()> {
        let (raw, count) = self.list_operands(element, "set_list_element")?;
        check_list_index(index, count, count)?;
        unsafe { (self.api().set_list_element)(raw, self.c_index(), index, element.c_index()) };
        Ok(())
    }

    /// Inserts the value in `element` before position `index`; `-1` appends.
    pub fn insert_in_list(&self, index: i32, element: &Slot<'_>) -> BridgeResult<()> {
        let (raw, count) = self.list_operands(element, "insert_in_list")?;
        check_list_index(index, count + 1, count)?;
        unsafe { (self.api().insert_in_list)(raw, self.c_index(), index, element.c_index()) };
        Ok(())
    }

    // ========== MAPS ==========

    pub fn set_new_map(&self) -> BridgeResult<()> {
        let raw = self.checked("set_new_map")?;
        unsafe { (self.api().set_slot_new_map)(raw, self.c_index()) };
        Ok(())
    }

    pub fn map_count(&self) -> BridgeResult<usize> {
        let raw = self.checked("map_count")?;
        self.expect_type(raw, SlotType::Map)?;
        Ok(unsafe { (self.api().get_map_count)(raw, self.c_index()) }.max(0) as usize)
    }

    fn map_operands(
        &self,
        key: &Slot<'_>,
        other: Option<&Slot<'_>>,
        operation: &'static str,
    ) -> BridgeResult<*mut WrenVM> {
        key.ensure_same_vm(self.vm, operation)?;
        if let Some(other) = other {
            other.ensure_same_vm(self.vm, operation)?;
            other.checked(operation)?;
        }
        let raw = self.checked(operation)?;
        key.checked(operation)?;
        self.expect_type(raw, SlotType::Map)?;
        // `Unknown` covers class and range objects, which are valid keys, as
        // well as class instances, which are not. The slot type cannot tell
        // them apart, so `Unknown` keys are the caller's responsibility.
        match key.raw_type(raw) {
            actual @ (SlotType::List | SlotType::Map | SlotType::Foreign) => {
                Err(BridgeError::UnhashableKey {
                    index: key.index,
                    actual,
                })
            }
            _ => Ok(raw),
        }
    }

    pub fn map_contains_key(&self, key: &Slot<'_>) -> BridgeResult<bool> {
        let raw = self.map_operands(key, None, "map_contains_key")?;
        Ok(unsafe { (self.api().get_map_contains_key)(raw, self.c_index(), key.c_index()) })
    }

    /// Copies the value stored under `key` into `value` (null if absent).
    pub fn get_map_value(&self, key: &Slot<'_>, value: &Slot<'_>) -> BridgeResult<()> {
        let raw = self.map_operands(key, Some(value), "get_map_value")?;
        unsafe { (self.api().get_map_value)(raw, self.c_index(), key.c_index(), value.c_index()) };
        Ok(())
    }

    pub fn set_map_value(&self, key: &Slot<'_>, value: &Slot<'_>) -> BridgeResult<()> {
        let raw = self.map_operands(key, Some(value), "set_map_value")?;
        unsafe { (self.api().set_map_value)(raw, self.c_index(), key.c_index(), value.c_index()) };
        Ok(())
    }

    /// Removes `key`, leaving the removed value (or null) in `removed`.
    pub fn remove_map_value(&self, key: &Slot<'_>, removed: &Slot<'_>) -> BridgeResult<()> {
        let raw = self.map_operands(key, Some(removed), "remove_map_value")?;
        unsafe {
            (self.api().remove_map_value)(raw, self.c_index(), key.c_index(), removed.c_index())
        };
        Ok(())
    }

    // ========== FOREIGN OBJECTS ==========

    fn new_foreign(&self, class: &Slot<'_>, operation: &'static str) -> BridgeResult<ForeignPtr> {
        class.ensure_same_vm(self.vm, operation)?;
        let raw = self.checked(operation)?;
        class.checked(operation)?;

        let data = unsafe {
            (self.api().set_slot_new_foreign)(raw, self.c_index(), class.c_index(), FOREIGN_TAG_SIZE)
        };
        if data.is_null() {
            return Err(BridgeError::ForeignAllocationFailed { index: self.index });
        }
        unsafe { data.cast::<usize>().write_unaligned(self.vm.bridge().tag()) };
        Ok(ForeignPtr::from_raw(data))
    }

    /// Creates an instance of the foreign class in `class` and attaches
    /// `payload` to it by reference.
    pub fn set_new_foreign_object<T: Any + Send + Sync>(
        &self,
        class: &Slot<'_>,
        payload: Arc<T>,
    ) -> BridgeResult<ForeignPtr> {
        let ptr = self.new_foreign(class, "set_new_foreign_object")?;
        if self.vm.bridge().foreign().add_object(ptr, payload) {
            Ok(ptr)
        } else {
            Err(BridgeError::RegistrationConflict {
                what: "foreign object",
                addr: ptr.addr(),
            })
        }
    }

    /// Creates an instance of the foreign class in `class` holding a copy of
    /// `value`.
    pub fn set_new_foreign_struct<T: Any + Send + Sync + Copy>(
        &self,
        class: &Slot<'_>,
        value: T,
    ) -> BridgeResult<ForeignPtr> {
        let ptr = self.new_foreign(class, "set_new_foreign_struct")?;
        if self.vm.bridge().foreign().add_struct(ptr, value) {
            Ok(ptr)
        } else {
            Err(BridgeError::RegistrationConflict {
                what: "foreign object",
                addr: ptr.addr(),
            })
        }
    }

    pub fn get_foreign_ptr(&self) -> BridgeResult<ForeignPtr> {
        let raw = self.checked("get_foreign_ptr")?;
        self.expect_type(raw, SlotType::Foreign)?;
        let data = unsafe { (self.api().get_slot_foreign)(raw, self.c_index()) };
        Ok(ForeignPtr::from_raw(data))
    }

    pub fn get_foreign_object<T: Any + Send + Sync>(&self) -> BridgeResult<Arc<T>> {
        let ptr = self.get_foreign_ptr()?;
        self.vm.bridge().foreign().get_object(ptr)
    }

    pub fn get_foreign_struct<T: Any + Copy>(&self) -> BridgeResult<T> {
        let ptr = self.get_foreign_ptr()?;
        self.vm.bridge().foreign().get_struct(ptr)
    }

    /// Overwrites the struct payload of the foreign object in this slot.
    pub fn set_foreign_struct<T: Any + Send + Sync + Copy>(&self, value: T) -> BridgeResult<()> {
        let ptr = self.get_foreign_ptr()?;
        self.vm.bridge().foreign().set_struct(ptr, value)
    }

    /// True if the slot holds a foreign object whose payload is a `T`.
    pub fn is_foreign<T: Any>(&self) -> BridgeResult<bool> {
        let raw = self.checked("is_foreign")?;
        if self.raw_type(raw) != SlotType::Foreign {
            return Ok(false);
        }
        let ptr = self.get_foreign_ptr()?;
        Ok(self.vm.bridge().foreign().is::<T>(ptr))
    }
}

fn check_list_index(index: i32, upper: usize, count: usize) -> BridgeResult<()> {
    let index_wide = i64::from(index);
    let upper = upper as i64;
    if index_wide >= upper || index_wide < -upper {
        return Err(BridgeError::ListIndexOutOfRange { index, count });
    }
    Ok(())
}

impl fmt::Debug for Slot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("vm", &format_args!("{:#x}", self.vm.addr()))
            .field("index", &self.index)
            .finish()
    }
}
