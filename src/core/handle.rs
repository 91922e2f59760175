use crate::core::error::{BridgeError, BridgeResult};
use crate::core::vm::{Vm, VmInner};
use crate::internal::handle_table::HandleTable;
use std::fmt;
use std::sync::Arc;
use wren_interop_sys::WrenHandle;

/// A native handle pinning one VM value (or naming one method signature)
/// across host calls.
///
/// The handle is valid until it is released, either explicitly with
/// [`CallHandle::release`], by drop, or by the owning VM's disposal under
/// [`LeakedHandlePolicy::ForceRelease`](crate::core::config::LeakedHandlePolicy).
/// Using it afterwards fails with [`BridgeError::UseAfterDispose`].
pub struct CallHandle {
    raw: usize,
    id: u64,
    vm: Arc<VmInner>,
}

impl CallHandle {
    pub(crate) fn adopt(
        vm: &Arc<VmInner>,
        raw: *mut WrenHandle,
        operation: &'static str,
    ) -> BridgeResult<CallHandle> {
        if raw.is_null() {
            return Err(BridgeError::NullHandle { operation });
        }
        let id = HandleTable::global().register_handle(raw as usize, vm.addr())?;
        vm.track_handle(raw as usize, id);
        log::debug!("vm {:#x}: {operation} created handle {:#x}", vm.addr(), raw as usize);

        Ok(CallHandle {
            raw: raw as usize,
            id,
            vm: Arc::clone(vm),
        })
    }

    pub fn addr(&self) -> usize {
        self.raw
    }

    /// Address of the VM the handle belongs to.
    pub fn vm_addr(&self) -> usize {
        self.vm.addr()
    }

    pub fn belongs_to(&self, vm: &Vm) -> bool {
        Arc::ptr_eq(&self.vm, vm.inner())
    }

    pub fn is_valid(&self) -> bool {
        HandleTable::global().is_live_handle(self.raw, self.id)
    }

    /// Releases the native handle. Releasing twice is a no-op.
    pub fn release(&self) {
        if !HandleTable::global().forget_handle(self.raw, self.id) {
            return;
        }
        self.vm.untrack_handle(self.raw, self.id);
        if let Some(vm) = self.vm.raw() {
            unsafe { (self.vm.api().release_handle)(vm, self.raw as *mut WrenHandle) };
        }
        log::debug!("vm {:#x}: released handle {:#x}", self.vm.addr(), self.raw);
    }

    pub(crate) fn checked_raw(&self, vm: &Vm, operation: &'static str) -> BridgeResult<*mut WrenHandle> {
        if !self.belongs_to(vm) {
            return Err(BridgeError::CrossVmMisuse {
                operation,
                left: vm.addr(),
                right: self.vm.addr(),
            });
        }
        if !self.is_valid() {
            return Err(BridgeError::UseAfterDispose {
                what: "handle",
                addr: self.raw,
                operation,
            });
        }
        Ok(self.raw as *mut WrenHandle)
    }
}

impl Drop for CallHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("addr", &format_args!("{:#x}", self.raw))
            .field("vm", &format_args!("{:#x}", self.vm.addr()))
            .field("valid", &self.is_valid())
            .finish()
    }
}
