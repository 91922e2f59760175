//! Identity of live VMs and call handles.
//!
//! Native callbacks carry nothing but the VM pointer, so the table that maps
//! it back to the host state is process-wide. Handles are recorded with a
//! generation id: a released handle whose address the native allocator hands
//! out again is not mistaken for the new one.

use crate::core::error::{BridgeError, BridgeResult};
use crate::core::vm::VmInner;
use crate::internal::pointer_registry::PointerRegistry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static HANDLE_TABLE: OnceLock<HandleTable> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HandleRecord {
    pub id: u64,
    pub vm: usize,
}

pub(crate) struct HandleTable {
    vms: PointerRegistry<Arc<VmInner>>,
    handles: PointerRegistry<HandleRecord>,
    next_handle_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            vms: PointerRegistry::new(),
            handles: PointerRegistry::new(),
            next_handle_id: AtomicU64::new(1),
        }
    }

    pub fn global() -> &'static HandleTable {
        HANDLE_TABLE.get_or_init(HandleTable::new)
    }

    // ========== VMS ==========

    pub fn register_vm(&self, vm: Arc<VmInner>) -> BridgeResult<()> {
        let addr = vm.addr();
        if self.vms.try_add(addr, vm) {
            Ok(())
        } else {
            Err(BridgeError::RegistrationConflict { what: "vm", addr })
        }
    }

    /// `None` means the pointer is not a VM this process manages.
    pub fn lookup_vm(&self, addr: usize) -> Option<Arc<VmInner>> {
        self.vms.try_get(addr)
    }

    pub fn unregister_vm(&self, addr: usize) -> Option<Arc<VmInner>> {
        self.vms.remove(addr)
    }

    pub fn vm_count_where(&self, predicate: impl Fn(&VmInner) -> bool) -> usize {
        self.vms.count_where(|vm| predicate(vm))
    }

    // ========== HANDLES ==========

    /// Records a handle the native side just created and returns its
    /// generation id.
    pub fn register_handle(&self, addr: usize, vm: usize) -> BridgeResult<u64> {
        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        if self.handles.try_add(addr, HandleRecord { id, vm }) {
            Ok(id)
        } else {
            Err(BridgeError::RegistrationConflict { what: "handle", addr })
        }
    }

    pub fn is_live_handle(&self, addr: usize, id: u64) -> bool {
        self.handles.with(addr, |record| record.id == id).unwrap_or(false)
    }

    /// Drops the record for `addr` if it still belongs to generation `id`.
    /// Exactly one caller observes `true`.
    pub fn forget_handle(&self, addr: usize, id: u64) -> bool {
        self.handles.remove_if(addr, |record| record.id == id).is_some()
    }

    #[cfg(test)]
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}
