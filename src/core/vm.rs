use crate::core::bridge::Bridge;
use crate::core::config::{LeakedHandlePolicy, VmConfig};
use crate::core::error::{BridgeError, BridgeResult, fatal};
use crate::core::handle::CallHandle;
use crate::core::slot::Slot;
use crate::internal::dispatcher;
use crate::internal::handle_table::HandleTable;
use crate::types::callbacks::{ErrorInfo, Listeners, MethodSignature};
use crate::types::enums::InterpretResult;
use crate::types::foreign::{ClassKey, MethodKey};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::ffi::{CString, c_int};
use std::fmt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::thread;
use wren_interop_sys::{WrenApi, WrenConfiguration, WrenHandle, WrenVM};

/// Number of slot views [`Vm::slots`] hands out up front.
pub const PREADDRESSED_SLOTS: usize = 16;

/// Host state of one native VM, shared by the owning [`Vm`], its views and
/// its call handles.
pub(crate) struct VmInner {
    raw: AtomicPtr<WrenVM>,
    addr: usize,
    bridge: Bridge,
    policy: LeakedHandlePolicy,
    listeners: RwLock<Listeners>,
    // (handle address, generation) in registration order
    outstanding: Mutex<Vec<(usize, u64)>>,
}

impl VmInner {
    pub(crate) fn addr(&self) -> usize {
        self.addr
    }

    pub(crate) fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    pub(crate) fn api(&self) -> &WrenApi {
        self.bridge.api()
    }

    /// Native pointer, or `None` once the VM has been disposed.
    pub(crate) fn raw(&self) -> Option<*mut WrenVM> {
        let raw = self.raw.load(Ordering::Acquire);
        (!raw.is_null()).then_some(raw)
    }

    pub(crate) fn live(&self, operation: &'static str) -> BridgeResult<*mut WrenVM> {
        self.raw().ok_or(BridgeError::UseAfterDispose {
            what: "vm",
            addr: self.addr,
            operation,
        })
    }

    /// Snapshot of the listeners so none of them runs under the lock.
    pub(crate) fn listeners(&self) -> Listeners {
        self.listeners.read().clone()
    }

    pub(crate) fn track_handle(&self, addr: usize, id: u64) {
        self.outstanding.lock().push((addr, id));
    }

    pub(crate) fn untrack_handle(&self, addr: usize, id: u64) {
        self.outstanding.lock().retain(|entry| *entry != (addr, id));
    }

    fn force_release_handles(&self, raw: *mut WrenVM) {
        let handles = std::mem::take(&mut *self.outstanding.lock());
        for (handle, id) in handles.into_iter().rev() {
            if HandleTable::global().forget_handle(handle, id) {
                unsafe { (self.api().release_handle)(raw, handle as *mut WrenHandle) };
                log::debug!("vm {:#x}: force-released handle {handle:#x}", self.addr);
            }
        }
    }
}

/// One native Wren VM.
///
/// The value returned by [`Vm::new`] (or [`Bridge::create_vm`]) owns the
/// native VM and frees it on [`Vm::dispose`] or drop. Listeners and foreign
/// delegates receive non-owning views of the same VM; every view turns into
/// [`BridgeError::UseAfterDispose`] once the owner is gone.
///
/// A VM is single-threaded: it may move between threads, but two calls into
/// the same VM must never run at the same time.
///
/// # Examples
///
/// ```rust,ignore
/// let vm = bridge.create_vm(VmConfig::default())?;
/// vm.set_write_listener(|_, text| print!("{text}"));
///
/// assert!(vm.interpret("main", "System.print(\"hi\")")?.is_success());
/// vm.dispose();
/// ```
pub struct Vm {
    inner: Arc<VmInner>,
    is_root: bool,
}

impl Vm {
    /// Creates a native VM wired to the bridge's callback trampolines and
    /// registers it in the process-wide VM table.
    pub fn new(bridge: &Bridge, config: VmConfig) -> BridgeResult<Vm> {
        let api = bridge.api();
        let mut native = WrenConfiguration::default();
        unsafe { (api.init_configuration)(&mut native) };
        config.apply(&mut native);
        dispatcher::install(&mut native);

        let raw = unsafe { (api.new_vm)(&mut native) };
        if raw.is_null() {
            return Err(BridgeError::FailedToCreateVm);
        }

        let inner = Arc::new(VmInner {
            raw: AtomicPtr::new(raw),
            addr: raw as usize,
            bridge: bridge.clone(),
            policy: config.leaked_handle_policy(),
            listeners: RwLock::new(Listeners::default()),
            outstanding: Mutex::new(Vec::new()),
        });
        if let Err(err) = HandleTable::global().register_vm(Arc::clone(&inner)) {
            fatal(err);
        }

        log::debug!("created vm {:#x}", inner.addr);
        Ok(Vm { inner, is_root: true })
    }

    pub(crate) fn view(inner: Arc<VmInner>) -> Vm {
        Vm {
            inner,
            is_root: false,
        }
    }

    pub(crate) fn inner(&self) -> &Arc<VmInner> {
        &self.inner
    }

    pub(crate) fn api(&self) -> &WrenApi {
        self.inner.api()
    }

    pub(crate) fn raw_checked(&self, operation: &'static str) -> BridgeResult<*mut WrenVM> {
        self.inner.live(operation)
    }

    /// Frees the native VM.
    ///
    /// Call handles that were never released are handled according to the
    /// VM's [`LeakedHandlePolicy`]. Disposing a non-owning view does nothing.
    pub fn dispose(self) {
        if !self.is_root {
            log::warn!("vm {:#x}: dispose called on a non-owning view", self.inner.addr);
            return;
        }
        self.shutdown();
    }

    fn shutdown(&self) {
        let Some(raw) = self.inner.raw() else {
            return;
        };

        let leaked = self.inner.outstanding.lock().len();
        if leaked > 0 {
            match self.inner.policy {
                LeakedHandlePolicy::Panic => {
                    let message = format!(
                        "vm {:#x} disposed with {leaked} unreleased call handle(s)",
                        self.inner.addr
                    );
                    log::error!("{message}");
                    panic!("{message}");
                }
                LeakedHandlePolicy::ForceRelease => {
                    log::warn!(
                        "vm {:#x} disposed with {leaked} unreleased call handle(s); releasing them",
                        self.inner.addr
                    );
                    self.inner.force_release_handles(raw);
                }
            }
        }

        if self
            .inner
            .raw
            .compare_exchange(raw, ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // The address may be handed out again by the allocator as soon as the
        // VM is freed, so it leaves the table first.
        HandleTable::global().unregister_vm(self.inner.addr);
        unsafe { (self.api().free_vm)(raw) };
        log::debug!("disposed vm {:#x}", self.inner.addr);
    }

    // ========== IDENTITY ==========

    /// Native pointer, null after disposal.
    pub fn as_raw(&self) -> *mut WrenVM {
        self.inner.raw().unwrap_or(ptr::null_mut())
    }

    /// Address the VM was registered under. Stays the same after disposal.
    pub fn addr(&self) -> usize {
        self.inner.addr
    }

    pub fn is_alive(&self) -> bool {
        self.inner.raw().is_some()
    }

    /// True for the handle that owns the native VM.
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// True if both values refer to the same VM.
    pub fn same_vm(&self, other: &Vm) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn bridge(&self) -> &Bridge {
        &self.inner.bridge
    }

    /// Number of call handles created for this VM and not yet released.
    pub fn outstanding_handles(&self) -> usize {
        self.inner.outstanding.lock().len()
    }

    // ========== EXECUTION ==========

    /// Compiles and runs `source` as module `module`.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn interpret(&self, module: &str, source: &str) -> BridgeResult<InterpretResult> {
        let raw = self.raw_checked("interpret")?;
        let module = CString::new(module)?;
        let source = CString::new(source)?;
        let result = unsafe { (self.api().interpret)(raw, module.as_ptr(), source.as_ptr()) };
        Ok(InterpretResult::from(result))
    }

    /// Invokes a method handle. The receiver goes in slot 0 and the
    /// arguments after it; the return value replaces slot 0.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub fn call(&self, method: &CallHandle) -> BridgeResult<InterpretResult> {
        let raw = self.raw_checked("call")?;
        let handle = method.checked_raw(self, "call")?;
        let result = unsafe { (self.api().call)(raw, handle) };
        Ok(InterpretResult::from(result))
    }

    /// Creates a handle for calling the method with `signature`, such as
    /// `"update(_,_)"`.
    pub fn make_call_handle(&self, signature: &str) -> BridgeResult<CallHandle> {
        let raw = self.raw_checked("make_call_handle")?;
        let signature = CString::new(signature)?;
        let handle = unsafe { (self.api().make_call_handle)(raw, signature.as_ptr()) };
        CallHandle::adopt(&self.inner, handle, "make_call_handle")
    }

    pub fn collect_garbage(&self) -> BridgeResult<()> {
        let raw = self.raw_checked("collect_garbage")?;
        unsafe { (self.api().collect_garbage)(raw) };
        Ok(())
    }

    // ========== SLOTS ==========

    /// Makes sure at least `count` slots are addressable.
    pub fn ensure_slots(&self, count: usize) -> BridgeResult<()> {
        let raw = self.raw_checked("ensure_slots")?;
        let count = c_int::try_from(count).unwrap_or(c_int::MAX);
        unsafe { (self.api().ensure_slots)(raw, count) };
        Ok(())
    }

    pub fn slot_count(&self) -> BridgeResult<usize> {
        let raw = self.raw_checked("slot_count")?;
        let count = unsafe { (self.api().get_slot_count)(raw) };
        Ok(count.max(0) as usize)
    }

    /// View of slot `index`. Range is checked by each accessor, not here.
    pub fn slot(&self, index: usize) -> Slot<'_> {
        Slot::new(self, index)
    }

    pub fn slots(&self) -> [Slot<'_>; PREADDRESSED_SLOTS] {
        std::array::from_fn(|index| Slot::new(self, index))
    }

    // ========== MODULES ==========

    pub fn has_module(&self, module: &str) -> BridgeResult<bool> {
        let raw = self.raw_checked("has_module")?;
        let module = CString::new(module)?;
        Ok(unsafe { (self.api().has_module)(raw, module.as_ptr()) })
    }

    /// Fails with [`BridgeError::ModuleNotFound`] if `module` is not loaded.
    pub fn has_variable(&self, module: &str, name: &str) -> BridgeResult<bool> {
        let raw = self.raw_checked("has_variable")?;
        if !self.has_module(module)? {
            return Err(BridgeError::ModuleNotFound(module.to_string()));
        }
        let module = CString::new(module)?;
        let name = CString::new(name)?;
        Ok(unsafe { (self.api().has_variable)(raw, module.as_ptr(), name.as_ptr()) })
    }

    /// Loads the top-level variable `name` of `module` into `slot`.
    pub fn get_variable(&self, module: &str, name: &str, slot: &Slot<'_>) -> BridgeResult<()> {
        slot.ensure_same_vm(self, "get_variable")?;
        let raw = slot.checked("get_variable")?;
        if !self.has_variable(module, name)? {
            return Err(BridgeError::VariableNotFound {
                module: module.to_string(),
                name: name.to_string(),
            });
        }
        let module = CString::new(module)?;
        let name = CString::new(name)?;
        unsafe { (self.api().get_variable)(raw, module.as_ptr(), name.as_ptr(), slot.c_index()) };
        Ok(())
    }

    // ========== FIBERS ==========

    /// Aborts the running fiber with the value in `error` as its error.
    pub fn abort_fiber(&self, error: &Slot<'_>) -> BridgeResult<()> {
        error.ensure_same_vm(self, "abort_fiber")?;
        let raw = error.checked("abort_fiber")?;
        unsafe { (self.api().abort_fiber)(raw, error.c_index()) };
        Ok(())
    }

    /// Aborts the running fiber with a string error, using slot 0.
    pub fn abort_fiber_with_message(&self, message: &str) -> BridgeResult<()> {
        self.ensure_slots(1)?;
        let slot = self.slot(0);
        slot.set_string(message)?;
        self.abort_fiber(&slot)
    }

    // ========== LISTENERS ==========

    pub fn set_write_listener<F>(&self, listener: F)
    where
        F: Fn(&Vm, &str) + Send + Sync + 'static,
    {
        self.inner.listeners.write().write = Some(Arc::new(listener));
    }

    pub fn set_error_listener<F>(&self, listener: F)
    where
        F: Fn(&Vm, &ErrorInfo) + Send + Sync + 'static,
    {
        self.inner.listeners.write().error = Some(Arc::new(listener));
    }

    /// Without a resolver, import names are used as they are.
    pub fn set_module_resolver<F>(&self, resolver: F)
    where
        F: Fn(&Vm, &str, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.inner.listeners.write().resolve_module = Some(Arc::new(resolver));
    }

    /// Without a loader, every import is reported as missing.
    pub fn set_module_loader<F>(&self, loader: F)
    where
        F: Fn(&Vm, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.inner.listeners.write().load_module = Some(Arc::new(loader));
    }

    pub fn set_foreign_class_binder<F>(&self, binder: F)
    where
        F: Fn(&Vm, &str, &str) -> Option<ClassKey> + Send + Sync + 'static,
    {
        self.inner.listeners.write().bind_foreign_class = Some(Arc::new(binder));
    }

    pub fn set_foreign_method_binder<F>(&self, binder: F)
    where
        F: Fn(&Vm, &MethodSignature) -> Option<MethodKey> + Send + Sync + 'static,
    {
        self.inner.listeners.write().bind_foreign_method = Some(Arc::new(binder));
    }

    pub fn clear_write_listener(&self) {
        self.inner.listeners.write().write = None;
    }

    pub fn clear_error_listener(&self) {
        self.inner.listeners.write().error = None;
    }

    pub fn clear_module_resolver(&self) {
        self.inner.listeners.write().resolve_module = None;
    }

    pub fn clear_module_loader(&self) {
        self.inner.listeners.write().load_module = None;
    }

    pub fn clear_foreign_class_binder(&self) {
        self.inner.listeners.write().bind_foreign_class = None;
    }

    pub fn clear_foreign_method_binder(&self) {
        self.inner.listeners.write().bind_foreign_method = None;
    }

    /// Removes every listener and the user data.
    pub fn clear_listeners(&self) {
        *self.inner.listeners.write() = Listeners::default();
    }

    // ========== USER DATA ==========

    pub fn set_user_data<T: Any + Send + Sync>(&self, value: T) {
        self.inner.listeners.write().user_data = Some(Arc::new(value));
    }

    pub fn user_data<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let data = self.inner.listeners.read().user_data.clone()?;
        data.downcast::<T>().ok()
    }

    pub fn clear_user_data(&self) {
        self.inner.listeners.write().user_data = None;
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        if self.is_root && !thread::panicking() {
            self.shutdown();
        }
    }
}

impl Clone for Vm {
    /// Clones are non-owning views.
    fn clone(&self) -> Self {
        Vm::view(Arc::clone(&self.inner))
    }
}

impl fmt::Debug for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vm")
            .field("addr", &format_args!("{:#x}", self.inner.addr))
            .field("alive", &self.is_alive())
            .field("is_root", &self.is_root)
            .field("outstanding_handles", &self.outstanding_handles())
            .finish()
    }
}
