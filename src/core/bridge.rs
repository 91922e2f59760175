use crate::core::config::VmConfig;
use crate::core::error::BridgeResult;
use crate::core::vm::Vm;
use crate::internal::binding_registry::ForeignBindingRegistry;
use crate::internal::foreign_data::ForeignDataRegistry;
use crate::internal::handle_table::HandleTable;
use crate::types::binding::{ForeignClassBinding, ForeignMethodBinding};
use crate::types::foreign::{ClassKey, MethodKey};
use std::fmt;
use std::sync::Arc;
use wren_interop_sys::{WrenApi, WrenVM};

pub(crate) struct BridgeShared {
    pub(crate) api: WrenApi,
    pub(crate) bindings: ForeignBindingRegistry,
    pub(crate) foreign: ForeignDataRegistry,
}

/// The registry service shared by a family of VMs.
///
/// A `Bridge` owns the native entry points, the foreign class and method
/// bindings, and the payloads of every foreign object created through it.
/// Cloning is cheap and yields another handle to the same service; separate
/// `Bridge::new` calls produce fully isolated services.
///
/// ```rust,ignore
/// let bridge = Bridge::new(api);
/// let print = bridge.register_method(ForeignMethodBinding::new(|vm| {
///     let text = vm.slot(1).get_string()?;
///     println!("{text}");
///     Ok(())
/// }));
///
/// let vm = bridge.create_vm(VmConfig::default())?;
/// vm.set_foreign_method_binder(move |_, sig| (sig.signature == "log(_)").then_some(print));
/// vm.interpret("main", "...")?;
/// ```
#[derive(Clone)]
pub struct Bridge {
    shared: Arc<BridgeShared>,
}

impl Bridge {
    pub fn new(api: WrenApi) -> Self {
        Self {
            shared: Arc::new(BridgeShared {
                api,
                bindings: ForeignBindingRegistry::new(),
                foreign: ForeignDataRegistry::new(),
            }),
        }
    }

    /// Service driving the linked `libwren`.
    #[cfg(feature = "link")]
    pub fn linked() -> Self {
        Self::new(WrenApi::linked())
    }

    pub fn create_vm(&self, config: VmConfig) -> BridgeResult<Vm> {
        Vm::new(self, config)
    }

    /// Non-owning view of a live VM created through this bridge.
    pub fn lookup_vm(&self, raw: *mut WrenVM) -> Option<Vm> {
        HandleTable::global()
            .lookup_vm(raw as usize)
            .filter(|inner| inner.bridge().same_service(self))
            .map(Vm::view)
    }

    pub fn vm_count(&self) -> usize {
        HandleTable::global().vm_count_where(|inner| inner.bridge().same_service(self))
    }

    pub fn api(&self) -> &WrenApi {
        &self.shared.api
    }

    pub fn bindings(&self) -> &ForeignBindingRegistry {
        &self.shared.bindings
    }

    pub fn foreign(&self) -> &ForeignDataRegistry {
        &self.shared.foreign
    }

    pub fn register_class(&self, binding: ForeignClassBinding) -> ClassKey {
        self.shared.bindings.register_class(binding)
    }

    pub fn register_method(&self, binding: ForeignMethodBinding) -> MethodKey {
        self.shared.bindings.register_method(binding)
    }

    pub fn same_service(&self, other: &Bridge) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Value written into every foreign object created through this bridge.
    pub(crate) fn tag(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("service", &format_args!("{:#x}", self.tag()))
            .field("classes", &self.shared.bindings.class_count())
            .field("methods", &self.shared.bindings.method_count())
            .field("foreign_objects", &self.shared.foreign.len())
            .finish()
    }
}
