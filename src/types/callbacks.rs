use crate::core::error::BridgeResult;
use crate::core::vm::Vm;
use crate::types::enums::ErrorKind;
use crate::types::foreign::{ClassKey, FinalizedObject, MethodKey};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

// ========== VM LISTENERS ==========

/// Receives text printed by the script (`System.print` writes the text and
/// the trailing newline as two separate calls).
pub type WriteCallbackFn = dyn Fn(&Vm, &str) + Send + Sync;

/// Receives compile errors, runtime errors and stack-trace lines.
pub type ErrorCallbackFn = dyn Fn(&Vm, &ErrorInfo) + Send + Sync;

/// Maps `(importer, name)` to a canonical module name. `None` rejects the
/// import.
pub type ResolveModuleCallbackFn = dyn Fn(&Vm, &str, &str) -> Option<String> + Send + Sync;

/// Supplies the source of a module. `None` reports the module as missing.
pub type LoadModuleCallbackFn = dyn Fn(&Vm, &str) -> Option<String> + Send + Sync;

/// Picks the registered binding for a `foreign class` declaration.
/// Arguments are the module and the class name.
pub type BindForeignClassCallbackFn = dyn Fn(&Vm, &str, &str) -> Option<ClassKey> + Send + Sync;

/// Picks the registered binding for a `foreign` method declaration.
pub type BindForeignMethodCallbackFn =
    dyn Fn(&Vm, &MethodSignature) -> Option<MethodKey> + Send + Sync;

// ========== FOREIGN DELEGATES ==========

/// Host implementation of a foreign method. Arguments sit in slots
/// `1..`, the receiver in slot 0, and the result goes back into slot 0.
pub type ForeignMethodFn = dyn Fn(&Vm) -> BridgeResult<()> + Send + Sync;

/// Allocator of a foreign class. Must place a new foreign object in slot 0
/// (the class is in slot 0, constructor arguments in `1..`).
pub type ForeignAllocatorFn = dyn Fn(&Vm) -> BridgeResult<()> + Send + Sync;

/// Class-level finalizer, run when the VM collects an instance.
pub type ForeignFinalizerFn = dyn for<'a> Fn(&FinalizedObject<'a>) + Send + Sync;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub module: Option<String>,
    pub line: i32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub module: String,
    pub class_name: String,
    pub is_static: bool,
    pub signature: String,
}

/// Per-VM listener bundle.
#[derive(Clone, Default)]
pub struct Listeners {
    pub(crate) write: Option<Arc<WriteCallbackFn>>,
    pub(crate) error: Option<Arc<ErrorCallbackFn>>,
    pub(crate) resolve_module: Option<Arc<ResolveModuleCallbackFn>>,
    pub(crate) load_module: Option<Arc<LoadModuleCallbackFn>>,
    pub(crate) bind_foreign_class: Option<Arc<BindForeignClassCallbackFn>>,
    pub(crate) bind_foreign_method: Option<Arc<BindForeignMethodCallbackFn>>,
    pub(crate) user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("write", &self.write.is_some())
            .field("error", &self.error.is_some())
            .field("resolve_module", &self.resolve_module.is_some())
            .field("load_module", &self.load_module.is_some())
            .field("bind_foreign_class", &self.bind_foreign_class.is_some())
            .field("bind_foreign_method", &self.bind_foreign_method.is_some())
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}
