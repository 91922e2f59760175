//! Host-side bridge to the Wren virtual machine.
//!
//! The crate keeps track of native VMs, call handles, foreign class and
//! method bindings, and the host payloads of foreign objects, so that native
//! pointers handed back through callbacks can always be mapped to live host
//! state, or rejected safely when they cannot.

pub mod core;
mod internal;

pub mod types;

pub use internal::binding_registry::ForeignBindingRegistry;
pub use internal::foreign_data::{ForeignDataRegistry, PayloadKind};
pub use internal::pointer_registry::PointerRegistry;

// Re-export main types
pub mod prelude {
    pub use crate::core::bridge::*;
    pub use crate::core::config::*;
    pub use crate::core::error::{BridgeError, BridgeResult};
    pub use crate::core::handle::*;
    pub use crate::core::slot::*;
    pub use crate::core::vm::{PREADDRESSED_SLOTS, Vm};
    pub use crate::types::binding::*;
    pub use crate::types::callbacks::{ErrorInfo, MethodSignature};
    pub use crate::types::enums::*;
    pub use crate::types::foreign::*;
    pub use crate::{ForeignBindingRegistry, ForeignDataRegistry, PayloadKind, PointerRegistry};
    pub use wren_interop_sys::{WrenApi, WrenVM};
}
