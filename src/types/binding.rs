use crate::core::error::BridgeResult;
use crate::core::vm::Vm;
use crate::types::callbacks::{ForeignAllocatorFn, ForeignFinalizerFn, ForeignMethodFn};
use crate::types::foreign::FinalizedObject;
use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Host side of a `foreign class`: an allocator plus an optional finalizer.
///
/// There is no way to build a binding without an allocator. Clones share the
/// same delegates, and registering a clone yields the key of the original.
#[derive(Clone)]
pub struct ForeignClassBinding {
    allocator: Arc<ForeignAllocatorFn>,
    finalizer: Option<Arc<ForeignFinalizerFn>>,
}

impl ForeignClassBinding {
    pub fn new<F>(allocator: F) -> Self
    where
        F: Fn(&Vm) -> BridgeResult<()> + Send + Sync + 'static,
    {
        Self {
            allocator: Arc::new(allocator),
            finalizer: None,
        }
    }

    /// Binding whose allocator stores the value built by `make` as an
    /// object-style payload in slot 0.
    pub fn object<T, F>(make: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&Vm) -> BridgeResult<T> + Send + Sync + 'static,
    {
        Self::new(move |vm| {
            let value = make(vm)?;
            let slot = vm.slot(0);
            slot.set_new_foreign_object(&slot, Arc::new(value))?;
            Ok(())
        })
    }

    /// Binding whose allocator copies the value built by `make` into a
    /// struct-style payload in slot 0.
    pub fn value<T, F>(make: F) -> Self
    where
        T: Any + Send + Sync + Copy,
        F: Fn(&Vm) -> BridgeResult<T> + Send + Sync + 'static,
    {
        Self::new(move |vm| {
            let value = make(vm)?;
            let slot = vm.slot(0);
            slot.set_new_foreign_struct(&slot, value)?;
            Ok(())
        })
    }

    pub fn with_finalizer<F>(mut self, finalizer: F) -> Self
    where
        F: for<'a> Fn(&FinalizedObject<'a>) + Send + Sync + 'static,
    {
        self.finalizer = Some(Arc::new(finalizer));
        self
    }

    pub fn allocator(&self) -> &Arc<ForeignAllocatorFn> {
        &self.allocator
    }

    pub fn finalizer(&self) -> Option<&Arc<ForeignFinalizerFn>> {
        self.finalizer.as_ref()
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.allocator) as *const () as usize
    }
}

impl fmt::Debug for ForeignClassBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignClassBinding")
            .field("allocator", &format_args!("{:#x}", self.identity()))
            .field("finalizer", &self.finalizer.is_some())
            .finish()
    }
}

/// Host side of a `foreign` method.
#[derive(Clone)]
pub struct ForeignMethodBinding {
    method: Arc<ForeignMethodFn>,
    label: Option<Cow<'static, str>>,
}

impl ForeignMethodBinding {
    pub fn new<F>(method: F) -> Self
    where
        F: Fn(&Vm) -> BridgeResult<()> + Send + Sync + 'static,
    {
        Self {
            method: Arc::new(method),
            label: None,
        }
    }

    /// Name reported to the profiler when the method runs.
    pub fn with_label(mut self, label: impl Into<Cow<'static, str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn method(&self) -> &Arc<ForeignMethodFn> {
        &self.method
    }

    pub(crate) fn identity(&self) -> usize {
        Arc::as_ptr(&self.method) as *const () as usize
    }
}

impl fmt::Debug for ForeignMethodBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignMethodBinding")
            .field("method", &format_args!("{:#x}", self.identity()))
            .field("label", &self.label)
            .finish()
    }
}
