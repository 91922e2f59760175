use wren_interop_sys::WrenConfiguration;

/// What [`Vm::dispose`](crate::core::vm::Vm::dispose) does when call handles
/// created for the VM were never released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeakedHandlePolicy {
    /// Report the leak and panic before anything is freed.
    Panic,
    /// Log a warning and release the handles, most recent first, before the
    /// VM is freed.
    ForceRelease,
}

impl Default for LeakedHandlePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            LeakedHandlePolicy::Panic
        } else {
            LeakedHandlePolicy::ForceRelease
        }
    }
}

/// Settings for a new VM.
///
/// Heap settings left unset (or set to zero) keep the native defaults.
///
/// ```rust,ignore
/// let config = VmConfig::new()
///     .with_initial_heap_size(4 * 1024 * 1024)
///     .with_leaked_handle_policy(LeakedHandlePolicy::ForceRelease);
/// let vm = bridge.create_vm(config)?;
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmConfig {
    initial_heap_size: Option<usize>,
    min_heap_size: Option<usize>,
    heap_growth_percent: Option<u32>,
    leaked_handle_policy: LeakedHandlePolicy,
}

impl VmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_heap_size(mut self, bytes: usize) -> Self {
        self.initial_heap_size = Some(bytes);
        self
    }

    pub fn with_min_heap_size(mut self, bytes: usize) -> Self {
        self.min_heap_size = Some(bytes);
        self
    }

    pub fn with_heap_growth_percent(mut self, percent: u32) -> Self {
        self.heap_growth_percent = Some(percent);
        self
    }

    pub fn with_leaked_handle_policy(mut self, policy: LeakedHandlePolicy) -> Self {
        self.leaked_handle_policy = policy;
        self
    }

    pub fn leaked_handle_policy(&self) -> LeakedHandlePolicy {
        self.leaked_handle_policy
    }

    pub(crate) fn apply(&self, native: &mut WrenConfiguration) {
        if let Some(bytes) = self.initial_heap_size.filter(|bytes| *bytes > 0) {
            native.initial_heap_size = bytes;
        }
        if let Some(bytes) = self.min_heap_size.filter(|bytes| *bytes > 0) {
            native.min_heap_size = bytes;
        }
        if let Some(percent) = self.heap_growth_percent.filter(|percent| *percent > 0) {
            native.heap_growth_percent = percent.min(i32::MAX as u32) as i32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_and_zero_keep_native_defaults() {
        let mut native = WrenConfiguration::default();
        VmConfig::new().with_min_heap_size(0).apply(&mut native);
        assert_eq!(native.initial_heap_size, WrenConfiguration::default().initial_heap_size);
        assert_eq!(native.min_heap_size, WrenConfiguration::default().min_heap_size);
        assert_eq!(native.heap_growth_percent, 50);
    }

    #[test]
    fn explicit_values_override() {
        let mut native = WrenConfiguration::default();
        VmConfig::new()
            .with_initial_heap_size(4096)
            .with_min_heap_size(1024)
            .with_heap_growth_percent(25)
            .apply(&mut native);
        assert_eq!(native.initial_heap_size, 4096);
        assert_eq!(native.min_heap_size, 1024);
        assert_eq!(native.heap_growth_percent, 25);
    }

    #[test]
    fn policy_follows_build_profile() {
        let expected = if cfg!(debug_assertions) {
            LeakedHandlePolicy::Panic
        } else {
            LeakedHandlePolicy::ForceRelease
        };
        assert_eq!(VmConfig::default().leaked_handle_policy(), expected);
    }
}
