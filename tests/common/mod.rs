#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use wren_interop::prelude::*;

/// A fresh, isolated bridge service driving the mock VM.
pub fn bridge() -> Bridge {
    Bridge::new(wren_interop_mock::api())
}

pub fn vm(bridge: &Bridge) -> Vm {
    bridge
        .create_vm(VmConfig::default().with_leaked_handle_policy(LeakedHandlePolicy::ForceRelease))
        .expect("vm creation")
}

/// Records every write callback, one entry per invocation.
pub fn capture_writes(vm: &Vm) -> Arc<Mutex<Vec<String>>> {
    let writes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&writes);
    vm.set_write_listener(move |_, text| sink.lock().push(text.to_string()));
    writes
}

pub fn capture_errors(vm: &Vm) -> Arc<Mutex<Vec<ErrorInfo>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    vm.set_error_listener(move |_, info| sink.lock().push(info.clone()));
    errors
}

/// Binds every `foreign` method of the script to `key`.
pub fn bind_all_methods(vm: &Vm, key: MethodKey) {
    vm.set_foreign_method_binder(move |_, _| Some(key));
}
