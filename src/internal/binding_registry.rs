//! Stable keys for host delegates reachable from native code.
//!
//! The native VM stores a binding's key as opaque user data and hands it
//! back to one of the fixed trampolines. Keys are minted here from a counter,
//! so they never depend on where a delegate happens to live, and the
//! registry keeps every delegate alive for its own lifetime.

use crate::internal::pointer_registry::PointerRegistry;
use crate::types::binding::{ForeignClassBinding, ForeignMethodBinding};
use crate::types::foreign::{ClassKey, MethodKey};
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct ForeignBindingRegistry {
    next_key: AtomicUsize,
    classes: PointerRegistry<ForeignClassBinding>,
    methods: PointerRegistry<ForeignMethodBinding>,
    // delegate identity -> key, so re-registering a binding is idempotent
    class_index: PointerRegistry<ClassKey>,
    method_index: PointerRegistry<MethodKey>,
}

impl Default for ForeignBindingRegistry {
    fn default() -> Self {
        Self {
            next_key: AtomicUsize::new(1),
            classes: PointerRegistry::new(),
            methods: PointerRegistry::new(),
            class_index: PointerRegistry::new(),
            method_index: PointerRegistry::new(),
        }
    }
}

impl ForeignBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint(&self) -> usize {
        self.next_key.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a foreign class binding. Registering the same binding (or a
    /// clone of it) again returns the first key.
    pub fn register_class(&self, binding: ForeignClassBinding) -> ClassKey {
        let identity = binding.identity();
        if let Some(key) = self.class_index.try_get(identity) {
            return key;
        }

        let raw = self.mint();
        let Some(key) = ClassKey::from_raw(raw) else {
            unreachable!("binding keys start at 1");
        };
        self.classes.try_add(raw, binding);
        if self.class_index.try_add(identity, key) {
            log::trace!("registered foreign class binding {raw}");
            return key;
        }

        // Lost a race against the same binding; keep the winner's key.
        self.classes.remove(raw);
        self.class_index.try_get(identity).unwrap_or(key)
    }

    /// Registers a foreign method binding, first registration wins.
    pub fn register_method(&self, binding: ForeignMethodBinding) -> MethodKey {
        let identity = binding.identity();
        if let Some(key) = self.method_index.try_get(identity) {
            return key;
        }

        let raw = self.mint();
        let Some(key) = MethodKey::from_raw(raw) else {
            unreachable!("binding keys start at 1");
        };
        self.methods.try_add(raw, binding);
        if self.method_index.try_add(identity, key) {
            log::trace!("registered foreign method binding {raw}");
            return key;
        }

        self.methods.remove(raw);
        self.method_index.try_get(identity).unwrap_or(key)
    }

    pub fn resolve_class(&self, key: ClassKey) -> Option<ForeignClassBinding> {
        self.classes.try_get(key.get())
    }

    pub fn resolve_method(&self, key: MethodKey) -> Option<ForeignMethodBinding> {
        self.methods.try_get(key.get())
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn keys_are_distinct_and_resolvable() {
        let registry = ForeignBindingRegistry::new();
        let a = registry.register_class(ForeignClassBinding::new(|_| Ok(())));
        let b = registry.register_class(ForeignClassBinding::new(|_| Ok(())));
        assert_ne!(a, b);
        assert!(registry.resolve_class(a).is_some());
        assert!(registry.resolve_class(b).is_some());
        assert_eq!(registry.class_count(), 2);
    }

    #[test]
    fn re_registration_returns_first_key() {
        let registry = ForeignBindingRegistry::new();
        let binding = ForeignClassBinding::new(|_| Ok(()));
        let first = registry.register_class(binding.clone());
        let second = registry.register_class(binding.clone().with_finalizer(|_| {}));
        assert_eq!(first, second);
        assert_eq!(registry.class_count(), 1);
        assert!(registry.resolve_class(first).unwrap().finalizer().is_none());
    }

    #[test]
    fn method_labels_survive_registration() {
        let registry = ForeignBindingRegistry::new();
        let key = registry.register_method(ForeignMethodBinding::new(|_| Ok(())).with_label("Math.add"));
        assert_eq!(registry.resolve_method(key).unwrap().label(), Some("Math.add"));
        assert_eq!(registry.method_count(), 1);
    }

    #[test]
    fn unknown_keys_resolve_to_none() {
        let registry = ForeignBindingRegistry::new();
        assert!(registry.resolve_method(MethodKey::from_raw(99).unwrap()).is_none());
        assert!(registry.resolve_class(ClassKey::from_raw(99).unwrap()).is_none());
    }

    #[test]
    fn concurrent_registration_of_one_binding_yields_one_key() {
        let registry = Arc::new(ForeignBindingRegistry::new());
        let binding = ForeignMethodBinding::new(|_| Ok(()));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let binding = binding.clone();
                thread::spawn(move || registry.register_method(binding))
            })
            .collect();
        let keys: Vec<MethodKey> = workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert!(keys.iter().all(|key| *key == keys[0]));
        assert_eq!(registry.method_count(), 1);
    }
}
