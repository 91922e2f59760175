//! Host payloads attached to native foreign objects.
//!
//! The native side only ever hands back a data pointer, so each pointer keeps
//! a [`TypeTag`] next to its payload. Lookups check the tag before
//! downcasting, and the type-erased finalizer trampoline uses it to pick the
//! typed cleanup registered for that payload type.
//!
//! Entries are removed by [`ForeignDataRegistry::finalize`] only, which the
//! dispatcher calls when the VM finalizes the object. Host reachability is
//! never used to decide that a pointer is dead.

use crate::core::error::{BridgeError, BridgeResult};
use crate::internal::pointer_registry::PointerRegistry;
use crate::types::callbacks::ForeignFinalizerFn;
use crate::types::foreign::{FinalizedObject, ForeignPtr, TypeTag};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::{Any, TypeId, type_name};
use std::sync::Arc;

type TypedFinalizer = Arc<dyn Fn(&(dyn Any + Send + Sync)) + Send + Sync>;

/// How a payload is held.
enum Payload {
    /// Shared reference to a host object with its own identity.
    Object(Arc<dyn Any + Send + Sync>),
    /// Value copied into the registry; may be overwritten in place.
    Struct(Box<dyn Any + Send + Sync>),
}

impl Payload {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        match self {
            Payload::Object(object) => object.as_ref(),
            Payload::Struct(value) => value.as_ref(),
        }
    }

    fn kind(&self) -> PayloadKind {
        match self {
            Payload::Object(_) => PayloadKind::Object,
            Payload::Struct(_) => PayloadKind::Struct,
        }
    }
}

/// Whether a foreign pointer holds an object-style or struct-style payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Object,
    Struct,
}

// Tag and payload are stored together so a reader never sees one without
// the other.
struct Entry {
    tag: TypeTag,
    payload: Payload,
}

impl Entry {
    fn expect_tag<T: Any>(&self, addr: usize) -> BridgeResult<()> {
        if self.tag.is::<T>() {
            Ok(())
        } else {
            Err(BridgeError::InvalidForeignType {
                addr,
                expected: type_name::<T>(),
                actual: self.tag.name(),
            })
        }
    }

    fn expect_kind(&self, addr: usize, expected: PayloadKind) -> BridgeResult<()> {
        let actual = self.payload.kind();
        if actual == expected {
            Ok(())
        } else {
            Err(BridgeError::PayloadKindMismatch {
                addr,
                expected,
                actual,
            })
        }
    }
}

#[derive(Default)]
pub struct ForeignDataRegistry {
    entries: PointerRegistry<Entry>,
    finalizers: RwLock<FxHashMap<TypeId, TypedFinalizer>>,
}

impl ForeignDataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a shared host object behind `ptr`. Returns `false` if the
    /// pointer is already tracked.
    pub fn add_object<T: Any + Send + Sync>(&self, ptr: ForeignPtr, object: Arc<T>) -> bool {
        self.add(ptr, TypeTag::of::<T>(), Payload::Object(object))
    }

    /// Copies `value` into the registry behind `ptr`. Returns `false` if the
    /// pointer is already tracked.
    pub fn add_struct<T: Any + Send + Sync + Copy>(&self, ptr: ForeignPtr, value: T) -> bool {
        self.add(ptr, TypeTag::of::<T>(), Payload::Struct(Box::new(value)))
    }

    fn add(&self, ptr: ForeignPtr, tag: TypeTag, payload: Payload) -> bool {
        if !self.entries.try_add(ptr.addr(), Entry { tag, payload }) {
            return false;
        }
        log::trace!("tracking foreign {:#x} as {}", ptr.addr(), tag.name());
        true
    }

    pub fn contains(&self, ptr: ForeignPtr) -> bool {
        self.entries.contains(ptr.addr())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn type_tag(&self, ptr: ForeignPtr) -> Option<TypeTag> {
        self.entries.with(ptr.addr(), |entry| entry.tag)
    }

    pub fn kind(&self, ptr: ForeignPtr) -> Option<PayloadKind> {
        self.entries.with(ptr.addr(), |entry| entry.payload.kind())
    }

    /// True if `ptr` is tracked and holds a `T`.
    pub fn is<T: Any>(&self, ptr: ForeignPtr) -> bool {
        self.type_tag(ptr).is_some_and(|tag| tag.is::<T>())
    }

    /// Runs `f` on the entry behind `ptr` under the registry lock.
    fn with_entry<R>(&self, ptr: ForeignPtr, f: impl FnOnce(&Entry) -> BridgeResult<R>) -> BridgeResult<R> {
        self.entries
            .with(ptr.addr(), f)
            .unwrap_or(Err(BridgeError::UnknownForeignObject { addr: ptr.addr() }))
    }

    /// Shared host object behind `ptr`. Fails for struct-style payloads.
    pub fn get_object<T: Any + Send + Sync>(&self, ptr: ForeignPtr) -> BridgeResult<Arc<T>> {
        let addr = ptr.addr();
        let (object, actual) = self.with_entry(ptr, |entry| {
            entry.expect_tag::<T>(addr)?;
            entry.expect_kind(addr, PayloadKind::Object)?;
            match &entry.payload {
                Payload::Object(object) => Ok((Arc::clone(object), entry.tag.name())),
                Payload::Struct(_) => Err(BridgeError::UnknownForeignObject { addr }),
            }
        })?;
        object.downcast::<T>().map_err(|_| BridgeError::InvalidForeignType {
            addr,
            expected: type_name::<T>(),
            actual,
        })
    }

    /// Copy of the value behind `ptr`. Works for both payload kinds.
    pub fn get_struct<T: Any + Copy>(&self, ptr: ForeignPtr) -> BridgeResult<T> {
        let addr = ptr.addr();
        self.with_entry(ptr, |entry| {
            entry.expect_tag::<T>(addr)?;
            entry
                .payload
                .as_any()
                .downcast_ref::<T>()
                .copied()
                .ok_or(BridgeError::UnknownForeignObject { addr })
        })
    }

    /// Overwrites the struct payload behind `ptr` in place. The pointer must
    /// hold a struct-style `T`; object payloads are never converted.
    pub fn set_struct<T: Any + Send + Sync + Copy>(&self, ptr: ForeignPtr, value: T) -> BridgeResult<()> {
        let addr = ptr.addr();
        self.entries
            .with_mut(addr, |entry| {
                entry.expect_tag::<T>(addr)?;
                entry.expect_kind(addr, PayloadKind::Struct)?;
                if let Payload::Struct(stored) = &mut entry.payload {
                    *stored = Box::new(value);
                }
                Ok(())
            })
            .unwrap_or(Err(BridgeError::UnknownForeignObject { addr }))
    }

    /// Registers the cleanup run for every finalized payload of type `T`.
    /// A later registration for the same type replaces the earlier one.
    pub fn register_finalizer_for<T, F>(&self, finalizer: F)
    where
        T: Any,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let typed: TypedFinalizer = Arc::new(move |payload: &(dyn Any + Send + Sync)| {
            if let Some(value) = payload.downcast_ref::<T>() {
                finalizer(value);
            }
        });
        self.finalizers.write().insert(TypeId::of::<T>(), typed);
    }

    /// Drops the entry for `ptr` after running the class finalizer (if any)
    /// and the typed finalizer registered for its tag. Returns `false` when
    /// nothing was tracked, so a second call for the same pointer is inert.
    pub fn finalize(&self, ptr: ForeignPtr, class_finalizer: Option<&Arc<ForeignFinalizerFn>>) -> bool {
        let entry = self.entries.remove(ptr.addr());

        let object = FinalizedObject {
            ptr,
            tag: entry.as_ref().map(|entry| entry.tag),
            payload: entry.as_ref().map(|entry| entry.payload.as_any()),
        };
        if let Some(finalizer) = class_finalizer {
            finalizer(&object);
        }

        let Some(entry) = entry else {
            log::trace!("finalize for untracked foreign {:#x}", ptr.addr());
            return false;
        };

        let typed = self.finalizers.read().get(&entry.tag.type_id()).cloned();
        if let Some(typed) = typed {
            typed(entry.payload.as_any());
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq)]
    struct Player {
        name: String,
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Vec2 {
        x: f32,
        y: f32,
    }

    fn ptr(addr: usize) -> ForeignPtr {
        ForeignPtr::from_raw(addr as *mut std::ffi::c_void)
    }

    #[test]
    fn object_payload_is_shared() {
        let registry = ForeignDataRegistry::new();
        let player = Arc::new(Player { name: "ada".into() });
        assert!(registry.add_object(ptr(0x100), Arc::clone(&player)));

        let found = registry.get_object::<Player>(ptr(0x100)).unwrap();
        assert!(Arc::ptr_eq(&found, &player));
        assert_eq!(registry.kind(ptr(0x100)), Some(PayloadKind::Object));
    }

    #[test]
    fn struct_payload_is_copied_and_overwritable() {
        let registry = ForeignDataRegistry::new();
        assert!(registry.add_struct(ptr(0x200), Vec2 { x: 1.0, y: 2.0 }));
        registry.set_struct(ptr(0x200), Vec2 { x: 3.0, y: 4.0 }).unwrap();
        assert_eq!(registry.get_struct::<Vec2>(ptr(0x200)).unwrap(), Vec2 { x: 3.0, y: 4.0 });
        assert_eq!(registry.kind(ptr(0x200)), Some(PayloadKind::Struct));
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let registry = ForeignDataRegistry::new();
        registry.add_struct(ptr(0x300), Vec2 { x: 0.0, y: 0.0 });

        let err = registry.get_object::<Player>(ptr(0x300)).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidForeignType { addr: 0x300, .. }));
        assert!(registry.set_struct(ptr(0x300), 5u32).is_err());
        assert!(registry.is::<Vec2>(ptr(0x300)));
        assert!(!registry.is::<Player>(ptr(0x300)));
    }

    #[test]
    fn object_payload_is_never_overwritten_as_struct() {
        let registry = ForeignDataRegistry::new();
        let shared = Arc::new(5u32);
        registry.add_object(ptr(0x380), Arc::clone(&shared));

        assert_eq!(
            registry.set_struct(ptr(0x380), 6u32),
            Err(BridgeError::PayloadKindMismatch {
                addr: 0x380,
                expected: PayloadKind::Struct,
                actual: PayloadKind::Object,
            })
        );
        assert_eq!(registry.kind(ptr(0x380)), Some(PayloadKind::Object));
        assert!(Arc::ptr_eq(&registry.get_object::<u32>(ptr(0x380)).unwrap(), &shared));
    }

    #[test]
    fn struct_payload_is_not_handed_out_as_object() {
        let registry = ForeignDataRegistry::new();
        registry.add_struct(ptr(0x390), 7u32);

        assert_eq!(
            registry.get_object::<u32>(ptr(0x390)).unwrap_err(),
            BridgeError::PayloadKindMismatch {
                addr: 0x390,
                expected: PayloadKind::Object,
                actual: PayloadKind::Struct,
            }
        );
        assert_eq!(registry.get_struct::<u32>(ptr(0x390)).unwrap(), 7);
    }

    #[test]
    fn set_after_finalize_does_not_resurrect() {
        let registry = ForeignDataRegistry::new();
        registry.add_struct(ptr(0x3a0), Vec2 { x: 0.0, y: 0.0 });
        assert!(registry.finalize(ptr(0x3a0), None));

        assert_eq!(
            registry.set_struct(ptr(0x3a0), Vec2 { x: 1.0, y: 1.0 }),
            Err(BridgeError::UnknownForeignObject { addr: 0x3a0 })
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_readers_always_see_tag_with_payload() {
        let registry = Arc::new(ForeignDataRegistry::new());
        std::thread::scope(|scope| {
            let writer = Arc::clone(&registry);
            scope.spawn(move || {
                for addr in (0x1_0000..0x1_0400).step_by(8) {
                    writer.add_struct(ptr(addr), addr as u64);
                }
            });
            for _ in 0..2 {
                let reader = Arc::clone(&registry);
                scope.spawn(move || {
                    for addr in (0x1_0000..0x1_0400).step_by(8) {
                        // Either not tracked yet or fully tracked.
                        match reader.get_struct::<u64>(ptr(addr)) {
                            Ok(value) => assert_eq!(value, addr as u64),
                            Err(err) => assert_eq!(err, BridgeError::UnknownForeignObject { addr }),
                        }
                    }
                });
            }
        });
        assert_eq!(registry.len(), 0x400 / 8);
    }

    #[test]
    fn unknown_pointer_is_reported() {
        let registry = ForeignDataRegistry::new();
        assert_eq!(
            registry.get_struct::<Vec2>(ptr(0x400)).unwrap_err(),
            BridgeError::UnknownForeignObject { addr: 0x400 }
        );
    }

    #[test]
    fn duplicate_add_keeps_first() {
        let registry = ForeignDataRegistry::new();
        assert!(registry.add_struct(ptr(0x500), 1u32));
        assert!(!registry.add_struct(ptr(0x500), 2u32));
        assert_eq!(registry.get_struct::<u32>(ptr(0x500)).unwrap(), 1);
    }

    #[test]
    fn finalize_dispatches_by_tag_exactly_once() {
        let registry = ForeignDataRegistry::new();
        let players = Arc::new(AtomicUsize::new(0));
        let vectors = Arc::new(AtomicUsize::new(0));
        {
            let players = Arc::clone(&players);
            registry.register_finalizer_for::<Player, _>(move |player| {
                assert_eq!(player.name, "ada");
                players.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let vectors = Arc::clone(&vectors);
            registry.register_finalizer_for::<Vec2, _>(move |_| {
                vectors.fetch_add(1, Ordering::SeqCst);
            });
        }

        registry.add_object(ptr(0x600), Arc::new(Player { name: "ada".into() }));
        assert!(registry.finalize(ptr(0x600), None));
        assert!(!registry.finalize(ptr(0x600), None));

        assert_eq!(players.load(Ordering::SeqCst), 1);
        assert_eq!(vectors.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
        assert!(registry.type_tag(ptr(0x600)).is_none());
    }

    #[test]
    fn class_finalizer_sees_payload() {
        let registry = ForeignDataRegistry::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let class_finalizer: Arc<ForeignFinalizerFn> = {
            let seen = Arc::clone(&seen);
            Arc::new(move |object: &FinalizedObject<'_>| {
                if object.downcast_ref::<Vec2>() == Some(&Vec2 { x: 9.0, y: 9.0 }) {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        registry.add_struct(ptr(0x700), Vec2 { x: 9.0, y: 9.0 });
        assert!(registry.finalize(ptr(0x700), Some(&class_finalizer)));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
