use std::any::{Any, TypeId, type_name};
use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

/// Address of the data block of a native foreign object.
#[derive(Hash, PartialEq, Eq, Copy, Clone, Debug)]
pub struct ForeignPtr(usize);

impl ForeignPtr {
    pub fn from_raw(ptr: *mut c_void) -> Self {
        ForeignPtr(ptr as usize)
    }

    pub fn addr(&self) -> usize {
        self.0
    }

    pub fn as_ptr(&self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Records which concrete host type a foreign pointer carries.
#[derive(Copy, Clone)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: Any>() -> Self {
        TypeTag {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl Hash for TypeTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.name)
    }
}

macro_rules! binding_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Hash, PartialEq, Eq, Copy, Clone, Debug)]
        pub struct $name(NonZeroUsize);

        impl $name {
            pub(crate) fn from_raw(value: usize) -> Option<Self> {
                NonZeroUsize::new(value).map($name)
            }

            pub(crate) fn from_user_data(user_data: *mut c_void) -> Option<Self> {
                Self::from_raw(user_data as usize)
            }

            pub(crate) fn as_user_data(self) -> *mut c_void {
                self.0.get() as *mut c_void
            }

            pub fn get(self) -> usize {
                self.0.get()
            }
        }
    };
}

binding_key!(
    /// Stable key of a registered foreign class. Passed to the native side as
    /// allocator and finalizer user data.
    ClassKey
);

binding_key!(
    /// Stable key of a registered foreign method. Passed to the native side
    /// as method user data.
    MethodKey
);

/// View of a foreign object handed to class finalizers.
///
/// The native VM forbids touching slots while finalizing, so only the
/// pointer and the host payload are available.
pub struct FinalizedObject<'a> {
    pub(crate) ptr: ForeignPtr,
    pub(crate) tag: Option<TypeTag>,
    pub(crate) payload: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> FinalizedObject<'a> {
    pub fn ptr(&self) -> ForeignPtr {
        self.ptr
    }

    pub fn tag(&self) -> Option<TypeTag> {
        self.tag
    }

    /// Payload of the object, if the bridge was tracking one of type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&'a T> {
        self.payload.and_then(|payload| payload.downcast_ref::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point;
    struct Color;

    #[test]
    fn type_tags_compare_by_type() {
        assert_eq!(TypeTag::of::<Point>(), TypeTag::of::<Point>());
        assert_ne!(TypeTag::of::<Point>(), TypeTag::of::<Color>());
        assert!(TypeTag::of::<Point>().is::<Point>());
        assert!(TypeTag::of::<Point>().name().ends_with("Point"));
    }

    #[test]
    fn keys_reject_null_user_data() {
        assert!(ClassKey::from_user_data(std::ptr::null_mut()).is_none());
        let key = MethodKey::from_raw(7).unwrap();
        assert_eq!(MethodKey::from_user_data(key.as_user_data()), Some(key));
    }
}
