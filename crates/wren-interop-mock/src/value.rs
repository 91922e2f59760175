use rustc_hash::{FxHashMap, FxHashSet};
use std::ffi::c_void;
use std::rc::Rc;
use wren_interop_sys::{WrenFinalizerFn, WrenForeignMethodFn};

pub(crate) type ObjId = usize;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Num(f64),
    /// Bytes followed by a trailing NUL so the buffer can be handed out as a C string.
    Str(Rc<Vec<u8>>),
    Obj(ObjId),
}

impl Value {
    pub fn string(bytes: &[u8]) -> Value {
        let mut buffer = Vec::with_capacity(bytes.len() + 1);
        buffer.extend_from_slice(bytes);
        buffer.push(0);
        Value::Str(Rc::new(buffer))
    }

    pub fn str_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(buffer) => Some(&buffer[..buffer.len() - 1]),
            _ => None,
        }
    }

    pub fn obj_id(&self) -> Option<ObjId> {
        match self {
            Value::Obj(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ForeignFn {
    pub func: WrenForeignMethodFn,
    pub user_data: *mut c_void,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Finalizer {
    pub func: WrenFinalizerFn,
    pub user_data: *mut c_void,
}

#[derive(Debug, Default)]
pub(crate) struct Class {
    pub name: String,
    pub module: String,
    pub is_foreign: bool,
    pub constructors: Vec<String>,
    pub methods: FxHashMap<String, ForeignFn>,
    pub statics: FxHashMap<String, ForeignFn>,
    pub allocate: Option<ForeignFn>,
    pub finalize: Option<Finalizer>,
}

impl Class {
    pub fn is_core(&self, name: &str) -> bool {
        self.module == "core" && self.name == name
    }
}

#[derive(Debug)]
pub(crate) enum Obj {
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Class(Class),
    Instance { class: ObjId },
    Foreign { class: ObjId, data: Box<[u64]> },
}

/// A swept foreign object whose finalizer still has to run.
///
/// The data block is kept alive until the finalizer returns.
pub(crate) struct DeadForeign {
    pub finalizer: Option<Finalizer>,
    pub data: Box<[u64]>,
}

impl DeadForeign {
    pub fn run(mut self) {
        if let Some(finalizer) = self.finalizer {
            unsafe { (finalizer.func)(self.data.as_mut_ptr().cast(), finalizer.user_data) };
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Heap {
    objects: FxHashMap<ObjId, Obj>,
    next_id: ObjId,
}

impl Heap {
    pub fn alloc(&mut self, obj: Obj) -> ObjId {
        self.next_id += 1;
        self.objects.insert(self.next_id, obj);
        self.next_id
    }

    pub fn get(&self, id: ObjId) -> Option<&Obj> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjId) -> Option<&mut Obj> {
        self.objects.get_mut(&id)
    }

    pub fn class(&self, id: ObjId) -> Option<&Class> {
        match self.objects.get(&id) {
            Some(Obj::Class(class)) => Some(class),
            _ => None,
        }
    }

    pub fn class_name(&self, id: ObjId) -> &str {
        self.class(id).map_or("?", |class| class.name.as_str())
    }

    pub fn foreign_count(&self) -> usize {
        self.objects
            .values()
            .filter(|obj| matches!(obj, Obj::Foreign { .. }))
            .count()
    }

    /// Mark and sweep from `roots`. Returns the swept foreign objects.
    pub fn collect(&mut self, roots: Vec<ObjId>) -> Vec<DeadForeign> {
        let mut marked = FxHashSet::default();
        let mut pending = roots;

        while let Some(id) = pending.pop() {
            if !marked.insert(id) {
                continue;
            }
            match self.objects.get(&id) {
                Some(Obj::List(items)) => pending.extend(items.iter().filter_map(Value::obj_id)),
                Some(Obj::Map(entries)) => pending.extend(
                    entries
                        .iter()
                        .flat_map(|(key, value)| [key, value])
                        .filter_map(Value::obj_id),
                ),
                Some(Obj::Instance { class }) | Some(Obj::Foreign { class, .. }) => {
                    pending.push(*class)
                }
                _ => {}
            }
        }

        let dead = self
            .objects
            .keys()
            .copied()
            .filter(|id| !marked.contains(id))
            .collect();
        self.release(dead)
    }

    /// Drops every object. Used when the VM is freed.
    pub fn drain(&mut self) -> Vec<DeadForeign> {
        let all = self.objects.keys().copied().collect();
        self.release(all)
    }

    fn release(&mut self, mut ids: Vec<ObjId>) -> Vec<DeadForeign> {
        ids.sort_unstable();

        // Classes may die in the same sweep as their instances.
        let finalizers: Vec<Option<Finalizer>> = ids
            .iter()
            .map(|id| match self.objects.get(id) {
                Some(Obj::Foreign { class, .. }) => self.class(*class).and_then(|c| c.finalize),
                _ => None,
            })
            .collect();

        ids.iter()
            .zip(finalizers)
            .filter_map(|(id, finalizer)| match self.objects.remove(id) {
                Some(Obj::Foreign { data, .. }) => Some(DeadForeign { finalizer, data }),
                _ => None,
            })
            .collect()
    }
}

pub(crate) fn format_num(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "infinity" } else { "-infinity" };
        text.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
