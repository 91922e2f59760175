use crate::script::{self, ClassDecl, CompileError, Expr, Stmt, StmtKind};
use crate::value::{Class, DeadForeign, Finalizer, ForeignFn, Heap, Obj, ObjId, Value, format_num};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::{Cell, RefCell};
use std::ffi::{CStr, CString, c_void};
use std::os::raw::c_int;
use wren_interop_sys::*;

pub(crate) enum Fault {
    Compile(CompileError),
    Runtime(String),
}

impl From<CompileError> for Fault {
    fn from(err: CompileError) -> Self {
        Fault::Compile(err)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum MockHandle {
    Value(Value),
    Method { signature: String, arity: usize },
}

#[derive(Debug, Default)]
pub(crate) struct Module {
    pub vars: FxHashMap<String, Value>,
}

#[derive(Debug, Default)]
pub(crate) struct State {
    pub heap: Heap,
    pub modules: FxHashMap<String, Module>,
    pub slots: Vec<Value>,
    saved_slots: Vec<Vec<Value>>,
    pins: Vec<Value>,
    /// Keyed by the address of the boxed handle, which is what the host holds.
    pub handles: FxHashMap<usize, Box<MockHandle>>,
    pub abort: Option<Value>,
}

impl State {
    pub fn slot(&self, index: c_int) -> Value {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get(i))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set_slot(&mut self, index: c_int, value: Value) {
        if let Some(slot) = usize::try_from(index).ok().and_then(|i| self.slots.get_mut(i)) {
            *slot = value;
        }
    }

    pub fn alloc_into(&mut self, index: c_int, obj: Obj) -> ObjId {
        let id = self.heap.alloc(obj);
        self.set_slot(index, Value::Obj(id));
        id
    }

    pub fn variable(&self, module: &str, name: &str) -> Option<Value> {
        self.modules.get(module)?.vars.get(name).cloned()
    }

    fn lookup(&self, module: &str, name: &str) -> Option<Value> {
        self.variable(module, name).or_else(|| self.variable("core", name))
    }

    fn define(&mut self, module: &str, name: &str, value: Value) {
        self.modules
            .entry(module.to_string())
            .or_default()
            .vars
            .insert(name.to_string(), value);
    }

    fn roots(&self) -> Vec<ObjId> {
        self.modules
            .values()
            .flat_map(|module| module.vars.values())
            .chain(&self.slots)
            .chain(self.saved_slots.iter().flatten())
            .chain(&self.pins)
            .chain(self.abort.iter())
            .chain(self.handles.values().filter_map(|handle| match handle.as_ref() {
                MockHandle::Value(value) => Some(value),
                MockHandle::Method { .. } => None,
            }))
            .filter_map(Value::obj_id)
            .collect()
    }

    fn text(&self, value: &Value) -> String {
        match value {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => format_num(*n),
            Value::Str(_) => String::from_utf8_lossy(value.str_bytes().unwrap_or_default()).into_owned(),
            Value::Obj(id) => match self.heap.get(*id) {
                Some(Obj::List(items)) => {
                    let parts: Vec<String> = items.iter().map(|item| self.text(item)).collect();
                    format!("[{}]", parts.join(", "))
                }
                Some(Obj::Map(entries)) => {
                    let parts: Vec<String> = entries
                        .iter()
                        .map(|(key, value)| format!("{}: {}", self.text(key), self.text(value)))
                        .collect();
                    format!("{{{}}}", parts.join(", "))
                }
                Some(Obj::Class(class)) => class.name.clone(),
                Some(Obj::Instance { class }) | Some(Obj::Foreign { class, .. }) => {
                    format!("instance of {}", self.heap.class_name(*class))
                }
                None => "null".to_string(),
            },
        }
    }

    fn type_name(&self, value: &Value) -> String {
        match value {
            Value::Null => "Null".to_string(),
            Value::Bool(_) => "Bool".to_string(),
            Value::Num(_) => "Num".to_string(),
            Value::Str(_) => "String".to_string(),
            Value::Obj(id) => match self.heap.get(*id) {
                Some(Obj::List(_)) => "List".to_string(),
                Some(Obj::Map(_)) => "Map".to_string(),
                Some(Obj::Class(class)) => format!("{} metaclass", class.name),
                Some(Obj::Instance { class }) | Some(Obj::Foreign { class, .. }) => {
                    self.heap.class_name(*class).to_string()
                }
                None => "Null".to_string(),
            },
        }
    }
}

enum Target {
    Print,
    Write,
    Abort,
    Construct(ObjId),
    ConstructForeign { class: ObjId, allocate: Option<ForeignFn> },
    Foreign(ForeignFn),
    Missing(String),
}

/// The mock VM. Its address is the `WrenVM*` handed to the host.
///
/// Borrows of `state` are never held across a call back into the host.
pub(crate) struct MockVm {
    pub config: WrenConfiguration,
    pub user_data: Cell<*mut c_void>,
    pub state: RefCell<State>,
    pub finalized: Cell<usize>,
    location: RefCell<(String, i32)>,
}

fn c_text(text: &str) -> CString {
    CString::new(text.replace('\0', "")).unwrap_or_default()
}

impl MockVm {
    pub fn new(config: WrenConfiguration) -> MockVm {
        let vm = MockVm {
            config,
            user_data: Cell::new(config.user_data),
            state: RefCell::new(State::default()),
            finalized: Cell::new(0),
            location: RefCell::new((String::new(), -1)),
        };
        {
            let mut state = vm.state.borrow_mut();
            for name in ["System", "Fiber"] {
                let class = state.heap.alloc(Obj::Class(Class {
                    name: name.to_string(),
                    module: "core".to_string(),
                    ..Class::default()
                }));
                state.define("core", name, Value::Obj(class));
            }
        }
        vm
    }

    pub fn raw(&self) -> *mut WrenVM {
        self as *const MockVm as *mut WrenVM
    }

    // ========== EXECUTION ==========

    pub fn interpret(&self, module: &str, source: &str) -> WrenInterpretResult {
        match self.run_module(module, source) {
            Ok(()) => WrenInterpretResult_WREN_RESULT_SUCCESS,
            Err(Fault::Compile(err)) => {
                self.report_compile(module, &err);
                WrenInterpretResult_WREN_RESULT_COMPILE_ERROR
            }
            Err(Fault::Runtime(message)) => {
                self.report_runtime(&message);
                WrenInterpretResult_WREN_RESULT_RUNTIME_ERROR
            }
        }
    }

    /// Invokes the method named by a call handle on the receiver and
    /// arguments currently in the slots, leaving the result in slot 0.
    pub fn call(&self, signature: &str, arity: usize) -> WrenInterpretResult {
        let frame = {
            let state = self.state.borrow();
            if state.slots.len() < arity + 1 {
                None
            } else {
                Some(state.slots[..=arity].to_vec())
            }
        };
        let Some(frame) = frame else {
            self.report_runtime(&format!("Not enough slots to call '{signature}'."));
            return WrenInterpretResult_WREN_RESULT_RUNTIME_ERROR;
        };

        *self.location.borrow_mut() = ("(call)".to_string(), -1);
        match self.invoke(signature, frame) {
            Ok(result) => {
                self.state.borrow_mut().set_slot(0, result);
                WrenInterpretResult_WREN_RESULT_SUCCESS
            }
            Err(Fault::Compile(err)) => {
                self.report_runtime(&err.to_string());
                WrenInterpretResult_WREN_RESULT_RUNTIME_ERROR
            }
            Err(Fault::Runtime(message)) => {
                self.report_runtime(&message);
                WrenInterpretResult_WREN_RESULT_RUNTIME_ERROR
            }
        }
    }

    fn run_module(&self, module: &str, source: &str) -> Result<(), Fault> {
        let statements = script::parse(source)?;
        {
            let mut state = self.state.borrow_mut();
            state.modules.entry(module.to_string()).or_default();
            let defined: FxHashSet<String> = ["core", module]
                .iter()
                .filter_map(|name| state.modules.get(*name))
                .flat_map(|m| m.vars.keys().cloned())
                .collect();
            script::check_names(&statements, defined)?;
        }

        for stmt in &statements {
            *self.location.borrow_mut() = (module.to_string(), stmt.line);
            self.exec(module, stmt)?;
        }
        Ok(())
    }

    fn exec(&self, module: &str, stmt: &Stmt) -> Result<(), Fault> {
        match &stmt.kind {
            StmtKind::Import { module: name, names } => self.import(module, name, names),
            StmtKind::Var { name, value } | StmtKind::Assign { name, value } => {
                let value = self.eval(module, value)?;
                self.state.borrow_mut().define(module, name, value);
                Ok(())
            }
            StmtKind::Class(decl) => self.declare_class(module, decl),
            StmtKind::Expr(expr) => self.eval(module, expr).map(|_| ()),
        }
    }

    fn eval(&self, module: &str, expr: &Expr) -> Result<Value, Fault> {
        match expr {
            Expr::Null => Ok(Value::Null),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Num(n) => Ok(Value::Num(*n)),
            Expr::Str(text) => Ok(Value::string(text.as_bytes())),
            Expr::Var { name, .. } => self
                .state
                .borrow()
                .lookup(module, name)
                .ok_or_else(|| Fault::Runtime(format!("Variable '{name}' is not defined."))),
            Expr::List(items) => {
                let values = self.eval_pinned(module, items.iter())?;
                Ok(Value::Obj(self.state.borrow_mut().heap.alloc(Obj::List(values))))
            }
            Expr::Call { receiver, name, args } => {
                let frame = self.eval_pinned(
                    module,
                    std::iter::once(receiver.as_ref()).chain(args.iter().flatten()),
                )?;
                let signature = script::signature(name, args.as_ref().map(Vec::len));
                self.with_pinned(frame.clone(), || self.invoke(&signature, frame))
            }
        }
    }

    /// Evaluates `exprs` in order, keeping earlier results reachable while
    /// later ones run.
    fn eval_pinned<'e>(
        &self,
        module: &str,
        exprs: impl Iterator<Item = &'e Expr>,
    ) -> Result<Vec<Value>, Fault> {
        let base = self.state.borrow().pins.len();
        let result: Result<Vec<Value>, Fault> = exprs
            .map(|expr| -> Result<Value, Fault> {
                let value = self.eval(module, expr)?;
                self.state.borrow_mut().pins.push(value.clone());
                Ok(value)
            })
            .collect();
        self.state.borrow_mut().pins.truncate(base);
        result
    }

    fn with_pinned<T>(&self, values: Vec<Value>, f: impl FnOnce() -> T) -> T {
        let base = {
            let mut state = self.state.borrow_mut();
            let base = state.pins.len();
            state.pins.extend(values);
            base
        };
        let result = f();
        self.state.borrow_mut().pins.truncate(base);
        result
    }

    fn resolve(&self, receiver: &Value, signature: &str) -> Target {
        let state = self.state.borrow();
        let missing = || Target::Missing(format!("{} does not implement '{signature}'.", state.type_name(receiver)));

        let Some(id) = receiver.obj_id() else {
            return missing();
        };
        match state.heap.get(id) {
            Some(Obj::Class(class)) if class.is_core("System") => match signature {
                "print(_)" | "print()" => Target::Print,
                "write(_)" => Target::Write,
                _ => missing(),
            },
            Some(Obj::Class(class)) if class.is_core("Fiber") && signature == "abort(_)" => Target::Abort,
            Some(Obj::Class(class)) => {
                if class.constructors.iter().any(|c| c == signature) {
                    if class.is_foreign {
                        Target::ConstructForeign {
                            class: id,
                            allocate: class.allocate,
                        }
                    } else {
                        Target::Construct(id)
                    }
                } else if let Some(method) = class.statics.get(signature) {
                    Target::Foreign(*method)
                } else {
                    missing()
                }
            }
            Some(Obj::Instance { class }) | Some(Obj::Foreign { class, .. }) => state
                .heap
                .class(*class)
                .and_then(|c| c.methods.get(signature).copied())
                .map_or_else(missing, Target::Foreign),
            _ => missing(),
        }
    }

    fn invoke(&self, signature: &str, frame: Vec<Value>) -> Result<Value, Fault> {
        let receiver = frame.first().cloned().unwrap_or(Value::Null);
        let argument = frame.get(1).cloned();

        match self.resolve(&receiver, signature) {
            Target::Print => {
                let text = argument.as_ref().map(|v| self.state.borrow().text(v));
                self.write(text.as_deref().unwrap_or_default());
                self.write("\n");
                Ok(argument.unwrap_or(Value::Null))
            }
            Target::Write => {
                let value = argument.unwrap_or(Value::Null);
                let text = self.state.borrow().text(&value);
                self.write(&text);
                Ok(value)
            }
            Target::Abort => {
                let value = argument.unwrap_or(Value::Null);
                Err(Fault::Runtime(self.state.borrow().text(&value)))
            }
            Target::Construct(class) => Ok(Value::Obj(
                self.state.borrow_mut().heap.alloc(Obj::Instance { class }),
            )),
            Target::ConstructForeign { class, allocate } => {
                let name = self.state.borrow().heap.class_name(class).to_string();
                let Some(allocate) = allocate else {
                    return Err(Fault::Runtime(format!("Foreign class '{name}' has no allocator.")));
                };
                let created = self.call_foreign(allocate, frame)?;
                let is_instance = {
                    let state = self.state.borrow();
                    matches!(
                        created.obj_id().and_then(|id| state.heap.get(id)),
                        Some(Obj::Foreign { class: c, .. }) if *c == class
                    )
                };
                if !is_instance {
                    return Err(Fault::Runtime(format!(
                        "Allocator of foreign class '{name}' did not create an instance."
                    )));
                }
                Ok(created)
            }
            Target::Foreign(method) => self.call_foreign(method, frame),
            Target::Missing(message) => Err(Fault::Runtime(message)),
        }
    }

    /// Runs a host function with `frame` as its slots. Slot 0 holds the
    /// result once it returns; the caller's slots are restored afterwards.
    fn call_foreign(&self, method: ForeignFn, frame: Vec<Value>) -> Result<Value, Fault> {
        {
            let mut state = self.state.borrow_mut();
            let saved = std::mem::replace(&mut state.slots, frame);
            state.saved_slots.push(saved);
            state.abort = None;
        }

        unsafe { (method.func)(self.raw(), method.user_data) };

        let (result, abort) = {
            let mut state = self.state.borrow_mut();
            let saved = state.saved_slots.pop().unwrap_or_default();
            let frame = std::mem::replace(&mut state.slots, saved);
            (frame.into_iter().next().unwrap_or(Value::Null), state.abort.take())
        };

        match abort {
            Some(Value::Null) | None => Ok(result),
            Some(error) => Err(Fault::Runtime(self.state.borrow().text(&error))),
        }
    }

    // ========== MODULES ==========

    fn declare_class(&self, module: &str, decl: &ClassDecl) -> Result<(), Fault> {
        let module_c = c_text(module);
        let name_c = c_text(&decl.name);
        let mut class = Class {
            name: decl.name.clone(),
            module: module.to_string(),
            is_foreign: decl.is_foreign,
            constructors: decl.constructors.clone(),
            ..Class::default()
        };

        if decl.is_foreign {
            let bound = match self.config.bind_foreign_class_fn {
                Some(bind) => unsafe { bind(self.raw(), module_c.as_ptr(), name_c.as_ptr()) },
                None => WrenForeignClassMethods::default(),
            };
            class.allocate = bound.allocate.map(|func| ForeignFn {
                func,
                user_data: bound.allocate_user_data,
            });
            class.finalize = bound.finalize.map(|func| Finalizer {
                func,
                user_data: bound.finalize_user_data,
            });
        }

        for method in &decl.methods {
            let signature_c = c_text(&method.signature);
            let bound = match self.config.bind_foreign_method_fn {
                Some(bind) => unsafe {
                    bind(
                        self.raw(),
                        module_c.as_ptr(),
                        name_c.as_ptr(),
                        method.is_static,
                        signature_c.as_ptr(),
                    )
                },
                None => WrenForeignMethod::default(),
            };
            let Some(func) = bound.execute else {
                return Err(Fault::Runtime(format!(
                    "Could not find foreign method '{}' for class {} in module '{module}'.",
                    method.signature, decl.name
                )));
            };
            let entry = ForeignFn {
                func,
                user_data: bound.user_data,
            };
            let table = if method.is_static { &mut class.statics } else { &mut class.methods };
            table.insert(method.signature.clone(), entry);
        }

        let mut state = self.state.borrow_mut();
        let id = state.heap.alloc(Obj::Class(class));
        state.define(module, &decl.name, Value::Obj(id));
        Ok(())
    }

    fn import(&self, importer: &str, name: &str, names: &[String]) -> Result<(), Fault> {
        let resolved = self.resolve_module(importer, name)?;
        let loaded = self.state.borrow().modules.contains_key(&resolved);

        if !loaded {
            let source = self.load_module(&resolved)?;
            match self.run_module(&resolved, &source) {
                Ok(()) => {}
                Err(Fault::Compile(err)) => {
                    self.report_compile(&resolved, &err);
                    return Err(Fault::Runtime(format!("Could not compile module '{resolved}'.")));
                }
                Err(fault) => return Err(fault),
            }
        }

        let mut state = self.state.borrow_mut();
        for var in names {
            let Some(value) = state.variable(&resolved, var) else {
                return Err(Fault::Runtime(format!(
                    "Could not find a variable named '{var}' in module '{resolved}'."
                )));
            };
            state.define(importer, var, value);
        }
        Ok(())
    }

    fn resolve_module(&self, importer: &str, name: &str) -> Result<String, Fault> {
        let Some(resolve) = self.config.resolve_module_fn else {
            return Ok(name.to_string());
        };
        let importer_c = c_text(importer);
        let name_c = c_text(name);
        let resolved = unsafe { resolve(self.raw(), importer_c.as_ptr(), name_c.as_ptr()) };
        if resolved.is_null() {
            return Err(Fault::Runtime(format!(
                "Could not resolve module '{name}' imported from '{importer}'."
            )));
        }

        let text = unsafe { CStr::from_ptr(resolved) }.to_string_lossy().into_owned();
        if let Some(reallocate) = self.config.reallocate_fn {
            unsafe { reallocate(resolved as *mut c_void, 0, self.config.user_data) };
        }
        Ok(text)
    }

    fn load_module(&self, name: &str) -> Result<String, Fault> {
        let name_c = c_text(name);
        let result = match self.config.load_module_fn {
            Some(load) => unsafe { load(self.raw(), name_c.as_ptr()) },
            None => WrenLoadModuleResult::default(),
        };
        if result.source.is_null() {
            return Err(Fault::Runtime(format!("Could not load module '{name}'.")));
        }

        let source = unsafe { CStr::from_ptr(result.source) }.to_string_lossy().into_owned();
        if let Some(on_complete) = result.on_complete {
            unsafe { on_complete(self.raw(), name_c.as_ptr(), result) };
        }
        Ok(source)
    }

    // ========== OUTPUT ==========

    fn write(&self, text: &str) {
        if let Some(write) = self.config.write_fn {
            let text = c_text(text);
            unsafe { write(self.raw(), text.as_ptr()) };
        }
    }

    fn report(&self, kind: WrenErrorType, module: Option<&str>, line: i32, message: &str) {
        let Some(error) = self.config.error_fn else {
            return;
        };
        let module = module.map(c_text);
        let message = c_text(message);
        let module_ptr = module.as_ref().map_or(std::ptr::null(), |m| m.as_ptr());
        unsafe { error(self.raw(), kind, module_ptr, line, message.as_ptr()) };
    }

    fn report_compile(&self, module: &str, err: &CompileError) {
        self.report(WrenErrorType_WREN_ERROR_COMPILE, Some(module), err.line, &err.to_string());
    }

    fn report_runtime(&self, message: &str) {
        self.report(WrenErrorType_WREN_ERROR_RUNTIME, None, -1, message);
        let (module, line) = self.location.borrow().clone();
        self.report(WrenErrorType_WREN_ERROR_STACK_TRACE, Some(&module), line, "(script)");
    }

    // ========== MEMORY ==========

    pub fn collect_garbage(&self) {
        let dead = {
            let mut state = self.state.borrow_mut();
            let roots = state.roots();
            state.heap.collect(roots)
        };
        self.finalize(dead);
    }

    /// Finalizes every remaining object. Returns how many handles were
    /// still outstanding.
    pub fn shutdown(&self) -> usize {
        let (dead, leaked) = {
            let mut state = self.state.borrow_mut();
            let leaked = state.handles.len();
            state.handles.clear();
            (state.heap.drain(), leaked)
        };
        self.finalize(dead);
        leaked
    }

    fn finalize(&self, dead: Vec<DeadForeign>) {
        for object in dead {
            object.run();
            self.finalized.set(self.finalized.get() + 1);
        }
    }
}
