//! The interpreter instance.
//!
//! A [`State`] owns everything: heap, symbol table, globals, class
//! graph, execution contexts. Instances are fully disjoint; two states
//! on two threads share no mutable data.

use berylc_bc::ArgSpec;
use berylc_util::{Symbol, SymbolTable};
use log::debug;
use rustc_hash::FxHashMap;

use crate::class::{ClassData, ClassKind, MethodEntry};
use crate::context::Context;
use crate::error::{VmError, VmResult};
use crate::gc::Heap;
use crate::obj::{ObjBody, ObjectData, VType};
use crate::object::IvTable;
use crate::proc_env::ProcData;
use crate::string::StrData;
use crate::value::{ObjRef, Value};

/// Arguments handed to a native method.
pub struct Args {
    pub args: Vec<Value>,
    pub block: Value,
}

impl Args {
    pub fn none() -> Args {
        Args {
            args: Vec::new(),
            block: Value::Nil,
        }
    }

    pub fn get(&self, i: usize) -> Value {
        self.args.get(i).copied().unwrap_or(Value::Nil)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Native method signature.
pub type NativeFn = fn(&mut State, Value, &Args) -> VmResult<Value>;

/// Where `puts`/`print`/`p` write.
pub enum Output {
    Stdout,
    /// Captured, for tests and embedders.
    Buffer(String),
}

impl Output {
    pub fn write(&mut self, text: &str) {
        match self {
            Output::Stdout => print!("{text}"),
            Output::Buffer(buf) => buf.push_str(text),
        }
    }
}

/// The well-known classes every interpreter carries.
#[derive(Clone, Copy, Debug)]
pub struct CoreClasses {
    pub object: ObjRef,
    pub module: ObjRef,
    pub class: ObjRef,
    pub kernel: ObjRef,
    pub nil_class: ObjRef,
    pub true_class: ObjRef,
    pub false_class: ObjRef,
    pub integer: ObjRef,
    pub float: ObjRef,
    pub symbol: ObjRef,
    pub string: ObjRef,
    pub array: ObjRef,
    pub hash: ObjRef,
    pub range: ObjRef,
    pub proc_class: ObjRef,
    pub exception: ObjRef,
    pub standard_error: ObjRef,
    pub runtime_error: ObjRef,
    pub argument_error: ObjRef,
    pub type_error: ObjRef,
    pub name_error: ObjRef,
    pub no_method_error: ObjRef,
    pub index_error: ObjRef,
    pub range_error: ObjRef,
    pub local_jump_error: ObjRef,
    pub not_implemented_error: ObjRef,
    pub stop_iteration: ObjRef,
    pub fiber: ObjRef,
}

pub struct State {
    pub symbols: SymbolTable,
    pub heap: Heap,
    /// Context table; slot 0 is the root context, fibers claim further
    /// slots and release them when collected.
    pub contexts: Vec<Option<Context>>,
    pub cur_ctx: usize,
    pub globals: FxHashMap<Symbol, Value>,
    /// Exception in flight (the cancellation primitive).
    pub exc: Option<ObjRef>,
    pub core: CoreClasses,
    pub top_self: ObjRef,
    pub output: Output,
    /// Last exception delivered to the host, for inspection.
    pub last_exc: Option<Value>,
}

impl State {
    /// Create a fully bootstrapped interpreter.
    pub fn new() -> State {
        let mut state = State::bootstrap();
        crate::builtins::install(&mut state);
        state.heap.arena_restore(0);
        debug!(
            "interpreter ready: {} live objects after boot",
            state.heap.live()
        );
        state
    }

    /// Build the heap and the minimal class graph.
    fn bootstrap() -> State {
        let mut heap = Heap::new();
        // the class graph root; class pointers are fixed below
        let object = heap.raw_alloc(ObjBody::Class(ClassData::new_class(None)), None);
        let module = heap.raw_alloc(
            ObjBody::Class(ClassData::new_class(Some(object))),
            None,
        );
        let class = heap.raw_alloc(
            ObjBody::Class(ClassData::new_class(Some(module))),
            None,
        );
        for c in [object, module, class] {
            heap.set_class(c, class);
        }
        if let ObjBody::Class(c) = &mut heap.cell_mut(module).body {
            c.kind = ClassKind::Class;
        }

        let top_self = heap.raw_alloc(ObjBody::Object(ObjectData::default()), Some(object));

        let placeholder = object;
        let core = CoreClasses {
            object,
            module,
            class,
            kernel: placeholder,
            nil_class: placeholder,
            true_class: placeholder,
            false_class: placeholder,
            integer: placeholder,
            float: placeholder,
            symbol: placeholder,
            string: placeholder,
            array: placeholder,
            hash: placeholder,
            range: placeholder,
            proc_class: placeholder,
            exception: placeholder,
            standard_error: placeholder,
            runtime_error: placeholder,
            argument_error: placeholder,
            type_error: placeholder,
            name_error: placeholder,
            no_method_error: placeholder,
            index_error: placeholder,
            range_error: placeholder,
            local_jump_error: placeholder,
            not_implemented_error: placeholder,
            stop_iteration: placeholder,
            fiber: placeholder,
        };

        let mut state = State {
            symbols: SymbolTable::new(),
            heap,
            contexts: vec![Some(Context::new())],
            cur_ctx: 0,
            globals: FxHashMap::default(),
            exc: None,
            core,
            top_self,
            output: Output::Stdout,
            last_exc: None,
        };

        // name and publish the roots
        let object_sym = state.intern("Object");
        let module_sym = state.intern("Module");
        let class_sym = state.intern("Class");
        state.set_class_name(object, object_sym);
        state.set_class_name(module, module_sym);
        state.set_class_name(class, class_sym);
        state.const_set_on(object, object_sym, Value::Obj(object));
        state.const_set_on(object, module_sym, Value::Obj(module));
        state.const_set_on(object, class_sym, Value::Obj(class));
        state
    }

    // ---------------------------------------------------------------
    // symbols, contexts
    // ---------------------------------------------------------------

    pub fn intern(&mut self, name: &str) -> Symbol {
        self.symbols.intern(name)
    }

    pub fn sym_name(&self, sym: Symbol) -> &str {
        self.symbols.name(sym)
    }

    #[inline]
    pub fn ctx(&self) -> &Context {
        self.contexts[self.cur_ctx]
            .as_ref()
            .expect("current context always present")
    }

    #[inline]
    pub fn ctx_mut(&mut self) -> &mut Context {
        self.contexts[self.cur_ctx]
            .as_mut()
            .expect("current context always present")
    }

    pub fn context_at(&self, idx: usize) -> Option<&Context> {
        self.contexts.get(idx).and_then(|c| c.as_ref())
    }

    pub fn context_at_mut(&mut self, idx: usize) -> Option<&mut Context> {
        self.contexts.get_mut(idx).and_then(|c| c.as_mut())
    }

    /// Claim a context slot for a new fiber.
    pub fn add_context(&mut self, ctx: Context) -> usize {
        for (i, slot) in self.contexts.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(ctx);
                return i;
            }
        }
        self.contexts.push(Some(ctx));
        self.contexts.len() - 1
    }

    // ---------------------------------------------------------------
    // allocation
    // ---------------------------------------------------------------

    /// Allocate a heap object, running a GC step when due and
    /// protecting the result through the arena.
    pub fn alloc(&mut self, body: ObjBody, class: ObjRef) -> VmResult<ObjRef> {
        crate::gc::alloc(self, body, Some(class))
    }

    pub fn new_str(&mut self, text: impl Into<String>) -> VmResult<Value> {
        let class = self.core.string;
        let r = self.alloc(ObjBody::Str(StrData::new(text)), class)?;
        Ok(Value::Obj(r))
    }

    pub fn new_array(&mut self, values: Vec<Value>) -> VmResult<Value> {
        let class = self.core.array;
        let r = self.alloc(
            ObjBody::Array(crate::array::ArrayData::from_values(values)),
            class,
        )?;
        Ok(Value::Obj(r))
    }

    pub fn new_array_data(&mut self, data: crate::array::ArrayData) -> VmResult<Value> {
        let class = self.core.array;
        let r = self.alloc(ObjBody::Array(data), class)?;
        Ok(Value::Obj(r))
    }

    pub fn new_hash(&mut self, capacity: usize) -> VmResult<Value> {
        let class = self.core.hash;
        let r = self.alloc(
            ObjBody::Hash(crate::hash::HashData::with_capacity(capacity)),
            class,
        )?;
        Ok(Value::Obj(r))
    }

    pub fn new_range(&mut self, beg: Value, end: Value, exclusive: bool) -> VmResult<Value> {
        let class = self.core.range;
        let r = self.alloc(
            ObjBody::Range(crate::range::RangeData::new(beg, end, exclusive)),
            class,
        )?;
        Ok(Value::Obj(r))
    }

    pub fn new_proc(&mut self, data: ProcData) -> VmResult<ObjRef> {
        let class = self.core.proc_class;
        self.alloc(ObjBody::Proc(data), class)
    }

    /// Build an exception instance of `class` with a message.
    pub fn exc_new(&mut self, class: ObjRef, message: &str) -> VmResult<Value> {
        let msg = self.new_str(message)?;
        let r = self.alloc(ObjBody::Exception(ObjectData::default()), class)?;
        let mesg_sym = self.intern("mesg");
        self.iv_set_raw(r, mesg_sym, msg);
        Ok(Value::Obj(r))
    }

    /// Construct and return a raised-exception control flow value.
    pub fn raise(&mut self, class: ObjRef, message: &str) -> VmError {
        match self.exc_new(class, message) {
            Ok(value) => VmError::Raise(value),
            Err(e) => e,
        }
    }

    // ---------------------------------------------------------------
    // typed heap access
    // ---------------------------------------------------------------

    pub fn body(&self, r: ObjRef) -> &ObjBody {
        &self.heap.cell(r).body
    }

    pub fn body_mut(&mut self, r: ObjRef) -> &mut ObjBody {
        &mut self.heap.cell_mut(r).body
    }

    pub fn vtype_of(&self, v: Value) -> VType {
        match v {
            Value::Obj(r) => self.body(r).vtype(),
            _ => VType::Object,
        }
    }

    pub fn as_class(&self, r: ObjRef) -> Option<&ClassData> {
        match self.body(r) {
            ObjBody::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_class_mut(&mut self, r: ObjRef) -> Option<&mut ClassData> {
        match self.body_mut(r) {
            ObjBody::Class(c) => Some(c),
            _ => None,
        }
    }

    /// Class data or a fatal error; used where the graph guarantees a
    /// class object.
    pub fn class_data(&self, r: ObjRef) -> &ClassData {
        self.as_class(r).expect("expected a class object")
    }

    pub fn class_data_mut(&mut self, r: ObjRef) -> &mut ClassData {
        self.as_class_mut(r).expect("expected a class object")
    }

    pub fn as_str_data(&self, v: Value) -> Option<&StrData> {
        match v {
            Value::Obj(r) => match self.body(r) {
                ObjBody::Str(s) => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn str_text(&self, v: Value) -> Option<&str> {
        self.as_str_data(v).map(|s| s.as_str())
    }

    pub fn as_array(&self, v: Value) -> Option<&crate::array::ArrayData> {
        match v {
            Value::Obj(r) => match self.body(r) {
                ObjBody::Array(a) => Some(a),
                _ => None,
            },
            _ => None,
        }
    }

    // ---------------------------------------------------------------
    // instance variables (with the write-barrier discipline)
    // ---------------------------------------------------------------

    /// Set an ivar, applying the field write barrier first.
    pub fn iv_set_raw(&mut self, obj: ObjRef, sym: Symbol, value: Value) {
        self.heap.field_write_barrier(obj, value);
        match self.body_mut(obj) {
            ObjBody::Object(o) | ObjBody::Exception(o) => o.iv.set(sym, value),
            ObjBody::Class(c) => c.iv.set(sym, value),
            ObjBody::Hash(h) => h.iv.set(sym, value),
            ObjBody::Data(d) => d.iv.set(sym, value),
            _ => {}
        }
    }

    pub fn iv_get_raw(&self, obj: ObjRef, sym: Symbol) -> Option<Value> {
        match self.body(obj) {
            ObjBody::Object(o) | ObjBody::Exception(o) => o.iv.get(sym),
            ObjBody::Class(c) => c.iv.get(sym),
            ObjBody::Hash(h) => h.iv.get(sym),
            ObjBody::Data(d) => d.iv.get(sym),
            _ => None,
        }
    }

    pub fn iv_table(&self, obj: ObjRef) -> Option<&IvTable> {
        match self.body(obj) {
            ObjBody::Object(o) | ObjBody::Exception(o) => Some(&o.iv),
            ObjBody::Class(c) => Some(&c.iv),
            ObjBody::Hash(h) => Some(&h.iv),
            ObjBody::Data(d) => Some(&d.iv),
            _ => None,
        }
    }

    // ---------------------------------------------------------------
    // globals
    // ---------------------------------------------------------------

    pub fn gv_set(&mut self, sym: Symbol, value: Value) {
        self.globals.insert(sym, value);
    }

    pub fn gv_get(&self, sym: Symbol) -> Value {
        self.globals.get(&sym).copied().unwrap_or(Value::Nil)
    }

    // ---------------------------------------------------------------
    // class graph
    // ---------------------------------------------------------------

    /// The dispatch class of a value (singleton classes included).
    pub fn class_of(&self, v: Value) -> ObjRef {
        match v {
            Value::Nil => self.core.nil_class,
            Value::False => self.core.false_class,
            Value::True => self.core.true_class,
            Value::Int(_) => self.core.integer,
            Value::Float(_) => self.core.float,
            Value::Sym(_) => self.core.symbol,
            Value::HostPtr(_) => self.core.object,
            Value::Obj(r) => self
                .heap
                .cell(r)
                .header
                .class
                .unwrap_or(self.core.object),
        }
    }

    /// The user-visible class: skips singleton classes and I-classes.
    pub fn real_class_of(&self, v: Value) -> ObjRef {
        let mut c = self.class_of(v);
        loop {
            match self.as_class(c) {
                Some(data)
                    if matches!(data.kind, ClassKind::Singleton | ClassKind::IClass) =>
                {
                    match data.superclass {
                        Some(s) => c = s,
                        None => return c,
                    }
                }
                _ => return c,
            }
        }
    }

    pub fn set_class_name(&mut self, class: ObjRef, name: Symbol) {
        if let Some(c) = self.as_class_mut(class) {
            if c.name.is_none() {
                c.name = Some(name);
            }
        }
    }

    pub fn class_name(&self, class: ObjRef) -> String {
        match self.as_class(class) {
            Some(c) => match c.kind {
                ClassKind::Singleton => "#<Class>".to_string(),
                _ => c
                    .name
                    .map(|s| self.sym_name(s).to_string())
                    .unwrap_or_else(|| "#<anonymous>".to_string()),
            },
            None => "#<invalid>".to_string(),
        }
    }

    /// Method lookup: walk the super chain until found or exhausted.
    /// Returns the entry and the class whose table supplied it (the
    /// caller records it as `target_class` so `super` can continue).
    pub fn find_method(&self, class: ObjRef, mid: Symbol) -> Option<(MethodEntry, ObjRef)> {
        let mut cur = Some(class);
        while let Some(c) = cur {
            let data = self.as_class(c)?;
            // an I-class answers from the wrapped module's table
            let table_holder = match (data.kind, data.origin) {
                (ClassKind::IClass, Some(module)) => module,
                _ => c,
            };
            if let Some(holder) = self.as_class(table_holder) {
                if let Some(entry) = holder.mt.get(&mid) {
                    return match entry {
                        MethodEntry::Undefined => None,
                        found => Some((*found, c)),
                    };
                }
            }
            cur = data.superclass;
        }
        None
    }

    pub fn respond_to(&self, v: Value, mid: Symbol) -> bool {
        self.find_method(self.class_of(v), mid).is_some()
    }

    /// Define a class under `outer` (or reopen it).
    pub fn define_class_under(
        &mut self,
        outer: ObjRef,
        name: &str,
        superclass: ObjRef,
    ) -> VmResult<ObjRef> {
        let sym = self.intern(name);
        if let Some(existing) = self.const_get_on(outer, sym) {
            if let Value::Obj(r) = existing {
                if self.as_class(r).is_some() {
                    return Ok(r);
                }
            }
            let msg = format!("{name} is not a class");
            return Err(self.raise(self.core.type_error, &msg));
        }
        let instance_tt = self
            .as_class(superclass)
            .map(|c| c.instance_tt)
            .unwrap_or(VType::Object);
        let class_class = self.core.class;
        let r = self.alloc(
            ObjBody::Class(ClassData {
                instance_tt,
                ..ClassData::new_class(Some(superclass))
            }),
            class_class,
        )?;
        self.set_class_name(r, sym);
        self.const_set_on(outer, sym, Value::Obj(r));
        Ok(r)
    }

    pub fn define_class(&mut self, name: &str, superclass: ObjRef) -> VmResult<ObjRef> {
        let object = self.core.object;
        self.define_class_under(object, name, superclass)
    }

    pub fn define_module_under(&mut self, outer: ObjRef, name: &str) -> VmResult<ObjRef> {
        let sym = self.intern(name);
        if let Some(Value::Obj(r)) = self.const_get_on(outer, sym) {
            if self.as_class(r).is_some() {
                return Ok(r);
            }
        }
        let module_class = self.core.module;
        let r = self.alloc(ObjBody::Class(ClassData::new_module()), module_class)?;
        self.set_class_name(r, sym);
        self.const_set_on(outer, sym, Value::Obj(r));
        Ok(r)
    }

    pub fn define_module(&mut self, name: &str) -> VmResult<ObjRef> {
        let object = self.core.object;
        self.define_module_under(object, name)
    }

    /// Register a native method.
    pub fn define_method(&mut self, class: ObjRef, name: &str, aspec: ArgSpec, f: NativeFn) {
        let sym = self.intern(name);
        self.define_method_entry(class, sym, MethodEntry::Native(f, aspec));
    }

    pub fn define_method_entry(&mut self, class: ObjRef, mid: Symbol, entry: MethodEntry) {
        if let MethodEntry::BProc(p) = entry {
            self.heap.field_write_barrier(class, Value::Obj(p));
        }
        if let Some(c) = self.as_class_mut(class) {
            c.mt.insert(mid, entry);
        }
    }

    /// Define a method on the object's singleton class.
    pub fn define_singleton_method(
        &mut self,
        obj: Value,
        name: &str,
        aspec: ArgSpec,
        f: NativeFn,
    ) -> VmResult<()> {
        let sclass = self.singleton_class(obj)?;
        self.define_method(sclass, name, aspec, f);
        Ok(())
    }

    /// The object's singleton class, created and spliced on demand.
    pub fn singleton_class(&mut self, obj: Value) -> VmResult<ObjRef> {
        let Value::Obj(r) = obj else {
            let msg = "can't define singleton".to_string();
            return Err(self.raise(self.core.type_error, &msg));
        };
        let current = self.class_of(obj);
        if let Some(c) = self.as_class(current) {
            if c.kind == ClassKind::Singleton {
                return Ok(current);
            }
        }
        let class_class = self.core.class;
        let mut data = ClassData::new_singleton(Some(current));
        // a class object's singleton remembers its attachment, so class
        // variables and constants in singleton methods resolve there
        if self.as_class(r).is_some() {
            data.origin = Some(r);
        }
        let sclass = self.alloc(ObjBody::Class(data), class_class)?;
        self.heap.field_write_barrier(r, Value::Obj(sclass));
        self.heap.set_class(r, sclass);
        Ok(sclass)
    }

    /// Splice module `m` into `class`'s lookup chain via an I-class.
    pub fn include_module(&mut self, class: ObjRef, module: ObjRef) -> VmResult<()> {
        let old_super = self.class_data(class).superclass;
        let class_class = self.core.class;
        let ic = self.alloc(
            ObjBody::Class(ClassData::new_iclass(module, old_super)),
            class_class,
        )?;
        self.heap.field_write_barrier(class, Value::Obj(ic));
        self.class_data_mut(class).superclass = Some(ic);
        Ok(())
    }

    // ---------------------------------------------------------------
    // constants and class variables
    // ---------------------------------------------------------------

    pub fn const_set_on(&mut self, class: ObjRef, sym: Symbol, value: Value) {
        if let Value::Obj(r) = value {
            // a class gains its name when first assigned to a constant
            if self.as_class(r).is_some() {
                self.set_class_name(r, sym);
            }
        }
        self.iv_set_raw(class, sym, value);
    }

    pub fn const_get_on(&self, class: ObjRef, sym: Symbol) -> Option<Value> {
        self.iv_get_raw(class, sym)
    }

    /// Constant lookup from a module: its own table, the superclass
    /// chain, then the root.
    pub fn const_lookup(&self, start: ObjRef, sym: Symbol) -> Option<Value> {
        let mut cur = Some(start);
        while let Some(c) = cur {
            if let Some(v) = self.iv_get_raw(c, sym) {
                return Some(v);
            }
            cur = self.as_class(c).and_then(|d| d.superclass);
        }
        // fall back to the root namespace
        if start != self.core.object {
            return self.iv_get_raw(self.core.object, sym);
        }
        None
    }

    /// Class-variable lookup walks the super chain.
    pub fn cv_get(&self, class: ObjRef, sym: Symbol) -> Option<Value> {
        let mut cur = Some(class);
        while let Some(c) = cur {
            if let Some(v) = self.iv_get_raw(c, sym) {
                return Some(v);
            }
            cur = self.as_class(c).and_then(|d| d.superclass);
        }
        None
    }

    /// Class-variable write prefers the defining ancestor.
    pub fn cv_set(&mut self, class: ObjRef, sym: Symbol, value: Value) {
        let mut cur = Some(class);
        while let Some(c) = cur {
            if self
                .iv_table(c)
                .map(|t| t.contains(sym))
                .unwrap_or(false)
            {
                self.iv_set_raw(c, sym, value);
                return;
            }
            cur = self.as_class(c).and_then(|d| d.superclass);
        }
        self.iv_set_raw(class, sym, value);
    }

    // ---------------------------------------------------------------
    // exception plumbing
    // ---------------------------------------------------------------

    /// The message ivar of an exception (or its inspect fallback).
    pub fn exc_message(&self, exc: Value) -> String {
        if let Value::Obj(r) = exc {
            if let Some(mesg_sym) = self.symbols.lookup("mesg") {
                if let Some(m) = self.iv_get_raw(r, mesg_sym) {
                    if let Some(text) = self.str_text(m) {
                        return text.to_string();
                    }
                }
            }
            return self.class_name(self.real_class_of(exc));
        }
        format!("{exc:?}")
    }
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_class_graph() {
        let state = State::new();
        let object = state.core.object;
        let class = state.core.class;
        assert!(state.as_class(object).is_some());
        assert_eq!(state.class_of(Value::Obj(object)), class);
        assert!(state.class_data(object).superclass.is_none());
    }

    #[test]
    fn test_class_of_immediates() {
        let state = State::new();
        assert_eq!(state.class_of(Value::Nil), state.core.nil_class);
        assert_eq!(state.class_of(Value::Int(1)), state.core.integer);
        assert_eq!(state.class_of(Value::Float(1.0)), state.core.float);
        assert_eq!(state.class_of(Value::True), state.core.true_class);
    }

    #[test]
    fn test_define_class_and_reopen() {
        let mut state = State::new();
        let object = state.core.object;
        let a = state.define_class("Apple", object).unwrap();
        let again = state.define_class("Apple", object).unwrap();
        assert_eq!(a, again);
        assert_eq!(state.class_name(a), "Apple");
    }

    #[test]
    fn test_method_lookup_through_chain() {
        let mut state = State::new();
        let object = state.core.object;
        let parent = state.define_class("Parent", object).unwrap();
        let child = state.define_class_under(object, "Child", parent).unwrap();
        let mid = state.intern("greet");
        fn greet(_s: &mut State, _v: Value, _a: &Args) -> VmResult<Value> {
            Ok(Value::Int(42))
        }
        state.define_method(parent, "greet", ArgSpec::NONE, greet);
        let (entry, found_in) = state.find_method(child, mid).expect("found in parent");
        assert!(matches!(entry, MethodEntry::Native(..)));
        assert_eq!(found_in, parent);
    }

    #[test]
    fn test_include_module_splices_iclass() {
        let mut state = State::new();
        let object = state.core.object;
        let c = state.define_class("Includer", object).unwrap();
        let m = state.define_module("Mixin").unwrap();
        fn helper(_s: &mut State, _v: Value, _a: &Args) -> VmResult<Value> {
            Ok(Value::True)
        }
        state.define_method(m, "helper", ArgSpec::NONE, helper);
        state.include_module(c, m).unwrap();

        let mid = state.symbols.lookup("helper").unwrap();
        let (_, found_in) = state.find_method(c, mid).expect("found through iclass");
        // found in the splice, whose vtype is IClass
        assert_eq!(state.body(found_in).vtype(), VType::IClass);
    }

    #[test]
    fn test_singleton_class_inserted() {
        let mut state = State::new();
        let obj = state
            .alloc(ObjBody::Object(ObjectData::default()), state.core.object)
            .unwrap();
        let nominal = state.class_of(Value::Obj(obj));
        let sclass = state.singleton_class(Value::Obj(obj)).unwrap();
        assert_ne!(sclass, nominal);
        assert_eq!(state.class_of(Value::Obj(obj)), sclass);
        assert_eq!(state.class_data(sclass).superclass, Some(nominal));
        // idempotent
        assert_eq!(state.singleton_class(Value::Obj(obj)).unwrap(), sclass);
        // the user-visible class skips the singleton
        assert_eq!(state.real_class_of(Value::Obj(obj)), nominal);
    }

    #[test]
    fn test_constants_walk_superclass_chain() {
        let mut state = State::new();
        let object = state.core.object;
        let parent = state.define_class("CPar", object).unwrap();
        let child = state.define_class_under(object, "CChild", parent).unwrap();
        let sym = state.intern("WIDTH");
        state.const_set_on(parent, sym, Value::Int(80));
        assert_eq!(state.const_lookup(child, sym), Some(Value::Int(80)));
    }

    #[test]
    fn test_undef_hides_method() {
        let mut state = State::new();
        let object = state.core.object;
        let c = state.define_class("Hider", object).unwrap();
        fn f(_s: &mut State, _v: Value, _a: &Args) -> VmResult<Value> {
            Ok(Value::Nil)
        }
        state.define_method(c, "gone", ArgSpec::NONE, f);
        let mid = state.symbols.lookup("gone").unwrap();
        assert!(state.find_method(c, mid).is_some());
        state.define_method_entry(c, mid, MethodEntry::Undefined);
        assert!(state.find_method(c, mid).is_none());
    }
}
