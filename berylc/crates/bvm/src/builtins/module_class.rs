//! Module and Class methods: inclusion, attribute definition, aliasing,
//! instantiation.

use std::rc::Rc;

use berylc_bc::{ArgSpec, Insn, Irep, OpCode};
use berylc_util::well_known;

use crate::class::MethodEntry;
use crate::error::VmResult;
use crate::obj::{ObjBody, ObjectData, VType};
use crate::proc_env::ProcData;
use crate::state::{Args, State};
use crate::value::Value;

pub fn install(state: &mut State) {
    let module = state.core.module;
    state.define_method(module, "include", ArgSpec::any(), include);
    state.define_method(module, "attr_reader", ArgSpec::any(), attr_reader);
    state.define_method(module, "attr_writer", ArgSpec::any(), attr_writer);
    state.define_method(module, "attr_accessor", ArgSpec::any(), attr_accessor);
    state.define_method(module, "alias_method", ArgSpec::req(2), alias_method);
    state.define_method(module, "undef_method", ArgSpec::any(), undef_method);
    state.define_method(module, "===", ArgSpec::req(1), case_eq);
    state.define_method(module, "to_s", ArgSpec::NONE, name);
    state.define_method(module, "inspect", ArgSpec::NONE, name);
    state.define_method(module, "name", ArgSpec::NONE, name);
    state.define_method(module, "method_defined?", ArgSpec::req(1), method_defined_p);
    state.define_method(module, "const_get", ArgSpec::req(1), const_get);
    state.define_method(module, "const_set", ArgSpec::req(2), const_set);

    let class = state.core.class;
    state.define_method(class, "new", ArgSpec::any().with_block(), class_new);
    state.define_method(class, "superclass", ArgSpec::NONE, superclass);
    state.define_method(class, "allocate", ArgSpec::NONE, allocate);
}

fn class_arg(state: &mut State, recv: Value) -> VmResult<crate::value::ObjRef> {
    match recv {
        Value::Obj(r) if state.as_class(r).is_some() => Ok(r),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "receiver is not a class or module"))
        }
    }
}

fn include(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    // later arguments end up earlier in the chain
    for arg in args.args.iter().rev() {
        let Value::Obj(module) = *arg else {
            let err = state.core.type_error;
            return Err(state.raise(err, "wrong argument type (expected Module)"));
        };
        state.include_module(class, module)?;
    }
    Ok(recv)
}

fn sym_arg(state: &mut State, v: Value) -> berylc_util::Symbol {
    match v {
        Value::Sym(s) => s,
        other => {
            let text = state
                .str_text(other)
                .map(|t| t.to_string())
                .unwrap_or_default();
            state.intern(&text)
        }
    }
}

/// Build the one-instruction reader body `GETIV R1 @name; RETURN R1`.
fn reader_irep(state: &mut State, name: &str) -> Rc<Irep> {
    let ivar = state.intern(&format!("@{name}"));
    Rc::new(Irep {
        nlocals: 1,
        nregs: 3,
        iseq: vec![
            Insn::abx(OpCode::Getiv, 1, 0),
            Insn::ab(OpCode::Return, 1, berylc_bc::RETURN_NORMAL),
        ],
        pool: vec![],
        syms: vec![ivar],
        reps: vec![],
        lines: vec![],
        filename: None,
    })
}

/// Writer body: `ENTER req:1; SETIV R1 @name; RETURN R1`.
fn writer_irep(state: &mut State, name: &str) -> Rc<Irep> {
    let ivar = state.intern(&format!("@{name}"));
    Rc::new(Irep {
        nlocals: 2,
        nregs: 4,
        iseq: vec![
            Insn::ax(OpCode::Enter, ArgSpec::req(1).pack()),
            Insn::abx(OpCode::Setiv, 1, 0),
            Insn::ab(OpCode::Return, 1, berylc_bc::RETURN_NORMAL),
        ],
        pool: vec![],
        syms: vec![ivar],
        reps: vec![],
        lines: vec![],
        filename: None,
    })
}

fn define_attr(state: &mut State, recv: Value, args: &Args, reader: bool, writer: bool) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    for arg in &args.args {
        let sym = sym_arg(state, *arg);
        let name = state.sym_name(sym).to_string();
        if reader {
            let irep = reader_irep(state, &name);
            let mut proc_data = ProcData::from_irep(irep);
            proc_data.target_class = Some(class);
            proc_data.strict = true;
            let proc_ref = state.new_proc(proc_data)?;
            let mid = state.intern(&name);
            state.define_method_entry(class, mid, MethodEntry::BProc(proc_ref));
        }
        if writer {
            let irep = writer_irep(state, &name);
            let mut proc_data = ProcData::from_irep(irep);
            proc_data.target_class = Some(class);
            proc_data.strict = true;
            let proc_ref = state.new_proc(proc_data)?;
            let mid = state.intern(&format!("{name}="));
            state.define_method_entry(class, mid, MethodEntry::BProc(proc_ref));
        }
    }
    Ok(Value::Nil)
}

fn attr_reader(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    define_attr(state, recv, args, true, false)
}

fn attr_writer(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    define_attr(state, recv, args, false, true)
}

fn attr_accessor(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    define_attr(state, recv, args, true, true)
}

fn alias_method(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    let new_name = sym_arg(state, args.get(0));
    let old_name = sym_arg(state, args.get(1));
    let Some((entry, _)) = state.find_method(class, old_name) else {
        let name = state.sym_name(old_name).to_string();
        let err = state.core.name_error;
        return Err(state.raise(err, &format!("undefined method '{name}'")));
    };
    state.define_method_entry(class, new_name, entry);
    Ok(recv)
}

fn undef_method(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    for arg in &args.args {
        let sym = sym_arg(state, *arg);
        state.define_method_entry(class, sym, MethodEntry::Undefined);
    }
    Ok(recv)
}

/// `mod === obj` asks whether obj is an instance, which is what rescue
/// clause matching runs.
fn case_eq(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    state.funcall(args.get(0), "is_a?", vec![recv])
}

fn name(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    let text = state.class_name(class);
    state.new_str(text)
}

fn method_defined_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    let sym = sym_arg(state, args.get(0));
    Ok(Value::bool(state.find_method(class, sym).is_some()))
}

fn const_get(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    let sym = sym_arg(state, args.get(0));
    match state.const_lookup(class, sym) {
        Some(v) => Ok(v),
        None => {
            let name = state.sym_name(sym).to_string();
            let err = state.core.name_error;
            Err(state.raise(err, &format!("uninitialized constant {name}")))
        }
    }
}

fn const_set(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    let sym = sym_arg(state, args.get(0));
    let value = args.get(1);
    state.const_set_on(class, sym, value);
    Ok(value)
}

/// Superclass, skipping inclusion wrappers.
fn superclass(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    let mut cur = state.class_data(class).superclass;
    while let Some(c) = cur {
        match state.as_class(c) {
            Some(data) if data.kind == crate::class::ClassKind::IClass => {
                cur = data.superclass;
            }
            _ => return Ok(Value::Obj(c)),
        }
    }
    Ok(Value::Nil)
}

/// `Class#new`: allocate per the class's instance shape, then run
/// `initialize` forwarding arguments and block.
fn class_new(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let obj = allocate(state, recv, args)?;
    state.funcall_with_block(
        obj,
        well_known::INITIALIZE,
        args.args.clone(),
        args.block,
    )?;
    if let Value::Obj(r) = obj {
        state.heap.protect(r);
    }
    Ok(obj)
}

fn allocate(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let class = class_arg(state, recv)?;
    let tt = state
        .as_class(class)
        .map(|c| c.instance_tt)
        .unwrap_or(VType::Object);
    let body = match tt {
        VType::Str => ObjBody::Str(crate::string::StrData::new("")),
        VType::Array => ObjBody::Array(crate::array::ArrayData::new()),
        VType::Hash => ObjBody::Hash(crate::hash::HashData::new()),
        VType::Range => ObjBody::Range(crate::range::RangeData::new(
            Value::Nil,
            Value::Nil,
            false,
        )),
        VType::Exception => ObjBody::Exception(ObjectData::default()),
        VType::Fiber => ObjBody::Fiber(crate::fiber::FiberData::default()),
        VType::Proc => {
            let err = state.core.type_error;
            return Err(state.raise(err, "allocator undefined for Proc"));
        }
        _ => ObjBody::Object(ObjectData::default()),
    };
    let r = state.alloc(body, class)?;
    Ok(Value::Obj(r))
}
