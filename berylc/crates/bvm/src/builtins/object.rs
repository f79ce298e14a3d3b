//! Object: the root of the method universe.

use berylc_bc::ArgSpec;

use crate::class::ClassKind;
use crate::error::VmResult;
use crate::obj::ObjBody;
use crate::state::{Args, State};
use crate::value::Value;

pub fn install(state: &mut State) {
    let object = state.core.object;
    state.define_method(object, "initialize", ArgSpec::any(), initialize);
    state.define_method(object, "class", ArgSpec::NONE, class);
    state.define_method(object, "==", ArgSpec::req(1), eq);
    state.define_method(object, "equal?", ArgSpec::req(1), equal_p);
    state.define_method(object, "eql?", ArgSpec::req(1), eql_p);
    state.define_method(object, "!", ArgSpec::NONE, not);
    state.define_method(object, "!=", ArgSpec::req(1), neq);
    state.define_method(object, "nil?", ArgSpec::NONE, nil_p);
    state.define_method(object, "is_a?", ArgSpec::req(1), is_a_p);
    state.define_method(object, "kind_of?", ArgSpec::req(1), is_a_p);
    state.define_method(object, "instance_of?", ArgSpec::req(1), instance_of_p);
    state.define_method(object, "respond_to?", ArgSpec::req(1), respond_to_p);
    state.define_method(object, "to_s", ArgSpec::NONE, to_s);
    state.define_method(object, "inspect", ArgSpec::NONE, inspect);
    state.define_method(object, "instance_variable_get", ArgSpec::req(1), ivar_get);
    state.define_method(object, "instance_variable_set", ArgSpec::req(2), ivar_set);
    state.define_method(object, "object_id", ArgSpec::NONE, object_id);
    state.define_method(object, "hash", ArgSpec::NONE, object_id);
    state.define_method(object, "freeze", ArgSpec::NONE, itself);
    state.define_method(object, "itself", ArgSpec::NONE, itself);

    let nil_class = state.core.nil_class;
    state.define_method(nil_class, "to_s", ArgSpec::NONE, nil_to_s);
    state.define_method(nil_class, "inspect", ArgSpec::NONE, nil_inspect);
    state.define_method(nil_class, "to_a", ArgSpec::NONE, nil_to_a);
    // yield with no block lands here through the block slot
    state.define_method(nil_class, "call", ArgSpec::any(), nil_call);

    let true_class = state.core.true_class;
    state.define_method(true_class, "to_s", ArgSpec::NONE, true_to_s);
    state.define_method(true_class, "inspect", ArgSpec::NONE, true_to_s);
    let false_class = state.core.false_class;
    state.define_method(false_class, "to_s", ArgSpec::NONE, false_to_s);
    state.define_method(false_class, "inspect", ArgSpec::NONE, false_to_s);

    let symbol = state.core.symbol;
    state.define_method(symbol, "to_s", ArgSpec::NONE, sym_to_s);
    state.define_method(symbol, "to_sym", ArgSpec::NONE, itself);
    state.define_method(symbol, "inspect", ArgSpec::NONE, sym_inspect);
}

fn initialize(_state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::Nil)
}

fn class(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::Obj(state.real_class_of(recv)))
}

fn eq(_state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    Ok(Value::bool(recv.ident_eq(args.get(0))))
}

fn equal_p(_state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    Ok(Value::bool(recv.ident_eq(args.get(0))))
}

/// `eql?`: the relation hash keys use. Immediates by tag and payload,
/// strings by content, everything else by identity.
fn eql_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let other = args.get(0);
    Ok(Value::bool(
        state.hash_key_of(recv) == state.hash_key_of(other),
    ))
}

fn not(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::bool(!recv.truthy()))
}

fn neq(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let eq = state.funcall(recv, "==", vec![args.get(0)])?;
    Ok(Value::bool(!eq.truthy()))
}

fn nil_p(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::bool(recv.is_nil()))
}

/// Walk the receiver's lookup chain, seeing through I-classes.
fn is_a_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Obj(target) = args.get(0) else {
        let err = state.core.type_error;
        return Err(state.raise(err, "class or module required"));
    };
    let mut cur = Some(state.class_of(recv));
    while let Some(c) = cur {
        if c == target {
            return Ok(Value::True);
        }
        let Some(data) = state.as_class(c) else { break };
        if data.kind == ClassKind::IClass && data.origin == Some(target) {
            return Ok(Value::True);
        }
        cur = data.superclass;
    }
    Ok(Value::False)
}

fn instance_of_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Obj(target) = args.get(0) else {
        let err = state.core.type_error;
        return Err(state.raise(err, "class or module required"));
    };
    Ok(Value::bool(state.real_class_of(recv) == target))
}

fn respond_to_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let mid = match args.get(0) {
        Value::Sym(s) => s,
        other => {
            let text = state
                .str_text(other)
                .map(|t| t.to_string())
                .unwrap_or_default();
            state.intern(&text)
        }
    };
    Ok(Value::bool(state.respond_to(recv, mid)))
}

fn to_s(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = match recv {
        Value::Obj(_) => state.default_to_s(recv),
        other => {
            // immediates render their literal form
            match other {
                Value::Nil => String::new(),
                Value::True => "true".into(),
                Value::False => "false".into(),
                Value::Int(i) => i.to_string(),
                Value::Float(f) => crate::vm_ops::format_float(f),
                Value::Sym(s) => state.sym_name(s).to_string(),
                Value::HostPtr(p) => format!("#<hostptr {p:#x}>"),
                Value::Obj(_) => unreachable!("matched above"),
            }
        }
    };
    state.new_str(text)
}

fn inspect(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = match recv {
        Value::Nil => "nil".to_string(),
        Value::True => "true".into(),
        Value::False => "false".into(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => crate::vm_ops::format_float(f),
        Value::Sym(s) => format!(":{}", state.sym_name(s)),
        Value::HostPtr(p) => format!("#<hostptr {p:#x}>"),
        Value::Obj(r) => match state.body(r) {
            ObjBody::Str(s) => format!("{:?}", s.as_str()),
            _ => {
                // show the ivars the way the modeled language does
                let class = state.class_name(state.real_class_of(recv));
                let mut parts = Vec::new();
                if let Some(iv) = state.iv_table(r) {
                    for (sym, value) in iv.iter() {
                        let name = state.sym_name(sym).to_string();
                        if name.starts_with('@') {
                            parts.push((name, value));
                        }
                    }
                }
                if parts.is_empty() {
                    format!("#<{class}>")
                } else {
                    let mut rendered = Vec::with_capacity(parts.len());
                    for (name, value) in parts {
                        let text = state.inspect_value(value)?;
                        rendered.push(format!("{name}={text}"));
                    }
                    format!("#<{class} {}>", rendered.join(", "))
                }
            }
        },
    };
    state.new_str(text)
}

fn ivar_get(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Obj(r) = recv else {
        return Ok(Value::Nil);
    };
    let name = match args.get(0) {
        Value::Sym(s) => state.sym_name(s).to_string(),
        other => state.str_text(other).unwrap_or_default().to_string(),
    };
    let sym = state.intern(&name);
    Ok(state.iv_get_raw(r, sym).unwrap_or(Value::Nil))
}

fn ivar_set(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Obj(r) = recv else {
        let err = state.core.type_error;
        return Err(state.raise(err, "cannot set instance variable on immediate"));
    };
    let name = match args.get(0) {
        Value::Sym(s) => state.sym_name(s).to_string(),
        other => state.str_text(other).unwrap_or_default().to_string(),
    };
    let sym = state.intern(&name);
    let value = args.get(1);
    state.iv_set_raw(r, sym, value);
    Ok(value)
}

fn object_id(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let id = match recv {
        Value::Nil => 0,
        Value::False => 1,
        Value::True => 2,
        Value::Int(i) => i.wrapping_mul(2).wrapping_add(1),
        Value::Float(f) => f.to_bits() as i64,
        Value::Sym(s) => (s.as_u32() as i64) << 8,
        Value::HostPtr(p) => p as i64,
        Value::Obj(r) => r.0 as i64 + (1 << 40),
    };
    Ok(Value::Int(id))
}

fn itself(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(recv)
}

fn nil_to_s(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    state.new_str("")
}

fn nil_inspect(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    state.new_str("nil")
}

fn nil_to_a(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    state.new_array(Vec::new())
}

fn nil_call(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    let err = state.core.local_jump_error;
    Err(state.raise(err, "no block given (yield)"))
}

fn true_to_s(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    state.new_str("true")
}

fn false_to_s(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    state.new_str("false")
}

fn sym_to_s(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let Value::Sym(s) = recv else {
        return Ok(Value::Nil);
    };
    let name = state.sym_name(s).to_string();
    state.new_str(name)
}

fn sym_inspect(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let Value::Sym(s) = recv else {
        return Ok(Value::Nil);
    };
    let name = format!(":{}", state.sym_name(s));
    state.new_str(name)
}
