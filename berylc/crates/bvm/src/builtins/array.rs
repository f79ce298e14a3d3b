//! Array primitives; the iteration protocol lives in the prelude.

use berylc_bc::ArgSpec;

use crate::error::VmResult;
use crate::obj::ObjBody;
use crate::state::{Args, State};
use crate::value::{ObjRef, Value};

pub fn install(state: &mut State) {
    let array = state.core.array;
    state.define_method(array, "size", ArgSpec::NONE, size);
    state.define_method(array, "length", ArgSpec::NONE, size);
    state.define_method(array, "empty?", ArgSpec::NONE, empty_p);
    state.define_method(array, "push", ArgSpec::any(), push);
    state.define_method(array, "<<", ArgSpec::req(1), push);
    state.define_method(array, "append", ArgSpec::any(), push);
    state.define_method(array, "pop", ArgSpec::NONE, pop);
    state.define_method(array, "shift", ArgSpec::NONE, shift);
    state.define_method(array, "unshift", ArgSpec::any(), unshift);
    state.define_method(array, "[]", ArgSpec::opt(1, 1), index);
    state.define_method(array, "[]=", ArgSpec::req(2), index_set);
    state.define_method(array, "first", ArgSpec::NONE, first);
    state.define_method(array, "last", ArgSpec::NONE, last);
    state.define_method(array, "concat", ArgSpec::req(1), concat);
    state.define_method(array, "+", ArgSpec::req(1), plus);
    state.define_method(array, "join", ArgSpec::opt(0, 1), join);
    state.define_method(array, "include?", ArgSpec::req(1), include_p);
    state.define_method(array, "reverse", ArgSpec::NONE, reverse);
    state.define_method(array, "clear", ArgSpec::NONE, clear);
    state.define_method(array, "dup", ArgSpec::NONE, dup);
    state.define_method(array, "index", ArgSpec::req(1), index_of);
    state.define_method(array, "delete_at", ArgSpec::req(1), delete_at);
    state.define_method(array, "slice", ArgSpec::opt(1, 1), slice);
    state.define_method(array, "initialize", ArgSpec::opt(0, 2), initialize);
}

fn ary_ref(state: &mut State, recv: Value) -> VmResult<ObjRef> {
    match recv {
        Value::Obj(r) if matches!(state.body(r), ObjBody::Array(_)) => Ok(r),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "array expected"))
        }
    }
}

fn size(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let len = match state.body(r) {
        ObjBody::Array(a) => a.len(),
        _ => 0,
    };
    Ok(Value::Int(len as i64))
}

fn empty_p(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let empty = match state.body(r) {
        ObjBody::Array(a) => a.is_empty(),
        _ => true,
    };
    Ok(Value::bool(empty))
}

fn push(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    for &v in &args.args {
        state.heap.field_write_barrier(r, v);
        if let ObjBody::Array(a) = state.body_mut(r) {
            a.push(v);
        }
    }
    Ok(recv)
}

fn pop(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    Ok(match state.body_mut(r) {
        ObjBody::Array(a) => a.pop().unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

fn shift(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    Ok(match state.body_mut(r) {
        ObjBody::Array(a) => a.shift().unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

fn unshift(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    for &v in args.args.iter().rev() {
        state.heap.field_write_barrier(r, v);
        if let ObjBody::Array(a) = state.body_mut(r) {
            a.unshift(v);
        }
    }
    Ok(recv)
}

/// `a[i]`, `a[i, len]`, `a[range]`.
fn index(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let len = match state.body(r) {
        ObjBody::Array(a) => a.len() as i64,
        _ => 0,
    };
    match args.get(0) {
        Value::Int(i) => {
            if let Some(Value::Int(count)) = args.args.get(1).copied() {
                let start = if i < 0 { i + len } else { i };
                if start < 0 || start > len || count < 0 {
                    return Ok(Value::Nil);
                }
                let end = (start + count).min(len) as usize;
                let piece = match state.body_mut(r) {
                    ObjBody::Array(a) => a.subseq(start as usize, end - start as usize),
                    _ => crate::array::ArrayData::new(),
                };
                return state.new_array_data(piece);
            }
            let v = match state.body(r) {
                ObjBody::Array(a) => a.ref_at(i).unwrap_or(Value::Nil),
                _ => Value::Nil,
            };
            Ok(v)
        }
        Value::Obj(range_ref) if matches!(state.body(range_ref), ObjBody::Range(_)) => {
            let (beg, end, excl) = match state.body(range_ref) {
                ObjBody::Range(rd) => (rd.beg, rd.end, rd.exclusive),
                _ => (Value::Nil, Value::Nil, false),
            };
            let (Value::Int(mut b), Value::Int(mut e)) = (beg, end) else {
                let err = state.core.type_error;
                return Err(state.raise(err, "integer range expected"));
            };
            if b < 0 {
                b += len;
            }
            if e < 0 {
                e += len;
            }
            if !excl {
                e += 1;
            }
            if b < 0 || b > len {
                return Ok(Value::Nil);
            }
            let e = e.clamp(b, len) as usize;
            let piece = match state.body_mut(r) {
                ObjBody::Array(a) => a.subseq(b as usize, e - b as usize),
                _ => crate::array::ArrayData::new(),
            };
            state.new_array_data(piece)
        }
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "integer index expected"))
        }
    }
}

fn index_set(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let Value::Int(i) = args.get(0) else {
        let err = state.core.type_error;
        return Err(state.raise(err, "integer index expected"));
    };
    let v = args.get(1);
    state.heap.field_write_barrier(r, v);
    if let ObjBody::Array(a) = state.body_mut(r) {
        a.set(i, v);
    }
    Ok(v)
}

fn first(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    Ok(match state.body(r) {
        ObjBody::Array(a) => a.get(0).unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

fn last(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    Ok(match state.body(r) {
        ObjBody::Array(a) => {
            if a.is_empty() {
                Value::Nil
            } else {
                a.get(a.len() - 1).unwrap_or(Value::Nil)
            }
        }
        _ => Value::Nil,
    })
}

fn concat(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let other = state.splat_to_vec(args.get(0));
    state.heap.write_barrier(r);
    if let ObjBody::Array(a) = state.body_mut(r) {
        a.concat(&other);
    }
    Ok(recv)
}

fn plus(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let mut values = match state.body(r) {
        ObjBody::Array(a) => a.as_slice().to_vec(),
        _ => Vec::new(),
    };
    values.extend(state.splat_to_vec(args.get(0)));
    state.new_array(values)
}

fn join(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let sep = match args.args.first() {
        Some(v) => state
            .str_text(*v)
            .map(|t| t.to_string())
            .unwrap_or_default(),
        None => String::new(),
    };
    let items = match state.body(r) {
        ObjBody::Array(a) => a.as_slice().to_vec(),
        _ => Vec::new(),
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(state.obj_to_s(item)?);
    }
    state.new_str(parts.join(&sep))
}

fn include_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let needle = args.get(0);
    let items = match state.body(r) {
        ObjBody::Array(a) => a.as_slice().to_vec(),
        _ => Vec::new(),
    };
    for item in items {
        if item.ident_eq(needle) {
            return Ok(Value::True);
        }
        let eq = state.funcall(item, "==", vec![needle])?;
        if eq.truthy() {
            return Ok(Value::True);
        }
    }
    Ok(Value::False)
}

fn reverse(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let mut values = match state.body(r) {
        ObjBody::Array(a) => a.as_slice().to_vec(),
        _ => Vec::new(),
    };
    values.reverse();
    state.new_array(values)
}

fn clear(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    if let ObjBody::Array(a) = state.body_mut(r) {
        a.clear();
    }
    Ok(recv)
}

fn dup(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let piece = match state.body_mut(r) {
        ObjBody::Array(a) => {
            let len = a.len();
            a.subseq(0, len)
        }
        _ => crate::array::ArrayData::new(),
    };
    state.new_array_data(piece)
}

fn index_of(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let needle = args.get(0);
    let items = match state.body(r) {
        ObjBody::Array(a) => a.as_slice().to_vec(),
        _ => Vec::new(),
    };
    for (i, item) in items.into_iter().enumerate() {
        let eq = state.funcall(item, "==", vec![needle])?;
        if eq.truthy() {
            return Ok(Value::Int(i as i64));
        }
    }
    Ok(Value::Nil)
}

fn delete_at(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let Value::Int(i) = args.get(0) else {
        let err = state.core.type_error;
        return Err(state.raise(err, "integer index expected"));
    };
    let out = match state.body_mut(r) {
        ObjBody::Array(a) => {
            let len = a.len() as i64;
            let i = if i < 0 { i + len } else { i };
            if i < 0 || i >= len {
                Value::Nil
            } else {
                a.make_mut().remove(i as usize)
            }
        }
        _ => Value::Nil,
    };
    Ok(out)
}

fn slice(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    index(state, recv, args)
}

fn initialize(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = ary_ref(state, recv)?;
    let n = match args.args.first() {
        Some(Value::Int(n)) => (*n).max(0) as usize,
        _ => 0,
    };
    let fill = args.get(1);
    if let ObjBody::Array(a) = state.body_mut(r) {
        a.replace(vec![fill; n]);
    }
    Ok(recv)
}
