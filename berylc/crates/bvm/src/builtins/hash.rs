//! Hash primitives.

use berylc_bc::ArgSpec;

use crate::error::VmResult;
use crate::obj::ObjBody;
use crate::state::{Args, State};
use crate::value::{ObjRef, Value};

pub fn install(state: &mut State) {
    let hash = state.core.hash;
    state.define_method(hash, "[]", ArgSpec::req(1), index);
    state.define_method(hash, "[]=", ArgSpec::req(2), index_set);
    state.define_method(hash, "store", ArgSpec::req(2), index_set);
    state.define_method(hash, "size", ArgSpec::NONE, size);
    state.define_method(hash, "length", ArgSpec::NONE, size);
    state.define_method(hash, "empty?", ArgSpec::NONE, empty_p);
    state.define_method(hash, "keys", ArgSpec::NONE, keys);
    state.define_method(hash, "values", ArgSpec::NONE, values);
    state.define_method(hash, "has_key?", ArgSpec::req(1), has_key_p);
    state.define_method(hash, "key?", ArgSpec::req(1), has_key_p);
    state.define_method(hash, "include?", ArgSpec::req(1), has_key_p);
    state.define_method(hash, "member?", ArgSpec::req(1), has_key_p);
    state.define_method(hash, "delete", ArgSpec::req(1), delete);
    state.define_method(hash, "fetch", ArgSpec::opt(1, 1), fetch);
}

fn hash_ref(state: &mut State, recv: Value) -> VmResult<ObjRef> {
    match recv {
        Value::Obj(r) if matches!(state.body(r), ObjBody::Hash(_)) => Ok(r),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "hash expected"))
        }
    }
}

fn index(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    Ok(state.hash_get(r, args.get(0)))
}

fn index_set(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    let v = args.get(1);
    state.hash_set(r, args.get(0), v)?;
    Ok(v)
}

fn size(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    Ok(match state.body(r) {
        ObjBody::Hash(h) => Value::Int(h.len() as i64),
        _ => Value::Int(0),
    })
}

fn empty_p(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    Ok(match state.body(r) {
        ObjBody::Hash(h) => Value::bool(h.is_empty()),
        _ => Value::True,
    })
}

fn keys(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    let keys: Vec<Value> = match state.body(r) {
        ObjBody::Hash(h) => h.keys().collect(),
        _ => Vec::new(),
    };
    state.new_array(keys)
}

fn values(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    let values: Vec<Value> = match state.body(r) {
        ObjBody::Hash(h) => h.values().collect(),
        _ => Vec::new(),
    };
    state.new_array(values)
}

fn has_key_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    let key = state.hash_key_of(args.get(0));
    Ok(match state.body(r) {
        ObjBody::Hash(h) => Value::bool(h.contains(&key)),
        _ => Value::False,
    })
}

fn delete(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    let key = state.hash_key_of(args.get(0));
    Ok(match state.body_mut(r) {
        ObjBody::Hash(h) => h.delete(&key).unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

fn fetch(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let r = hash_ref(state, recv)?;
    let key = state.hash_key_of(args.get(0));
    let found = match state.body(r) {
        ObjBody::Hash(h) => h.get(&key),
        _ => None,
    };
    match found {
        Some(v) => Ok(v),
        None => {
            if args.len() > 1 {
                return Ok(args.get(1));
            }
            let rendered = state.inspect_value(args.get(0))?;
            let err = state.core.index_error;
            Err(state.raise(err, &format!("key not found: {rendered}")))
        }
    }
}
