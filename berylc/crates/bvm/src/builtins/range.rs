//! Range primitives.

use berylc_bc::ArgSpec;

use crate::error::VmResult;
use crate::obj::ObjBody;
use crate::state::{Args, State};
use crate::value::{ObjRef, Value};

pub fn install(state: &mut State) {
    let range = state.core.range;
    state.define_method(range, "first", ArgSpec::NONE, first);
    state.define_method(range, "begin", ArgSpec::NONE, first);
    state.define_method(range, "last", ArgSpec::NONE, last);
    state.define_method(range, "end", ArgSpec::NONE, last);
    state.define_method(range, "exclude_end?", ArgSpec::NONE, exclude_end_p);
    state.define_method(range, "size", ArgSpec::NONE, size);
    state.define_method(range, "include?", ArgSpec::req(1), include_p);
    state.define_method(range, "member?", ArgSpec::req(1), include_p);
    state.define_method(range, "===", ArgSpec::req(1), include_p);
}

fn range_ref(state: &mut State, recv: Value) -> VmResult<ObjRef> {
    match recv {
        Value::Obj(r) if matches!(state.body(r), ObjBody::Range(_)) => Ok(r),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "range expected"))
        }
    }
}

fn parts(state: &mut State, recv: Value) -> VmResult<(Value, Value, bool)> {
    let r = range_ref(state, recv)?;
    Ok(match state.body(r) {
        ObjBody::Range(rd) => (rd.beg, rd.end, rd.exclusive),
        _ => (Value::Nil, Value::Nil, false),
    })
}

fn first(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(parts(state, recv)?.0)
}

fn last(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(parts(state, recv)?.1)
}

fn exclude_end_p(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::bool(parts(state, recv)?.2))
}

fn size(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let (beg, end, excl) = parts(state, recv)?;
    match (beg, end) {
        (Value::Int(b), Value::Int(e)) => {
            let last = if excl { e - 1 } else { e };
            Ok(Value::Int((last - b + 1).max(0)))
        }
        _ => Ok(Value::Nil),
    }
}

/// Inclusion by the `<=` / `<` ordering of the endpoints.
fn include_p(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let (beg, end, excl) = parts(state, recv)?;
    let v = args.get(0);
    let ge_beg = state.funcall(v, ">=", vec![beg])?;
    if !ge_beg.truthy() {
        return Ok(Value::False);
    }
    let cmp = if excl { "<" } else { "<=" };
    let below_end = state.funcall(v, cmp, vec![end])?;
    Ok(Value::bool(below_end.truthy()))
}
