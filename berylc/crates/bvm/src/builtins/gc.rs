//! The GC module: collector controls surfaced to the language.

use berylc_bc::ArgSpec;

use crate::error::VmResult;
use crate::state::{Args, State};
use crate::value::Value;

pub fn install(state: &mut State) {
    let gc = state
        .define_module("GC")
        .expect("boot allocation cannot fail");
    let gc_v = Value::Obj(gc);
    let defs: &[(&str, ArgSpec, crate::state::NativeFn)] = &[
        ("start", ArgSpec::NONE, start),
        ("enable", ArgSpec::NONE, enable),
        ("disable", ArgSpec::NONE, disable),
        ("interval_ratio", ArgSpec::NONE, interval_ratio),
        ("interval_ratio=", ArgSpec::req(1), set_interval_ratio),
        ("step_ratio", ArgSpec::NONE, step_ratio),
        ("step_ratio=", ArgSpec::req(1), set_step_ratio),
        ("generational_mode", ArgSpec::NONE, generational_mode),
        ("generational_mode=", ArgSpec::req(1), set_generational_mode),
    ];
    for (name, aspec, f) in defs {
        state
            .define_singleton_method(gc_v, name, *aspec, *f)
            .expect("boot allocation cannot fail");
    }
}

fn start(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    crate::gc::full_gc(state);
    Ok(Value::Nil)
}

fn enable(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    let was = state.heap.disabled;
    state.heap.disabled = false;
    Ok(Value::bool(was))
}

fn disable(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    let was = state.heap.disabled;
    state.heap.disabled = true;
    Ok(Value::bool(was))
}

fn interval_ratio(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::Int(state.heap.interval_ratio as i64))
}

fn set_interval_ratio(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Int(n) = args.get(0) else {
        let err = state.core.type_error;
        return Err(state.raise(err, "integer expected"));
    };
    state.heap.interval_ratio = n.max(0) as usize;
    Ok(Value::Nil)
}

fn step_ratio(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::Int(state.heap.step_ratio as i64))
}

fn set_step_ratio(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Int(n) = args.get(0) else {
        let err = state.core.type_error;
        return Err(state.raise(err, "integer expected"));
    };
    state.heap.step_ratio = n.max(0) as usize;
    Ok(Value::Nil)
}

fn generational_mode(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(Value::bool(state.heap.generational))
}

/// Switching modes finishes the cycle in progress first so colors stay
/// coherent.
fn set_generational_mode(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    let enable = args.get(0).truthy();
    if state.heap.generational != enable {
        crate::gc::full_gc(state);
        state.heap.generational = enable;
    }
    Ok(Value::bool(enable))
}
