//! Exception methods.

use berylc_bc::ArgSpec;

use crate::error::VmResult;
use crate::state::{Args, State};
use crate::value::Value;

pub fn install(state: &mut State) {
    let exception = state.core.exception;
    state.define_method(exception, "initialize", ArgSpec::opt(0, 1), initialize);
    state.define_method(exception, "message", ArgSpec::NONE, message);
    state.define_method(exception, "to_s", ArgSpec::NONE, message);
    state.define_method(exception, "inspect", ArgSpec::NONE, inspect);
    state.define_method(exception, "exception", ArgSpec::opt(0, 1), exception_m);
}

fn initialize(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Obj(r) = recv else {
        return Ok(recv);
    };
    let mesg = match args.args.first() {
        Some(v) => *v,
        None => {
            let class_name = state.class_name(state.real_class_of(recv));
            state.new_str(class_name)?
        }
    };
    let sym = state.intern("mesg");
    state.iv_set_raw(r, sym, mesg);
    Ok(recv)
}

fn message(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = state.exc_message(recv);
    state.new_str(text)
}

fn inspect(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let class = state.class_name(state.real_class_of(recv));
    let mesg = state.exc_message(recv);
    if mesg.is_empty() || mesg == class {
        state.new_str(class)
    } else {
        state.new_str(format!("#<{class}: {mesg}>"))
    }
}

/// `exc.exception` returns self; with an argument, a copy carrying the
/// new message.
fn exception_m(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    if args.is_empty() {
        return Ok(recv);
    }
    let class = state.real_class_of(recv);
    let text = state
        .str_text(args.get(0))
        .map(|t| t.to_string())
        .unwrap_or_default();
    state.exc_new(class, &text)
}
