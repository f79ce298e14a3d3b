//! Kernel: printing, raising, block plumbing.

use berylc_bc::ArgSpec;

use crate::context::CiProc;
use crate::error::{VmError, VmResult};
use crate::obj::ObjBody;
use crate::state::{Args, State};
use crate::value::Value;

pub fn install(state: &mut State) {
    let kernel = state.core.kernel;
    state.define_method(kernel, "puts", ArgSpec::any(), puts);
    state.define_method(kernel, "print", ArgSpec::any(), print);
    state.define_method(kernel, "p", ArgSpec::any(), p);
    state.define_method(kernel, "raise", ArgSpec::opt(0, 2), raise);
    state.define_method(kernel, "block_given?", ArgSpec::NONE, block_given_p);
    state.define_method(kernel, "lambda", ArgSpec::block(), lambda);
    state.define_method(kernel, "proc", ArgSpec::block(), proc_fn);
    state.define_method(kernel, "inspect", ArgSpec::NONE, kernel_inspect);
}

fn puts_one(state: &mut State, v: Value) -> VmResult<()> {
    // arrays print one element per line
    if let Some(items) = state.as_array(v).map(|a| a.as_slice().to_vec()) {
        if items.is_empty() {
            state.output.write("\n");
        }
        for item in items {
            puts_one(state, item)?;
        }
        return Ok(());
    }
    let text = state.obj_to_s(v)?;
    state.output.write(&text);
    if !text.ends_with('\n') {
        state.output.write("\n");
    }
    Ok(())
}

fn puts(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    if args.is_empty() {
        state.output.write("\n");
    }
    for &arg in &args.args {
        puts_one(state, arg)?;
    }
    Ok(Value::Nil)
}

fn print(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    for &arg in &args.args {
        let text = state.obj_to_s(arg)?;
        state.output.write(&text);
    }
    Ok(Value::Nil)
}

fn p(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    for &arg in &args.args {
        let text = state.inspect_value(arg)?;
        state.output.write(&text);
        state.output.write("\n");
    }
    match args.len() {
        0 => Ok(Value::Nil),
        1 => Ok(args.get(0)),
        _ => state.new_array(args.args.clone()),
    }
}

/// `raise` in its (class | message | class, message | exception)
/// forms; bare `raise` rethrows a RuntimeError.
fn raise(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    let exc = match (args.len(), args.get(0)) {
        (0, _) => {
            let err = state.core.runtime_error;
            state.exc_new(err, "unhandled exception")?
        }
        (_, Value::Obj(r)) => match state.body(r) {
            ObjBody::Str(_) => {
                let text = state.str_text(args.get(0)).unwrap_or_default().to_string();
                let err = state.core.runtime_error;
                state.exc_new(err, &text)?
            }
            ObjBody::Class(_) => {
                let message = if args.len() > 1 {
                    state
                        .str_text(args.get(1))
                        .map(|t| t.to_string())
                        .unwrap_or_default()
                } else {
                    state.class_name(r)
                };
                // honour a redefined Class#new / #initialize
                let msg_value = state.new_str(message.clone())?;
                match state.funcall(args.get(0), "new", vec![msg_value]) {
                    Ok(v) => v,
                    Err(_) => state.exc_new(r, &message)?,
                }
            }
            ObjBody::Exception(_) => args.get(0),
            _ => {
                let err = state.core.type_error;
                return Err(state.raise(err, "exception class/object expected"));
            }
        },
        _ => {
            let err = state.core.type_error;
            return Err(state.raise(err, "exception class/object expected"));
        }
    };
    Err(VmError::Raise(exc))
}

/// Whether the calling method received a block: after its prologue the
/// block sits one past the reshaped argument count.
fn block_given_p(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    let ctx = state.ctx();
    // cis: [... caller method, this native frame]
    let Some(caller) = ctx.cis.get(ctx.cis.len().wrapping_sub(2)) else {
        return Ok(Value::False);
    };
    if !matches!(caller.proc, CiProc::Proc(_)) || caller.mid.is_none() {
        return Ok(Value::False);
    }
    let argc = caller.argc.max(0) as usize;
    // the native frame's saved stackidx is the caller's base
    let base = ctx.ci().stackidx;
    let block = ctx
        .stack
        .get(base + argc + 1)
        .copied()
        .unwrap_or(Value::Nil);
    Ok(Value::bool(block.truthy()))
}

fn lambda(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    let Value::Obj(r) = args.block else {
        let err = state.core.argument_error;
        return Err(state.raise(err, "tried to create Proc object without a block"));
    };
    if let ObjBody::Proc(p) = state.body_mut(r) {
        p.strict = true;
    }
    Ok(args.block)
}

fn proc_fn(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    if args.block.is_nil() {
        let err = state.core.argument_error;
        return Err(state.raise(err, "tried to create Proc object without a block"));
    }
    Ok(args.block)
}

fn kernel_inspect(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let text = state.inspect_value(recv)?;
    state.new_str(text)
}
