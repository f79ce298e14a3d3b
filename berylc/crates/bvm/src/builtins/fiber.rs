//! Fiber methods: cooperative context switching.
//!
//! A transfer is a swap of the interpreter's current-context index plus
//! a status update; stacks are never copied. The native `resume`/`yield`
//! return into the *target* context: the VM's native-return path reloads
//! everything from the current context, which lands execution exactly
//! where the target last left off.

use berylc_bc::ArgSpec;

use crate::context::{CallInfo, CiProc, Context, FiberStatus};
use crate::error::VmResult;
use crate::obj::ObjBody;
use crate::state::{Args, State};
use crate::value::{ObjRef, Value};

const FIBER_STACK_INIT: usize = 64;

pub fn install(state: &mut State) {
    let fiber = state.core.fiber;
    state.define_method(fiber, "initialize", ArgSpec::block(), initialize);
    state.define_method(fiber, "resume", ArgSpec::any(), resume);
    state.define_method(fiber, "alive?", ArgSpec::NONE, alive_p);
    let fiber_v = Value::Obj(fiber);
    state
        .define_singleton_method(fiber_v, "yield", ArgSpec::any(), yield_s)
        .expect("boot allocation cannot fail");
    state
        .define_singleton_method(fiber_v, "current", ArgSpec::NONE, current)
        .expect("boot allocation cannot fail");
}

fn fiber_ref(state: &mut State, recv: Value) -> VmResult<ObjRef> {
    match recv {
        Value::Obj(r) if matches!(state.body(r), ObjBody::Fiber(_)) => Ok(r),
        _ => {
            let err = state.core.type_error;
            Err(state.raise(err, "fiber expected"))
        }
    }
}

/// Build the fiber's private context with the body frame pre-staged and
/// a copy of it on top: the resume path pops the copy and starts the
/// body.
fn initialize(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let fiber = fiber_ref(state, recv)?;
    let Value::Obj(proc_ref) = args.block else {
        let err = state.core.argument_error;
        return Err(state.raise(err, "tried to create Fiber object without a block"));
    };
    let Some(irep) = state.proc_irep(proc_ref) else {
        let err = state.core.argument_error;
        return Err(state.raise(err, "tried to create Fiber from native code"));
    };
    let target_class = match state.body(proc_ref) {
        ObjBody::Proc(p) => p.target_class,
        _ => None,
    };

    let mut ctx = Context {
        stack: vec![Value::Nil; FIBER_STACK_INIT.max(irep.nregs as usize + 2)],
        sbase: 0,
        cis: Vec::with_capacity(4),
        rescues: Vec::new(),
        ensures: Vec::new(),
        status: FiberStatus::Created,
        prev: None,
        fiber: Some(fiber),
    };
    // the proc captured its defining self
    ctx.stack[0] = state.proc_env_self(proc_ref);
    let body_ci = CallInfo {
        mid: None,
        proc: CiProc::Proc(proc_ref),
        stackidx: 0,
        argc: 0,
        target_class,
        pc: 0,
        acc: 0,
        nregs: irep.nregs as usize,
        ridx: 0,
        eidx: 0,
        env: None,
    };
    ctx.cis.push(body_ci);
    ctx.cis.push(body_ci); // the resume trampoline copy

    let idx = state.add_context(ctx);
    if let ObjBody::Fiber(f) = state.body_mut(fiber) {
        f.ctx = Some(idx);
    }
    Ok(recv)
}

fn resume(state: &mut State, recv: Value, args: &Args) -> VmResult<Value> {
    let fiber = fiber_ref(state, recv)?;
    let Some(target) = (match state.body(fiber) {
        ObjBody::Fiber(f) => f.ctx,
        _ => None,
    }) else {
        let err = state.core.argument_error;
        return Err(state.raise(err, "uninitialized Fiber"));
    };

    let status = state
        .context_at(target)
        .map(|c| c.status)
        .unwrap_or(FiberStatus::Terminated);
    match status {
        FiberStatus::Resumed => {
            let err = state.core.runtime_error;
            return Err(state.raise(err, "double resume"));
        }
        FiberStatus::Terminated => {
            let err = state.core.runtime_error;
            return Err(state.raise(err, "resuming dead fiber"));
        }
        _ => {}
    }
    // a resume cannot re-enter across a native frame boundary
    let crosses_native = state
        .context_at(target)
        .map(|c| c.cis.iter().any(|ci| ci.acc < 0))
        .unwrap_or(false);
    if crosses_native {
        let err = state.core.argument_error;
        return Err(state.raise(err, "can't cross native function boundary"));
    }

    let caller = state.cur_ctx;
    state.ctx_mut().status = FiberStatus::Resumed;
    state.heap.write_barrier(fiber);

    if status == FiberStatus::Created {
        // first resume: arguments become the block's parameters
        let body_self = {
            let ctx = state.context_at_mut(target).expect("context just checked");
            for (i, v) in args.args.iter().enumerate() {
                if 1 + i < ctx.stack.len() {
                    ctx.stack[1 + i] = *v;
                }
            }
            ctx.cis[0].argc = args.len() as i32;
            ctx.cis[1].argc = args.len() as i32;
            ctx.prev = Some(caller);
            ctx.status = FiberStatus::Running;
            ctx.stack[0]
        };
        state.cur_ctx = target;
        return Ok(body_self);
    }

    // suspended: the arguments become Fiber.yield's value
    let result = fiber_result(state, &args.args)?;
    {
        let ctx = state.context_at_mut(target).expect("context just checked");
        ctx.prev = Some(caller);
        ctx.status = FiberStatus::Running;
    }
    state.cur_ctx = target;
    Ok(result)
}

fn yield_s(state: &mut State, _recv: Value, args: &Args) -> VmResult<Value> {
    let Some(prev) = self_prev(state) else {
        let err = state.core.argument_error;
        return Err(state.raise(err, "can't yield from root fiber"));
    };
    // yielding past a native frame would strand it
    let crosses_native = state
        .ctx()
        .cis
        .iter()
        .any(|ci| ci.acc < 0);
    if crosses_native {
        let err = state.core.argument_error;
        return Err(state.raise(err, "can't cross native function boundary"));
    }
    let result = fiber_result(state, &args.args)?;
    state.ctx_mut().prev = None;
    state.ctx_mut().status = FiberStatus::Suspended;
    state.cur_ctx = prev;
    if let Some(ctx) = state.context_at_mut(prev) {
        ctx.status = FiberStatus::Running;
    }
    Ok(result)
}

fn self_prev(state: &State) -> Option<usize> {
    state.ctx().prev
}

fn alive_p(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    let fiber = fiber_ref(state, recv)?;
    let alive = match state.body(fiber) {
        ObjBody::Fiber(f) => match f.ctx {
            Some(idx) => state
                .context_at(idx)
                .map(|c| c.status != FiberStatus::Terminated)
                .unwrap_or(false),
            None => false,
        },
        _ => false,
    };
    Ok(Value::bool(alive))
}

fn current(state: &mut State, _recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(match state.ctx().fiber {
        Some(f) => Value::Obj(f),
        None => Value::Nil,
    })
}

/// Zero args yield nil, one yields itself, more bundle into an array.
fn fiber_result(state: &mut State, args: &[Value]) -> VmResult<Value> {
    match args.len() {
        0 => Ok(Value::Nil),
        1 => Ok(args[0]),
        _ => state.new_array(args.to_vec()),
    }
}
