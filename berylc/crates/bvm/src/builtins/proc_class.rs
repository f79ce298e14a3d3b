//! Proc methods. `Proc#call` is a one-instruction bytecode method whose
//! body is `OP_CALL`: the VM splices the proc's own code into the frame
//! the SEND created, which is how a detached environment's locals stay
//! reachable from inside the call.

use std::rc::Rc;

use berylc_bc::{ArgSpec, Insn, Irep, OpCode};

use crate::class::MethodEntry;
use crate::error::VmResult;
use crate::obj::ObjBody;
use crate::proc_env::ProcData;
use crate::state::{Args, State};
use crate::value::Value;

pub fn install(state: &mut State) {
    let proc_class = state.core.proc_class;

    // the OP_CALL trampoline
    let call_irep = Rc::new(Irep {
        nlocals: 1,
        nregs: 4,
        iseq: vec![Insn::a(OpCode::Call, 0)],
        pool: vec![],
        syms: vec![],
        reps: vec![],
        lines: vec![],
        filename: None,
    });
    for name in ["call", "[]", "yield"] {
        let mut data = ProcData::from_irep(call_irep.clone());
        data.target_class = Some(proc_class);
        data.strict = false;
        let proc_ref = state
            .new_proc(data)
            .expect("boot allocation cannot fail");
        let mid = state.intern(name);
        state.define_method_entry(proc_class, mid, MethodEntry::BProc(proc_ref));
    }

    state.define_method(proc_class, "lambda?", ArgSpec::NONE, lambda_p);
    state.define_method(proc_class, "to_proc", ArgSpec::NONE, to_proc);
}

fn lambda_p(state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    match recv {
        Value::Obj(r) => match state.body(r) {
            ObjBody::Proc(p) => Ok(Value::bool(p.strict)),
            _ => Ok(Value::False),
        },
        _ => Ok(Value::False),
    }
}

fn to_proc(_state: &mut State, recv: Value, _args: &Args) -> VmResult<Value> {
    Ok(recv)
}
