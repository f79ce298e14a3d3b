//! The virtual machine.
//!
//! [`State::vm_run`] executes bytecode starting from the current top
//! call frame until that frame returns to the host (`acc < 0`), the top
//! IREP stops, or an exception escapes unrescued.
//!
//! # Frames and the stack
//!
//! `ctx.sbase` is the live frame's register base; `R(n)` is
//! `stack[sbase + n]`. Pushing a frame records the caller's base in the
//! new call-info's `stackidx` and bumps `sbase` by the receiver slot,
//! so the callee's `R(0)` aliases the caller's receiver register.
//!
//! # Exceptions
//!
//! An in-flight exception lives in `state.exc`. [`State::vm_unwind`]
//! walks call-infos from the top, running pending ensures LIFO before
//! each pop, resuming at the innermost rescue target, or handing the
//! exception to the host when a host-entered frame is crossed.
//!
//! # Fibers
//!
//! A native method may switch the current context; the dispatch loop
//! reloads everything it caches from the context after every native
//! return, which is all a fiber transfer needs.

use std::rc::Rc;

use berylc_bc::{ArgSpec, Insn, Irep, OpCode, PoolValue, CALL_MAXARGS};
use berylc_util::{well_known, Symbol};

use crate::class::MethodEntry;
use crate::context::{CallInfo, CiProc, ACC_TO_HOST, STACK_MAX};
use crate::error::{VmError, VmResult};
use crate::obj::ObjBody;
use crate::proc_env::{EnvData, ProcBody, ProcData};
use crate::state::{Args, State};
use crate::value::{ObjRef, Value};

/// Where the dispatch loop resumes after a successful unwind.
pub(crate) struct Resume {
    pub irep: Rc<Irep>,
    pub pc: usize,
}

impl State {
    // ---------------------------------------------------------------
    // register and stack plumbing
    // ---------------------------------------------------------------

    #[inline]
    pub(crate) fn reg(&self, n: usize) -> Value {
        let ctx = self.ctx();
        ctx.stack.get(ctx.sbase + n).copied().unwrap_or(Value::Nil)
    }

    #[inline]
    pub(crate) fn set_reg(&mut self, n: usize, v: Value) {
        let ctx = self.ctx_mut();
        let idx = ctx.sbase + n;
        if idx >= ctx.stack.len() {
            ctx.stack.resize(idx + 1, Value::Nil);
        }
        ctx.stack[idx] = v;
    }

    /// Grow the value stack so the current frame has `room` registers,
    /// clearing everything beyond the `keep` prefix. Raises once the
    /// configured maximum is crossed.
    pub(crate) fn stack_extend(&mut self, room: usize, keep: usize) -> VmResult<()> {
        let base = self.ctx().sbase;
        if base + room > STACK_MAX {
            let err = self.core.runtime_error;
            return Err(self.raise(err, "stack level too deep"));
        }
        let ctx = self.ctx_mut();
        if ctx.stack.len() < base + room {
            ctx.stack.resize(base + room, Value::Nil);
        }
        for i in keep..room {
            ctx.stack[base + i] = Value::Nil;
        }
        Ok(())
    }

    pub(crate) fn call_stack_sizing(&mut self, argc: i32, irep: &Irep) -> VmResult<()> {
        if argc < 0 {
            self.stack_extend((irep.nregs as usize).max(3), 3)
        } else {
            self.stack_extend(irep.nregs as usize, argc as usize + 2)
        }
    }

    // ---------------------------------------------------------------
    // call-info plumbing
    // ---------------------------------------------------------------

    pub(crate) fn cipush(&mut self) -> &mut CallInfo {
        let (ridx, eidx) = {
            let ci = self.ctx().ci();
            (ci.ridx, ci.eidx)
        };
        self.ctx_mut().cis.push(CallInfo {
            ridx,
            eidx,
            ..CallInfo::default()
        });
        self.ctx_mut().ci_mut()
    }

    /// Pop a frame, detaching its environment exactly here: after this
    /// the env owns a private copy of the frame's locals.
    pub(crate) fn cipop(&mut self) {
        let env = self.ctx().ci().env;
        if let Some(env_ref) = env {
            self.env_detach(env_ref);
        }
        let ctx = self.ctx_mut();
        if ctx.cis.len() > 1 {
            ctx.cis.pop();
        }
    }

    fn env_detach(&mut self, env_ref: ObjRef) {
        let (ctx_idx, bidx, nlocals, already) = match self.body(env_ref) {
            ObjBody::Env(e) => (e.ctx, e.bidx, e.nlocals, e.is_detached()),
            _ => return,
        };
        if already {
            return;
        }
        let slots: Vec<Value> = match self.context_at(ctx_idx) {
            Some(ctx) => ctx.stack[bidx..(bidx + nlocals).min(ctx.stack.len())].to_vec(),
            None => Vec::new(),
        };
        self.heap.write_barrier(env_ref);
        if let ObjBody::Env(e) = self.body_mut(env_ref) {
            e.detached = Some(slots);
            e.cioff = -1;
        }
    }

    /// The environment of the current frame, created on first demand.
    pub(crate) fn ensure_env(&mut self, nlocals: usize) -> VmResult<ObjRef> {
        if let Some(e) = self.ctx().ci().env {
            return Ok(e);
        }
        let ci_idx = self.ctx().cis.len() - 1;
        let (bidx, mid) = {
            let ctx = self.ctx();
            (ctx.sbase, ctx.ci().mid)
        };
        // chain to the env the running proc itself captured
        let prev = match self.ctx().ci().proc {
            CiProc::Proc(p) => match self.body(p) {
                ObjBody::Proc(pd) => pd.env,
                _ => None,
            },
            _ => None,
        };
        let env_class = self.core.object;
        let env = self.alloc(
            ObjBody::Env(EnvData {
                ctx: self.cur_ctx,
                bidx,
                nlocals,
                cioff: ci_idx as isize,
                detached: None,
                mid,
                prev,
            }),
            env_class,
        )?;
        self.ctx_mut().ci_mut().env = Some(env);
        Ok(env)
    }

    /// Environment `lv` hops out from the current proc (0 = the
    /// immediately enclosing scope).
    pub(crate) fn uvenv(&self, lv: usize) -> Option<ObjRef> {
        let mut env = match self.ctx().ci().proc {
            CiProc::Proc(p) => match self.body(p) {
                ObjBody::Proc(pd) => pd.env,
                _ => None,
            },
            _ => None,
        }?;
        for _ in 0..lv {
            env = match self.body(env) {
                ObjBody::Env(e) => e.prev,
                _ => None,
            }?;
        }
        Some(env)
    }

    pub(crate) fn env_read(&self, env_ref: ObjRef, idx: usize) -> Value {
        match self.body(env_ref) {
            ObjBody::Env(e) => {
                if let Some(d) = &e.detached {
                    d.get(idx).copied().unwrap_or(Value::Nil)
                } else {
                    self.context_at(e.ctx)
                        .and_then(|c| c.stack.get(e.bidx + idx).copied())
                        .unwrap_or(Value::Nil)
                }
            }
            _ => Value::Nil,
        }
    }

    pub(crate) fn env_write(&mut self, env_ref: ObjRef, idx: usize, v: Value) {
        let (ctx_idx, bidx, detached) = match self.body(env_ref) {
            ObjBody::Env(e) => (e.ctx, e.bidx, e.is_detached()),
            _ => return,
        };
        if detached {
            self.heap.write_barrier(env_ref);
            if let ObjBody::Env(e) = self.body_mut(env_ref) {
                if let Some(d) = &mut e.detached {
                    if idx < d.len() {
                        d[idx] = v;
                    }
                }
            }
        } else if let Some(ctx) = self.context_at_mut(ctx_idx) {
            if bidx + idx < ctx.stack.len() {
                ctx.stack[bidx + idx] = v;
            }
        }
    }

    // ---------------------------------------------------------------
    // host entry points
    // ---------------------------------------------------------------

    /// Call a method on a value with an argument vector.
    pub fn funcall(&mut self, recv: Value, name: &str, args: Vec<Value>) -> VmResult<Value> {
        let mid = self.intern(name);
        self.funcall_with_block(recv, mid, args, Value::Nil)
    }

    pub fn funcall_with_block(
        &mut self,
        recv: Value,
        mid: Symbol,
        args: Vec<Value>,
        block: Value,
    ) -> VmResult<Value> {
        const FUNCALL_ARGC_MAX: usize = 16;
        if args.len() > FUNCALL_ARGC_MAX {
            let err = self.core.argument_error;
            return Err(self.raise(err, "too many arguments"));
        }
        let ai = self.heap.arena_save();
        let class = self.class_of(recv);
        let Some((entry, target_class)) = self.find_method(class, mid) else {
            return self.method_missing_funcall(recv, mid, args, block);
        };
        let argc = args.len();
        let result = match entry {
            MethodEntry::Native(f, _) => {
                let caller_nregs = self.ctx().ci().nregs;
                let ci = self.cipush();
                ci.mid = Some(mid);
                ci.proc = CiProc::Native;
                ci.argc = argc as i32;
                ci.target_class = Some(target_class);
                ci.acc = ACC_TO_HOST;
                // keep the caller's register window in the root scan
                ci.nregs = caller_nregs.max(argc + 2);
                let call_args = Args { args, block };
                let r = f(self, recv, &call_args);
                self.cipop();
                r
            }
            MethodEntry::BProc(proc_ref) => {
                let nregs = self
                    .proc_irep(proc_ref)
                    .map(|i| i.nregs as usize)
                    .unwrap_or(4)
                    .max(argc + 2);
                let caller_base = self.ctx().sbase;
                let new_base = caller_base + self.ctx().ci().nregs.max(2);
                let ci = self.cipush();
                ci.mid = Some(mid);
                ci.proc = CiProc::Proc(proc_ref);
                ci.argc = argc as i32;
                ci.target_class = Some(target_class);
                ci.acc = ACC_TO_HOST;
                ci.stackidx = caller_base;
                ci.nregs = nregs;
                self.ctx_mut().sbase = new_base;
                match self.stack_extend(nregs, 0) {
                    Ok(()) => {
                        self.set_reg(0, recv);
                        for (i, a) in call_args_iter(&args) {
                            self.set_reg(i + 1, a);
                        }
                        self.set_reg(argc + 1, block);
                        self.vm_run()
                    }
                    Err(e) => {
                        // roll the frame back so the caller stays coherent
                        self.cipop();
                        self.ctx_mut().sbase = caller_base;
                        Err(e)
                    }
                }
            }
            MethodEntry::Undefined => {
                let name = self.sym_name(mid).to_string();
                let err = self.core.no_method_error;
                Err(self.raise(err, &format!("undefined method '{name}'")))
            }
        };
        self.heap.arena_restore(ai);
        if let Ok(v) = &result {
            if let Value::Obj(r) = v {
                self.heap.protect(*r);
            }
        }
        result
    }

    fn method_missing_funcall(
        &mut self,
        recv: Value,
        mid: Symbol,
        mut args: Vec<Value>,
        block: Value,
    ) -> VmResult<Value> {
        let class = self.class_of(recv);
        let mm = well_known::METHOD_MISSING;
        if mid == mm || self.find_method(class, mm).is_none() {
            let name = self.sym_name(mid).to_string();
            let class_name = self.class_name(self.real_class_of(recv));
            let err = self.core.no_method_error;
            return Err(self.raise(
                err,
                &format!("undefined method '{name}' for {class_name}"),
            ));
        }
        args.insert(0, Value::Sym(mid));
        self.funcall_with_block(recv, mm, args, block)
    }

    /// Yield into a block value with an argument vector.
    pub fn yield_value(&mut self, block: Value, args: Vec<Value>) -> VmResult<Value> {
        let Value::Obj(proc_ref) = block else {
            let err = self.core.local_jump_error;
            return Err(self.raise(err, "no block given (yield)"));
        };
        if !matches!(self.body(proc_ref), ObjBody::Proc(_)) {
            let err = self.core.type_error;
            return Err(self.raise(err, "not a block"));
        }
        let self_val = self.proc_env_self(proc_ref);
        self.proc_apply(proc_ref, self_val, args, Value::Nil)
    }

    /// Self seen by a proc: its captured environment's slot 0.
    pub(crate) fn proc_env_self(&self, proc_ref: ObjRef) -> Value {
        match self.body(proc_ref) {
            ObjBody::Proc(p) => match p.env {
                Some(env) => self.env_read(env, 0),
                None => Value::Nil,
            },
            _ => Value::Nil,
        }
    }

    /// Run a proc object with explicit self and arguments.
    pub(crate) fn proc_apply(
        &mut self,
        proc_ref: ObjRef,
        self_val: Value,
        args: Vec<Value>,
        block: Value,
    ) -> VmResult<Value> {
        let ai = self.heap.arena_save();
        let (is_native, target_class, mid) = match self.body(proc_ref) {
            ObjBody::Proc(p) => (
                p.is_native(),
                p.target_class,
                match p.env {
                    Some(e) => match self.body(e) {
                        ObjBody::Env(env) => env.mid,
                        _ => None,
                    },
                    None => None,
                },
            ),
            _ => {
                let err = self.core.type_error;
                return Err(self.raise(err, "not a proc"));
            }
        };
        let argc = args.len();
        let result = if is_native {
            let f = match self.body(proc_ref) {
                ObjBody::Proc(p) => match p.body {
                    ProcBody::Native(f, _) => f,
                    _ => unreachable!("checked native above"),
                },
                _ => unreachable!("checked proc above"),
            };
            let caller_nregs = self.ctx().ci().nregs;
            let ci = self.cipush();
            ci.mid = mid;
            ci.proc = CiProc::Proc(proc_ref);
            ci.argc = argc as i32;
            ci.target_class = target_class;
            ci.acc = ACC_TO_HOST;
            ci.nregs = caller_nregs.max(argc + 2);
            let call_args = Args { args, block };
            let r = f(self, self_val, &call_args);
            self.cipop();
            r
        } else {
            let nregs = self
                .proc_irep(proc_ref)
                .map(|i| i.nregs as usize)
                .unwrap_or(4)
                .max(argc + 2);
            let caller_base = self.ctx().sbase;
            let new_base = caller_base + self.ctx().ci().nregs.max(2);
            let ci = self.cipush();
            ci.mid = mid;
            ci.proc = CiProc::Proc(proc_ref);
            ci.argc = argc as i32;
            ci.target_class = target_class;
            ci.acc = ACC_TO_HOST;
            ci.stackidx = caller_base;
            ci.nregs = nregs;
            self.ctx_mut().sbase = new_base;
            match self.stack_extend(nregs, 0) {
                Ok(()) => {
                    self.set_reg(0, self_val);
                    for (i, a) in call_args_iter(&args) {
                        self.set_reg(i + 1, a);
                    }
                    self.set_reg(argc + 1, block);
                    self.vm_run()
                }
                Err(e) => {
                    self.cipop();
                    self.ctx_mut().sbase = caller_base;
                    Err(e)
                }
            }
        };
        self.heap.arena_restore(ai);
        if let Ok(Value::Obj(r)) = &result {
            self.heap.protect(*r);
        }
        result
    }

    pub(crate) fn proc_irep(&self, proc_ref: ObjRef) -> Option<Rc<Irep>> {
        match self.body(proc_ref) {
            ObjBody::Proc(p) => p.irep().cloned(),
            _ => None,
        }
    }

    /// Execute one pending ensure closure by index, preserving any
    /// exception in flight around it.
    pub(crate) fn ecall(&mut self, idx: usize) -> VmResult<()> {
        let Some(&proc_ref) = self.ctx().ensures.get(idx) else {
            return Ok(());
        };
        let self_val = self.proc_env_self(proc_ref);
        let saved_exc = self.exc.take();
        let result = self.proc_apply(proc_ref, self_val, Vec::new(), Value::Nil);
        self.ctx_mut().ensures.truncate(idx);
        match result {
            // an exception raised inside ensure replaces the original
            Err(e) => Err(e),
            Ok(_) => {
                self.exc = saved_exc;
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------
    // the dispatch loop
    // ---------------------------------------------------------------

    /// Run bytecode from the current top frame until it returns to the
    /// host. The frame must already be prepared: proc, sbase, self in
    /// R(0), arguments above it.
    pub fn vm_run(&mut self) -> VmResult<Value> {
        let mut irep = match self.ctx().ci().proc {
            CiProc::Proc(p) => match self.proc_irep(p) {
                Some(i) => i,
                None => return Err(VmError::Fatal("vm entry without bytecode".into())),
            },
            _ => return Err(VmError::Fatal("vm entry without a proc".into())),
        };
        {
            let nregs = irep.nregs as usize;
            self.ctx_mut().ci_mut().nregs = nregs;
            self.stack_extend(nregs, nregs)?;
        }
        let mut pc: usize = 0;
        let ai = self.heap.arena_save();

        macro_rules! raise_or_resume {
            ($err:expr) => {{
                match $err {
                    VmError::Raise(v) => {
                        self.exc = v.obj();
                        match self.vm_unwind(ai)? {
                            Resume { irep: i2, pc: p2 } => {
                                irep = i2;
                                pc = p2;
                                continue;
                            }
                        }
                    }
                    fatal => return Err(fatal),
                }
            }};
        }
        macro_rules! vm_try {
            ($e:expr) => {{
                match $e {
                    Ok(v) => v,
                    Err(err) => raise_or_resume!(err),
                }
            }};
        }

        loop {
            debug_assert!(pc < irep.iseq.len(), "pc ran off the instruction stream");
            let insn = irep.iseq[pc];
            let a = insn.arg_a();
            match insn.opcode() {
                OpCode::Nop => {}
                OpCode::Move => {
                    let v = self.reg(insn.arg_b());
                    self.set_reg(a, v);
                }
                OpCode::Loadl => {
                    let v = match &irep.pool[insn.arg_bx()] {
                        PoolValue::Int(i) => Value::Int(*i),
                        PoolValue::Float(f) => Value::Float(*f),
                        PoolValue::Str(s) => vm_try!(self.new_str(s.clone())),
                    };
                    self.set_reg(a, v);
                }
                OpCode::Loadi => self.set_reg(a, Value::Int(insn.arg_sbx() as i64)),
                OpCode::Loadsym => self.set_reg(a, Value::Sym(irep.syms[insn.arg_bx()])),
                OpCode::Loadnil => self.set_reg(a, Value::Nil),
                OpCode::Loadself => {
                    let v = self.reg(0);
                    self.set_reg(a, v);
                }
                OpCode::Loadt => self.set_reg(a, Value::True),
                OpCode::Loadf => self.set_reg(a, Value::False),
                OpCode::Getglobal => {
                    let v = self.gv_get(irep.syms[insn.arg_bx()]);
                    self.set_reg(a, v);
                }
                OpCode::Setglobal => {
                    let v = self.reg(a);
                    self.gv_set(irep.syms[insn.arg_bx()], v);
                }
                OpCode::Getspecial | OpCode::Setspecial => {
                    // no regexp engine: special variables read as nil
                    if insn.opcode() == OpCode::Getspecial {
                        self.set_reg(a, Value::Nil);
                    }
                }
                OpCode::Getiv => {
                    let sym = irep.syms[insn.arg_bx()];
                    let v = match self.reg(0) {
                        Value::Obj(r) => self.iv_get_raw(r, sym).unwrap_or(Value::Nil),
                        _ => Value::Nil,
                    };
                    self.set_reg(a, v);
                }
                OpCode::Setiv => {
                    let sym = irep.syms[insn.arg_bx()];
                    let v = self.reg(a);
                    if let Value::Obj(r) = self.reg(0) {
                        self.iv_set_raw(r, sym, v);
                    }
                }
                OpCode::Getcv => {
                    let sym = irep.syms[insn.arg_bx()];
                    let holder = self.cv_holder();
                    let v = holder
                        .and_then(|c| self.cv_get(c, sym))
                        .unwrap_or(Value::Nil);
                    self.set_reg(a, v);
                }
                OpCode::Setcv => {
                    let sym = irep.syms[insn.arg_bx()];
                    let v = self.reg(a);
                    if let Some(c) = self.cv_holder() {
                        self.cv_set(c, sym, v);
                    }
                }
                OpCode::Getconst => {
                    let sym = irep.syms[insn.arg_bx()];
                    let v = vm_try!(self.vm_const_get(sym));
                    self.set_reg(a, v);
                }
                OpCode::Setconst => {
                    let sym = irep.syms[insn.arg_bx()];
                    let v = self.reg(a);
                    let holder = self.cv_holder().unwrap_or(self.core.object);
                    self.const_set_on(holder, sym, v);
                }
                OpCode::Getmcnst => {
                    let sym = irep.syms[insn.arg_bx()];
                    let base = self.reg(a);
                    let v = vm_try!(self.vm_mcnst_get(base, sym));
                    self.set_reg(a, v);
                }
                OpCode::Setmcnst => {
                    let sym = irep.syms[insn.arg_bx()];
                    let v = self.reg(a);
                    if let Value::Obj(c) = self.reg(a + 1) {
                        self.const_set_on(c, sym, v);
                    }
                }
                OpCode::Getupvar => {
                    let lv = insn.arg_c();
                    let v = match self.uvenv(lv) {
                        Some(env) => self.env_read(env, insn.arg_b()),
                        None => Value::Nil,
                    };
                    self.set_reg(a, v);
                }
                OpCode::Setupvar => {
                    let lv = insn.arg_c();
                    if let Some(env) = self.uvenv(lv) {
                        let v = self.reg(a);
                        self.env_write(env, insn.arg_b(), v);
                        self.heap.write_barrier(env);
                    }
                }
                OpCode::Jmp => {
                    pc = (pc as i64 + insn.arg_sbx() as i64) as usize;
                    continue;
                }
                OpCode::Jmpif => {
                    if self.reg(a).truthy() {
                        pc = (pc as i64 + insn.arg_sbx() as i64) as usize;
                        continue;
                    }
                }
                OpCode::Jmpnot => {
                    if !self.reg(a).truthy() {
                        pc = (pc as i64 + insn.arg_sbx() as i64) as usize;
                        continue;
                    }
                }
                OpCode::Onerr => {
                    let target = (pc as i64 + insn.arg_sbx() as i64) as usize;
                    let ridx = self.ctx().ci().ridx;
                    let ctx = self.ctx_mut();
                    ctx.rescues.truncate(ridx);
                    ctx.rescues.push(target);
                    ctx.ci_mut().ridx += 1;
                }
                OpCode::Rescue => {
                    let exc = self.exc.take().map(Value::Obj).unwrap_or(Value::Nil);
                    self.set_reg(a, exc);
                }
                OpCode::Poperr => {
                    let n = a;
                    let ci = self.ctx_mut().ci_mut();
                    ci.ridx = ci.ridx.saturating_sub(n);
                    let ridx = ci.ridx;
                    self.ctx_mut().rescues.truncate(ridx);
                }
                OpCode::Raise => {
                    let v = self.reg(a);
                    self.exc = v.obj();
                    match self.vm_unwind(ai)? {
                        Resume { irep: i2, pc: p2 } => {
                            irep = i2;
                            pc = p2;
                            continue;
                        }
                    }
                }
                OpCode::Epush => {
                    let child = irep.reps[insn.arg_bx()].clone();
                    let target_class = self.ctx().ci().target_class;
                    let env = vm_try!(self.ensure_env(irep.nlocals as usize));
                    let proc_ref = vm_try!(self.new_proc(ProcData {
                        body: ProcBody::Irep(child),
                        env: Some(env),
                        target_class,
                        strict: false,
                    }));
                    let ctx = self.ctx_mut();
                    ctx.ensures.push(proc_ref);
                    ctx.ci_mut().eidx += 1;
                    self.heap.arena_restore(ai);
                }
                OpCode::Epop => {
                    for _ in 0..a {
                        let eidx = {
                            let ci = self.ctx_mut().ci_mut();
                            ci.eidx = ci.eidx.saturating_sub(1);
                            ci.eidx
                        };
                        vm_try!(self.ecall(eidx));
                    }
                    self.heap.arena_restore(ai);
                }
                OpCode::Send | OpCode::Sendb | OpCode::Fsend => {
                    let is_sendb = insn.opcode() == OpCode::Sendb;
                    let mid = irep.syms[insn.arg_b()];
                    let n = insn.arg_c();
                    match vm_try!(self.op_send(&irep, pc, a, mid, n, is_sendb, ai)) {
                        SendOutcome::Enter(new_irep) => {
                            irep = new_irep;
                            pc = 0;
                            continue;
                        }
                        SendOutcome::NativeDone => {
                            // reload from the (possibly switched) context
                            let ci = *self.ctx().ci();
                            let new_pc = ci.pc;
                            self.ctx_mut().sbase = ci.stackidx;
                            self.cipop();
                            match self.current_frame_irep() {
                                Some(i2) => {
                                    irep = i2;
                                    pc = new_pc;
                                    continue;
                                }
                                None => {
                                    // returned into a host-entered frame
                                    let v = self.reg(ci.acc.max(0) as usize);
                                    self.heap.arena_restore(ai);
                                    return Ok(v);
                                }
                            }
                        }
                    }
                }
                OpCode::Call => match vm_try!(self.op_call()) {
                    Some(new_irep) => {
                        irep = new_irep;
                        pc = 0;
                        continue;
                    }
                    None => {
                        // a proc with no body answers nil
                        let v = Value::Nil;
                        let (resume, out) = vm_try!(self.vm_return(ai, v, berylc_bc::RETURN_NORMAL as usize, &irep));
                        match out {
                            Some(value) => {
                                self.heap.arena_restore(ai);
                                return Ok(value);
                            }
                            None => {
                                let r = resume.expect("resume point on in-vm return");
                                irep = r.irep;
                                pc = r.pc;
                                continue;
                            }
                        }
                    }
                },
                OpCode::Super => {
                    let n = insn.arg_c();
                    match vm_try!(self.op_super(pc, a, n, ai)) {
                        SendOutcome::Enter(new_irep) => {
                            irep = new_irep;
                            pc = 0;
                            continue;
                        }
                        SendOutcome::NativeDone => {
                            let ci = *self.ctx().ci();
                            let new_pc = ci.pc;
                            self.ctx_mut().sbase = ci.stackidx;
                            self.cipop();
                            match self.current_frame_irep() {
                                Some(i2) => {
                                    irep = i2;
                                    pc = new_pc;
                                    continue;
                                }
                                None => {
                                    let v = self.reg(a);
                                    self.heap.arena_restore(ai);
                                    return Ok(v);
                                }
                            }
                        }
                    }
                }
                OpCode::Argary => {
                    let bx = insn.arg_bx();
                    vm_try!(self.op_argary(a, bx));
                    self.heap.arena_restore(ai);
                }
                OpCode::Enter => {
                    let spec = ArgSpec::unpack(insn.arg_ax());
                    match vm_try!(self.op_enter(&spec)) {
                        EnterOutcome::Advance(skip) => {
                            pc += skip;
                            continue;
                        }
                    }
                }
                OpCode::Karg | OpCode::Kdict => {
                    // keyword slots are reserved in the argument packing
                    // but carry no runtime behavior yet
                }
                OpCode::Return => {
                    if self.exc.is_some() {
                        match self.vm_unwind(ai)? {
                            Resume { irep: i2, pc: p2 } => {
                                irep = i2;
                                pc = p2;
                                continue;
                            }
                        }
                    }
                    let v = self.reg(a);
                    let (resume, out) = vm_try!(self.vm_return(ai, v, insn.arg_b(), &irep));
                    match out {
                        Some(value) => {
                            self.heap.arena_restore(ai);
                            return Ok(value);
                        }
                        None => {
                            let r = resume.expect("resume point on in-vm return");
                            irep = r.irep;
                            pc = r.pc;
                            continue;
                        }
                    }
                }
                OpCode::Tailcall => {
                    let mid = irep.syms[insn.arg_b()];
                    let n = insn.arg_c();
                    match vm_try!(self.op_tailcall(a, mid, n, ai)) {
                        Some(new_irep) => {
                            irep = new_irep;
                            pc = 0;
                            continue;
                        }
                        None => {
                            // native tail call: value is in R(0); return it
                            let v = self.reg(0);
                            let (resume, out) = vm_try!(self.vm_return(
                                ai,
                                v,
                                berylc_bc::RETURN_NORMAL as usize,
                                &irep
                            ));
                            match out {
                                Some(value) => {
                                    self.heap.arena_restore(ai);
                                    return Ok(value);
                                }
                                None => {
                                    let r = resume.expect("resume point on in-vm return");
                                    irep = r.irep;
                                    pc = r.pc;
                                    continue;
                                }
                            }
                        }
                    }
                }
                OpCode::Blkpush => {
                    let bx = insn.arg_bx();
                    vm_try!(self.op_blkpush(a, bx));
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div => {
                    match self.op_arith(insn.opcode(), a) {
                        ArithOutcome::Done => self.heap.arena_restore(ai),
                        ArithOutcome::Dispatch => {
                            let mid = irep.syms[insn.arg_b()];
                            match vm_try!(self.op_send(&irep, pc, a, mid, 1, false, ai)) {
                                SendOutcome::Enter(new_irep) => {
                                    irep = new_irep;
                                    pc = 0;
                                    continue;
                                }
                                SendOutcome::NativeDone => {
                                    let ci = *self.ctx().ci();
                                    let new_pc = ci.pc;
                                    self.ctx_mut().sbase = ci.stackidx;
                                    self.cipop();
                                    match self.current_frame_irep() {
                                        Some(i2) => {
                                            irep = i2;
                                            pc = new_pc;
                                            continue;
                                        }
                                        None => {
                                            let v = self.reg(a);
                                            self.heap.arena_restore(ai);
                                            return Ok(v);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                OpCode::Addi | OpCode::Subi => {
                    let imm = insn.arg_c() as i64;
                    match self.op_arith_imm(insn.opcode(), a, imm) {
                        ArithOutcome::Done => {}
                        ArithOutcome::Dispatch => {
                            self.set_reg(a + 1, Value::Int(imm));
                            let mid = irep.syms[insn.arg_b()];
                            match vm_try!(self.op_send(&irep, pc, a, mid, 1, false, ai)) {
                                SendOutcome::Enter(new_irep) => {
                                    irep = new_irep;
                                    pc = 0;
                                    continue;
                                }
                                SendOutcome::NativeDone => {
                                    let ci = *self.ctx().ci();
                                    let new_pc = ci.pc;
                                    self.ctx_mut().sbase = ci.stackidx;
                                    self.cipop();
                                    match self.current_frame_irep() {
                                        Some(i2) => {
                                            irep = i2;
                                            pc = new_pc;
                                            continue;
                                        }
                                        None => {
                                            let v = self.reg(a);
                                            self.heap.arena_restore(ai);
                                            return Ok(v);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Gt | OpCode::Ge => {
                    match self.op_compare(insn.opcode(), a) {
                        ArithOutcome::Done => {}
                        ArithOutcome::Dispatch => {
                            let mid = irep.syms[insn.arg_b()];
                            match vm_try!(self.op_send(&irep, pc, a, mid, 1, false, ai)) {
                                SendOutcome::Enter(new_irep) => {
                                    irep = new_irep;
                                    pc = 0;
                                    continue;
                                }
                                SendOutcome::NativeDone => {
                                    let ci = *self.ctx().ci();
                                    let new_pc = ci.pc;
                                    self.ctx_mut().sbase = ci.stackidx;
                                    self.cipop();
                                    match self.current_frame_irep() {
                                        Some(i2) => {
                                            irep = i2;
                                            pc = new_pc;
                                            continue;
                                        }
                                        None => {
                                            let v = self.reg(a);
                                            self.heap.arena_restore(ai);
                                            return Ok(v);
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
                OpCode::Array => {
                    let b = insn.arg_b();
                    let n = insn.arg_c();
                    let values: Vec<Value> = (0..n).map(|i| self.reg(b + i)).collect();
                    let v = vm_try!(self.new_array(values));
                    self.set_reg(a, v);
                    self.heap.arena_restore(ai);
                }
                OpCode::Arycat => {
                    let splat = self.splat_to_vec(self.reg(insn.arg_b()));
                    if let Value::Obj(r) = self.reg(a) {
                        self.heap.write_barrier(r);
                        if let ObjBody::Array(ary) = self.body_mut(r) {
                            ary.concat(&splat);
                        }
                    }
                    self.heap.arena_restore(ai);
                }
                OpCode::Arypush => {
                    let v = self.reg(insn.arg_b());
                    if let Value::Obj(r) = self.reg(a) {
                        self.heap.field_write_barrier(r, v);
                        if let ObjBody::Array(ary) = self.body_mut(r) {
                            ary.push(v);
                        }
                    }
                }
                OpCode::Aref => {
                    let v = self.reg(insn.arg_b());
                    let c = insn.arg_c();
                    let out = match self.as_array(v) {
                        Some(ary) => ary.get(c).unwrap_or(Value::Nil),
                        None => {
                            if c == 0 {
                                v
                            } else {
                                Value::Nil
                            }
                        }
                    };
                    self.set_reg(a, out);
                }
                OpCode::Aset => {
                    let v = self.reg(a);
                    let c = insn.arg_c();
                    if let Value::Obj(r) = self.reg(insn.arg_b()) {
                        self.heap.field_write_barrier(r, v);
                        if let ObjBody::Array(ary) = self.body_mut(r) {
                            ary.set(c as i64, v);
                        }
                    }
                }
                OpCode::Apost => {
                    vm_try!(self.op_apost(a, insn.arg_b(), insn.arg_c()));
                    self.heap.arena_restore(ai);
                }
                OpCode::String => {
                    let text = match &irep.pool[insn.arg_bx()] {
                        PoolValue::Str(s) => s.clone(),
                        other => format!("{other:?}"),
                    };
                    let v = vm_try!(self.new_str(text));
                    self.set_reg(a, v);
                    self.heap.arena_restore(ai);
                }
                OpCode::Strcat => {
                    let other = self.reg(insn.arg_b());
                    let text = vm_try!(self.obj_to_s(other));
                    if let Value::Obj(r) = self.reg(a) {
                        if let ObjBody::Str(s) = self.body_mut(r) {
                            s.concat(&text);
                        }
                    }
                }
                OpCode::Hash => {
                    let b = insn.arg_b();
                    let n = insn.arg_c();
                    let hash = vm_try!(self.new_hash(n));
                    if let Value::Obj(h) = hash {
                        for i in 0..n {
                            let k = self.reg(b + i * 2);
                            let v = self.reg(b + i * 2 + 1);
                            vm_try!(self.hash_set(h, k, v));
                        }
                    }
                    self.set_reg(a, hash);
                    self.heap.arena_restore(ai);
                }
                OpCode::Lambda => {
                    let child = irep.reps[insn.arg_bz()].clone();
                    let c = insn.arg_cz();
                    let target_class = self.ctx().ci().target_class;
                    let env = if c & berylc_bc::LAMBDA_CAPTURE != 0 {
                        Some(vm_try!(self.ensure_env(irep.nlocals as usize)))
                    } else {
                        None
                    };
                    let proc_ref = vm_try!(self.new_proc(ProcData {
                        body: ProcBody::Irep(child),
                        env,
                        target_class,
                        strict: c & berylc_bc::LAMBDA_STRICT != 0,
                    }));
                    self.set_reg(a, Value::Obj(proc_ref));
                    self.heap.arena_restore(ai);
                }
                OpCode::Range => {
                    let b = insn.arg_b();
                    let beg = self.reg(b);
                    let end = self.reg(b + 1);
                    let v = vm_try!(self.new_range(beg, end, insn.arg_c() == 1));
                    self.set_reg(a, v);
                    self.heap.arena_restore(ai);
                }
                OpCode::Oclass => {
                    let object = self.core.object;
                    self.set_reg(a, Value::Obj(object));
                }
                OpCode::Class => {
                    let sym = irep.syms[insn.arg_bx()];
                    vm_try!(self.op_class(a, sym));
                    self.heap.arena_restore(ai);
                }
                OpCode::Module => {
                    let sym = irep.syms[insn.arg_bx()];
                    vm_try!(self.op_module(a, sym));
                    self.heap.arena_restore(ai);
                }
                OpCode::Exec => {
                    let child = irep.reps[insn.arg_bx()].clone();
                    let new_irep = vm_try!(self.op_exec(pc, a, child));
                    irep = new_irep;
                    pc = 0;
                    continue;
                }
                OpCode::Method => {
                    let sym = irep.syms[insn.arg_bx()];
                    let class_v = self.reg(a);
                    let proc_v = self.reg(a + 1);
                    if let (Value::Obj(class), Value::Obj(proc_ref)) = (class_v, proc_v) {
                        self.define_method_entry(class, sym, MethodEntry::BProc(proc_ref));
                    }
                    self.heap.arena_restore(ai);
                }
                OpCode::Sclass => {
                    let v = self.reg(insn.arg_b());
                    let sclass = vm_try!(self.singleton_class(v));
                    self.set_reg(a, Value::Obj(sclass));
                    self.heap.arena_restore(ai);
                }
                OpCode::Tclass => {
                    let Some(tc) = self.ctx().ci().target_class else {
                        let err = self.core.type_error;
                        raise_or_resume!(self.raise(err, "no target class or module"));
                    };
                    self.set_reg(a, Value::Obj(tc));
                }
                OpCode::Debug => {
                    log::debug!(
                        "OP_DEBUG {} {} {}",
                        insn.arg_a(),
                        insn.arg_b(),
                        insn.arg_c()
                    );
                }
                OpCode::Stop => {
                    let eidx = self.ctx().ci().eidx;
                    for i in (0..eidx).rev() {
                        self.ctx_mut().ci_mut().eidx = i;
                        vm_try!(self.ecall(i));
                    }
                    self.heap.arena_restore(ai);
                    let result = self.reg(irep.nlocals as usize);
                    let saved_base = self.ctx().ci().stackidx;
                    self.cipop();
                    self.ctx_mut().sbase = saved_base;
                    if let Some(exc) = self.exc.take() {
                        return Err(VmError::Raise(Value::Obj(exc)));
                    }
                    return Ok(result);
                }
                OpCode::Err => {
                    let message = match &irep.pool[insn.arg_bx()] {
                        PoolValue::Str(s) => s.clone(),
                        _ => "runtime error".to_string(),
                    };
                    let class = if a != 0 {
                        self.core.local_jump_error
                    } else {
                        self.core.runtime_error
                    };
                    raise_or_resume!(self.raise(class, &message));
                }
            }
            pc += 1;
        }
    }

    /// The IREP of the current top frame's proc, if it is bytecode.
    fn current_frame_irep(&self) -> Option<Rc<Irep>> {
        match self.ctx().ci().proc {
            CiProc::Proc(p) => self.proc_irep(p),
            _ => None,
        }
    }
}

/// Outcome of a SEND-family instruction.
pub(crate) enum SendOutcome {
    /// A bytecode callee was entered; run from its first instruction.
    Enter(Rc<Irep>),
    /// A native method ran to completion; the caller reloads.
    NativeDone,
}

pub(crate) enum EnterOutcome {
    /// Skip this many instruction slots past the ENTER.
    Advance(usize),
}

pub(crate) enum ArithOutcome {
    Done,
    /// Operand types fall through to method dispatch.
    Dispatch,
}

pub(crate) fn call_args_iter(args: &[Value]) -> impl Iterator<Item = (usize, Value)> + '_ {
    args.iter().copied().enumerate()
}
