//! Individual VM operations: the call protocol, argument reshaping,
//! return/break unwinding, exception propagation, arithmetic fast
//! paths, and the class-definition opcodes.

use std::rc::Rc;

use berylc_bc::{Irep, CALL_MAXARGS, RETURN_BREAK, RETURN_METHOD};
use berylc_util::{well_known, Symbol};

use crate::class::MethodEntry;
use crate::context::{CiProc, FiberStatus};
use crate::error::{VmError, VmResult};
use crate::hash::HKey;
use crate::obj::ObjBody;
use crate::proc_env::{ProcBody, ProcData};
use crate::state::{Args, State};
use crate::value::{ObjRef, Value};
use crate::vm::{ArithOutcome, EnterOutcome, Resume, SendOutcome};

use berylc_bc::{ArgSpec, OpCode};

impl State {
    // ---------------------------------------------------------------
    // SEND
    // ---------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn op_send(
        &mut self,
        _irep: &Rc<Irep>,
        pc: usize,
        a: usize,
        mid: Symbol,
        n: usize,
        is_sendb: bool,
        ai: usize,
    ) -> VmResult<SendOutcome> {
        if !is_sendb {
            let slot = if n == CALL_MAXARGS as usize {
                a + 2
            } else {
                a + n + 1
            };
            self.set_reg(slot, Value::Nil);
        }
        let recv = self.reg(a);
        let class = self.class_of(recv);
        let (entry, target_class, mid, n) = match self.find_method(class, mid) {
            Some((e, tc)) => (e, tc, mid, n),
            None => self.prepare_method_missing(recv, mid, a, n)?,
        };

        let caller_base = self.ctx().sbase;
        {
            let ci = self.cipush();
            ci.mid = Some(mid);
            ci.stackidx = caller_base;
            ci.argc = if n == CALL_MAXARGS as usize {
                -1
            } else {
                n as i32
            };
            ci.target_class = Some(target_class);
            ci.pc = pc + 1;
            ci.acc = a as i64;
        }
        self.ctx_mut().sbase = caller_base + a;

        self.invoke_entry(entry, recv, n, is_sendb, ai)
    }

    /// Run a located method entry against the freshly pushed frame.
    fn invoke_entry(
        &mut self,
        entry: MethodEntry,
        recv: Value,
        n: usize,
        is_sendb: bool,
        ai: usize,
    ) -> VmResult<SendOutcome> {
        match entry {
            MethodEntry::Native(f, _) => {
                {
                    let ci = self.ctx_mut().ci_mut();
                    ci.proc = CiProc::Native;
                    ci.nregs = if n == CALL_MAXARGS as usize { 3 } else { n + 2 };
                }
                let args = self.collect_native_args(n, is_sendb);
                let result = f(self, recv, &args)?;
                // the context may have switched (fibers); write through
                // the current one
                self.set_reg(0, result);
                self.heap.arena_restore(ai);
                Ok(SendOutcome::NativeDone)
            }
            MethodEntry::BProc(proc_ref) => {
                let (is_native, strict_irep) = match self.body(proc_ref) {
                    ObjBody::Proc(p) => (p.is_native(), p.irep().cloned()),
                    _ => (false, None),
                };
                if is_native {
                    let f = match self.body(proc_ref) {
                        ObjBody::Proc(p) => match p.body {
                            ProcBody::Native(f, _) => f,
                            _ => unreachable!("checked native above"),
                        },
                        _ => unreachable!("proc checked above"),
                    };
                    {
                        let ci = self.ctx_mut().ci_mut();
                        ci.proc = CiProc::Proc(proc_ref);
                        ci.nregs = if n == CALL_MAXARGS as usize { 3 } else { n + 2 };
                    }
                    let args = self.collect_native_args(n, is_sendb);
                    let result = f(self, recv, &args)?;
                    self.set_reg(0, result);
                    self.heap.arena_restore(ai);
                    return Ok(SendOutcome::NativeDone);
                }
                let callee = strict_irep
                    .ok_or_else(|| VmError::Fatal("bytecode proc without irep".into()))?;
                let argc = self.ctx().ci().argc;
                {
                    let nregs = callee.nregs as usize;
                    let ci = self.ctx_mut().ci_mut();
                    ci.proc = CiProc::Proc(proc_ref);
                    ci.nregs = nregs;
                }
                self.call_stack_sizing(argc, &callee)?;
                Ok(SendOutcome::Enter(callee))
            }
            MethodEntry::Undefined => {
                let err = self.core.no_method_error;
                Err(self.raise(err, "undefined method"))
            }
        }
    }

    /// Copy the callee-frame arguments out for a native method; bundled
    /// argument arrays are splatted.
    fn collect_native_args(&mut self, n: usize, _is_sendb: bool) -> Args {
        if n == CALL_MAXARGS as usize {
            let bundled = self.reg(1);
            let args = self
                .as_array(bundled)
                .map(|a| a.as_slice().to_vec())
                .unwrap_or_else(|| vec![bundled]);
            if let Value::Obj(r) = bundled {
                self.heap.protect(r);
            }
            Args {
                args,
                block: self.reg(2),
            }
        } else {
            Args {
                args: (1..=n).map(|i| self.reg(i)).collect(),
                block: self.reg(n + 1),
            }
        }
    }

    /// Substitute `method_missing`, prepending the attempted name to the
    /// argument list. The absence of `method_missing` itself raises.
    fn prepare_method_missing(
        &mut self,
        recv: Value,
        mid: Symbol,
        a: usize,
        n: usize,
    ) -> VmResult<(MethodEntry, ObjRef, Symbol, usize)> {
        let class = self.class_of(recv);
        let mm = well_known::METHOD_MISSING;
        let found = if mid == mm {
            None
        } else {
            self.find_method(class, mm)
        };
        let Some((entry, tc)) = found else {
            let name = self.sym_name(mid).to_string();
            let class_name = self.class_name(self.real_class_of(recv));
            let err = self.core.no_method_error;
            return Err(self.raise(
                err,
                &format!("undefined method '{name}' for {class_name}"),
            ));
        };
        if n == CALL_MAXARGS as usize {
            // bundled: prepend into the argument array
            if let Value::Obj(r) = self.reg(a + 1) {
                self.heap.write_barrier(r);
                if let ObjBody::Array(ary) = self.body_mut(r) {
                    ary.unshift(Value::Sym(mid));
                }
            }
            Ok((entry, tc, mm, n))
        } else {
            // shift the plain arguments (and block slot) up one
            let blk = self.reg(a + n + 1);
            self.set_reg(a + n + 2, blk);
            for i in (1..=n).rev() {
                let v = self.reg(a + i);
                self.set_reg(a + i + 1, v);
            }
            self.set_reg(a + 1, Value::Sym(mid));
            Ok((entry, tc, mm, n + 1))
        }
    }

    // ---------------------------------------------------------------
    // SUPER / TAILCALL / CALL
    // ---------------------------------------------------------------

    pub(crate) fn op_super(
        &mut self,
        pc: usize,
        a: usize,
        n: usize,
        ai: usize,
    ) -> VmResult<SendOutcome> {
        let (mid, target_class) = {
            let ci = self.ctx().ci();
            (ci.mid, ci.target_class)
        };
        let Some(mid) = mid else {
            let err = self.core.no_method_error;
            return Err(self.raise(err, "super called outside of method"));
        };
        let Some(start) = target_class.and_then(|c| self.class_data(c).superclass) else {
            let name = self.sym_name(mid).to_string();
            let err = self.core.no_method_error;
            return Err(self.raise(err, &format!("no superclass method '{name}'")));
        };
        let recv = self.reg(0);
        let Some((entry, found_class)) = self.find_method(start, mid) else {
            let name = self.sym_name(mid).to_string();
            let err = self.core.no_method_error;
            return Err(self.raise(err, &format!("no superclass method '{name}'")));
        };

        let caller_base = self.ctx().sbase;
        {
            let ci = self.cipush();
            ci.mid = Some(mid);
            ci.stackidx = caller_base;
            ci.argc = if n == CALL_MAXARGS as usize {
                -1
            } else {
                n as i32
            };
            ci.target_class = Some(found_class);
            ci.pc = pc + 1;
            ci.acc = a as i64;
        }
        self.ctx_mut().sbase = caller_base + a;
        self.set_reg(0, recv);

        self.invoke_entry(entry, recv, n, true, ai)
    }

    /// Replace the current frame instead of pushing one.
    pub(crate) fn op_tailcall(
        &mut self,
        a: usize,
        mid: Symbol,
        n: usize,
        _ai: usize,
    ) -> VmResult<Option<Rc<Irep>>> {
        let recv = self.reg(a);
        let class = self.class_of(recv);
        let Some((entry, target_class)) = self.find_method(class, mid) else {
            let name = self.sym_name(mid).to_string();
            let class_name = self.class_name(self.real_class_of(recv));
            let err = self.core.no_method_error;
            return Err(self.raise(
                err,
                &format!("undefined method '{name}' for {class_name}"),
            ));
        };
        let argc = if n == CALL_MAXARGS as usize { -1i32 } else { n as i32 };
        {
            let ci = self.ctx_mut().ci_mut();
            ci.mid = Some(mid);
            ci.target_class = Some(target_class);
            ci.argc = argc;
        }
        // move receiver and arguments down to the frame base
        let count = if argc < 0 { 2 } else { argc as usize + 1 };
        for i in 0..=count {
            let v = self.reg(a + i);
            self.set_reg(i, v);
        }
        match entry {
            MethodEntry::Native(f, _) => {
                let args = self.collect_native_args(if argc < 0 { CALL_MAXARGS as usize } else { n }, false);
                let result = f(self, recv, &args)?;
                self.set_reg(0, result);
                Ok(None)
            }
            MethodEntry::BProc(proc_ref) => {
                let Some(callee) = self.proc_irep(proc_ref) else {
                    return Err(VmError::Fatal("bytecode proc without irep".into()));
                };
                {
                    let nregs = callee.nregs as usize;
                    let ci = self.ctx_mut().ci_mut();
                    ci.proc = CiProc::Proc(proc_ref);
                    ci.nregs = nregs;
                }
                self.call_stack_sizing(argc, &callee)?;
                Ok(Some(callee))
            }
            MethodEntry::Undefined => {
                let err = self.core.no_method_error;
                Err(self.raise(err, "undefined method"))
            }
        }
    }

    /// `CALL`: the current receiver is a proc object; splice its body
    /// into the current frame.
    pub(crate) fn op_call(&mut self) -> VmResult<Option<Rc<Irep>>> {
        let recv = self.reg(0);
        let Value::Obj(proc_ref) = recv else {
            let err = self.core.type_error;
            return Err(self.raise(err, "not a proc"));
        };
        let (target_class, env, irep) = match self.body(proc_ref) {
            ObjBody::Proc(p) => (p.target_class, p.env, p.irep().cloned()),
            _ => {
                let err = self.core.type_error;
                return Err(self.raise(err, "not a proc"));
            }
        };
        {
            let ci = self.ctx_mut().ci_mut();
            ci.target_class = target_class;
            ci.proc = CiProc::Proc(proc_ref);
        }
        if let Some(env_ref) = env {
            let mid = match self.body(env_ref) {
                ObjBody::Env(e) => e.mid,
                _ => None,
            };
            if mid.is_some() {
                self.ctx_mut().ci_mut().mid = mid;
            }
        }
        let Some(callee) = irep else {
            return Ok(None);
        };
        let argc = self.ctx().ci().argc;
        {
            let nregs = callee.nregs as usize;
            self.ctx_mut().ci_mut().nregs = nregs;
        }
        self.call_stack_sizing(argc, &callee)?;
        // a closure runs with the self it captured
        if let Some(env_ref) = env {
            let captured_self = self.env_read(env_ref, 0);
            self.set_reg(0, captured_self);
        }
        Ok(Some(callee))
    }

    // ---------------------------------------------------------------
    // ENTER: argument reshaping
    // ---------------------------------------------------------------

    pub(crate) fn op_enter(&mut self, spec: &ArgSpec) -> VmResult<EnterOutcome> {
        let m1 = spec.req as i64;
        let o = spec.opt as i64;
        let r = spec.rest;
        let m2 = spec.post as i64;
        let len = m1 + o + i64::from(r) + m2;

        let mut argc = self.ctx().ci().argc as i64;
        let (mut argv, blk): (Vec<Value>, Value) = if argc < 0 {
            let bundled = self.reg(1);
            let blk = self.reg(2);
            let argv = self
                .as_array(bundled)
                .map(|ary| ary.as_slice().to_vec())
                .unwrap_or_else(|| vec![bundled]);
            if let Value::Obj(rr) = bundled {
                self.heap.protect(rr);
            }
            (argv, blk)
        } else {
            let argv: Vec<Value> = (1..=argc as usize).map(|i| self.reg(i)).collect();
            let blk = self.reg(argc as usize + 1);
            (argv, blk)
        };
        argc = argv.len() as i64;

        let strict = match self.ctx().ci().proc {
            CiProc::Proc(p) => match self.body(p) {
                ObjBody::Proc(pd) => pd.strict,
                _ => false,
            },
            _ => false,
        };
        if strict {
            if argc < m1 + m2 || (!r && argc > len) {
                let name = self
                    .ctx()
                    .ci()
                    .mid
                    .map(|m| self.sym_name(m).to_string())
                    .unwrap_or_else(|| "lambda".to_string());
                let err = self.core.argument_error;
                return Err(self.raise(
                    err,
                    &format!("'{name}': wrong number of arguments ({argc} for {})", m1 + m2),
                ));
            }
        } else if len > 1 && argc == 1 {
            // block auto-splat: one array argument spreads over params
            if let Some(ary) = self.as_array(argv[0]) {
                argv = ary.as_slice().to_vec();
                argc = argv.len() as i64;
            }
        }

        self.ctx_mut().ci_mut().argc = len as i32;
        let room = (len + 2) as usize;
        self.stack_extend(room, room)?;

        let skip;
        if argc < len {
            // too few: place what we have, defaults fill the rest
            let supplied_mid = (argc - m2).max(0).min(m1 + o);
            for (i, v) in argv.iter().take(supplied_mid as usize).enumerate() {
                self.set_reg(1 + i, *v);
            }
            for i in supplied_mid..m1 + o {
                self.set_reg(1 + i as usize, Value::Nil);
            }
            if m2 > 0 {
                let mlen = if argc - m2 <= m1 {
                    (argc - m1).max(0)
                } else {
                    m2
                };
                let post_base = (len - m2 + 1) as usize;
                for i in 0..m2 {
                    self.set_reg(post_base + i as usize, Value::Nil);
                }
                for i in 0..mlen {
                    let v = argv[(argc - mlen + i) as usize];
                    self.set_reg(post_base + i as usize, v);
                }
            }
            if r {
                let rest = self.new_array(Vec::new())?;
                self.set_reg((m1 + o + 1) as usize, rest);
            }
            self.set_reg((len + 1) as usize, blk);
            let supplied_opt = (argc - m1 - m2).max(0).min(o);
            skip = 1 + if o != 0 { supplied_opt as usize } else { 0 };
        } else {
            for i in 0..(m1 + o) {
                self.set_reg(1 + i as usize, argv[i as usize]);
            }
            if r {
                let rest_vals = argv[(m1 + o) as usize..(argc - m2) as usize].to_vec();
                let rest = self.new_array(rest_vals)?;
                self.set_reg((m1 + o + 1) as usize, rest);
            }
            if m2 > 0 {
                let post_base = (m1 + o + i64::from(r) + 1) as usize;
                for i in 0..m2 {
                    let v = argv[(argc - m2 + i) as usize];
                    self.set_reg(post_base + i as usize, v);
                }
            }
            self.set_reg((len + 1) as usize, blk);
            skip = (o + 1) as usize;
        }
        Ok(EnterOutcome::Advance(skip))
    }

    // ---------------------------------------------------------------
    // ARGARY / BLKPUSH: reaching the method frame's argument window
    // ---------------------------------------------------------------

    /// The argument window `(m1, r, m2, lv)` addresses: either the
    /// current frame's registers or an enclosing environment.
    fn arg_window(&mut self, lv: usize) -> VmResult<ArgWindow> {
        if lv == 0 {
            Ok(ArgWindow::Frame)
        } else {
            match self.uvenv(lv - 1) {
                Some(env) => Ok(ArgWindow::Env(env)),
                None => {
                    let err = self.core.no_method_error;
                    Err(self.raise(err, "super called outside of method"))
                }
            }
        }
    }

    fn window_read(&self, w: &ArgWindow, idx: usize) -> Value {
        match w {
            // slot 0 of the window is the first argument register
            ArgWindow::Frame => self.reg(1 + idx),
            ArgWindow::Env(env) => self.env_read(*env, 1 + idx),
        }
    }

    pub(crate) fn op_argary(&mut self, a: usize, bx: usize) -> VmResult<()> {
        let m1 = (bx >> 10) & 0x3f;
        let r = (bx >> 9) & 0x1;
        let m2 = (bx >> 4) & 0x1f;
        let lv = bx & 0xf;
        let window = self.arg_window(lv)?;

        let array = if r == 0 {
            let vals: Vec<Value> = (0..m1 + m2).map(|i| self.window_read(&window, i)).collect();
            self.new_array(vals)?
        } else {
            let mut vals: Vec<Value> = (0..m1).map(|i| self.window_read(&window, i)).collect();
            let rest = self.window_read(&window, m1);
            if let Some(ary) = self.as_array(rest) {
                vals.extend_from_slice(ary.as_slice());
            }
            for i in 0..m2 {
                vals.push(self.window_read(&window, m1 + 1 + i));
            }
            self.new_array(vals)?
        };
        let block = self.window_read(&window, m1 + r + m2);
        self.set_reg(a, array);
        self.set_reg(a + 1, block);
        Ok(())
    }

    pub(crate) fn op_blkpush(&mut self, a: usize, bx: usize) -> VmResult<()> {
        let m1 = (bx >> 10) & 0x3f;
        let r = (bx >> 9) & 0x1;
        let m2 = (bx >> 4) & 0x1f;
        let lv = bx & 0xf;
        let window = match self.arg_window(lv) {
            Ok(w) => w,
            Err(_) => {
                let err = self.core.local_jump_error;
                return Err(self.raise(err, "unexpected yield"));
            }
        };
        let block = self.window_read(&window, m1 + r + m2);
        self.set_reg(a, block);
        Ok(())
    }

    // ---------------------------------------------------------------
    // RETURN and unwinding
    // ---------------------------------------------------------------

    /// Execute a RETURN of `v` with the given kind. Returns either a
    /// resume point in the caller or, when a host-entered frame was
    /// crossed, the final value.
    pub(crate) fn vm_return(
        &mut self,
        _ai: usize,
        v: Value,
        kind: usize,
        _irep: &Rc<Irep>,
    ) -> VmResult<(Option<Resume>, Option<Value>)> {
        let mut target_idx = self.ctx().cis.len() - 1;
        let cur_proc = match self.ctx().ci().proc {
            CiProc::Proc(p) => Some(p),
            _ => None,
        };

        match kind as u16 {
            RETURN_METHOD => {
                let (env, strict) = match cur_proc.map(|p| self.body(p)) {
                    Some(ObjBody::Proc(pd)) => (pd.env, pd.strict),
                    _ => (None, false),
                };
                if !strict {
                    // blocks return from their defining method; with no
                    // environment (top level, class body) there is none
                    let Some(env_ref) = env else {
                        let err = self.core.local_jump_error;
                        return Err(self.raise(err, "unexpected return"));
                    };
                    let top = self.top_env(env_ref);
                    let (cioff, env_ctx) = match self.body(top) {
                        ObjBody::Env(e) => (e.cioff, e.ctx),
                        _ => (-1, usize::MAX),
                    };
                    if env_ctx != self.cur_ctx {
                        let err = self.core.local_jump_error;
                        return Err(self.raise(err, "unexpected return"));
                    }
                    if cioff <= 0 {
                        let err = self.core.local_jump_error;
                        return Err(self.raise(err, "unexpected return"));
                    }
                    // the defining frame must still be a real method
                    let defines_method = self
                        .ctx()
                        .cis
                        .get(cioff as usize)
                        .map(|ci| ci.mid.is_some())
                        .unwrap_or(false);
                    if !defines_method {
                        let err = self.core.local_jump_error;
                        return Err(self.raise(err, "unexpected return"));
                    }
                    target_idx = cioff as usize;
                }
            }
            RETURN_BREAK => {
                let env = match cur_proc.map(|p| self.body(p)) {
                    Some(ObjBody::Proc(pd)) => pd.env,
                    _ => None,
                };
                let (cioff, env_ctx) = env
                    .and_then(|e| match self.body(e) {
                        ObjBody::Env(data) => Some((data.cioff, data.ctx)),
                        _ => None,
                    })
                    .unwrap_or((-1, usize::MAX));
                if cioff < 0 || env_ctx != self.cur_ctx {
                    let err = self.core.local_jump_error;
                    return Err(self.raise(err, "break from proc-closure"));
                }
                let idx = cioff as usize + 1;
                if idx >= self.ctx().cis.len() {
                    let err = self.core.local_jump_error;
                    return Err(self.raise(err, "break from proc-closure"));
                }
                target_idx = idx;
            }
            _ => {}
        }

        // the end of a fiber body yields back to the resumer
        if target_idx == 0 {
            // run the fiber's remaining ensures before leaving it
            let eidx = self.ctx().ci().eidx;
            for i in (0..eidx).rev() {
                self.ctx_mut().ci_mut().eidx = i;
                self.ecall(i)?;
            }
            let Some(prev) = self.ctx().prev else {
                let err = self.core.local_jump_error;
                return Err(self.raise(err, "unexpected return"));
            };
            self.ctx_mut().status = FiberStatus::Terminated;
            self.cur_ctx = prev;
            if let Some(ctx) = self.context_at_mut(prev) {
                ctx.status = FiberStatus::Running;
            }
            target_idx = self.ctx().cis.len() - 1;
        }

        // pop frames down to (and including) the target, running each
        // frame's pending ensures first
        loop {
            let top_idx = self.ctx().cis.len() - 1;
            let below_eidx = if top_idx == 0 {
                0
            } else {
                self.ctx().cis[top_idx - 1].eidx
            };
            let mut eidx = self.ctx().ci().eidx;
            while eidx > below_eidx {
                eidx -= 1;
                self.ctx_mut().ci_mut().eidx = eidx;
                self.ecall(eidx)?;
            }
            let popped = *self.ctx().ci();
            self.cipop();
            self.ctx_mut().sbase = popped.stackidx;
            if top_idx == target_idx {
                if popped.acc < 0 {
                    return Ok((None, Some(v)));
                }
                self.set_reg(popped.acc as usize, v);
                let caller = match self.ctx().ci().proc {
                    CiProc::Proc(p) => self.proc_irep(p),
                    _ => None,
                };
                let Some(irep) = caller else {
                    return Ok((None, Some(v)));
                };
                return Ok((
                    Some(Resume {
                        irep,
                        pc: popped.pc,
                    }),
                    None,
                ));
            }
            if popped.acc < 0 {
                // crossing a host boundary abandons the jump target
                return Ok((None, Some(v)));
            }
            if top_idx == 0 {
                return Err(VmError::Fatal("return unwound past the root frame".into()));
            }
        }
    }

    /// Outermost environment in the capture chain: the defining method
    /// frame's.
    fn top_env(&self, env: ObjRef) -> ObjRef {
        let mut cur = env;
        loop {
            match self.body(cur) {
                ObjBody::Env(e) => match e.prev {
                    Some(p) => cur = p,
                    None => return cur,
                },
                _ => return cur,
            }
        }
    }

    /// The unwind algorithm: walk call-infos from the top; run pending
    /// ensures before each pop; resume at the innermost rescue target;
    /// deliver to the host when none exists.
    pub(crate) fn vm_unwind(&mut self, _ai: usize) -> VmResult<Resume> {
        loop {
            let top_idx = self.ctx().cis.len() - 1;
            let below_ridx = if top_idx == 0 {
                0
            } else {
                self.ctx().cis[top_idx - 1].ridx
            };
            let below_eidx = if top_idx == 0 {
                0
            } else {
                self.ctx().cis[top_idx - 1].eidx
            };

            // cleanup clauses run even on the way out
            let mut eidx = self.ctx().ci().eidx;
            while eidx > below_eidx {
                eidx -= 1;
                self.ctx_mut().ci_mut().eidx = eidx;
                if let Err(e) = self.ecall(eidx) {
                    match e {
                        VmError::Raise(v) => {
                            // an ensure's exception replaces the original
                            self.exc = v.obj();
                        }
                        fatal => return Err(fatal),
                    }
                }
            }

            if self.ctx().ci().ridx > below_ridx {
                // a rescue is armed in this frame
                let ridx = self.ctx().ci().ridx - 1;
                self.ctx_mut().ci_mut().ridx = ridx;
                let target = self.ctx().rescues.get(ridx).copied();
                self.ctx_mut().rescues.truncate(ridx);
                let Some(pc) = target else {
                    return Err(VmError::Fatal("rescue stack out of sync".into()));
                };
                let irep = match self.ctx().ci().proc {
                    CiProc::Proc(p) => self.proc_irep(p),
                    _ => None,
                };
                let Some(irep) = irep else {
                    return Err(VmError::Fatal("rescue target in frame without code".into()));
                };
                return Ok(Resume { irep, pc });
            }

            if top_idx == 0 {
                // root of this context with no handler
                if let Some(prev) = self.ctx().prev {
                    // an exception escaping a fiber resumes the resumer
                    // with the exception still in flight
                    self.ctx_mut().status = FiberStatus::Terminated;
                    self.cur_ctx = prev;
                    if let Some(ctx) = self.context_at_mut(prev) {
                        ctx.status = FiberStatus::Running;
                    }
                    continue;
                }
                let exc = self.exc.take().map(Value::Obj).unwrap_or(Value::Nil);
                return Err(VmError::Raise(exc));
            }

            let popped = *self.ctx().ci();
            self.cipop();
            self.ctx_mut().sbase = popped.stackidx;
            if popped.acc < 0 {
                // hand the exception to the nested native caller
                let exc = self.exc.map(Value::Obj).unwrap_or(Value::Nil);
                return Err(VmError::Raise(exc));
            }
        }
    }

    // ---------------------------------------------------------------
    // arithmetic fast paths
    // ---------------------------------------------------------------

    pub(crate) fn op_arith(&mut self, op: OpCode, a: usize) -> ArithOutcome {
        let x = self.reg(a);
        let y = self.reg(a + 1);
        let result = match (op, x, y) {
            (OpCode::Add, Value::Int(i), Value::Int(j)) => Some(match i.checked_add(j) {
                Some(v) => Value::Int(v),
                None => Value::Float(i as f64 + j as f64),
            }),
            (OpCode::Sub, Value::Int(i), Value::Int(j)) => Some(match i.checked_sub(j) {
                Some(v) => Value::Int(v),
                None => Value::Float(i as f64 - j as f64),
            }),
            (OpCode::Mul, Value::Int(i), Value::Int(j)) => Some(match i.checked_mul(j) {
                Some(v) => Value::Int(v),
                None => Value::Float(i as f64 * j as f64),
            }),
            (OpCode::Div, Value::Int(i), Value::Int(j)) => {
                Some(if j == 0 || (i == i64::MIN && j == -1) {
                    Value::Float(i as f64 / j as f64)
                } else {
                    Value::Int(i / j)
                })
            }
            (OpCode::Add, Value::Int(i), Value::Float(f)) => Some(Value::Float(i as f64 + f)),
            (OpCode::Sub, Value::Int(i), Value::Float(f)) => Some(Value::Float(i as f64 - f)),
            (OpCode::Mul, Value::Int(i), Value::Float(f)) => Some(Value::Float(i as f64 * f)),
            (OpCode::Div, Value::Int(i), Value::Float(f)) => Some(Value::Float(i as f64 / f)),
            (OpCode::Add, Value::Float(f), Value::Int(i)) => Some(Value::Float(f + i as f64)),
            (OpCode::Sub, Value::Float(f), Value::Int(i)) => Some(Value::Float(f - i as f64)),
            (OpCode::Mul, Value::Float(f), Value::Int(i)) => Some(Value::Float(f * i as f64)),
            (OpCode::Div, Value::Float(f), Value::Int(i)) => Some(Value::Float(f / i as f64)),
            (OpCode::Add, Value::Float(f), Value::Float(g)) => Some(Value::Float(f + g)),
            (OpCode::Sub, Value::Float(f), Value::Float(g)) => Some(Value::Float(f - g)),
            (OpCode::Mul, Value::Float(f), Value::Float(g)) => Some(Value::Float(f * g)),
            (OpCode::Div, Value::Float(f), Value::Float(g)) => Some(Value::Float(f / g)),
            (OpCode::Add, sx, sy) => {
                // string concatenation builds a fresh string
                match (self.str_text(sx), self.str_text(sy)) {
                    (Some(s1), Some(s2)) => {
                        let joined = format!("{s1}{s2}");
                        match self.new_str(joined) {
                            Ok(v) => Some(v),
                            Err(_) => None,
                        }
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        match result {
            Some(v) => {
                self.set_reg(a, v);
                ArithOutcome::Done
            }
            None => ArithOutcome::Dispatch,
        }
    }

    pub(crate) fn op_arith_imm(&mut self, op: OpCode, a: usize, imm: i64) -> ArithOutcome {
        let x = self.reg(a);
        let result = match (op, x) {
            (OpCode::Addi, Value::Int(i)) => Some(match i.checked_add(imm) {
                Some(v) => Value::Int(v),
                None => Value::Float(i as f64 + imm as f64),
            }),
            (OpCode::Subi, Value::Int(i)) => Some(match i.checked_sub(imm) {
                Some(v) => Value::Int(v),
                None => Value::Float(i as f64 - imm as f64),
            }),
            (OpCode::Addi, Value::Float(f)) => Some(Value::Float(f + imm as f64)),
            (OpCode::Subi, Value::Float(f)) => Some(Value::Float(f - imm as f64)),
            _ => None,
        };
        match result {
            Some(v) => {
                self.set_reg(a, v);
                ArithOutcome::Done
            }
            None => ArithOutcome::Dispatch,
        }
    }

    pub(crate) fn op_compare(&mut self, op: OpCode, a: usize) -> ArithOutcome {
        let x = self.reg(a);
        let y = self.reg(a + 1);
        if op == OpCode::Eq && x.ident_eq(y) {
            self.set_reg(a, Value::True);
            return ArithOutcome::Done;
        }
        // integers compare exactly; widening to float would collapse
        // values past 2^53
        if let (Value::Int(i), Value::Int(j)) = (x, y) {
            let out = match op {
                OpCode::Eq => i == j,
                OpCode::Lt => i < j,
                OpCode::Le => i <= j,
                OpCode::Gt => i > j,
                OpCode::Ge => i >= j,
                _ => unreachable!("compare dispatch covers the table"),
            };
            self.set_reg(a, Value::bool(out));
            return ArithOutcome::Done;
        }
        let pair = match (x, y) {
            (Value::Int(i), Value::Float(f)) => Some((i as f64, f)),
            (Value::Float(f), Value::Int(i)) => Some((f, i as f64)),
            (Value::Float(f), Value::Float(g)) => Some((f, g)),
            _ => None,
        };
        let Some((l, r)) = pair else {
            if op == OpCode::Eq {
                // different shapes: identity already said no
                match (x, y) {
                    (Value::Obj(_), _) | (_, Value::Obj(_)) => return ArithOutcome::Dispatch,
                    _ => {
                        self.set_reg(a, Value::False);
                        return ArithOutcome::Done;
                    }
                }
            }
            return ArithOutcome::Dispatch;
        };
        let out = match op {
            OpCode::Eq => l == r,
            OpCode::Lt => l < r,
            OpCode::Le => l <= r,
            OpCode::Gt => l > r,
            OpCode::Ge => l >= r,
            _ => unreachable!("compare dispatch covers the table"),
        };
        self.set_reg(a, Value::bool(out));
        ArithOutcome::Done
    }

    // ---------------------------------------------------------------
    // aggregates and class definition
    // ---------------------------------------------------------------

    pub(crate) fn op_apost(&mut self, a: usize, pre: usize, post: usize) -> VmResult<()> {
        let v = self.reg(a);
        match self.as_array(v).map(|ary| ary.as_slice().to_vec()) {
            None => {
                let empty = self.new_array(Vec::new())?;
                self.set_reg(a, empty);
                for i in 0..post {
                    self.set_reg(a + 1 + i, Value::Nil);
                }
            }
            Some(values) => {
                let len = values.len();
                if len > pre + post {
                    let mid = values[pre..len - post].to_vec();
                    let splat = self.new_array(mid)?;
                    self.set_reg(a, splat);
                    for i in 0..post {
                        self.set_reg(a + 1 + i, values[len - post + i]);
                    }
                } else {
                    let empty = self.new_array(Vec::new())?;
                    self.set_reg(a, empty);
                    for i in 0..post {
                        let v = values.get(pre + i).copied().unwrap_or(Value::Nil);
                        self.set_reg(a + 1 + i, v);
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn op_class(&mut self, a: usize, sym: Symbol) -> VmResult<()> {
        let outer = self.definition_outer(self.reg(a))?;
        let superclass = match self.reg(a + 1) {
            Value::Nil => self.core.object,
            Value::Obj(c) if self.as_class(c).is_some() => c,
            _ => {
                let err = self.core.type_error;
                return Err(self.raise(err, "superclass must be a Class"));
            }
        };
        let name = self.sym_name(sym).to_string();
        let class = self.define_class_under(outer, &name, superclass)?;
        self.set_reg(a, Value::Obj(class));
        Ok(())
    }

    pub(crate) fn op_module(&mut self, a: usize, sym: Symbol) -> VmResult<()> {
        let outer = self.definition_outer(self.reg(a))?;
        let name = self.sym_name(sym).to_string();
        let module = self.define_module_under(outer, &name)?;
        self.set_reg(a, Value::Obj(module));
        Ok(())
    }

    /// Resolve the base register of CLASS/MODULE: nil means the
    /// lexically enclosing class.
    fn definition_outer(&mut self, base: Value) -> VmResult<ObjRef> {
        match base {
            Value::Nil => Ok(self.cv_holder().unwrap_or(self.core.object)),
            Value::Obj(c) if self.as_class(c).is_some() => Ok(c),
            _ => {
                let err = self.core.type_error;
                Err(self.raise(err, "not a class or module"))
            }
        }
    }

    /// `EXEC`: run a child IREP with the class object as self and
    /// target class.
    pub(crate) fn op_exec(&mut self, pc: usize, a: usize, child: Rc<Irep>) -> VmResult<Rc<Irep>> {
        let recv = self.reg(a);
        let Value::Obj(class) = recv else {
            let err = self.core.type_error;
            return Err(self.raise(err, "no class to execute against"));
        };
        let proc_ref = self.new_proc(ProcData {
            body: ProcBody::Irep(child.clone()),
            env: None,
            target_class: Some(class),
            strict: false,
        })?;
        let caller_base = self.ctx().sbase;
        {
            let nregs = child.nregs as usize;
            let ci = self.cipush();
            ci.pc = pc + 1;
            ci.acc = a as i64;
            ci.mid = None;
            ci.stackidx = caller_base;
            ci.argc = 0;
            ci.target_class = Some(class);
            ci.proc = CiProc::Proc(proc_ref);
            ci.nregs = nregs;
        }
        self.ctx_mut().sbase = caller_base + a;
        self.stack_extend(child.nregs as usize, 1)?;
        Ok(child)
    }

    /// The lexically current class: the innermost frame that carries a
    /// target class.
    pub(crate) fn cv_holder(&self) -> Option<ObjRef> {
        for ci in self.ctx().cis.iter().rev() {
            if let Some(tc) = ci.target_class {
                if let Some(data) = self.as_class(tc) {
                    // I-classes delegate to the wrapped module; a class
                    // object's singleton delegates to its attachment
                    match data.kind {
                        crate::class::ClassKind::IClass => return data.origin,
                        crate::class::ClassKind::Singleton if data.origin.is_some() => {
                            return data.origin
                        }
                        _ => {}
                    }
                }
                return Some(tc);
            }
        }
        None
    }

    // ---------------------------------------------------------------
    // constants at runtime
    // ---------------------------------------------------------------

    pub(crate) fn vm_const_get(&mut self, sym: Symbol) -> VmResult<Value> {
        let start = self.cv_holder().unwrap_or(self.core.object);
        if let Some(v) = self.const_lookup(start, sym) {
            return Ok(v);
        }
        self.const_missing(start, sym)
    }

    pub(crate) fn vm_mcnst_get(&mut self, base: Value, sym: Symbol) -> VmResult<Value> {
        let Value::Obj(class) = base else {
            let err = self.core.type_error;
            return Err(self.raise(err, "not a class or module"));
        };
        let mut cur = Some(class);
        while let Some(c) = cur {
            if let Some(v) = self.iv_get_raw(c, sym) {
                return Ok(v);
            }
            cur = self.as_class(c).and_then(|d| d.superclass);
        }
        self.const_missing(class, sym)
    }

    /// `const_missing` hook, then NameError.
    fn const_missing(&mut self, class: ObjRef, sym: Symbol) -> VmResult<Value> {
        let cm = well_known::CONST_MISSING;
        if self.find_method(self.class_of(Value::Obj(class)), cm).is_some() {
            return self.funcall_with_block(
                Value::Obj(class),
                cm,
                vec![Value::Sym(sym)],
                Value::Nil,
            );
        }
        let name = self.sym_name(sym).to_string();
        let err = self.core.name_error;
        Err(self.raise(err, &format!("uninitialized constant {name}")))
    }

    // ---------------------------------------------------------------
    // value services used by opcodes
    // ---------------------------------------------------------------

    /// `splat(v)`: an array stays itself, anything else wraps.
    pub(crate) fn splat_to_vec(&self, v: Value) -> Vec<Value> {
        match self.as_array(v) {
            Some(ary) => ary.as_slice().to_vec(),
            None => vec![v],
        }
    }

    /// The `eql?` projection of a key; string keys are duplicated so
    /// the table owns an immutable copy.
    pub(crate) fn hash_key_of(&self, key: Value) -> HKey {
        match key {
            Value::Nil => HKey::Nil,
            Value::True => HKey::True,
            Value::False => HKey::False,
            Value::Int(i) => HKey::Int(i),
            Value::Float(f) => HKey::Float(f.to_bits()),
            Value::Sym(s) => HKey::Sym(s),
            Value::HostPtr(p) => HKey::HostPtr(p),
            Value::Obj(r) => match self.body(r) {
                ObjBody::Str(s) => HKey::Str(s.as_str().into()),
                _ => HKey::Obj(r),
            },
        }
    }

    pub(crate) fn hash_set(&mut self, h: ObjRef, key: Value, value: Value) -> VmResult<()> {
        let hkey = self.hash_key_of(key);
        // duplicate string keys to stop later mutation from corrupting
        // the table
        let key_obj = if let HKey::Str(text) = &hkey {
            self.new_str(text.to_string())?
        } else {
            key
        };
        self.heap.field_write_barrier(h, key_obj);
        self.heap.field_write_barrier(h, value);
        if let ObjBody::Hash(hash) = self.body_mut(h) {
            hash.insert(hkey, key_obj, value);
        }
        Ok(())
    }

    pub(crate) fn hash_get(&self, h: ObjRef, key: Value) -> Value {
        let hkey = self.hash_key_of(key);
        match self.body(h) {
            ObjBody::Hash(hash) => hash.get(&hkey).unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }

    /// `to_s` for the VM's own use (string interpolation, `puts`).
    pub(crate) fn obj_to_s(&mut self, v: Value) -> VmResult<String> {
        match v {
            Value::Nil => Ok(String::new()),
            Value::True => Ok("true".into()),
            Value::False => Ok("false".into()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Float(f) => Ok(format_float(f)),
            Value::Sym(s) => Ok(self.sym_name(s).to_string()),
            Value::HostPtr(p) => Ok(format!("#<hostptr {p:#x}>")),
            Value::Obj(_) => {
                if let Some(text) = self.str_text(v) {
                    return Ok(text.to_string());
                }
                let out = self.funcall_with_block(
                    v,
                    well_known::TO_S,
                    Vec::new(),
                    Value::Nil,
                )?;
                match self.str_text(out) {
                    Some(text) => Ok(text.to_string()),
                    None => Ok(self.default_to_s(v)),
                }
            }
        }
    }

    pub(crate) fn default_to_s(&self, v: Value) -> String {
        let class = self.real_class_of(v);
        format!("#<{}>", self.class_name(class))
    }

    /// `inspect` rendering used by `p` and the REPL.
    pub(crate) fn inspect_value(&mut self, v: Value) -> VmResult<String> {
        match v {
            Value::Nil => Ok("nil".into()),
            Value::Sym(s) => Ok(format!(":{}", self.sym_name(s))),
            Value::Obj(r) => match self.body(r) {
                ObjBody::Str(s) => Ok(format!("{:?}", s.as_str())),
                ObjBody::Array(_) | ObjBody::Hash(_) | ObjBody::Range(_) | ObjBody::Exception(_) => {
                    let sym = well_known::INSPECT;
                    if self
                        .find_method(self.class_of(v), sym)
                        .is_some()
                    {
                        let out = self.funcall_with_block(v, sym, Vec::new(), Value::Nil)?;
                        if let Some(text) = self.str_text(out) {
                            return Ok(text.to_string());
                        }
                    }
                    Ok(self.default_to_s(v))
                }
                _ => self.obj_to_s(v),
            },
            other => self.obj_to_s(other),
        }
    }
}

enum ArgWindow {
    Frame,
    Env(ObjRef),
}

/// Float rendering matching the modeled language: integral floats keep
/// one decimal place.
pub(crate) fn format_float(f: f64) -> String {
    if f.is_finite() && f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(2.0), "2.0");
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(f64::INFINITY), "inf");
    }

    #[test]
    fn test_arith_overflow_promotes() {
        let mut state = State::new();
        state.set_reg(5, Value::Int(i64::MAX));
        state.set_reg(6, Value::Int(1));
        assert!(matches!(
            state.op_arith(OpCode::Add, 5),
            ArithOutcome::Done
        ));
        assert!(matches!(state.reg(5), Value::Float(_)));
    }

    #[test]
    fn test_div_by_zero_promotes() {
        let mut state = State::new();
        state.set_reg(5, Value::Int(7));
        state.set_reg(6, Value::Int(0));
        state.op_arith(OpCode::Div, 5);
        assert!(matches!(state.reg(5), Value::Float(f) if f.is_infinite()));

        state.set_reg(5, Value::Int(i64::MIN));
        state.set_reg(6, Value::Int(-1));
        state.op_arith(OpCode::Div, 5);
        assert!(matches!(state.reg(5), Value::Float(_)));
    }

    #[test]
    fn test_string_add_concatenates() {
        let mut state = State::new();
        let a = state.new_str("foo").unwrap();
        let b = state.new_str("bar").unwrap();
        state.set_reg(5, a);
        state.set_reg(6, b);
        state.op_arith(OpCode::Add, 5);
        assert_eq!(state.str_text(state.reg(5)), Some("foobar"));
        // operands untouched
        assert_eq!(state.str_text(a), Some("foo"));
    }

    #[test]
    fn test_compare_mixed_numeric() {
        let mut state = State::new();
        state.set_reg(5, Value::Int(2));
        state.set_reg(6, Value::Float(2.5));
        state.op_compare(OpCode::Lt, 5);
        assert_eq!(state.reg(5), Value::True);
    }

    #[test]
    fn test_compare_large_integers_exactly() {
        // adjacent values past 2^53 are indistinguishable as f64
        let big = 1i64 << 53;
        let mut state = State::new();
        state.set_reg(5, Value::Int(big));
        state.set_reg(6, Value::Int(big + 1));
        state.op_compare(OpCode::Lt, 5);
        assert_eq!(state.reg(5), Value::True);

        state.set_reg(5, Value::Int(big));
        state.set_reg(6, Value::Int(big + 1));
        state.op_compare(OpCode::Eq, 5);
        assert_eq!(state.reg(5), Value::False);

        state.set_reg(5, Value::Int(i64::MAX));
        state.set_reg(6, Value::Int(i64::MAX - 1));
        state.op_compare(OpCode::Gt, 5);
        assert_eq!(state.reg(5), Value::True);
    }

    #[test]
    fn test_eq_identity_and_shape() {
        let mut state = State::new();
        state.set_reg(5, Value::Sym(well_known::CALL));
        state.set_reg(6, Value::Sym(well_known::CALL));
        state.op_compare(OpCode::Eq, 5);
        assert_eq!(state.reg(5), Value::True);

        state.set_reg(5, Value::Nil);
        state.set_reg(6, Value::False);
        state.op_compare(OpCode::Eq, 5);
        assert_eq!(state.reg(5), Value::False);
    }

    #[test]
    fn test_hash_key_string_duplicated() {
        let mut state = State::new();
        let h = match state.new_hash(2).unwrap() {
            Value::Obj(r) => r,
            _ => unreachable!("new_hash yields a heap value"),
        };
        let key = state.new_str("k").unwrap();
        state.hash_set(h, key, Value::Int(1)).unwrap();
        // mutate the original key object
        if let Value::Obj(kr) = key {
            if let ObjBody::Str(s) = state.body_mut(kr) {
                s.concat("xxx");
            }
        }
        // the table still answers under the original content
        let probe = state.new_str("k").unwrap();
        assert_eq!(state.hash_get(h, probe), Value::Int(1));
    }
}
