//! Definition and assignment lowering: methods, classes, modules,
//! single/multiple/operator assignment, and begin/rescue/ensure.

use berylc_bc::{Insn, OpCode, LAMBDA_STRICT, RETURN_NORMAL};
use berylc_par::{Node, NodeKind, Params, RescueClause};

use crate::{CodegenError, CodegenResult, Generator, LoopInfo, LoopKind};

impl<'a> Generator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn gen_def(
        &mut self,
        name: &str,
        params: &Params,
        body: &[Node],
        rescues: &[RescueClause],
        ensure_body: Option<&[Node]>,
        locals: &[String],
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        let idx = self.gen_method_body(params, body, rescues, ensure_body, locals)?;

        self.emit(Insn::a(OpCode::Tclass, sp0));
        self.push()?;
        let proc_reg = self.sp();
        self.emit(Insn::abz(OpCode::Lambda, proc_reg, idx as u16, LAMBDA_STRICT));
        self.push()?;
        self.pop_n(2);
        let sym = self.intern(name);
        let sym_idx = self.new_sym(sym)?;
        self.emit(Insn::abx(OpCode::Method, sp0, sym_idx));
        if val {
            self.emit(Insn::abx(OpCode::Loadsym, sp0, sym_idx));
            self.push()?;
        }
        Ok(())
    }

    pub(crate) fn gen_sdef(
        &mut self,
        recv: &Node,
        name: &str,
        params: &Params,
        body: &[Node],
        locals: &[String],
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        let idx = self.gen_method_body(params, body, &[], None, locals)?;

        self.gen(recv, true)?;
        self.pop();
        self.emit(Insn::ab(OpCode::Sclass, sp0, sp0));
        self.push()?;
        let proc_reg = self.sp();
        self.emit(Insn::abz(OpCode::Lambda, proc_reg, idx as u16, LAMBDA_STRICT));
        self.push()?;
        self.pop_n(2);
        let sym = self.intern(name);
        let sym_idx = self.new_sym(sym)?;
        self.emit(Insn::abx(OpCode::Method, sp0, sym_idx));
        if val {
            self.emit(Insn::abx(OpCode::Loadsym, sp0, sym_idx));
            self.push()?;
        }
        Ok(())
    }

    /// Compile a method body into a child IREP.
    fn gen_method_body(
        &mut self,
        params: &Params,
        body: &[Node],
        rescues: &[RescueClause],
        ensure_body: Option<&[Node]>,
        locals: &[String],
    ) -> CodegenResult<usize> {
        self.scope_push(locals.to_vec(), true, false);
        self.scope().ainfo = (
            (params.required.len() + params.optional.len()) as u16,
            params.rest.is_some(),
            params.post.len() as u16,
        );
        self.gen_enter(params)?;
        if rescues.is_empty() && ensure_body.is_none() {
            self.gen_stmts(body, true)?;
        } else {
            self.gen_begin_parts(body, rescues, &[], ensure_body, true)?;
        }
        self.pop();
        let sp = self.sp();
        self.genop_peep(Insn::ab(OpCode::Return, sp, RETURN_NORMAL), false);
        self.scope_finish_child()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn gen_class(
        &mut self,
        base: Option<&Node>,
        name: &str,
        absolute: bool,
        superclass: Option<&Node>,
        body: &[Node],
        locals: &[String],
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen_cbase(base, absolute)?;
        match superclass {
            Some(s) => self.gen(s, true)?,
            None => {
                let sp = self.sp();
                self.emit(Insn::a(OpCode::Loadnil, sp));
                self.push()?;
            }
        }
        self.pop_n(2);
        let sym = self.intern(name);
        let sym_idx = self.new_sym(sym)?;
        self.emit(Insn::abx(OpCode::Class, sp0, sym_idx));
        self.gen_body_exec(body, locals, sp0, val)
    }

    pub(crate) fn gen_module(
        &mut self,
        base: Option<&Node>,
        name: &str,
        absolute: bool,
        body: &[Node],
        locals: &[String],
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen_cbase(base, absolute)?;
        self.pop();
        let sym = self.intern(name);
        let sym_idx = self.new_sym(sym)?;
        self.emit(Insn::abx(OpCode::Module, sp0, sym_idx));
        self.gen_body_exec(body, locals, sp0, val)
    }

    pub(crate) fn gen_sclass(
        &mut self,
        expr: &Node,
        body: &[Node],
        locals: &[String],
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen(expr, true)?;
        self.pop();
        self.emit(Insn::ab(OpCode::Sclass, sp0, sp0));
        self.gen_body_exec(body, locals, sp0, val)
    }

    /// The defining-context register for CLASS/MODULE: nil picks the
    /// lexically enclosing class, OCLASS the root.
    fn gen_cbase(&mut self, base: Option<&Node>, absolute: bool) -> CodegenResult<()> {
        match base {
            Some(node) => self.gen(node, true),
            None if absolute => {
                let sp = self.sp();
                self.emit(Insn::a(OpCode::Oclass, sp));
                self.push()
            }
            None => {
                let sp = self.sp();
                self.emit(Insn::a(OpCode::Loadnil, sp));
                self.push()
            }
        }
    }

    /// Compile a class/module/singleton body and EXEC it against the
    /// class object sitting at `sp0`.
    fn gen_body_exec(
        &mut self,
        body: &[Node],
        locals: &[String],
        sp0: u16,
        val: bool,
    ) -> CodegenResult<()> {
        if body.is_empty() {
            if val {
                self.emit(Insn::a(OpCode::Loadnil, sp0));
                self.push()?;
            }
            return Ok(());
        }
        self.scope_push(locals.to_vec(), false, false);
        self.gen_stmts(body, true)?;
        self.pop();
        let sp = self.sp();
        self.genop_peep(Insn::ab(OpCode::Return, sp, RETURN_NORMAL), false);
        let idx = self.scope_finish_child()?;
        self.emit(Insn::abx(OpCode::Exec, sp0, idx as u32));
        if val {
            self.push()?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // assignment
    // ---------------------------------------------------------------

    /// Store the value in `value_reg` into `lhs`. May use scratch
    /// registers above the current sp; leaves sp unchanged.
    pub(crate) fn gen_assign_from(&mut self, lhs: &Node, value_reg: u16) -> CodegenResult<()> {
        self.gen_assign_from_val(lhs, value_reg, false)
    }

    /// Store with value tracking: when `val` is set the folds that would
    /// leave `value_reg` unwritten are suppressed, keeping the assigned
    /// value usable as the expression result.
    pub(crate) fn gen_assign_from_val(
        &mut self,
        lhs: &Node,
        value_reg: u16,
        val: bool,
    ) -> CodegenResult<()> {
        match &lhs.kind {
            NodeKind::LVar(name) => {
                if let Some(reg) = self.local_reg(name) {
                    self.genop_peep(Insn::ab(OpCode::Move, reg, value_reg), val);
                    return Ok(());
                }
                if let Some((idx, lv)) = self.upvar_reg(name) {
                    self.genop_peep(Insn::abc(OpCode::Setupvar, value_reg, idx, lv), val);
                    return Ok(());
                }
                Err(CodegenError::Unsupported {
                    message: format!("unresolved local variable {name}"),
                    line: lhs.line,
                })
            }
            NodeKind::IVar(name) => self.gen_var_write(OpCode::Setiv, name, value_reg, val),
            NodeKind::CVar(name) => self.gen_var_write(OpCode::Setcv, name, value_reg, val),
            NodeKind::GVar(name) => self.gen_var_write(OpCode::Setglobal, name, value_reg, val),
            NodeKind::Const(name) => self.gen_var_write(OpCode::Setconst, name, value_reg, val),
            NodeKind::Colon2 { base, name } => {
                // SETMCNST expects value at A, module at A+1
                let slot = self.sp();
                self.emit(Insn::ab(OpCode::Move, slot, value_reg));
                self.push()?;
                self.gen(base, true)?;
                self.pop_n(2);
                let sym = self.intern(name);
                let idx = self.new_sym(sym)?;
                self.emit(Insn::abx(OpCode::Setmcnst, slot, idx));
                Ok(())
            }
            NodeKind::Colon3(name) => {
                let slot = self.sp();
                self.emit(Insn::ab(OpCode::Move, slot, value_reg));
                self.push()?;
                let root = self.sp();
                self.emit(Insn::a(OpCode::Oclass, root));
                self.push()?;
                self.pop_n(2);
                let sym = self.intern(name);
                let idx = self.new_sym(sym)?;
                self.emit(Insn::abx(OpCode::Setmcnst, slot, idx));
                Ok(())
            }
            NodeKind::Call {
                recv: Some(recv),
                name,
                args,
                ..
            } => {
                let sp0 = self.sp();
                self.gen(recv, true)?;
                let n = if name == "[]" {
                    for arg in args {
                        self.gen(arg, true)?;
                    }
                    args.len() as u16
                } else {
                    0
                };
                let arg_slot = self.sp();
                self.emit(Insn::ab(OpCode::Move, arg_slot, value_reg));
                self.push()?;
                self.pop_n(n + 2);
                let setter = if name == "[]" {
                    "[]=".to_string()
                } else {
                    format!("{name}=")
                };
                let sym = self.intern(&setter);
                let idx = self.new_msym(sym)?;
                self.emit(Insn::abc(OpCode::Send, sp0, idx, n + 1));
                Ok(())
            }
            NodeKind::Splat(inner) => self.gen_assign_from_val(inner, value_reg, val),
            _ => Err(CodegenError::Unsupported {
                message: "invalid assignment target".into(),
                line: lhs.line,
            }),
        }
    }

    fn gen_var_write(&mut self, op: OpCode, name: &str, value_reg: u16, val: bool) -> CodegenResult<()> {
        let sym = self.intern(name);
        let idx = self.new_sym(sym)?;
        self.genop_peep(Insn::abx(op, value_reg, idx), val);
        Ok(())
    }

    pub(crate) fn gen_masgn(
        &mut self,
        pre: &[Node],
        splat: &Option<Option<Box<Node>>>,
        post: &[Node],
        rhs: &Node,
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen(rhs, true)?;
        for (i, target) in pre.iter().enumerate() {
            let sp = self.sp();
            self.emit(Insn::abc(OpCode::Aref, sp, sp0, i as u16));
            self.push()?;
            let value_reg = self.sp() - 1;
            self.gen_assign_from(target, value_reg)?;
            self.pop();
        }
        if splat.is_some() || !post.is_empty() {
            let scatter = self.sp();
            self.emit(Insn::ab(OpCode::Move, scatter, sp0));
            self.push()?;
            self.emit(Insn::abc(
                OpCode::Apost,
                scatter,
                pre.len() as u16,
                post.len() as u16,
            ));
            // the splat array lands at `scatter`, post values after it
            for _ in 0..post.len() {
                self.push()?;
            }
            if let Some(Some(target)) = splat {
                self.gen_assign_from(target, scatter)?;
            }
            for (i, target) in post.iter().enumerate() {
                self.gen_assign_from(target, scatter + 1 + i as u16)?;
            }
            self.pop_n(1 + post.len() as u16);
        }
        if !val {
            self.pop();
        }
        Ok(())
    }

    pub(crate) fn gen_op_assign(
        &mut self,
        lhs: &Node,
        op: &str,
        rhs: &Node,
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        match op {
            "||" | "&&" => {
                self.gen_read(lhs)?;
                let jump_op = if op == "||" {
                    OpCode::Jmpif
                } else {
                    OpCode::Jmpnot
                };
                let skip = self.emit_jump(jump_op, sp0);
                self.pop();
                self.gen(rhs, true)?;
                self.gen_assign_from_val(lhs, sp0, val)?;
                self.pop();
                self.patch_jump(skip)?;
                self.mark_label();
                if val {
                    self.push()?;
                }
                Ok(())
            }
            _ => {
                self.gen_read(lhs)?;
                self.gen(rhs, true)?;
                self.pop_n(2);
                let sym = self.intern(op);
                let idx = self.new_msym(sym)?;
                let opcode = match op {
                    "+" => OpCode::Add,
                    "-" => OpCode::Sub,
                    "*" => OpCode::Mul,
                    "/" => OpCode::Div,
                    _ => OpCode::Send,
                };
                if opcode == OpCode::Send {
                    self.emit(Insn::abc(OpCode::Send, sp0, idx, 1));
                } else {
                    self.genop_peep(Insn::abc(opcode, sp0, idx, 1), true);
                }
                self.push()?;
                self.gen_assign_from_val(lhs, sp0, val)?;
                if !val {
                    self.pop();
                }
                Ok(())
            }
        }
    }

    /// Read the current value of an assignment target (for `op=`).
    fn gen_read(&mut self, lhs: &Node) -> CodegenResult<()> {
        match &lhs.kind {
            NodeKind::Call {
                recv: Some(recv),
                name,
                args,
                ..
            } => {
                // the receiver (and index) are re-evaluated on store
                let reread = Node::new(
                    NodeKind::Call {
                        recv: Some(recv.clone()),
                        name: name.clone(),
                        args: args.clone(),
                        block_arg: None,
                        block: None,
                    },
                    lhs.line,
                );
                self.gen(&reread, true)
            }
            _ => self.gen(lhs, true),
        }
    }

    // ---------------------------------------------------------------
    // begin / rescue / ensure
    // ---------------------------------------------------------------

    pub(crate) fn gen_begin_parts(
        &mut self,
        body: &[Node],
        rescues: &[RescueClause],
        else_body: &[Node],
        ensure_body: Option<&[Node]>,
        val: bool,
    ) -> CodegenResult<()> {
        if let Some(ensure_stmts) = ensure_body {
            // the cleanup clause becomes a closure executed by EPOP or
            // by the unwinder
            self.scope_push(Vec::new(), false, true);
            self.gen_stmts(ensure_stmts, false)?;
            let sp = self.sp();
            self.emit(Insn::a(OpCode::Loadnil, sp));
            self.emit(Insn::ab(OpCode::Return, sp, RETURN_NORMAL));
            let idx = self.scope_finish_child()?;
            self.emit(Insn::abx(OpCode::Epush, 0, idx as u32));
            self.scope().ensure_level += 1;
        }

        if rescues.is_empty() {
            self.gen_stmts(body, val)?;
        } else {
            self.gen_rescue_section(body, rescues, else_body, val)?;
        }

        if ensure_body.is_some() {
            self.genop_peep(Insn::a(OpCode::Epop, 1), false);
            self.scope().ensure_level -= 1;
        }
        Ok(())
    }

    fn gen_rescue_section(
        &mut self,
        body: &[Node],
        rescues: &[RescueClause],
        else_body: &[Node],
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        let onerr = self.emit_jump(OpCode::Onerr, 0);
        let ensure_level = self.scope_ref().ensure_level;
        self.scope().loops.push(LoopInfo {
            kind: LoopKind::Begin,
            head: onerr,
            cond_jumps: Vec::new(),
            break_jumps: Vec::new(),
            ensure_level,
        });

        self.gen_stmts(body, val)?;
        if val {
            self.pop();
        }
        self.genop_peep(Insn::a(OpCode::Poperr, 1), false);
        if !else_body.is_empty() {
            self.gen_stmts(else_body, val)?;
            if val {
                self.pop();
            }
        }
        let mut done_jumps = vec![self.emit_jump(OpCode::Jmp, 0)];

        // exception entry
        self.patch_jump(onerr)?;
        self.mark_label();
        let exc_reg = self.sp();
        debug_assert_eq!(exc_reg, sp0);
        self.emit(Insn::a(OpCode::Rescue, exc_reg));
        self.push()?;

        for clause in rescues {
            let clause_sp = self.sp();
            let mut next_jmp = None;
            if !clause.classes.is_empty() {
                let mut body_jumps = Vec::new();
                for class in &clause.classes {
                    self.gen(class, true)?;
                    let class_reg = self.sp() - 1;
                    let scratch = self.sp();
                    self.push()?;
                    self.emit(Insn::ab(OpCode::Move, scratch, exc_reg));
                    let sym = self.intern("===");
                    let idx = self.new_msym(sym)?;
                    self.emit(Insn::abc(OpCode::Send, class_reg, idx, 1));
                    self.pop();
                    self.pop();
                    body_jumps.push(self.emit_jump(OpCode::Jmpif, class_reg));
                }
                next_jmp = Some(self.emit_jump(OpCode::Jmp, 0));
                for j in body_jumps {
                    self.patch_jump(j)?;
                }
                self.mark_label();
            }
            if let Some(var) = &clause.var {
                self.gen_assign_from(var, exc_reg)?;
            }
            self.pop(); // the exception slot rejoins the value position
            self.gen_stmts(&clause.body, val)?;
            if val {
                self.pop();
            }
            done_jumps.push(self.emit_jump(OpCode::Jmp, 0));
            if let Some(j) = next_jmp {
                self.patch_jump(j)?;
                self.mark_label();
            }
            self.set_sp(clause_sp);
        }

        // nothing matched: propagate
        self.emit(Insn::a(OpCode::Raise, exc_reg));
        self.set_sp(sp0);
        for j in done_jumps {
            self.patch_jump(j)?;
        }
        self.mark_label();
        self.scope().loops.pop();
        if val {
            self.push()?;
        }
        Ok(())
    }
}
