//! AST node lowering.
//!
//! Every generator leaves its value at the entry `sp` and pushes when
//! `val` is set; statement positions pass `val = false`.

use berylc_bc::{
    Insn, OpCode, PoolValue, CALL_MAXARGS, LAMBDA_CAPTURE, RETURN_BREAK, RETURN_METHOD,
    RETURN_NORMAL,
};
use berylc_par::{Node, NodeKind, StrSeg};

use crate::{CodegenError, CodegenResult, Generator, LoopInfo, LoopKind};

impl<'a> Generator<'a> {
    pub(crate) fn gen(&mut self, node: &Node, val: bool) -> CodegenResult<()> {
        self.set_line(node.line);
        match &node.kind {
            NodeKind::Int { value, .. } => self.gen_int(*value, val),
            NodeKind::Float(v) => {
                if val {
                    let idx = self.new_lit(PoolValue::Float(*v))?;
                    let sp = self.sp();
                    self.emit(Insn::abx(OpCode::Loadl, sp, idx));
                    self.push()?;
                }
                Ok(())
            }
            NodeKind::Str(segs) => self.gen_str(segs, val),
            NodeKind::XStr(segs) => self.gen_xstr(segs, val),
            NodeKind::Regexp { parts, flags } => self.gen_regexp(parts, flags, val),
            NodeKind::Sym(name) => {
                if val {
                    let sym = self.intern(name);
                    let idx = self.new_sym(sym)?;
                    let sp = self.sp();
                    self.emit(Insn::abx(OpCode::Loadsym, sp, idx));
                    self.push()?;
                }
                Ok(())
            }
            NodeKind::DSym(segs) => self.gen_dsym(segs, val),
            NodeKind::Words(words) => self.gen_words(words, val),
            NodeKind::Symbols(words) => self.gen_symbols(words, val),
            NodeKind::Nil => self.gen_simple_load(OpCode::Loadnil, val),
            NodeKind::True => self.gen_simple_load(OpCode::Loadt, val),
            NodeKind::False => self.gen_simple_load(OpCode::Loadf, val),
            NodeKind::SelfRef => self.gen_simple_load(OpCode::Loadself, val),
            NodeKind::LVar(name) => self.gen_lvar(name, node.line, val),
            NodeKind::IVar(name) => self.gen_var_read(OpCode::Getiv, name, val),
            NodeKind::CVar(name) => self.gen_var_read(OpCode::Getcv, name, val),
            NodeKind::GVar(name) => self.gen_var_read(OpCode::Getglobal, name, val),
            NodeKind::Const(name) => self.gen_var_read(OpCode::Getconst, name, val),
            NodeKind::Colon2 { base, name } => self.gen_colon2(base, name, val),
            NodeKind::Colon3(name) => self.gen_colon3(name, val),
            NodeKind::BackRef(_) => {
                if val {
                    let sp = self.sp();
                    self.emit(Insn::abx(OpCode::Getspecial, sp, 0));
                    self.push()?;
                }
                Ok(())
            }
            NodeKind::NthRef(n) => {
                if val {
                    let sp = self.sp();
                    self.emit(Insn::abx(OpCode::Getspecial, sp, *n as u32));
                    self.push()?;
                }
                Ok(())
            }
            NodeKind::Array(items) => self.gen_array(items, val),
            NodeKind::Hash(pairs) => self.gen_hash(pairs, val),
            NodeKind::Splat(inner) => self.gen_splat(inner, val),
            NodeKind::If {
                cond,
                then_body,
                else_body,
            } => self.gen_if(cond, then_body, else_body, val),
            NodeKind::Case {
                subject,
                whens,
                else_body,
            } => self.gen_case(subject.as_deref(), whens, else_body, val),
            NodeKind::While { cond, body, until } => self.gen_while(cond, body, *until, val),
            NodeKind::For { vars, iter, body } => self.gen_for(vars, iter, body, val),
            NodeKind::Break(value) => self.gen_break(value.as_deref(), node.line, val),
            NodeKind::Next(value) => self.gen_next(value.as_deref(), node.line, val),
            NodeKind::Redo => self.gen_redo(node.line, val),
            NodeKind::Retry => self.gen_retry(node.line, val),
            NodeKind::Return(value) => self.gen_return(value.as_deref(), val),
            NodeKind::And(lhs, rhs) => self.gen_andor(lhs, rhs, true, val),
            NodeKind::Or(lhs, rhs) => self.gen_andor(lhs, rhs, false, val),
            NodeKind::Not(operand) => {
                // `!x` dispatches so classes may override it
                self.gen_call_node(Some(operand), "!", &[], None, None, val)
            }
            NodeKind::Def {
                name,
                params,
                body,
                rescues,
                ensure_body,
                locals,
            } => self.gen_def(name, params, body, rescues, ensure_body.as_deref(), locals, val),
            NodeKind::SDef {
                recv,
                name,
                params,
                body,
                locals,
            } => self.gen_sdef(recv, name, params, body, locals, val),
            NodeKind::ClassDef {
                base,
                name,
                absolute,
                superclass,
                body,
                locals,
            } => self.gen_class(
                base.as_deref(),
                name,
                *absolute,
                superclass.as_deref(),
                body,
                locals,
                val,
            ),
            NodeKind::ModuleDef {
                base,
                name,
                absolute,
                body,
                locals,
            } => self.gen_module(base.as_deref(), name, *absolute, body, locals, val),
            NodeKind::SClassDef { expr, body, locals } => self.gen_sclass(expr, body, locals, val),
            NodeKind::Alias { new_name, old_name } => {
                self.gen_mod_funcall("alias_method", &[new_name.as_str(), old_name.as_str()], val)
            }
            NodeKind::Undef(names) => {
                let names: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
                self.gen_mod_funcall("undef_method", &names, val)
            }
            NodeKind::Call {
                recv,
                name,
                args,
                block_arg,
                block,
            } => self.gen_call_node(
                recv.as_deref(),
                name,
                args,
                block_arg.as_deref(),
                block.as_deref(),
                val,
            ),
            NodeKind::Super {
                args,
                block_arg,
                block,
            } => self.gen_super(
                args.as_deref(),
                block_arg.as_deref(),
                block.as_deref(),
                node.line,
                val,
            ),
            NodeKind::Yield(args) => self.gen_yield(args, node.line, val),
            NodeKind::Lambda(block) => self.gen_lambda(block, val),
            NodeKind::Assign { lhs, rhs } => {
                self.gen(rhs, true)?;
                let value_reg = self.sp() - 1;
                self.gen_assign_from_val(lhs, value_reg, val)?;
                if !val {
                    self.pop();
                }
                Ok(())
            }
            NodeKind::MAssign {
                pre,
                splat,
                post,
                rhs,
            } => self.gen_masgn(pre, splat, post, rhs, val),
            NodeKind::OpAssign { lhs, op, rhs } => self.gen_op_assign(lhs, op, rhs, val),
            NodeKind::Begin {
                body,
                rescues,
                else_body,
                ensure_body,
            } => self.gen_begin_parts(body, rescues, else_body, ensure_body.as_deref(), val),
            NodeKind::Dot2(beg, end) => self.gen_range(beg, end, false, val),
            NodeKind::Dot3(beg, end) => self.gen_range(beg, end, true, val),
            NodeKind::PostExe(body) => {
                // runs in place; main has no later phase to defer to
                self.gen_stmts_noval(body)?;
                if val {
                    self.gen_simple_load(OpCode::Loadnil, true)?;
                }
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------
    // statement lists
    // ---------------------------------------------------------------

    /// Generate a body; with `val`, the last statement's value lands at
    /// the entry sp (pushed). An empty body yields nil.
    pub(crate) fn gen_stmts(&mut self, body: &[Node], val: bool) -> CodegenResult<()> {
        match body.split_last() {
            Some((last, init)) => {
                for node in init {
                    self.gen(node, false)?;
                }
                self.gen(last, val)
            }
            None => {
                if val {
                    self.gen_simple_load(OpCode::Loadnil, true)?;
                }
                Ok(())
            }
        }
    }

    fn gen_stmts_noval(&mut self, body: &[Node]) -> CodegenResult<()> {
        self.gen_stmts(body, false)
    }

    // ---------------------------------------------------------------
    // literals
    // ---------------------------------------------------------------

    fn gen_int(&mut self, value: i64, val: bool) -> CodegenResult<()> {
        if !val {
            return Ok(());
        }
        let sp = self.sp();
        if (-32767..=32767).contains(&value) {
            self.emit(Insn::asbx(OpCode::Loadi, sp, value as i32));
        } else {
            let idx = self.new_lit(PoolValue::Int(value))?;
            self.emit(Insn::abx(OpCode::Loadl, sp, idx));
        }
        self.push()
    }

    fn gen_simple_load(&mut self, op: OpCode, val: bool) -> CodegenResult<()> {
        if val {
            let sp = self.sp();
            self.emit(Insn::a(op, sp));
            self.push()?;
        }
        Ok(())
    }

    /// Build a string value at sp from literal/interpolated segments.
    fn gen_str_value(&mut self, segs: &[StrSeg]) -> CodegenResult<()> {
        let sp0 = self.sp();
        let mut first = true;
        if segs.is_empty() {
            let idx = self.new_lit(PoolValue::Str(String::new()))?;
            self.emit(Insn::abx(OpCode::String, sp0, idx));
            self.push()?;
            return Ok(());
        }
        for seg in segs {
            if first {
                // anchor the accumulator with a literal head
                match seg {
                    StrSeg::Lit(text) => {
                        let idx = self.new_lit(PoolValue::Str(text.clone()))?;
                        self.emit(Insn::abx(OpCode::String, sp0, idx));
                        self.push()?;
                        first = false;
                        continue;
                    }
                    StrSeg::Node(_) => {
                        let idx = self.new_lit(PoolValue::Str(String::new()))?;
                        self.emit(Insn::abx(OpCode::String, sp0, idx));
                        self.push()?;
                        first = false;
                    }
                }
            }
            match seg {
                StrSeg::Lit(text) => {
                    let idx = self.new_lit(PoolValue::Str(text.clone()))?;
                    let sp = self.sp();
                    self.emit(Insn::abx(OpCode::String, sp, idx));
                    self.push()?;
                    self.pop();
                    self.genop_peep(Insn::ab(OpCode::Strcat, sp0, sp), false);
                }
                StrSeg::Node(node) => {
                    self.gen(node, true)?;
                    self.pop();
                    let sp = self.sp();
                    self.genop_peep(Insn::ab(OpCode::Strcat, sp0, sp), false);
                }
            }
        }
        Ok(())
    }

    fn gen_str(&mut self, segs: &[StrSeg], val: bool) -> CodegenResult<()> {
        if !val {
            // still evaluate interpolations for their effects
            for seg in segs {
                if let StrSeg::Node(node) = seg {
                    self.gen(node, false)?;
                }
            }
            return Ok(());
        }
        self.gen_str_value(segs)
    }

    fn gen_xstr(&mut self, segs: &[StrSeg], val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.emit(Insn::a(OpCode::Loadself, sp0));
        self.push()?;
        self.gen_str_value(segs)?;
        self.pop_n(2);
        let sym = self.intern("`");
        let idx = self.new_msym(sym)?;
        self.emit(Insn::abc(OpCode::Send, sp0, idx, 1));
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_regexp(&mut self, parts: &[StrSeg], flags: &str, val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        let sym = self.intern("Regexp");
        let cls_idx = self.new_sym(sym)?;
        self.emit(Insn::abx(OpCode::Getconst, sp0, cls_idx));
        self.push()?;
        self.gen_str_value(parts)?;
        let flag_idx = self.new_lit(PoolValue::Str(flags.to_string()))?;
        let sp = self.sp();
        self.emit(Insn::abx(OpCode::String, sp, flag_idx));
        self.push()?;
        self.pop_n(3);
        let compile = self.intern("compile");
        let idx = self.new_msym(compile)?;
        self.emit(Insn::abc(OpCode::Send, sp0, idx, 2));
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_dsym(&mut self, segs: &[StrSeg], val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen_str_value(segs)?;
        self.pop();
        let sym = self.intern("intern");
        let idx = self.new_msym(sym)?;
        self.emit(Insn::abc(OpCode::Send, sp0, idx, 0));
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_words(&mut self, words: &[String], val: bool) -> CodegenResult<()> {
        if !val {
            return Ok(());
        }
        let sp0 = self.sp();
        for word in words {
            let idx = self.new_lit(PoolValue::Str(word.clone()))?;
            let sp = self.sp();
            self.emit(Insn::abx(OpCode::String, sp, idx));
            self.push()?;
        }
        self.pop_n(words.len() as u16);
        self.emit(Insn::abc(OpCode::Array, sp0, sp0, words.len() as u16));
        self.push()
    }

    fn gen_symbols(&mut self, words: &[String], val: bool) -> CodegenResult<()> {
        if !val {
            return Ok(());
        }
        let sp0 = self.sp();
        for word in words {
            let sym = self.intern(word);
            let idx = self.new_sym(sym)?;
            let sp = self.sp();
            self.emit(Insn::abx(OpCode::Loadsym, sp, idx));
            self.push()?;
        }
        self.pop_n(words.len() as u16);
        self.emit(Insn::abc(OpCode::Array, sp0, sp0, words.len() as u16));
        self.push()
    }

    // ---------------------------------------------------------------
    // variables
    // ---------------------------------------------------------------

    fn gen_lvar(&mut self, name: &str, line: u32, val: bool) -> CodegenResult<()> {
        if !val {
            return Ok(());
        }
        if let Some(reg) = self.local_reg(name) {
            let sp = self.sp();
            self.genop_peep(Insn::ab(OpCode::Move, sp, reg), true);
            return self.push();
        }
        if let Some((idx, lv)) = self.upvar_reg(name) {
            let sp = self.sp();
            self.emit(Insn::abc(OpCode::Getupvar, sp, idx, lv));
            return self.push();
        }
        Err(CodegenError::Unsupported {
            message: format!("unresolved local variable {name}"),
            line,
        })
    }

    fn gen_var_read(&mut self, op: OpCode, name: &str, val: bool) -> CodegenResult<()> {
        if !val {
            return Ok(());
        }
        let sym = self.intern(name);
        let idx = self.new_sym(sym)?;
        let sp = self.sp();
        self.emit(Insn::abx(op, sp, idx));
        self.push()
    }

    fn gen_colon2(&mut self, base: &Node, name: &str, val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen(base, true)?;
        let sym = self.intern(name);
        let idx = self.new_sym(sym)?;
        self.pop();
        self.emit(Insn::abx(OpCode::Getmcnst, sp0, idx));
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_colon3(&mut self, name: &str, val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.emit(Insn::a(OpCode::Oclass, sp0));
        self.push()?;
        let sym = self.intern(name);
        let idx = self.new_sym(sym)?;
        self.pop();
        self.emit(Insn::abx(OpCode::Getmcnst, sp0, idx));
        if val {
            self.push()?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // collections
    // ---------------------------------------------------------------

    fn gen_array(&mut self, items: &[Node], val: bool) -> CodegenResult<()> {
        if !val {
            for item in items {
                self.gen(item, false)?;
            }
            return Ok(());
        }
        let sp0 = self.sp();
        match self.gen_values(items)? {
            Some(n) => {
                self.pop_n(n);
                self.emit(Insn::abc(OpCode::Array, sp0, sp0, n));
                self.push()
            }
            // already bundled into one array at sp0
            None => Ok(()),
        }
    }

    /// Generate call/array elements. `Some(n)` means `n` contiguous
    /// values were pushed; `None` means a splat (or sheer count) forced
    /// bundling into a single array, pushed once.
    pub(crate) fn gen_values(&mut self, items: &[Node]) -> CodegenResult<Option<u16>> {
        let has_splat = items.iter().any(|i| matches!(i.kind, NodeKind::Splat(_)));
        if !has_splat && items.len() < CALL_MAXARGS as usize - 1 {
            for item in items {
                self.gen(item, true)?;
            }
            return Ok(Some(items.len() as u16));
        }

        // bundled: build one array, concatenating splats
        let sp0 = self.sp();
        let prefix: Vec<&Node> = items
            .iter()
            .take_while(|i| !matches!(i.kind, NodeKind::Splat(_)))
            .collect();
        for item in &prefix {
            self.gen(item, true)?;
        }
        self.pop_n(prefix.len() as u16);
        self.emit(Insn::abc(OpCode::Array, sp0, sp0, prefix.len() as u16));
        self.push()?;
        for item in items.iter().skip(prefix.len()) {
            match &item.kind {
                NodeKind::Splat(inner) => {
                    self.gen(inner, true)?;
                    self.pop();
                    let sp = self.sp();
                    self.emit(Insn::ab(OpCode::Arycat, sp0, sp));
                }
                _ => {
                    self.gen(item, true)?;
                    self.pop();
                    let sp = self.sp();
                    self.emit(Insn::ab(OpCode::Arypush, sp0, sp));
                }
            }
        }
        Ok(None)
    }

    fn gen_hash(&mut self, pairs: &[(Node, Node)], val: bool) -> CodegenResult<()> {
        if !val {
            for (k, v) in pairs {
                self.gen(k, false)?;
                self.gen(v, false)?;
            }
            return Ok(());
        }
        if pairs.len() > 126 {
            return Err(CodegenError::Unsupported {
                message: "hash literal too large".into(),
                line: self.scope_ref().line,
            });
        }
        let sp0 = self.sp();
        for (k, v) in pairs {
            self.gen(k, true)?;
            self.gen(v, true)?;
        }
        self.pop_n(pairs.len() as u16 * 2);
        self.emit(Insn::abc(OpCode::Hash, sp0, sp0, pairs.len() as u16));
        self.push()
    }

    fn gen_splat(&mut self, inner: &Node, val: bool) -> CodegenResult<()> {
        if !val {
            return self.gen(inner, false);
        }
        let sp0 = self.sp();
        self.emit(Insn::abc(OpCode::Array, sp0, sp0, 0));
        self.push()?;
        self.gen(inner, true)?;
        self.pop();
        let sp = self.sp();
        self.emit(Insn::ab(OpCode::Arycat, sp0, sp));
        Ok(())
    }

    fn gen_range(&mut self, beg: &Node, end: &Node, exclusive: bool, val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen(beg, true)?;
        self.gen(end, true)?;
        self.pop_n(2);
        self.emit(Insn::abc(OpCode::Range, sp0, sp0, exclusive as u16));
        if val {
            self.push()?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // control flow
    // ---------------------------------------------------------------

    fn gen_if(
        &mut self,
        cond: &Node,
        then_body: &[Node],
        else_body: &[Node],
        val: bool,
    ) -> CodegenResult<()> {
        self.gen(cond, true)?;
        self.pop();
        let sp = self.sp();
        let else_jmp = self.emit_jump(OpCode::Jmpnot, sp);
        self.gen_stmts(then_body, val)?;
        if val {
            self.pop();
        }
        if val || !else_body.is_empty() {
            let end_jmp = self.emit_jump(OpCode::Jmp, 0);
            self.patch_jump(else_jmp)?;
            self.mark_label();
            self.gen_stmts(else_body, val)?;
            if val {
                self.pop();
            }
            self.patch_jump(end_jmp)?;
        } else {
            self.patch_jump(else_jmp)?;
        }
        self.mark_label();
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_andor(&mut self, lhs: &Node, rhs: &Node, is_and: bool, val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen(lhs, true)?;
        self.pop();
        let op = if is_and { OpCode::Jmpnot } else { OpCode::Jmpif };
        let skip = self.emit_jump(op, sp0);
        self.gen(rhs, val)?;
        if val {
            self.pop();
        }
        self.patch_jump(skip)?;
        self.mark_label();
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_case(
        &mut self,
        subject: Option<&Node>,
        whens: &[(Vec<Node>, Vec<Node>)],
        else_body: &[Node],
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        if let Some(subject) = subject {
            self.gen(subject, true)?;
        }
        let mut end_jumps = Vec::new();
        for (tests, body) in whens {
            let clause_sp = self.sp();
            let mut body_jumps = Vec::new();
            for test in tests {
                if matches!(test.kind, NodeKind::Splat(_)) {
                    return Err(CodegenError::Unsupported {
                        message: "splat in when clause".into(),
                        line: test.line,
                    });
                }
                self.gen(test, true)?;
                let test_reg = self.sp() - 1;
                if subject.is_some() {
                    // test === subject
                    let scratch = self.sp();
                    self.push()?;
                    self.emit(Insn::ab(OpCode::Move, scratch, sp0));
                    let sym = self.intern("===");
                    let idx = self.new_msym(sym)?;
                    self.emit(Insn::abc(OpCode::Send, test_reg, idx, 1));
                    self.pop();
                }
                self.pop();
                body_jumps.push(self.emit_jump(OpCode::Jmpif, test_reg));
            }
            let next_jmp = self.emit_jump(OpCode::Jmp, 0);
            for j in body_jumps {
                self.patch_jump(j)?;
            }
            self.mark_label();
            if subject.is_some() {
                self.pop();
            }
            self.gen_stmts(body, val)?;
            if val {
                self.pop();
            }
            end_jumps.push(self.emit_jump(OpCode::Jmp, 0));
            self.patch_jump(next_jmp)?;
            self.mark_label();
            self.set_sp(clause_sp);
        }
        if subject.is_some() {
            self.pop();
        }
        self.gen_stmts(else_body, val)?;
        if val {
            self.pop();
        }
        for j in end_jumps {
            self.patch_jump(j)?;
        }
        self.mark_label();
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_while(&mut self, cond: &Node, body: &[Node], until: bool, val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        let ensure_level = self.scope_ref().ensure_level;
        let init_jmp = self.emit_jump(OpCode::Jmp, 0);
        let head = self.pc();
        self.mark_label();
        self.scope().loops.push(LoopInfo {
            kind: LoopKind::Normal,
            head,
            cond_jumps: vec![init_jmp],
            break_jumps: Vec::new(),
            ensure_level,
        });

        self.gen_stmts(body, false)?;

        let loop_info = self.scope().loops.last_mut().expect("loop just pushed");
        let cond_jumps = std::mem::take(&mut loop_info.cond_jumps);
        for j in cond_jumps {
            self.patch_jump(j)?;
        }
        self.mark_label();
        self.gen(cond, true)?;
        self.pop();
        let sp = self.sp();
        let back_op = if until { OpCode::Jmpnot } else { OpCode::Jmpif };
        self.emit_jump_back(back_op, sp, head)?;

        if val {
            self.emit(Insn::a(OpCode::Loadnil, sp0));
        }
        let loop_info = self.scope().loops.pop().expect("loop just pushed");
        for j in loop_info.break_jumps {
            self.patch_jump(j)?;
        }
        self.mark_label();
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_for(&mut self, vars: &[Node], iter: &Node, body: &[Node], val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.gen(iter, true)?;

        // the loop body runs as a block passed to #each; loop variables
        // live in the enclosing scope, reached as upvars
        self.scope_push(Vec::new(), false, true);
        self.scope().ainfo = (1, false, 0);
        self.emit(Insn::ax(
            OpCode::Enter,
            berylc_bc::ArgSpec::req(1).pack(),
        ));
        let head = self.pc();
        let ensure_level = self.scope_ref().ensure_level;
        self.scope().loops.push(LoopInfo {
            kind: LoopKind::For,
            head,
            cond_jumps: Vec::new(),
            break_jumps: Vec::new(),
            ensure_level,
        });
        if vars.len() == 1 {
            self.gen_assign_from(&vars[0], 1)?;
        } else {
            // keep the argument array in R(1) alive below the scratch
            self.push()?;
            for (i, var) in vars.iter().enumerate() {
                let sp = self.sp();
                self.emit(Insn::abc(OpCode::Aref, sp, 1, i as u16));
                self.push()?;
                let value_reg = self.sp() - 1;
                self.gen_assign_from(var, value_reg)?;
                self.pop();
            }
            self.pop();
        }
        self.gen_stmts(body, true)?;
        self.pop();
        let sp = self.sp();
        self.genop_peep(Insn::ab(OpCode::Return, sp, RETURN_NORMAL), false);
        self.scope().loops.pop();
        let idx = self.scope_finish_child()?;

        let block_reg = self.sp();
        self.emit(Insn::abz(OpCode::Lambda, block_reg, idx as u16, LAMBDA_CAPTURE));
        self.push()?;
        self.pop_n(2);
        let each = self.intern("each");
        let each_idx = self.new_msym(each)?;
        self.emit(Insn::abc(OpCode::Sendb, sp0, each_idx, 0));
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_break(&mut self, value: Option<&Node>, line: u32, val: bool) -> CodegenResult<()> {
        match value {
            Some(v) => self.gen(v, true)?,
            None => self.gen_simple_load(OpCode::Loadnil, true)?,
        }
        self.pop();
        let value_reg = self.sp();

        let Some((kind, target_ensure)) = self.innermost_jump_target() else {
            // break outside any loop fails at run time
            return self.gen_err_op(1, "break from proc-closure", line);
        };
        let delta = self.scope_ref().ensure_level - target_ensure;
        if delta > 0 {
            self.genop_peep(Insn::a(OpCode::Epop, delta as u16), false);
        }
        match kind {
            LoopKind::Normal => {
                let jmp = self.emit_jump(OpCode::Jmp, 0);
                for info in self.scope().loops.iter_mut().rev() {
                    if info.kind == LoopKind::Normal {
                        info.break_jumps.push(jmp);
                        break;
                    }
                }
            }
            LoopKind::Block | LoopKind::For => {
                self.genop_peep(Insn::ab(OpCode::Return, value_reg, RETURN_BREAK), false);
            }
            LoopKind::Begin => unreachable!("begin contexts are skipped"),
        }
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_next(&mut self, value: Option<&Node>, line: u32, val: bool) -> CodegenResult<()> {
        let Some((kind, target_ensure)) = self.innermost_jump_target() else {
            return self.gen_err_op(1, "unexpected next", line);
        };
        let delta = self.scope_ref().ensure_level - target_ensure;
        match kind {
            LoopKind::Normal => {
                if let Some(v) = value {
                    self.gen(v, false)?;
                }
                if delta > 0 {
                    self.genop_peep(Insn::a(OpCode::Epop, delta as u16), false);
                }
                let jmp = self.emit_jump(OpCode::Jmp, 0);
                for info in self.scope().loops.iter_mut().rev() {
                    if info.kind == LoopKind::Normal {
                        info.cond_jumps.push(jmp);
                        break;
                    }
                }
            }
            LoopKind::Block | LoopKind::For => {
                match value {
                    Some(v) => self.gen(v, true)?,
                    None => self.gen_simple_load(OpCode::Loadnil, true)?,
                }
                self.pop();
                let value_reg = self.sp();
                if delta > 0 {
                    self.genop_peep(Insn::a(OpCode::Epop, delta as u16), false);
                }
                self.genop_peep(Insn::ab(OpCode::Return, value_reg, RETURN_NORMAL), false);
            }
            LoopKind::Begin => unreachable!("begin contexts are skipped"),
        }
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_redo(&mut self, line: u32, val: bool) -> CodegenResult<()> {
        let Some((head, target_ensure)) = self
            .scope_ref()
            .loops
            .iter()
            .rev()
            .find(|l| l.kind != LoopKind::Begin)
            .map(|l| (l.head, l.ensure_level))
        else {
            return self.gen_err_op(1, "unexpected redo", line);
        };
        let delta = self.scope_ref().ensure_level - target_ensure;
        if delta > 0 {
            self.genop_peep(Insn::a(OpCode::Epop, delta as u16), false);
        }
        self.emit_jump_back(OpCode::Jmp, 0, head)?;
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_retry(&mut self, line: u32, val: bool) -> CodegenResult<()> {
        let Some((head, target_ensure)) = self
            .scope_ref()
            .loops
            .iter()
            .rev()
            .find(|l| l.kind == LoopKind::Begin)
            .map(|l| (l.head, l.ensure_level))
        else {
            return self.gen_err_op(1, "retry outside of rescue clause", line);
        };
        let delta = self.scope_ref().ensure_level - target_ensure;
        if delta > 0 {
            self.genop_peep(Insn::a(OpCode::Epop, delta as u16), false);
        }
        // drop the rescue entry the handler consumed before re-arming
        self.emit_jump_back(OpCode::Jmp, 0, head)?;
        if val {
            self.push()?;
        }
        Ok(())
    }

    /// The loop `break`/`next` target, skipping begin/rescue contexts.
    fn innermost_jump_target(&self) -> Option<(LoopKind, u32)> {
        self.scope_ref()
            .loops
            .iter()
            .rev()
            .find(|l| l.kind != LoopKind::Begin)
            .map(|l| (l.kind, l.ensure_level))
    }

    /// Runtime error via the ERR opcode; `kind` 1 raises LocalJumpError.
    fn gen_err_op(&mut self, kind: u16, message: &str, _line: u32) -> CodegenResult<()> {
        let idx = self.new_lit(PoolValue::Str(message.to_string()))?;
        self.emit(Insn::abx(OpCode::Err, kind, idx));
        Ok(())
    }

    fn gen_return(&mut self, value: Option<&Node>, val: bool) -> CodegenResult<()> {
        match value {
            Some(v) => self.gen(v, true)?,
            None => self.gen_simple_load(OpCode::Loadnil, true)?,
        }
        self.pop();
        let reg = self.sp();
        let kind = if self.scope_ref().mscope {
            RETURN_NORMAL
        } else {
            RETURN_METHOD
        };
        self.genop_peep(Insn::ab(OpCode::Return, reg, kind), false);
        if val {
            self.push()?;
        }
        Ok(())
    }

    pub(crate) fn set_sp(&mut self, sp: u16) {
        let scope = self.scope();
        scope.sp = sp;
        scope.nregs = scope.nregs.max(sp);
    }
}
