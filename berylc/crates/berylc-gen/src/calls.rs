//! Call lowering: method sends, blocks, lambdas, yield and super.

use berylc_bc::{
    ArgSpec, Insn, OpCode, CALL_MAXARGS, LAMBDA_CAPTURE, LAMBDA_STRICT, RETURN_NORMAL,
};
use berylc_par::{BlockNode, Node, Params};

use crate::{CodegenError, CodegenResult, Generator, LoopInfo, LoopKind};

/// Operator sends with dedicated opcodes; everything else goes through
/// SEND so redefinitions stay visible.
fn operator_opcode(name: &str) -> Option<OpCode> {
    Some(match name {
        "+" => OpCode::Add,
        "-" => OpCode::Sub,
        "*" => OpCode::Mul,
        "/" => OpCode::Div,
        "==" => OpCode::Eq,
        "<" => OpCode::Lt,
        "<=" => OpCode::Le,
        ">" => OpCode::Gt,
        ">=" => OpCode::Ge,
        _ => return None,
    })
}

impl<'a> Generator<'a> {
    /// `recv.name(args, &blk) { block }` and self-calls.
    pub(crate) fn gen_call_node(
        &mut self,
        recv: Option<&Node>,
        name: &str,
        args: &[Node],
        block_arg: Option<&Node>,
        block: Option<&BlockNode>,
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        match recv {
            Some(r) => self.gen(r, true)?,
            None => {
                let sp = self.sp();
                self.emit(Insn::a(OpCode::Loadself, sp));
                self.push()?;
            }
        }

        let argc = match self.gen_values(args)? {
            Some(n) => n,
            None => CALL_MAXARGS,
        };
        let pushed_args = if argc == CALL_MAXARGS { 1 } else { argc };

        let has_block = block.is_some() || block_arg.is_some();
        if let Some(block) = block {
            self.gen_block_literal(block, LAMBDA_CAPTURE)?;
        } else if let Some(block_arg) = block_arg {
            self.gen(block_arg, true)?;
        }

        self.pop_n(1 + pushed_args + has_block as u16);

        let sym = self.intern(name);
        let sym_idx = self.new_msym(sym)?;
        if has_block {
            self.emit(Insn::abc(OpCode::Sendb, sp0, sym_idx, argc));
        } else if argc == 1 {
            if let Some(op) = operator_opcode(name) {
                self.genop_peep(Insn::abc(op, sp0, sym_idx, 1), val);
            } else {
                self.genop_peep(Insn::abc(OpCode::Send, sp0, sym_idx, argc), val);
            }
        } else {
            self.genop_peep(Insn::abc(OpCode::Send, sp0, sym_idx, argc), val);
        }
        if val {
            self.push()?;
        }
        Ok(())
    }

    /// A block or lambda literal: compile the body into a child IREP and
    /// emit LAMBDA into the current sp (pushed).
    pub(crate) fn gen_block_literal(&mut self, block: &BlockNode, flags: u16) -> CodegenResult<()> {
        self.scope_push(block.locals.clone(), false, true);
        self.set_line(block.line);
        self.scope().ainfo = (
            (block.params.required.len() + block.params.optional.len()) as u16,
            block.params.rest.is_some(),
            block.params.post.len() as u16,
        );
        let head = if block.params.is_empty() {
            self.pc()
        } else {
            self.gen_enter(&block.params)?;
            self.pc()
        };
        let ensure_level = self.scope_ref().ensure_level;
        self.scope().loops.push(LoopInfo {
            kind: LoopKind::Block,
            head,
            cond_jumps: Vec::new(),
            break_jumps: Vec::new(),
            ensure_level,
        });
        self.gen_stmts(&block.body, true)?;
        self.pop();
        let sp = self.sp();
        self.genop_peep(Insn::ab(OpCode::Return, sp, RETURN_NORMAL), false);
        self.scope().loops.pop();
        let idx = self.scope_finish_child()?;

        let sp = self.sp();
        self.emit(Insn::abz(OpCode::Lambda, sp, idx as u16, flags));
        self.push()
    }

    pub(crate) fn gen_lambda(&mut self, block: &BlockNode, val: bool) -> CodegenResult<()> {
        self.gen_block_literal(block, LAMBDA_CAPTURE | LAMBDA_STRICT)?;
        if !val {
            self.pop();
        }
        Ok(())
    }

    /// Emit the ENTER prologue plus the optional-default jump table.
    ///
    /// With `k` optional parameters, exactly `k + 1` JMP slots follow the
    /// ENTER: the callee resumes at the JMP matching the number of
    /// supplied optionals, each default block falls through to the next.
    pub(crate) fn gen_enter(&mut self, params: &Params) -> CodegenResult<()> {
        let aspec = Self::params_aspec(params);
        self.emit(Insn::ax(OpCode::Enter, aspec.pack()));
        let o = params.optional.len();
        if o == 0 {
            return Ok(());
        }
        let mut jumps = Vec::with_capacity(o + 1);
        for _ in 0..=o {
            jumps.push(self.emit_jump(OpCode::Jmp, 0));
        }
        for (i, (name, default)) in params.optional.iter().enumerate() {
            self.patch_jump(jumps[i])?;
            self.mark_label();
            self.gen(default, true)?;
            self.pop();
            let value = self.sp();
            let reg = self.local_reg(name).ok_or_else(|| CodegenError::Unsupported {
                message: format!("optional parameter {name} missing from scope"),
                line: default.line,
            })?;
            self.genop_peep(Insn::ab(OpCode::Move, reg, value), false);
        }
        self.patch_jump(jumps[o])?;
        self.mark_label();
        Ok(())
    }

    pub(crate) fn gen_yield(&mut self, args: &[Node], line: u32, val: bool) -> CodegenResult<()> {
        let Some((lv, (m1o, rest, m2))) = self.method_scope_lv() else {
            return Err(CodegenError::Unsupported {
                message: "yield outside of method".into(),
                line,
            });
        };
        let bx = ((m1o as u32 & 0x3f) << 10)
            | ((rest as u32) << 9)
            | ((m2 as u32 & 0x1f) << 4)
            | (lv as u32 & 0xf);
        let sp0 = self.sp();
        self.emit(Insn::abx(OpCode::Blkpush, sp0, bx));
        self.push()?;
        let argc = match self.gen_values(args)? {
            Some(n) => n,
            None => CALL_MAXARGS,
        };
        let pushed_args = if argc == CALL_MAXARGS { 1 } else { argc };
        self.pop_n(1 + pushed_args);
        let call = self.intern("call");
        let idx = self.new_msym(call)?;
        self.emit(Insn::abc(OpCode::Send, sp0, idx, argc));
        if val {
            self.push()?;
        }
        Ok(())
    }

    pub(crate) fn gen_super(
        &mut self,
        args: Option<&[Node]>,
        block_arg: Option<&Node>,
        block: Option<&BlockNode>,
        line: u32,
        val: bool,
    ) -> CodegenResult<()> {
        let sp0 = self.sp();
        match args {
            Some(args) => {
                // the receiver slot is written by the VM
                self.push()?;
                let argc = match self.gen_values(args)? {
                    Some(n) => n,
                    None => CALL_MAXARGS,
                };
                let pushed_args = if argc == CALL_MAXARGS { 1 } else { argc };
                self.gen_super_block(block, block_arg)?;
                self.pop_n(2 + pushed_args);
                self.emit(Insn::abc(OpCode::Super, sp0, 0, argc));
            }
            None => {
                // zsuper forwards the current argument vector
                let Some((lv, (m1o, rest, m2))) = self.method_scope_lv() else {
                    return Err(CodegenError::Unsupported {
                        message: "super outside of method".into(),
                        line,
                    });
                };
                let bx = ((m1o as u32 & 0x3f) << 10)
                    | ((rest as u32) << 9)
                    | ((m2 as u32 & 0x1f) << 4)
                    | (lv as u32 & 0xf);
                self.push()?; // receiver slot
                let args_reg = self.sp();
                self.emit(Insn::abx(OpCode::Argary, args_reg, bx));
                self.push()?; // argument array
                self.push()?; // forwarded block
                if block.is_some() || block_arg.is_some() {
                    // an explicit block overrides the forwarded one
                    self.pop();
                    self.gen_super_block(block, block_arg)?;
                }
                self.pop_n(3);
                self.emit(Insn::abc(OpCode::Super, sp0, 0, CALL_MAXARGS));
            }
        }
        if val {
            self.push()?;
        }
        Ok(())
    }

    fn gen_super_block(
        &mut self,
        block: Option<&BlockNode>,
        block_arg: Option<&Node>,
    ) -> CodegenResult<()> {
        if let Some(block) = block {
            self.gen_block_literal(block, LAMBDA_CAPTURE)
        } else if let Some(block_arg) = block_arg {
            self.gen(block_arg, true)
        } else {
            let sp = self.sp();
            self.emit(Insn::a(OpCode::Loadnil, sp));
            self.push()
        }
    }

    /// `alias`/`undef` lower to a send on the lexically current class.
    pub(crate) fn gen_mod_funcall(&mut self, method: &str, names: &[&str], val: bool) -> CodegenResult<()> {
        let sp0 = self.sp();
        self.emit(Insn::a(OpCode::Tclass, sp0));
        self.push()?;
        for name in names {
            let sym = self.intern(name);
            let idx = self.new_sym(sym)?;
            let sp = self.sp();
            self.emit(Insn::abx(OpCode::Loadsym, sp, idx));
            self.push()?;
        }
        self.pop_n(1 + names.len() as u16);
        let sym = self.intern(method);
        let idx = self.new_msym(sym)?;
        self.emit(Insn::abc(OpCode::Send, sp0, idx, names.len() as u16));
        if val {
            self.push()?;
        }
        Ok(())
    }

    /// Declared argument spec, exposed for native-method parity checks.
    pub fn aspec_for(params: &Params) -> ArgSpec {
        Self::params_aspec(params)
    }
}
