//! berylc-gen - Code Generator
//!
//! Lowers the AST to register bytecode. Each lexical scope (top level,
//! method body, class body, block, lambda, ensure clause) becomes one
//! IREP; inner scopes become children referenced by index.
//!
//! # Register discipline
//!
//! Register 0 holds `self`; locals occupy `1..=nlocals-1` in declaration
//! order; temporaries grow a stack above them through `sp`. Every value
//! generation leaves its result at the entry `sp` and pushes; statement
//! positions generate with `val = false` and leave `sp` untouched.
//!
//! # Peephole
//!
//! [`Generator::genop_peep`] inspects the previously emitted instruction
//! and collapses the common pairs (move-chains, LOADI feeding ADD/SUB,
//! redundant copies before SET/RETURN, fusable EPOP/POPERR). It never
//! fires across a jump target: every patched label bumps `lastlabel`.

mod calls;
mod defs;
mod error;
mod visit;

#[cfg(test)]
mod tests;

use std::rc::Rc;

use berylc_bc::{ArgSpec, Insn, Irep, OpCode, PoolValue, MAXARG_SBX};
use berylc_par::Program;
use berylc_util::{Symbol, SymbolTable};
use log::trace;

pub use error::{CodegenError, CodegenResult};

/// Register ceiling per frame; the A/B operand fields are 9 bits.
const MAX_REGS: u16 = 511;
/// Method-name symbols must fit the 9-bit B field of SEND.
const MAX_MSYM: usize = 512;

/// Loop context kinds, used to pick the lowering of `break`/`next`/
/// `redo`/`retry`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoopKind {
    /// `while`/`until` in the current IREP.
    Normal,
    /// A block body (its own IREP): break unwinds via RETURN.
    Block,
    /// A `for` body: same frame rules as a block.
    For,
    /// A `begin` body with rescue clauses: the retry target.
    Begin,
}

pub(crate) struct LoopInfo {
    pub kind: LoopKind,
    /// Loop entry (redo target, or the ONERR of a begin for retry).
    pub head: usize,
    /// Jumps to patch to the condition check.
    pub cond_jumps: Vec<usize>,
    /// Jumps to patch past the loop end.
    pub break_jumps: Vec<usize>,
    /// Ensure depth at loop entry; break/next emit EPOP for the delta.
    pub ensure_level: u32,
}

/// Per-scope code emission state.
pub(crate) struct Scope {
    pub iseq: Vec<Insn>,
    pub lines: Vec<u16>,
    pub pool: Vec<PoolValue>,
    pub syms: Vec<Symbol>,
    pub reps: Vec<Rc<Irep>>,
    pub locals: Vec<String>,
    /// Next free register; locals live below.
    pub sp: u16,
    pub nlocals: u16,
    pub nregs: u16,
    /// First pc at or after the most recent jump target; the peephole
    /// never reaches across it.
    pub lastlabel: usize,
    pub loops: Vec<LoopInfo>,
    pub ensure_level: u32,
    /// Method scope: strict argument checking, NORMAL returns.
    pub mscope: bool,
    /// Transparent scopes (blocks, lambdas, ensures) resolve locals
    /// outward as upvars.
    pub transparent: bool,
    /// Packed argument info for ARGARY/BLKPUSH: (req+opt, rest, post).
    pub ainfo: (u16, bool, u16),
    /// Line currently attributed to emitted instructions.
    pub line: u32,
}

impl Scope {
    fn new(locals: Vec<String>, mscope: bool, transparent: bool) -> Self {
        let nlocals = locals.len() as u16 + 1;
        Scope {
            iseq: Vec::new(),
            lines: Vec::new(),
            pool: Vec::new(),
            syms: Vec::new(),
            reps: Vec::new(),
            locals,
            sp: nlocals,
            nlocals,
            nregs: nlocals,
            lastlabel: 0,
            loops: Vec::new(),
            ensure_level: 0,
            mscope,
            transparent,
            ainfo: (0, false, 0),
            line: 0,
        }
    }
}

pub struct Generator<'a> {
    pub(crate) scopes: Vec<Scope>,
    pub(crate) symtab: &'a mut SymbolTable,
    pub(crate) filename: Option<String>,
}

/// Compile a parsed program into an IREP tree.
pub fn generate(
    program: &Program,
    symtab: &mut SymbolTable,
    filename: Option<&str>,
) -> CodegenResult<Rc<Irep>> {
    let mut generator = Generator {
        scopes: Vec::new(),
        symtab,
        filename: filename.map(|f| f.to_string()),
    };
    generator.gen_toplevel(program)
}

impl<'a> Generator<'a> {
    fn gen_toplevel(&mut self, program: &Program) -> CodegenResult<Rc<Irep>> {
        self.scope_push(program.locals.clone(), false, false);
        match program.body.split_last() {
            Some((last, init)) => {
                for node in init {
                    self.gen(node, false)?;
                }
                self.gen(last, true)?;
                self.pop();
            }
            None => {
                // empty program still answers nil
                let sp = self.sp();
                self.emit(Insn::a(OpCode::Loadnil, sp));
            }
        }
        self.emit(Insn(OpCode::Stop as u32));
        let irep = self.scope_finish();
        trace!("compiled top level: {} instructions", irep.iseq.len());
        Ok(irep)
    }

    // ---------------------------------------------------------------
    // scope stack
    // ---------------------------------------------------------------

    pub(crate) fn scope_push(&mut self, locals: Vec<String>, mscope: bool, transparent: bool) {
        self.scopes.push(Scope::new(locals, mscope, transparent));
    }

    /// Close the current scope into an IREP.
    pub(crate) fn scope_finish(&mut self) -> Rc<Irep> {
        let scope = self.scopes.pop().expect("scope stack underflow");
        Rc::new(Irep {
            nlocals: scope.nlocals,
            nregs: scope.nregs.max(scope.sp) + 1,
            iseq: scope.iseq,
            pool: scope.pool,
            syms: scope.syms,
            reps: scope.reps,
            lines: scope.lines.clone(),
            filename: self.filename.clone(),
        })
    }

    /// Close the current scope and register it as a child of the new
    /// current scope, returning the child index.
    pub(crate) fn scope_finish_child(&mut self) -> CodegenResult<usize> {
        let irep = self.scope_finish();
        let scope = self.scope();
        scope.reps.push(irep);
        let idx = scope.reps.len() - 1;
        if idx > 0x3fff {
            return Err(CodegenError::TooManyScopes);
        }
        Ok(idx)
    }

    #[inline]
    pub(crate) fn scope(&mut self) -> &mut Scope {
        self.scopes.last_mut().expect("no active scope")
    }

    #[inline]
    pub(crate) fn scope_ref(&self) -> &Scope {
        self.scopes.last().expect("no active scope")
    }

    // ---------------------------------------------------------------
    // register stack
    // ---------------------------------------------------------------

    #[inline]
    pub(crate) fn sp(&self) -> u16 {
        self.scope_ref().sp
    }

    pub(crate) fn push(&mut self) -> CodegenResult<()> {
        let line = self.scope_ref().line;
        let scope = self.scope();
        if scope.sp >= MAX_REGS {
            return Err(CodegenError::RegisterOverflow { line });
        }
        scope.sp += 1;
        scope.nregs = scope.nregs.max(scope.sp);
        Ok(())
    }

    pub(crate) fn pop(&mut self) {
        let scope = self.scope();
        debug_assert!(scope.sp > 0, "register stack underflow");
        scope.sp -= 1;
    }

    pub(crate) fn pop_n(&mut self, n: u16) {
        for _ in 0..n {
            self.pop();
        }
    }

    // ---------------------------------------------------------------
    // literals and symbols
    // ---------------------------------------------------------------

    /// Pool a literal, sharing duplicates (string equality is deep).
    pub(crate) fn new_lit(&mut self, value: PoolValue) -> CodegenResult<u32> {
        let scope = self.scope();
        if let Some(idx) = scope.pool.iter().position(|p| *p == value) {
            return Ok(idx as u32);
        }
        if scope.pool.len() >= 0xffff {
            return Err(CodegenError::TooManyLiterals);
        }
        scope.pool.push(value);
        Ok(scope.pool.len() as u32 - 1)
    }

    /// Intern a symbol into the scope's symbol array. Method names go
    /// through [`new_msym`](Self::new_msym) instead.
    pub(crate) fn new_sym(&mut self, sym: Symbol) -> CodegenResult<u32> {
        let scope = self.scope();
        if let Some(idx) = scope.syms.iter().position(|s| *s == sym) {
            return Ok(idx as u32);
        }
        if scope.syms.len() >= 0xffff {
            return Err(CodegenError::TooManySymbols);
        }
        scope.syms.push(sym);
        Ok(scope.syms.len() as u32 - 1)
    }

    /// A symbol used as a SEND operand: must fit the 9-bit B field, so
    /// method names claim the early entries.
    pub(crate) fn new_msym(&mut self, sym: Symbol) -> CodegenResult<u16> {
        let idx = self.new_sym(sym)?;
        if idx as usize >= MAX_MSYM {
            return Err(CodegenError::TooManySymbols);
        }
        Ok(idx as u16)
    }

    pub(crate) fn intern(&mut self, name: &str) -> Symbol {
        self.symtab.intern(name)
    }

    // ---------------------------------------------------------------
    // emission
    // ---------------------------------------------------------------

    pub(crate) fn pc(&self) -> usize {
        self.scope_ref().iseq.len()
    }

    pub(crate) fn set_line(&mut self, line: u32) {
        self.scope().line = line;
    }

    pub(crate) fn emit(&mut self, insn: Insn) {
        let line = self.scope_ref().line.min(u16::MAX as u32) as u16;
        let scope = self.scope();
        scope.iseq.push(insn);
        scope.lines.push(line);
    }

    /// Mark the current pc as a jump target, fencing the peephole.
    pub(crate) fn mark_label(&mut self) {
        let pc = self.pc();
        self.scope().lastlabel = pc;
    }

    /// Emit a forward jump with a dummy offset; patch later.
    pub(crate) fn emit_jump(&mut self, op: OpCode, a: u16) -> usize {
        let pc = self.pc();
        self.emit(Insn::asbx(op, a, 0));
        pc
    }

    /// Point the jump at `jump_pc` to the current pc.
    pub(crate) fn patch_jump(&mut self, jump_pc: usize) -> CodegenResult<()> {
        let target = self.pc();
        self.patch_jump_to(jump_pc, target)
    }

    pub(crate) fn patch_jump_to(&mut self, jump_pc: usize, target: usize) -> CodegenResult<()> {
        let offset = target as i64 - jump_pc as i64;
        let line = self.scope_ref().line;
        if offset.abs() > MAXARG_SBX as i64 {
            return Err(CodegenError::JumpTooFar { line });
        }
        let scope = self.scope();
        let old = scope.iseq[jump_pc];
        scope.iseq[jump_pc] = Insn::asbx(old.opcode(), old.arg_a() as u16, offset as i32);
        // the jump lands at `target`; nothing may fold across it
        if target >= scope.lastlabel {
            scope.lastlabel = target;
        }
        Ok(())
    }

    /// Emit a backward jump to an already-known target.
    pub(crate) fn emit_jump_back(&mut self, op: OpCode, a: u16, target: usize) -> CodegenResult<()> {
        let pc = self.pc();
        let offset = target as i64 - pc as i64;
        let line = self.scope_ref().line;
        if offset.abs() > MAXARG_SBX as i64 {
            return Err(CodegenError::JumpTooFar { line });
        }
        self.emit(Insn::asbx(op, a, offset as i32));
        self.mark_label();
        Ok(())
    }

    // ---------------------------------------------------------------
    // peephole
    // ---------------------------------------------------------------

    /// Emit with one-instruction lookback folding.
    pub(crate) fn genop_peep(&mut self, insn: Insn, val: bool) {
        let scope = self.scope_ref();
        if scope.iseq.is_empty() || scope.iseq.len() <= scope.lastlabel {
            self.emit(insn);
            return;
        }
        let prev = *scope.iseq.last().expect("nonempty checked");
        let nlocals = scope.nlocals as usize;
        let op = insn.opcode();
        use OpCode::*;
        match op {
            Move => {
                let (a, b) = (insn.arg_a(), insn.arg_b());
                if a == b {
                    return; // no-op move
                }
                if val {
                    // the source register stays live as the expression value
                    self.emit(insn);
                    return;
                }
                match prev.opcode() {
                    // collapse a move chain
                    Move if prev.arg_a() == b && b >= nlocals => {
                        self.replace_last(Insn::ab(Move, a as u16, prev.arg_b() as u16));
                        return;
                    }
                    // retarget a load straight into the destination
                    Loadi if prev.arg_a() == b && b >= nlocals => {
                        self.replace_last(Insn::asbx(Loadi, a as u16, prev.arg_sbx()));
                        return;
                    }
                    Loadl | Loadsym | Getglobal | Getiv | Getcv | Getconst | Getspecial | String
                        if prev.arg_a() == b && b >= nlocals =>
                    {
                        self.replace_last(Insn::abx(
                            prev.opcode(),
                            a as u16,
                            prev.arg_bx() as u32,
                        ));
                        return;
                    }
                    Loadnil | Loadself | Loadt | Loadf if prev.arg_a() == b && b >= nlocals => {
                        self.replace_last(Insn::a(prev.opcode(), a as u16));
                        return;
                    }
                    Getupvar if prev.arg_a() == b && b >= nlocals => {
                        self.replace_last(Insn::abc(
                            Getupvar,
                            a as u16,
                            prev.arg_b() as u16,
                            prev.arg_c() as u16,
                        ));
                        return;
                    }
                    _ => {}
                }
            }
            Setiv | Setcv | Setglobal | Setconst | Setmcnst => {
                // SET after MOVE reads through the move
                if prev.opcode() == Move && prev.arg_a() == insn.arg_a() && !val {
                    self.replace_last(Insn::abx(op, prev.arg_b() as u16, insn.arg_bx() as u32));
                    return;
                }
            }
            Setupvar => {
                if prev.opcode() == Move && prev.arg_a() == insn.arg_a() && !val {
                    self.replace_last(Insn::abc(
                        Setupvar,
                        prev.arg_b() as u16,
                        insn.arg_b() as u16,
                        insn.arg_c() as u16,
                    ));
                    return;
                }
            }
            Epop => {
                if prev.opcode() == Epop {
                    let total = (prev.arg_a() + insn.arg_a()) as u16;
                    self.replace_last(Insn::a(Epop, total));
                    return;
                }
            }
            Poperr => {
                if prev.opcode() == Poperr {
                    let total = (prev.arg_a() + insn.arg_a()) as u16;
                    self.replace_last(Insn::a(Poperr, total));
                    return;
                }
            }
            Add | Sub => {
                // LOADI feeding an arithmetic op becomes an immediate form
                if prev.opcode() == Loadi && prev.arg_a() == insn.arg_a() + 1 {
                    let c = prev.arg_sbx();
                    let (imm_op, c) = if op == Add {
                        if (0..=127).contains(&c) {
                            (Addi, c)
                        } else if (-127..0).contains(&c) {
                            (Subi, -c)
                        } else {
                            self.emit(insn);
                            return;
                        }
                    } else if (0..=127).contains(&c) {
                        (Subi, c)
                    } else if (-127..0).contains(&c) {
                        (Addi, -c)
                    } else {
                        self.emit(insn);
                        return;
                    };
                    self.replace_last(Insn::abc(
                        imm_op,
                        insn.arg_a() as u16,
                        insn.arg_b() as u16,
                        c as u16,
                    ));
                    return;
                }
            }
            Strcat => {
                // concatenating an empty literal is a no-op
                if prev.opcode() == String
                    && prev.arg_a() == insn.arg_b()
                    && matches!(
                        self.scope_ref().pool.get(prev.arg_bx()),
                        Some(PoolValue::Str(s)) if s.is_empty()
                    )
                {
                    self.drop_last();
                    return;
                }
            }
            Return if insn.arg_b() == berylc_bc::RETURN_NORMAL as usize => {
                match prev.opcode() {
                    // consecutive returns: the second is unreachable
                    Return => return,
                    // a setter in return position answers its own value
                    Setiv | Setcv | Setconst | Setmcnst | Setglobal | Setupvar => {
                        self.drop_last();
                        self.genop_peep(prev, false);
                        let folded = *self
                            .scope_ref()
                            .iseq
                            .last()
                            .expect("setter fold leaves an instruction");
                        self.emit(Insn::ab(
                            Return,
                            folded.arg_a() as u16,
                            berylc_bc::RETURN_NORMAL,
                        ));
                        return;
                    }
                    // return the source of a copy directly
                    Move if prev.arg_a() == insn.arg_a() => {
                        self.replace_last(Insn::ab(
                            Return,
                            prev.arg_b() as u16,
                            berylc_bc::RETURN_NORMAL,
                        ));
                        return;
                    }
                    // a call in tail position replaces the frame
                    Send if prev.arg_a() == insn.arg_a()
                        && self.scope_ref().mscope
                        && self.scope_ref().ensure_level == 0
                        && self.scope_ref().loops.is_empty() =>
                    {
                        self.replace_last(Insn::abc(
                            Tailcall,
                            prev.arg_a() as u16,
                            prev.arg_b() as u16,
                            prev.arg_c() as u16,
                        ));
                        return;
                    }
                    _ => {}
                }
            }
            _ => {}
        }
        self.emit(insn);
    }

    fn replace_last(&mut self, insn: Insn) {
        let scope = self.scope();
        *scope.iseq.last_mut().expect("nonempty") = insn;
    }

    fn drop_last(&mut self) {
        let scope = self.scope();
        scope.iseq.pop();
        scope.lines.pop();
    }

    // ---------------------------------------------------------------
    // local variable resolution
    // ---------------------------------------------------------------

    /// Resolve a name in the current scope: `Some(reg)` if local here.
    pub(crate) fn local_reg(&self, name: &str) -> Option<u16> {
        self.scope_ref()
            .locals
            .iter()
            .position(|l| l == name)
            .map(|i| i as u16 + 1)
    }

    /// Resolve through enclosing transparent scopes: `(reg, lv)` where
    /// `lv` is the number of environment hops (0 = immediate parent).
    pub(crate) fn upvar_reg(&self, name: &str) -> Option<(u16, u16)> {
        if !self.scope_ref().transparent {
            return None;
        }
        let mut lv = 0u16;
        for scope in self.scopes.iter().rev().skip(1) {
            if let Some(i) = scope.locals.iter().position(|l| l == name) {
                return Some((i as u16 + 1, lv));
            }
            if !scope.transparent {
                break;
            }
            lv += 1;
        }
        None
    }

    /// Nesting depth to the defining method scope, for ARGARY/BLKPUSH.
    pub(crate) fn method_scope_lv(&self) -> Option<(u16, (u16, bool, u16))> {
        let mut lv = 0u16;
        for scope in self.scopes.iter().rev() {
            if scope.mscope {
                return Some((lv, scope.ainfo));
            }
            if !scope.transparent {
                return None;
            }
            lv += 1;
        }
        None
    }

    // ---------------------------------------------------------------
    // argument specs
    // ---------------------------------------------------------------

    pub(crate) fn params_aspec(params: &berylc_par::Params) -> ArgSpec {
        ArgSpec {
            req: params.required.len() as u8,
            opt: params.optional.len() as u8,
            rest: params.rest.is_some(),
            post: params.post.len() as u8,
            key: 0,
            kdict: false,
            block: params.block.is_some(),
        }
    }
}
