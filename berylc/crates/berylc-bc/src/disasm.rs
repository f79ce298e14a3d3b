//! Bytecode disassembler.
//!
//! Renders an IREP tree as text for the CLI `--dump` flag and for
//! codegen tests that assert on instruction shapes.

use std::fmt::Write;

use berylc_util::SymbolTable;

use crate::insn::Insn;
use crate::irep::{Irep, PoolValue};
use crate::opcode::OpCode;

/// Disassemble one IREP and its children.
pub fn fmt_irep(irep: &Irep, symtab: &SymbolTable) -> String {
    let mut out = String::new();
    fmt_irep_indexed(irep, symtab, &mut out, 0, &mut 0);
    out
}

fn fmt_irep_indexed(
    irep: &Irep,
    symtab: &SymbolTable,
    out: &mut String,
    depth: usize,
    counter: &mut usize,
) {
    let idx = *counter;
    *counter += 1;
    let indent = "  ".repeat(depth);
    let _ = writeln!(
        out,
        "{indent}irep #{idx} nlocals={} nregs={} ilen={}",
        irep.nlocals,
        irep.nregs,
        irep.iseq.len()
    );
    for (pc, insn) in irep.iseq.iter().enumerate() {
        let _ = writeln!(out, "{indent}  {pc:03} {}", fmt_insn(*insn, irep, symtab));
    }
    for child in &irep.reps {
        fmt_irep_indexed(child, symtab, out, depth + 1, counter);
    }
}

/// Disassemble one instruction in context.
pub fn fmt_insn(insn: Insn, irep: &Irep, symtab: &SymbolTable) -> String {
    use OpCode::*;
    let op = insn.opcode();
    let a = insn.arg_a();
    let b = insn.arg_b();
    let c = insn.arg_c();
    let sym = |idx: usize| -> std::string::String {
        irep.syms
            .get(idx)
            .map(|s| format!(":{}", symtab.name(*s)))
            .unwrap_or_else(|| format!("sym#{idx}?"))
    };
    let lit = |idx: usize| -> std::string::String {
        match irep.pool.get(idx) {
            Some(PoolValue::Str(s)) => format!("{s:?}"),
            Some(PoolValue::Int(i)) => i.to_string(),
            Some(PoolValue::Float(f)) => format!("{f:?}"),
            None => format!("pool#{idx}?"),
        }
    };
    match op {
        Nop | Stop => op.name().to_string(),
        Move => format!("MOVE R{a} R{b}"),
        Loadl => format!("LOADL R{a} {}", lit(insn.arg_bx())),
        Loadi => format!("LOADI R{a} {}", insn.arg_sbx()),
        Loadsym => format!("LOADSYM R{a} {}", sym(insn.arg_bx())),
        Loadnil => format!("LOADNIL R{a}"),
        Loadself => format!("LOADSELF R{a}"),
        Loadt => format!("LOADT R{a}"),
        Loadf => format!("LOADF R{a}"),
        Getglobal | Setglobal | Getiv | Setiv | Getcv | Setcv | Getconst | Setconst | Getmcnst
        | Setmcnst => {
            format!("{} R{a} {}", op.name(), sym(insn.arg_bx()))
        }
        Getspecial | Setspecial => format!("{} R{a} {}", op.name(), insn.arg_bx()),
        Getupvar | Setupvar => format!("{} R{a} {b} {c}", op.name()),
        Jmp => format!("JMP {:+}", insn.arg_sbx()),
        Jmpif | Jmpnot | Onerr => format!("{} R{a} {:+}", op.name(), insn.arg_sbx()),
        Rescue | Raise | Epop | Poperr | Tclass | Oclass | Call => {
            format!("{} R{a}", op.name())
        }
        Epush => format!("EPUSH SEQ[{}]", insn.arg_bx()),
        Send | Sendb | Fsend | Tailcall => {
            format!("{} R{a} {} {c}", op.name(), sym(b))
        }
        Super => format!("SUPER R{a} {c}"),
        Argary | Blkpush => format!("{} R{a} {:#06x}", op.name(), insn.arg_bx()),
        Enter => format!("ENTER {:#x}", insn.arg_ax()),
        Karg | Kdict | Debug => format!("{} R{a} {b} {c}", op.name()),
        Return => format!(
            "RETURN R{a} {}",
            match b {
                0 => "normal",
                1 => "method",
                2 => "break",
                _ => "?",
            }
        ),
        Add | Sub | Mul | Div | Eq | Lt | Le | Gt | Ge => {
            format!("{} R{a} {}", op.name(), sym(b))
        }
        Addi | Subi => format!("{} R{a} {} {c}", op.name(), sym(b)),
        Array | Hash | Apost => format!("{} R{a} R{b} {c}", op.name()),
        Arycat | Arypush | Strcat | Sclass => format!("{} R{a} R{b}", op.name()),
        Aref | Aset => format!("{} R{a} R{b} {c}", op.name()),
        String => format!("STRING R{a} {}", lit(insn.arg_bx())),
        Lambda => format!("LAMBDA R{a} SEQ[{}] {}", insn.arg_bz(), insn.arg_cz()),
        Range => format!("RANGE R{a} R{b} {c}"),
        Class | Module | Method => format!("{} R{a} {}", op.name(), sym(insn.arg_bx())),
        Exec => format!("EXEC R{a} SEQ[{}]", insn.arg_bx()),
        Err => format!("ERR {a} {}", lit(insn.arg_bx())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disasm_send() {
        let mut symtab = SymbolTable::new();
        let irep = Irep {
            nlocals: 1,
            nregs: 4,
            iseq: vec![Insn::abc(OpCode::Send, 1, 0, 2)],
            pool: vec![],
            syms: vec![symtab.intern("puts")],
            reps: vec![],
            lines: vec![],
            filename: None,
        };
        let text = fmt_irep(&irep, &symtab);
        assert!(text.contains("SEND R1 :puts 2"), "got: {text}");
    }

    #[test]
    fn test_disasm_literals() {
        let symtab = SymbolTable::new();
        let irep = Irep {
            nlocals: 1,
            nregs: 3,
            iseq: vec![
                Insn::abx(OpCode::String, 1, 0),
                Insn::asbx(OpCode::Loadi, 2, -7),
            ],
            pool: vec![PoolValue::Str("hi\n".into())],
            syms: vec![],
            reps: vec![],
            lines: vec![],
            filename: None,
        };
        let text = fmt_irep(&irep, &symtab);
        assert!(text.contains("STRING R1 \"hi\\n\""), "got: {text}");
        assert!(text.contains("LOADI R2 -7"), "got: {text}");
    }
}
