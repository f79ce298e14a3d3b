//! The compiled form of one lexical scope.

use std::rc::Rc;

use berylc_util::Symbol;

use crate::insn::Insn;

/// A literal pool entry.
///
/// Pool values are plain data, not heap values: the VM materializes a
/// fresh heap string for `STRING` and loads numbers directly for `LOADL`.
/// This keeps IREPs outside the garbage-collected heap so they can be
/// shared between procs (and between interpreter instances that load the
/// same image) with plain reference counting.
#[derive(Clone, Debug)]
pub enum PoolValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl PartialEq for PoolValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PoolValue::Str(a), PoolValue::Str(b)) => a == b,
            (PoolValue::Int(a), PoolValue::Int(b)) => a == b,
            // bit equality so pooling distinguishes 0.0 from -0.0
            (PoolValue::Float(a), PoolValue::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for PoolValue {}

/// A bytecode module: the unit of compilation and loading.
///
/// Each lexical scope (method body, class body, block, lambda, top level)
/// compiles to one `Irep`; inner scopes are children, referenced by index
/// from `LAMBDA`, `EXEC` and `EPUSH` operands.
///
/// Shared by `Rc`: a proc holds a strong reference, so an IREP lives
/// until no proc (and no parent IREP) refers to it. This refcount is
/// independent of the GC.
#[derive(Debug, Default)]
pub struct Irep {
    /// Locals count, including slot 0 (self).
    pub nlocals: u16,
    /// High-water register count for a frame running this IREP.
    pub nregs: u16,
    /// Instruction sequence.
    pub iseq: Vec<Insn>,
    /// Literal pool (numbers, strings); duplicates share one entry.
    pub pool: Vec<PoolValue>,
    /// Symbol ids referenced by instructions.
    pub syms: Vec<Symbol>,
    /// Child scopes in creation order.
    pub reps: Vec<Rc<Irep>>,
    /// Source line per instruction; empty when debug info is stripped.
    pub lines: Vec<u16>,
    /// Source filename, if known.
    pub filename: Option<String>,
}

impl Irep {
    /// Source line of the instruction at `pc`, if line info is present.
    pub fn line_at(&self, pc: usize) -> Option<u16> {
        self.lines.get(pc).copied()
    }

    /// Structural bytecode equality: instruction-for-instruction,
    /// pool-for-pool, recursing into children. Line tables and filenames
    /// are ignored; they are debug data, not behavior.
    pub fn bytecode_eq(&self, other: &Irep) -> bool {
        self.nlocals == other.nlocals
            && self.nregs == other.nregs
            && self.iseq == other.iseq
            && self.pool == other.pool
            && self.syms == other.syms
            && self.reps.len() == other.reps.len()
            && self
                .reps
                .iter()
                .zip(other.reps.iter())
                .all(|(a, b)| a.bytecode_eq(b))
    }

    /// Total instruction count including children.
    pub fn total_len(&self) -> usize {
        self.iseq.len() + self.reps.iter().map(|r| r.total_len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    fn leaf() -> Irep {
        Irep {
            nlocals: 2,
            nregs: 5,
            iseq: vec![Insn::a(OpCode::Loadnil, 1), Insn::ab(OpCode::Return, 1, 0)],
            pool: vec![PoolValue::Str("hi".into())],
            syms: vec![],
            reps: vec![],
            lines: vec![1, 1],
            filename: Some("t.rb".into()),
        }
    }

    #[test]
    fn test_bytecode_eq_ignores_debug_info() {
        let a = leaf();
        let mut b = leaf();
        b.lines.clear();
        b.filename = None;
        assert!(a.bytecode_eq(&b));
    }

    #[test]
    fn test_bytecode_eq_detects_differences() {
        let a = leaf();
        let mut b = leaf();
        b.iseq[0] = Insn::a(OpCode::Loadt, 1);
        assert!(!a.bytecode_eq(&b));

        let mut c = leaf();
        c.pool[0] = PoolValue::Str("bye".into());
        assert!(!a.bytecode_eq(&c));
    }

    #[test]
    fn test_pool_float_bit_equality() {
        assert_eq!(PoolValue::Float(1.5), PoolValue::Float(1.5));
        assert_ne!(PoolValue::Float(0.0), PoolValue::Float(-0.0));
    }

    #[test]
    fn test_total_len_recurses() {
        let mut parent = leaf();
        parent.reps.push(Rc::new(leaf()));
        assert_eq!(parent.total_len(), 4);
    }
}
