//! Proc and environment data.
//!
//! A proc is a native function pointer or an IREP reference plus an
//! optional captured environment, and remembers its defining class for
//! `super`. An environment exposes the locals of an enclosing frame:
//! while that frame is live it aliases the frame's stack slots
//! (`cioff >= 0`); when the frame pops, the slots are copied out into a
//! private buffer and `cioff` drops to -1. That transition happens
//! exactly once, at frame pop.

use std::rc::Rc;

use berylc_bc::{ArgSpec, Irep};
use berylc_util::Symbol;

use crate::state::NativeFn;
use crate::value::{ObjRef, Value};

#[derive(Clone)]
pub enum ProcBody {
    Native(NativeFn, ArgSpec),
    Irep(Rc<Irep>),
}

impl std::fmt::Debug for ProcBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcBody::Native(..) => write!(f, "ProcBody::Native"),
            ProcBody::Irep(irep) => write!(f, "ProcBody::Irep({} insns)", irep.iseq.len()),
        }
    }
}

#[derive(Debug)]
pub struct ProcData {
    pub body: ProcBody,
    /// Captured defining environment, for closures.
    pub env: Option<ObjRef>,
    /// The lexically current class at definition time; `super` resumes
    /// lookup from its superclass.
    pub target_class: Option<ObjRef>,
    /// Strict argument checking (methods and lambdas).
    pub strict: bool,
}

impl ProcData {
    pub fn from_irep(irep: Rc<Irep>) -> Self {
        ProcData {
            body: ProcBody::Irep(irep),
            env: None,
            target_class: None,
            strict: false,
        }
    }

    pub fn native(f: NativeFn, aspec: ArgSpec) -> Self {
        ProcData {
            body: ProcBody::Native(f, aspec),
            env: None,
            target_class: None,
            strict: true,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, ProcBody::Native(..))
    }

    pub fn irep(&self) -> Option<&Rc<Irep>> {
        match &self.body {
            ProcBody::Irep(irep) => Some(irep),
            ProcBody::Native(..) => None,
        }
    }
}

/// Captured locals of an enclosing call frame.
#[derive(Debug)]
pub struct EnvData {
    /// Context that owns the live stack slots.
    pub ctx: usize,
    /// Base index of the frame in that context's value stack.
    pub bidx: usize,
    /// Number of captured slots (the frame's nlocals).
    pub nlocals: usize,
    /// Owning call-info index while the frame is live; -1 once the
    /// frame has popped and the slots were copied out.
    pub cioff: isize,
    /// Private copy of the slots after detachment.
    pub detached: Option<Vec<Value>>,
    /// Method name of the defining frame, consulted by `Proc#call`.
    pub mid: Option<Symbol>,
    /// Next-outer environment in the capture chain; upvar level `lv`
    /// walks this.
    pub prev: Option<ObjRef>,
}

impl EnvData {
    pub fn is_detached(&self) -> bool {
        self.cioff < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_detach_state() {
        let env = EnvData {
            ctx: 0,
            bidx: 10,
            nlocals: 3,
            cioff: 2,
            detached: None,
            mid: None,
            prev: None,
        };
        assert!(!env.is_detached());
        let env = EnvData {
            cioff: -1,
            detached: Some(vec![Value::Int(1)]),
            ..env
        };
        assert!(env.is_detached());
    }
}
