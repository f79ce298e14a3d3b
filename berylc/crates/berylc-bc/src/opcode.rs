//! The instruction set.
//!
//! Opcode values are part of the binary image format; they never change
//! meaning between versions that share an image version tag.

use std::fmt;

use crate::error::BcError;

/// One opcode. The comment gives the operand layout and effect;
/// `R(n)` is register n of the current frame, `Pool(n)`/`Sym(n)` index
/// the owning IREP's literal pool and symbol array, `SEQ(n)` its child
/// IREP array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// No operation.
    Nop = 0,
    /// A B | R(A) := R(B)
    Move = 1,
    /// A Bx | R(A) := Pool(Bx)
    Loadl = 2,
    /// A sBx | R(A) := sBx
    Loadi = 3,
    /// A Bx | R(A) := Sym(Bx)
    Loadsym = 4,
    /// A | R(A) := nil
    Loadnil = 5,
    /// A | R(A) := self
    Loadself = 6,
    /// A | R(A) := true
    Loadt = 7,
    /// A | R(A) := false
    Loadf = 8,
    /// A Bx | R(A) := getglobal(Sym(Bx))
    Getglobal = 9,
    /// A Bx | setglobal(Sym(Bx), R(A))
    Setglobal = 10,
    /// A Bx | R(A) := Special[Bx]
    Getspecial = 11,
    /// A Bx | Special[Bx] := R(A)
    Setspecial = 12,
    /// A Bx | R(A) := ivget(Sym(Bx))
    Getiv = 13,
    /// A Bx | ivset(Sym(Bx), R(A))
    Setiv = 14,
    /// A Bx | R(A) := cvget(Sym(Bx))
    Getcv = 15,
    /// A Bx | cvset(Sym(Bx), R(A))
    Setcv = 16,
    /// A Bx | R(A) := constget(Sym(Bx))
    Getconst = 17,
    /// A Bx | constset(Sym(Bx), R(A))
    Setconst = 18,
    /// A Bx | R(A) := R(A)::Sym(Bx)
    Getmcnst = 19,
    /// A Bx | R(A+1)::Sym(Bx) := R(A)
    Setmcnst = 20,
    /// A B C | R(A) := uvget(B, C)
    Getupvar = 21,
    /// A B C | uvset(B, C, R(A))
    Setupvar = 22,
    /// sBx | pc += sBx
    Jmp = 23,
    /// A sBx | if R(A) then pc += sBx
    Jmpif = 24,
    /// A sBx | if !R(A) then pc += sBx
    Jmpnot = 25,
    /// sBx | rescue_push(pc + sBx)
    Onerr = 26,
    /// A | R(A) := exc; clear(exc)
    Rescue = 27,
    /// A | rescue_pop(A)
    Poperr = 28,
    /// A | raise(R(A))
    Raise = 29,
    /// Bx | ensure_push(SEQ(Bx))
    Epush = 30,
    /// A | A.times { ensure_pop().call }
    Epop = 31,
    /// A B C | R(A) := call(R(A), Sym(B), R(A+1..A+C))
    Send = 32,
    /// A B C | R(A) := call(R(A), Sym(B), R(A+1..A+C), &R(A+C+1))
    Sendb = 33,
    /// A B C | R(A) := fcall(R(A), Sym(B), ...)
    Fsend = 34,
    /// A | R(A) := self.call(frame.argc, frame.argv)
    Call = 35,
    /// A C | R(A) := super(R(A+1..A+C))
    Super = 36,
    /// A Bx | R(A) := argument array (Bx = m1:6 r:1 m2:5 lv:4)
    Argary = 37,
    /// Ax | argument reshaping per packed spec (req:5 opt:5 rest:1 post:5 key:5 kdict:1 blk:1)
    Enter = 38,
    /// A B C | R(A) := kdict[Sym(B)]
    Karg = 39,
    /// A C | R(A) := kdict
    Kdict = 40,
    /// A B | return R(A) (B: 0=normal 1=method 2=break)
    Return = 41,
    /// A B C | replace frame with call(R(A), Sym(B), ...)
    Tailcall = 42,
    /// A Bx | R(A) := block arg (Bx = m1:6 r:1 m2:5 lv:4)
    Blkpush = 43,
    /// A | R(A) := R(A) + R(A+1)
    Add = 44,
    /// A B C | R(A) := R(A) + C
    Addi = 45,
    /// A | R(A) := R(A) - R(A+1)
    Sub = 46,
    /// A B C | R(A) := R(A) - C
    Subi = 47,
    /// A | R(A) := R(A) * R(A+1)
    Mul = 48,
    /// A | R(A) := R(A) / R(A+1)
    Div = 49,
    /// A | R(A) := R(A) == R(A+1)
    Eq = 50,
    /// A | R(A) := R(A) < R(A+1)
    Lt = 51,
    /// A | R(A) := R(A) <= R(A+1)
    Le = 52,
    /// A | R(A) := R(A) > R(A+1)
    Gt = 53,
    /// A | R(A) := R(A) >= R(A+1)
    Ge = 54,
    /// A B C | R(A) := [R(B), ..., R(B+C-1)]
    Array = 55,
    /// A B | R(A).concat(splat R(B))
    Arycat = 56,
    /// A B | R(A).push(R(B))
    Arypush = 57,
    /// A B C | R(A) := R(B)[C]
    Aref = 58,
    /// A B C | R(B)[C] := R(A)
    Aset = 59,
    /// A B C | *R(A), R(A+1..A+C) := R(A) (post-splat scatter)
    Apost = 60,
    /// A Bx | R(A) := str_dup(Pool(Bx))
    String = 61,
    /// A B | str_cat(R(A), R(B))
    Strcat = 62,
    /// A B C | R(A) := { R(B) => R(B+1), ... } (C pairs)
    Hash = 63,
    /// A b c | R(A) := lambda(SEQ(b), c)
    Lambda = 64,
    /// A B C | R(A) := range(R(B), R(B+1), C) (C=1 excludes end)
    Range = 65,
    /// A | R(A) := ::Object
    Oclass = 66,
    /// A Bx | R(A) := newclass(R(A), Sym(Bx), R(A+1))
    Class = 67,
    /// A Bx | R(A) := newmodule(R(A), Sym(Bx))
    Module = 68,
    /// A Bx | R(A) := blockexec(R(A), SEQ(Bx))
    Exec = 69,
    /// A Bx | R(A).newmethod(Sym(Bx), R(A+1))
    Method = 70,
    /// A B | R(A) := R(B).singleton_class
    Sclass = 71,
    /// A | R(A) := target_class
    Tclass = 72,
    /// A B C | debug print
    Debug = 73,
    /// stop VM
    Stop = 74,
    /// A Bx | raise RuntimeError (A=1: LocalJumpError) with message Pool(Bx)
    Err = 75,
}

/// Highest opcode value; everything in `0..=MAX` decodes.
pub const MAX_OPCODE: u8 = OpCode::Err as u8;

impl OpCode {
    /// Canonical mnemonic, as printed by the disassembler.
    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Nop => "NOP",
            Move => "MOVE",
            Loadl => "LOADL",
            Loadi => "LOADI",
            Loadsym => "LOADSYM",
            Loadnil => "LOADNIL",
            Loadself => "LOADSELF",
            Loadt => "LOADT",
            Loadf => "LOADF",
            Getglobal => "GETGLOBAL",
            Setglobal => "SETGLOBAL",
            Getspecial => "GETSPECIAL",
            Setspecial => "SETSPECIAL",
            Getiv => "GETIV",
            Setiv => "SETIV",
            Getcv => "GETCV",
            Setcv => "SETCV",
            Getconst => "GETCONST",
            Setconst => "SETCONST",
            Getmcnst => "GETMCNST",
            Setmcnst => "SETMCNST",
            Getupvar => "GETUPVAR",
            Setupvar => "SETUPVAR",
            Jmp => "JMP",
            Jmpif => "JMPIF",
            Jmpnot => "JMPNOT",
            Onerr => "ONERR",
            Rescue => "RESCUE",
            Poperr => "POPERR",
            Raise => "RAISE",
            Epush => "EPUSH",
            Epop => "EPOP",
            Send => "SEND",
            Sendb => "SENDB",
            Fsend => "FSEND",
            Call => "CALL",
            Super => "SUPER",
            Argary => "ARGARY",
            Enter => "ENTER",
            Karg => "KARG",
            Kdict => "KDICT",
            Return => "RETURN",
            Tailcall => "TAILCALL",
            Blkpush => "BLKPUSH",
            Add => "ADD",
            Addi => "ADDI",
            Sub => "SUB",
            Subi => "SUBI",
            Mul => "MUL",
            Div => "DIV",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Gt => "GT",
            Ge => "GE",
            Array => "ARRAY",
            Arycat => "ARYCAT",
            Arypush => "ARYPUSH",
            Aref => "AREF",
            Aset => "ASET",
            Apost => "APOST",
            String => "STRING",
            Strcat => "STRCAT",
            Hash => "HASH",
            Lambda => "LAMBDA",
            Range => "RANGE",
            Oclass => "OCLASS",
            Class => "CLASS",
            Module => "MODULE",
            Exec => "EXEC",
            Method => "METHOD",
            Sclass => "SCLASS",
            Tclass => "TCLASS",
            Debug => "DEBUG",
            Stop => "STOP",
            Err => "ERR",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for OpCode {
    type Error = BcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > MAX_OPCODE {
            return Err(BcError::BadOpcode { value });
        }
        // Discriminants are contiguous from 0; the bound check above makes
        // the transmute total.
        Ok(unsafe { std::mem::transmute::<u8, OpCode>(value) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_all_opcodes() {
        for v in 0..=MAX_OPCODE {
            let op = OpCode::try_from(v).unwrap();
            assert_eq!(op as u8, v);
        }
    }

    #[test]
    fn test_out_of_range_rejected() {
        assert!(OpCode::try_from(MAX_OPCODE + 1).is_err());
        assert!(OpCode::try_from(0x7f).is_err());
    }

    #[test]
    fn test_names() {
        assert_eq!(OpCode::Send.name(), "SEND");
        assert_eq!(OpCode::Enter.to_string(), "ENTER");
        assert_eq!(OpCode::Stop.name(), "STOP");
    }
}
