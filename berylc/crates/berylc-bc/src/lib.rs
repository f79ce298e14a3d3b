//! berylc-bc - Bytecode Definitions
//!
//! The shared vocabulary between the code generator and the virtual
//! machine:
//!
//! - [`OpCode`]: the instruction set.
//! - [`Insn`]: one fixed-width (32-bit) instruction word with packed
//!   operand fields and the encode/decode helpers for every layout.
//! - [`Irep`]: a compiled lexical scope: instruction sequence, literal
//!   pool, symbol ids, child scopes, locals/register counts, line info.
//!   IREPs are shared by reference count (`Rc`), independent of the GC.
//! - [`ArgSpec`]: the packed argument specification consumed by the
//!   `ENTER` prologue and by native method registration.
//! - [`image`]: the binary serialization of an IREP tree with a CRC-16
//!   checked header, so compiled code can be shipped without source.
//!
//! # Instruction layouts
//!
//! ```text
//! ABC   [ A:9 ][ B:9 ][ C:7 ][op:7]
//! ABx   [ A:9 ][    Bx:16   ][op:7]
//! AsBx  [ A:9 ][   sBx:16   ][op:7]   sBx = Bx - 0x7fff
//! Ax    [      Ax:25        ][op:7]
//! Abz   [ A:9 ][ b:14 ][c:2 ][op:7]
//! ```

pub mod aspec;
pub mod disasm;
pub mod error;
pub mod image;
pub mod insn;
pub mod irep;
pub mod opcode;

pub use aspec::ArgSpec;
pub use error::{BcError, BcResult};
pub use insn::{Insn, MAXARG_BX, MAXARG_SBX};
pub use irep::{Irep, PoolValue};
pub use opcode::OpCode;

/// Argument-count sentinel: callers bundling their arguments into a single
/// array pass this in the C field of `SEND`/`SENDB`.
pub const CALL_MAXARGS: u16 = 127;

/// `RETURN` B operand: plain return popping one frame.
pub const RETURN_NORMAL: u16 = 0;
/// `RETURN` B operand: method return unwinding out of blocks.
pub const RETURN_METHOD: u16 = 1;
/// `RETURN` B operand: break out to the block's call site.
pub const RETURN_BREAK: u16 = 2;

/// `LAMBDA` c bit: the proc captures the defining environment.
pub const LAMBDA_CAPTURE: u16 = 1;
/// `LAMBDA` c bit: strict argument checking (lambda/method semantics).
pub const LAMBDA_STRICT: u16 = 2;
