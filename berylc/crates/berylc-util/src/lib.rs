//! berylc-util - Core Utilities and Foundation Types
//!
//! Foundation types shared by every phase of the Beryl interpreter:
//!
//! - [`Symbol`] / [`SymbolTable`]: per-interpreter string interning. Unlike a
//!   process-global interner, every interpreter instance owns its own table so
//!   that instances running on different threads share no mutable state.
//! - [`Span`] / [`FileId`]: source locations carried by tokens, AST nodes and
//!   bytecode line tables.
//! - [`Diagnostics`]: accumulating error sink used by the lexer and parser.
//!
//! The compiler phases (`berylc-lex`, `berylc-par`, `berylc-gen`) thread a
//! `&mut SymbolTable` through their entry points; the runtime (`bvm`) owns the
//! table for the life of the interpreter so symbol ids stay stable.

pub mod diag;
pub mod error;
pub mod span;
pub mod symbol;

pub use diag::{Diagnostic, Diagnostics, Level};
pub use error::{SymbolError, UtilResult};
pub use span::{FileId, Span};
pub use symbol::{well_known, Symbol, SymbolTable};

// Re-export the hash map types the rest of the workspace uses for
// symbol-keyed tables.
pub use rustc_hash::{FxHashMap, FxHashSet};
