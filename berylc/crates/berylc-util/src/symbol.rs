//! Symbol module - String interning for identifier and method names.
//!
//! A [`Symbol`] is a compact (4-byte) handle to a name stored in a
//! [`SymbolTable`]. Symbols enable O(1) name comparison and keep the
//! bytecode operand width small: an IREP stores symbol ids, not strings.
//!
//! # Per-instance tables
//!
//! The table is deliberately *not* global. Each interpreter instance owns
//! one `SymbolTable`, so two instances confined to different threads share
//! no mutable state. Ids are stable for the life of the owning table and
//! satisfy `table.intern(table.name(s)) == s`.
//!
//! # Performance
//!
//! | Operation | Complexity |
//! |-----------|------------|
//! | `intern` (hit) | O(1) hash lookup |
//! | `intern` (miss) | O(1) hash insert + copy |
//! | `name` | O(1) index lookup |
//! | `Symbol` comparison | O(1) integer comparison |

use std::fmt;

use indexmap::IndexSet;

use crate::error::{SymbolError, UtilResult};

/// Hasher used by the intern table. AHash is a fast non-cryptographic
/// hash with good distribution for short identifier-like strings.
type SymbolHasher = ahash::RandomState;

/// An interned name.
///
/// Symbols are plain indices into the owning [`SymbolTable`]. Comparing two
/// symbols from *different* tables is meaningless; the workspace avoids this
/// by owning exactly one table per interpreter instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(pub(crate) u32);

impl Symbol {
    /// Raw id, used by the bytecode image writer.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Rebuild a symbol from a raw id.
    ///
    /// The id must have come from the same table that will resolve it;
    /// the image loader re-interns names instead of trusting raw ids.
    #[inline]
    pub const fn from_u32(id: u32) -> Self {
        Symbol(id)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

/// Pre-interned symbols with fixed, known ids.
///
/// [`SymbolTable::new`] interns these names first, in order, so the
/// constants below are valid in every table. The compiler and VM use them
/// for names they need without having a table at hand (operator methods,
/// `method_missing`, `initialize`, ...).
pub mod well_known {
    use super::Symbol;

    pub const INITIALIZE: Symbol = Symbol(0);
    pub const METHOD_MISSING: Symbol = Symbol(1);
    pub const CONST_MISSING: Symbol = Symbol(2);
    pub const NEW: Symbol = Symbol(3);
    pub const CALL: Symbol = Symbol(4);
    pub const EACH: Symbol = Symbol(5);
    pub const TO_S: Symbol = Symbol(6);
    pub const INSPECT: Symbol = Symbol(7);
    pub const MESSAGE: Symbol = Symbol(8);
    pub const RAISE: Symbol = Symbol(9);
    pub const PLUS: Symbol = Symbol(10);
    pub const MINUS: Symbol = Symbol(11);
    pub const STAR: Symbol = Symbol(12);
    pub const SLASH: Symbol = Symbol(13);
    pub const PERCENT: Symbol = Symbol(14);
    pub const EQ: Symbol = Symbol(15);
    pub const LT: Symbol = Symbol(16);
    pub const LE: Symbol = Symbol(17);
    pub const GT: Symbol = Symbol(18);
    pub const GE: Symbol = Symbol(19);
    pub const AREF: Symbol = Symbol(20);
    pub const ASET: Symbol = Symbol(21);
    pub const LSHIFT: Symbol = Symbol(22);
    pub const CMP: Symbol = Symbol(23);
    pub const NOT: Symbol = Symbol(24);
    pub const NEQ: Symbol = Symbol(25);
    pub const UMINUS: Symbol = Symbol(26);
    pub const CASE_EQ: Symbol = Symbol(27);

    /// Names in id order. Must stay in sync with the constants above;
    /// `SymbolTable::new` interns them in this order and a unit test pins
    /// the correspondence.
    pub(crate) const NAMES: &[&str] = &[
        "initialize",
        "method_missing",
        "const_missing",
        "new",
        "call",
        "each",
        "to_s",
        "inspect",
        "message",
        "raise",
        "+",
        "-",
        "*",
        "/",
        "%",
        "==",
        "<",
        "<=",
        ">",
        ">=",
        "[]",
        "[]=",
        "<<",
        "<=>",
        "!",
        "!=",
        "-@",
        "===",
    ];
}

/// Intern table mapping names to stable small integer ids.
///
/// Backed by an insertion-ordered set, so the id of a name is its insertion
/// index: both directions of the mapping are O(1).
pub struct SymbolTable {
    names: IndexSet<Box<str>, SymbolHasher>,
}

impl SymbolTable {
    /// Create a table with all [`well_known`] symbols pre-interned.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            names: IndexSet::with_capacity_and_hasher(256, SymbolHasher::default()),
        };
        for name in well_known::NAMES {
            table.intern(name);
        }
        table
    }

    /// Intern a name, returning its symbol. Idempotent: interning the same
    /// byte sequence twice yields the same id.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(idx) = self.names.get_index_of(name) {
            return Symbol(idx as u32);
        }
        let (idx, _) = self.names.insert_full(name.into());
        Symbol(idx as u32)
    }

    /// Look up a symbol without interning.
    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        self.names.get_index_of(name).map(|idx| Symbol(idx as u32))
    }

    /// The name of an interned symbol.
    pub fn name(&self, sym: Symbol) -> &str {
        self.names
            .get_index(sym.0 as usize)
            .map(|s| s.as_ref())
            .unwrap_or("<invalid symbol>")
    }

    /// Fallible variant of [`name`](Self::name), for host-facing lookups.
    pub fn try_name(&self, sym: Symbol) -> UtilResult<&str> {
        self.names
            .get_index(sym.0 as usize)
            .map(|s| s.as_ref())
            .ok_or(SymbolError::NotFound { id: sym.0 })
    }

    /// Number of interned names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate `(Symbol, name)` pairs in id order. Used only for
    /// diagnostics; the table is never a GC root.
    pub fn iter(&self) -> impl Iterator<Item = (Symbol, &str)> {
        self.names
            .iter()
            .enumerate()
            .map(|(idx, name)| (Symbol(idx as u32), name.as_ref()))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_intern_same_name() {
        let mut t = SymbolTable::new();
        let s1 = t.intern("hello");
        let s2 = t.intern("hello");
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_intern_different_names() {
        let mut t = SymbolTable::new();
        let s1 = t.intern("hello");
        let s2 = t.intern("world");
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_name_round_trip() {
        let mut t = SymbolTable::new();
        let s = t.intern("some_method");
        assert_eq!(t.name(s), "some_method");
        assert_eq!(t.intern("some_method"), s);
    }

    #[test]
    fn test_well_known_ids_are_stable() {
        let t = SymbolTable::new();
        for (idx, name) in well_known::NAMES.iter().enumerate() {
            assert_eq!(t.name(Symbol(idx as u32)), *name);
        }
        assert_eq!(t.name(well_known::METHOD_MISSING), "method_missing");
        assert_eq!(t.name(well_known::PLUS), "+");
        assert_eq!(t.name(well_known::ASET), "[]=");
        assert_eq!(t.name(well_known::CASE_EQ), "===");
    }

    #[test]
    fn test_lookup_does_not_intern() {
        let mut t = SymbolTable::new();
        assert_eq!(t.lookup("zzz_not_interned"), None);
        let len = t.len();
        let s = t.intern("zzz_not_interned");
        assert_eq!(t.lookup("zzz_not_interned"), Some(s));
        assert_eq!(t.len(), len + 1);
    }

    #[test]
    fn test_try_name_invalid() {
        let t = SymbolTable::new();
        assert!(t.try_name(Symbol::from_u32(u32::MAX)).is_err());
    }

    #[test]
    fn test_empty_and_unicode_names() {
        let mut t = SymbolTable::new();
        let empty = t.intern("");
        assert_eq!(t.name(empty), "");
        let uni = t.intern("変数");
        assert_eq!(t.name(uni), "変数");
    }

    // intern(name(s)) == s for every symbol a program can produce
    #[quickcheck]
    fn prop_intern_name_identity(names: Vec<String>) -> bool {
        let mut t = SymbolTable::new();
        let syms: Vec<Symbol> = names.iter().map(|n| t.intern(n)).collect();
        syms.iter().all(|&s| {
            let name = t.name(s).to_string();
            t.intern(&name) == s
        })
    }
}
