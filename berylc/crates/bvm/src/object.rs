//! Instance-variable tables.
//!
//! An object's ivar table doubles, on classes, as the constant and
//! class-variable table: the symbol's spelling (`@@x`, uppercase, `@x`)
//! decides which namespace a name belongs to. Insertion order is
//! preserved for iteration.

use berylc_util::Symbol;
use indexmap::IndexMap;

use crate::value::Value;

/// Symbol-keyed slot table.
#[derive(Debug, Default)]
pub struct IvTable {
    slots: IndexMap<Symbol, Value>,
}

impl IvTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sym: Symbol) -> Option<Value> {
        self.slots.get(&sym).copied()
    }

    /// Raw insert. Callers that may be storing a heap pointer into a
    /// black object go through `State::iv_set`, which applies the field
    /// write barrier first.
    pub fn set(&mut self, sym: Symbol, value: Value) {
        self.slots.insert(sym, value);
    }

    pub fn delete(&mut self, sym: Symbol) -> Option<Value> {
        self.slots.shift_remove(&sym)
    }

    pub fn contains(&self, sym: Symbol) -> bool {
        self.slots.contains_key(&sym)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Symbol, Value)> + '_ {
        self.slots.iter().map(|(s, v)| (*s, *v))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Shallow copy, used by `dup`/`clone`.
    pub fn copied(&self) -> IvTable {
        IvTable {
            slots: self.slots.clone(),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.slots.values().copied()
    }
}

/// Namespace classification by spelling.
pub fn name_kind(name: &str) -> NameKind {
    if name.starts_with("@@") {
        NameKind::ClassVar
    } else if name.starts_with('@') {
        NameKind::IVar
    } else if name.starts_with(char::is_uppercase) {
        NameKind::Const
    } else if name.starts_with('$') {
        NameKind::Global
    } else {
        NameKind::Local
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NameKind {
    IVar,
    ClassVar,
    Const,
    Global,
    Local,
}

#[cfg(test)]
mod tests {
    use super::*;
    use berylc_util::SymbolTable;

    #[test]
    fn test_insert_lookup_delete() {
        let mut t = SymbolTable::new();
        let a = t.intern("@a");
        let b = t.intern("@b");
        let mut iv = IvTable::new();
        iv.set(a, Value::Int(1));
        iv.set(b, Value::Int(2));
        assert_eq!(iv.get(a), Some(Value::Int(1)));
        assert_eq!(iv.len(), 2);
        assert_eq!(iv.delete(a), Some(Value::Int(1)));
        assert_eq!(iv.get(a), None);
    }

    #[test]
    fn test_iteration_preserves_insertion_order() {
        let mut t = SymbolTable::new();
        let syms: Vec<_> = ["@z", "@a", "@m"].iter().map(|s| t.intern(s)).collect();
        let mut iv = IvTable::new();
        for (i, s) in syms.iter().enumerate() {
            iv.set(*s, Value::Int(i as i64));
        }
        let order: Vec<_> = iv.iter().map(|(s, _)| s).collect();
        assert_eq!(order, syms);
    }

    #[test]
    fn test_name_kind() {
        assert_eq!(name_kind("@@count"), NameKind::ClassVar);
        assert_eq!(name_kind("@name"), NameKind::IVar);
        assert_eq!(name_kind("Constant"), NameKind::Const);
        assert_eq!(name_kind("$global"), NameKind::Global);
        assert_eq!(name_kind("local"), NameKind::Local);
    }
}
