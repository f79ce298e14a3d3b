//! Hash storage.
//!
//! Key equality follows the language's `eql?`: immediates compare by
//! tag and payload (floats by bits), strings by content, everything
//! else by identity. String keys are duplicated on insert so later
//! mutation of the original cannot corrupt the table; the duplicate is
//! the key object the table hands back when iterated.

use berylc_util::Symbol;
use indexmap::IndexMap;

use crate::object::IvTable;
use crate::value::{ObjRef, Value};

/// Hashable projection of a key value under `eql?` semantics.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HKey {
    Nil,
    True,
    False,
    Int(i64),
    /// Bit pattern, so `0.0` and `-0.0` stay distinct keys.
    Float(u64),
    Sym(Symbol),
    HostPtr(usize),
    /// String content, captured at insert time.
    Str(Box<str>),
    /// Everything else: identity.
    Obj(ObjRef),
}

#[derive(Debug, Default)]
pub struct HashData {
    /// Projection → (key object, value); insertion-ordered.
    entries: IndexMap<HKey, (Value, Value)>,
    pub iv: IvTable,
}

impl HashData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        HashData {
            entries: IndexMap::with_capacity(capacity),
            iv: IvTable::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &HKey) -> Option<Value> {
        self.entries.get(key).map(|(_, v)| *v)
    }

    pub fn contains(&self, key: &HKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert, keeping the first-seen key object on replacement.
    pub fn insert(&mut self, key: HKey, key_obj: Value, value: Value) {
        match self.entries.get_mut(&key) {
            Some(slot) => slot.1 = value,
            None => {
                self.entries.insert(key, (key_obj, value));
            }
        }
    }

    pub fn delete(&mut self, key: &HKey) -> Option<Value> {
        self.entries.shift_remove(key).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries.values().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.values().map(|(k, _)| *k)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.values().map(|(_, v)| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_immediate_keys() {
        let mut h = HashData::new();
        h.insert(HKey::Int(1), Value::Int(1), Value::Int(10));
        h.insert(HKey::Nil, Value::Nil, Value::Int(20));
        assert_eq!(h.get(&HKey::Int(1)), Some(Value::Int(10)));
        assert_eq!(h.get(&HKey::Nil), Some(Value::Int(20)));
        assert_eq!(h.get(&HKey::Int(2)), None);
    }

    #[test]
    fn test_string_keys_by_content() {
        let mut h = HashData::new();
        h.insert(HKey::Str("a".into()), Value::Nil, Value::Int(1));
        assert_eq!(h.get(&HKey::Str("a".into())), Some(Value::Int(1)));
        assert_eq!(h.get(&HKey::Str("b".into())), None);
    }

    #[test]
    fn test_float_keys_by_bits() {
        let mut h = HashData::new();
        h.insert(
            HKey::Float(0.0f64.to_bits()),
            Value::Float(0.0),
            Value::Int(1),
        );
        assert_eq!(h.get(&HKey::Float((-0.0f64).to_bits())), None);
    }

    #[test]
    fn test_replace_keeps_first_key_object() {
        let mut h = HashData::new();
        h.insert(HKey::Int(1), Value::Int(1), Value::Int(10));
        h.insert(HKey::Int(1), Value::Int(1), Value::Int(20));
        assert_eq!(h.len(), 1);
        assert_eq!(h.get(&HKey::Int(1)), Some(Value::Int(20)));
    }

    #[test]
    fn test_insertion_order_iteration() {
        let mut h = HashData::new();
        for i in [3i64, 1, 2] {
            h.insert(HKey::Int(i), Value::Int(i), Value::Int(i * 10));
        }
        let keys: Vec<_> = h.keys().collect();
        assert_eq!(keys, vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn test_delete() {
        let mut h = HashData::new();
        h.insert(HKey::Int(1), Value::Int(1), Value::Int(10));
        assert_eq!(h.delete(&HKey::Int(1)), Some(Value::Int(10)));
        assert!(h.is_empty());
    }
}
