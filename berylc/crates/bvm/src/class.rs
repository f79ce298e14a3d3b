//! Class, module and method-table data.
//!
//! The class graph is a single-`super`-link chain. Including a module
//! splices an I-class wrapper above the including class; singleton
//! classes are inserted on demand between an object and its nominal
//! class. Method lookup walks the chain and, for an I-class, consults
//! the wrapped module's table.

use berylc_bc::ArgSpec;
use berylc_util::Symbol;
use indexmap::IndexMap;

use crate::obj::VType;
use crate::object::IvTable;
use crate::state::NativeFn;
use crate::value::ObjRef;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Module,
    /// Inclusion wrapper; `origin` points at the wrapped module.
    IClass,
    Singleton,
}

impl ClassKind {
    pub fn vtype(self) -> VType {
        match self {
            ClassKind::Class => VType::Class,
            ClassKind::Module => VType::Module,
            ClassKind::IClass => VType::IClass,
            ClassKind::Singleton => VType::SClass,
        }
    }
}

/// A method-table entry: a native function with its argument spec, or a
/// bytecode proc object.
#[derive(Clone, Copy, Debug)]
pub enum MethodEntry {
    Native(NativeFn, ArgSpec),
    BProc(ObjRef),
    /// Tombstone left by `undef_method`.
    Undefined,
}

#[derive(Debug)]
pub struct ClassData {
    pub kind: ClassKind,
    /// Superclass link; `None` at the root.
    pub superclass: Option<ObjRef>,
    /// Method table: symbol → entry.
    pub mt: IndexMap<Symbol, MethodEntry>,
    /// Constants, class variables, plain ivars; split by spelling.
    pub iv: IvTable,
    /// Shape produced by `new` for instances of this class.
    pub instance_tt: VType,
    /// The wrapped module, for I-classes; the attached object's class
    /// for singleton classes.
    pub origin: Option<ObjRef>,
    /// Constant name, once assigned under one.
    pub name: Option<Symbol>,
}

impl ClassData {
    pub fn new_class(superclass: Option<ObjRef>) -> Self {
        ClassData {
            kind: ClassKind::Class,
            superclass,
            mt: IndexMap::new(),
            iv: IvTable::new(),
            instance_tt: VType::Object,
            origin: None,
            name: None,
        }
    }

    pub fn new_module() -> Self {
        ClassData {
            kind: ClassKind::Module,
            superclass: None,
            mt: IndexMap::new(),
            iv: IvTable::new(),
            instance_tt: VType::Object,
            origin: None,
            name: None,
        }
    }

    pub fn new_iclass(module: ObjRef, superclass: Option<ObjRef>) -> Self {
        ClassData {
            kind: ClassKind::IClass,
            superclass,
            mt: IndexMap::new(),
            iv: IvTable::new(),
            instance_tt: VType::Object,
            origin: Some(module),
            name: None,
        }
    }

    pub fn new_singleton(superclass: Option<ObjRef>) -> Self {
        ClassData {
            kind: ClassKind::Singleton,
            superclass,
            mt: IndexMap::new(),
            iv: IvTable::new(),
            instance_tt: VType::Object,
            origin: None,
            name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_vtype() {
        assert_eq!(ClassKind::Class.vtype(), VType::Class);
        assert_eq!(ClassKind::Module.vtype(), VType::Module);
        assert_eq!(ClassKind::IClass.vtype(), VType::IClass);
        assert_eq!(ClassKind::Singleton.vtype(), VType::SClass);
    }

    #[test]
    fn test_new_class_shape() {
        let c = ClassData::new_class(None);
        assert_eq!(c.kind, ClassKind::Class);
        assert_eq!(c.instance_tt, VType::Object);
        assert!(c.mt.is_empty());
    }
}
