//! Heap object layout.
//!
//! Every heap cell holds a [`GcHeader`] (color, class pointer) and one
//! [`ObjBody`] variant. The enum makes all cells equal-sized, which is
//! what lets pages hold a fixed count of cells with a free list.

use berylc_util::Symbol;

use crate::array::ArrayData;
use crate::class::ClassData;
use crate::fiber::FiberData;
use crate::hash::HashData;
use crate::object::IvTable;
use crate::proc_env::{EnvData, ProcData};
use crate::range::RangeData;
use crate::string::StrData;
use crate::value::ObjRef;

/// Tri-color state. White has two alternating variants so objects
/// allocated during sweep are safe from the current cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    WhiteA,
    WhiteB,
    Gray,
    Black,
}

impl Color {
    #[inline]
    pub fn is_white(self) -> bool {
        matches!(self, Color::WhiteA | Color::WhiteB)
    }
}

/// Per-object GC metadata.
#[derive(Clone, Copy, Debug)]
pub struct GcHeader {
    pub color: Color,
    /// The object's class; `None` only during bootstrap.
    pub class: Option<ObjRef>,
}

/// Host-owned pointer with a destructor, wrapped as a value.
pub struct HostData {
    pub ptr: usize,
    pub dfree: Option<fn(usize)>,
    pub iv: IvTable,
}

impl std::fmt::Debug for HostData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostData").field("ptr", &self.ptr).finish()
    }
}

/// A plain object: just an instance-variable table.
#[derive(Debug, Default)]
pub struct ObjectData {
    pub iv: IvTable,
}

/// The body of a heap cell.
#[derive(Debug)]
pub enum ObjBody {
    /// Free-list member; `next` links to the next free slot in the page.
    Free { next: Option<u16> },
    Object(ObjectData),
    Class(ClassData),
    Proc(ProcData),
    Env(EnvData),
    Array(ArrayData),
    Hash(HashData),
    Str(StrData),
    Range(RangeData),
    /// Exceptions are objects; the message lives in an ivar.
    Exception(ObjectData),
    Data(HostData),
    Fiber(FiberData),
}

impl ObjBody {
    /// The value-type tag used for dispatch tables and `new` shapes.
    pub fn vtype(&self) -> VType {
        match self {
            ObjBody::Free { .. } => VType::Free,
            ObjBody::Object(_) => VType::Object,
            ObjBody::Class(c) => c.kind.vtype(),
            ObjBody::Proc(_) => VType::Proc,
            ObjBody::Env(_) => VType::Env,
            ObjBody::Array(_) => VType::Array,
            ObjBody::Hash(_) => VType::Hash,
            ObjBody::Str(_) => VType::Str,
            ObjBody::Range(_) => VType::Range,
            ObjBody::Exception(_) => VType::Exception,
            ObjBody::Data(_) => VType::Data,
            ObjBody::Fiber(_) => VType::Fiber,
        }
    }
}

/// Type tags for heap values and class instance shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VType {
    Free,
    Object,
    Class,
    Module,
    IClass,
    SClass,
    Proc,
    Env,
    Array,
    Hash,
    Str,
    Range,
    Exception,
    Data,
    Fiber,
}

/// One heap cell.
#[derive(Debug)]
pub struct Cell {
    pub header: GcHeader,
    pub body: ObjBody,
}

impl Cell {
    pub fn free(next: Option<u16>) -> Cell {
        Cell {
            header: GcHeader {
                color: Color::WhiteA,
                class: None,
            },
            body: ObjBody::Free { next },
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        matches!(self.body, ObjBody::Free { .. })
    }
}

/// Name cache for diagnostics: classes carry their constant name once
/// assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassName(pub Option<Symbol>);
