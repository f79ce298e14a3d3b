//! berylc-par - AST Node Definitions
//!
//! Every syntactic form is a distinct [`NodeKind`] variant so the code
//! generator can dispatch without re-inspecting token shapes. Nodes carry
//! their source line for bytecode line tables; the filename is tracked
//! once per compilation unit.

/// A segment of a string-like literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StrSeg {
    /// Literal text.
    Lit(String),
    /// Interpolated expression.
    Node(Box<Node>),
}

/// Method / block / lambda parameter list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    pub required: Vec<String>,
    /// Optional parameters with their default-value expressions.
    pub optional: Vec<(String, Node)>,
    /// `*rest`; `Some(None)` is a bare `*`.
    pub rest: Option<Option<String>>,
    /// Required parameters after the rest.
    pub post: Vec<String>,
    /// `&block`.
    pub block: Option<String>,
}

impl Params {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty()
            && self.optional.is_empty()
            && self.rest.is_none()
            && self.post.is_empty()
            && self.block.is_none()
    }
}

/// One `rescue` clause of a begin/def body.
#[derive(Debug, Clone, PartialEq)]
pub struct RescueClause {
    /// Exception class expressions; empty means the standard error class.
    pub classes: Vec<Node>,
    /// Assignment target for `=> e`.
    pub var: Option<Box<Node>>,
    pub body: Vec<Node>,
}

/// A block literal attached to a call (`{ |x| .. }` / `do .. end`).
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub params: Params,
    pub body: Vec<Node>,
    /// Locals introduced in the block's scope (params included).
    pub locals: Vec<String>,
    pub line: u32,
}

/// A node with its source line.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub line: u32,
}

impl Node {
    pub fn new(kind: NodeKind, line: u32) -> Self {
        Node { kind, line }
    }

    /// True for forms that may appear on the left of an assignment.
    pub fn assignable(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::LVar(_)
                | NodeKind::IVar(_)
                | NodeKind::CVar(_)
                | NodeKind::GVar(_)
                | NodeKind::Const(_)
                | NodeKind::Colon2 { .. }
                | NodeKind::Splat(_)
        ) || self.is_attr_or_index_call()
    }

    fn is_attr_or_index_call(&self) -> bool {
        match &self.kind {
            NodeKind::Call {
                recv: Some(_),
                args,
                block,
                block_arg,
                name,
            } => block.is_none() && block_arg.is_none() && (args.is_empty() || name == "[]"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // --- literals -----------------------------------------------------
    Int { value: i64, base: u8 },
    Float(f64),
    Str(Vec<StrSeg>),
    XStr(Vec<StrSeg>),
    Regexp { parts: Vec<StrSeg>, flags: String },
    Sym(String),
    DSym(Vec<StrSeg>),
    Words(Vec<String>),
    Symbols(Vec<String>),
    Nil,
    True,
    False,
    SelfRef,

    // --- variables ----------------------------------------------------
    LVar(String),
    IVar(String),
    CVar(String),
    GVar(String),
    Const(String),
    /// `base::Name`
    Colon2 { base: Box<Node>, name: String },
    /// `::Name`
    Colon3(String),
    BackRef(char),
    NthRef(u8),

    // --- collections --------------------------------------------------
    Array(Vec<Node>),
    Hash(Vec<(Node, Node)>),
    Splat(Box<Node>),

    // --- control flow -------------------------------------------------
    If {
        cond: Box<Node>,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    Case {
        subject: Option<Box<Node>>,
        whens: Vec<(Vec<Node>, Vec<Node>)>,
        else_body: Vec<Node>,
    },
    While {
        cond: Box<Node>,
        body: Vec<Node>,
        /// `until` inverts the test.
        until: bool,
    },
    For {
        vars: Vec<Node>,
        iter: Box<Node>,
        body: Vec<Node>,
    },
    Break(Option<Box<Node>>),
    Next(Option<Box<Node>>),
    Redo,
    Retry,
    Return(Option<Box<Node>>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),

    // --- definitions --------------------------------------------------
    Def {
        name: String,
        params: Params,
        body: Vec<Node>,
        rescues: Vec<RescueClause>,
        ensure_body: Option<Vec<Node>>,
        locals: Vec<String>,
    },
    /// `def recv.name`
    SDef {
        recv: Box<Node>,
        name: String,
        params: Params,
        body: Vec<Node>,
        locals: Vec<String>,
    },
    ClassDef {
        /// `nil` base means lexically enclosing scope.
        base: Option<Box<Node>>,
        name: String,
        /// `::Name` form.
        absolute: bool,
        superclass: Option<Box<Node>>,
        body: Vec<Node>,
        locals: Vec<String>,
    },
    ModuleDef {
        base: Option<Box<Node>>,
        name: String,
        absolute: bool,
        body: Vec<Node>,
        locals: Vec<String>,
    },
    /// `class << expr`
    SClassDef {
        expr: Box<Node>,
        body: Vec<Node>,
        locals: Vec<String>,
    },
    Alias {
        new_name: String,
        old_name: String,
    },
    Undef(Vec<String>),

    // --- calls ----------------------------------------------------------
    Call {
        /// `None` is a self-call (fcall).
        recv: Option<Box<Node>>,
        name: String,
        args: Vec<Node>,
        block_arg: Option<Box<Node>>,
        block: Option<Box<BlockNode>>,
    },
    Super {
        /// `None` means zsuper: forward the current arguments.
        args: Option<Vec<Node>>,
        block_arg: Option<Box<Node>>,
        block: Option<Box<BlockNode>>,
    },
    Yield(Vec<Node>),

    // --- binding --------------------------------------------------------
    Lambda(Box<BlockNode>),

    // --- assignment -----------------------------------------------------
    Assign {
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    MAssign {
        pre: Vec<Node>,
        /// `Some(None)` is a bare `*`.
        splat: Option<Option<Box<Node>>>,
        post: Vec<Node>,
        rhs: Box<Node>,
    },
    OpAssign {
        lhs: Box<Node>,
        op: String,
        rhs: Box<Node>,
    },

    // --- exception scaffolding -----------------------------------------
    Begin {
        body: Vec<Node>,
        rescues: Vec<RescueClause>,
        else_body: Vec<Node>,
        ensure_body: Option<Vec<Node>>,
    },

    // --- ranges and the rest -------------------------------------------
    Dot2(Box<Node>, Box<Node>),
    Dot3(Box<Node>, Box<Node>),
    /// `END { ... }`
    PostExe(Vec<Node>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, 1)
    }

    #[test]
    fn test_assignable() {
        assert!(node(NodeKind::LVar("a".into())).assignable());
        assert!(node(NodeKind::IVar("a".into())).assignable());
        assert!(node(NodeKind::Const("A".into())).assignable());
        assert!(!node(NodeKind::Int { value: 1, base: 10 }).assignable());
        // a.b (attribute form)
        assert!(node(NodeKind::Call {
            recv: Some(Box::new(node(NodeKind::LVar("a".into())))),
            name: "b".into(),
            args: vec![],
            block_arg: None,
            block: None,
        })
        .assignable());
        // a.b(1) is not assignable
        assert!(!node(NodeKind::Call {
            recv: Some(Box::new(node(NodeKind::LVar("a".into())))),
            name: "b".into(),
            args: vec![node(NodeKind::Nil)],
            block_arg: None,
            block: None,
        })
        .assignable());
    }

    #[test]
    fn test_index_call_assignable() {
        let call = node(NodeKind::Call {
            recv: Some(Box::new(node(NodeKind::LVar("a".into())))),
            name: "[]".into(),
            args: vec![node(NodeKind::Int { value: 0, base: 10 })],
            block_arg: None,
            block: None,
        });
        assert!(call.assignable());
    }

    #[test]
    fn test_params_is_empty() {
        assert!(Params::default().is_empty());
        let p = Params {
            required: vec!["a".into()],
            ..Params::default()
        };
        assert!(!p.is_empty());
    }
}
