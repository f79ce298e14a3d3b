//! Expression parsing: Pratt core, unary/postfix handling, primaries,
//! and call-argument lists.
//!
//! Binding powers, lowest to highest: range, `||`, `&&`, equality,
//! comparison, bitwise or/xor, bitwise and, shift, additive,
//! multiplicative, unary, `**` (right-associative). `and`/`or`/`not`
//! and assignment live below this table, in `lib.rs`.

use berylc_lex::Token;

use crate::ast::{BlockNode, Node, NodeKind, Params, StrSeg};
use crate::Parser;

/// Binding power levels. Left bp is even, right bp = left + 1 for
/// left-associative operators; `**` flips the pair.
mod bp {
    pub const RANGE: (u8, u8) = (4, 5);
    pub const OROR: (u8, u8) = (6, 7);
    pub const ANDAND: (u8, u8) = (8, 9);
    pub const EQUALITY: (u8, u8) = (10, 11);
    pub const COMPARISON: (u8, u8) = (12, 13);
    pub const BIT_OR: (u8, u8) = (14, 15);
    pub const BIT_AND: (u8, u8) = (16, 17);
    pub const SHIFT: (u8, u8) = (18, 19);
    pub const ADDITIVE: (u8, u8) = (20, 21);
    pub const MULTIPLICATIVE: (u8, u8) = (22, 23);
    pub const UNARY: u8 = 24;
    pub const POW: (u8, u8) = (27, 26);
}

impl<'a> Parser<'a> {
    /// Ternary conditional level.
    pub(crate) fn parse_ternary(&mut self) -> Option<Node> {
        let cond = self.parse_binop(0)?;
        if !self.eat(&Token::Question) {
            return Some(cond);
        }
        let line = self.line();
        self.skip_newlines();
        let then_val = self.parse_ternary()?;
        self.skip_newlines();
        self.expect(&Token::Colon, "ternary expression");
        self.skip_newlines();
        let else_val = self.parse_ternary()?;
        Some(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then_body: vec![then_val],
                else_body: vec![else_val],
            },
            line,
        ))
    }

    fn infix_bp(token: &Token) -> Option<(u8, u8)> {
        use Token::*;
        Some(match token {
            DotDot | DotDotDot => bp::RANGE,
            PipePipe => bp::OROR,
            AmpAmp => bp::ANDAND,
            EqEq | Neq | EqEqEq | Match | Cmp => bp::EQUALITY,
            Lt | Le | Gt | Ge => bp::COMPARISON,
            Pipe | Caret => bp::BIT_OR,
            Amp => bp::BIT_AND,
            LShift | RShift => bp::SHIFT,
            Plus | Minus => bp::ADDITIVE,
            Star | Slash | Percent => bp::MULTIPLICATIVE,
            Pow => bp::POW,
            _ => return None,
        })
    }

    /// Pratt loop over binary operators.
    pub(crate) fn parse_binop(&mut self, min_bp: u8) -> Option<Node> {
        let mut lhs = self.parse_unary()?;
        loop {
            let token = self.peek().clone();
            let Some((lbp, rbp)) = Self::infix_bp(&token) else {
                break;
            };
            if lbp < min_bp {
                break;
            }
            let line = self.line();
            self.advance();
            self.skip_newlines();
            let rhs = self.parse_binop(rbp)?;
            lhs = match token {
                Token::AmpAmp => Node::new(NodeKind::And(Box::new(lhs), Box::new(rhs)), line),
                Token::PipePipe => Node::new(NodeKind::Or(Box::new(lhs), Box::new(rhs)), line),
                Token::DotDot => Node::new(NodeKind::Dot2(Box::new(lhs), Box::new(rhs)), line),
                Token::DotDotDot => Node::new(NodeKind::Dot3(Box::new(lhs), Box::new(rhs)), line),
                op => {
                    let name = op.to_string();
                    Node::new(
                        NodeKind::Call {
                            recv: Some(Box::new(lhs)),
                            name,
                            args: vec![rhs],
                            block_arg: None,
                            block: None,
                        },
                        line,
                    )
                }
            };
        }
        Some(lhs)
    }

    fn parse_unary(&mut self) -> Option<Node> {
        let line = self.line();
        match self.peek() {
            Token::Minus => {
                self.advance();
                // fold a numeric literal unless `**` binds tighter
                match (self.peek().clone(), self.peek_nth(1).clone()) {
                    (Token::Int { value, base }, next) if next != Token::Pow => {
                        self.advance();
                        return self
                            .parse_postfix_from(Node::new(NodeKind::Int { value: -value, base }, line));
                    }
                    (Token::Float(v), next) if next != Token::Pow => {
                        self.advance();
                        return self.parse_postfix_from(Node::new(NodeKind::Float(-v), line));
                    }
                    _ => {}
                }
                let operand = self.parse_binop(bp::UNARY)?;
                Some(Node::new(
                    NodeKind::Call {
                        recv: Some(Box::new(operand)),
                        name: "-@".into(),
                        args: vec![],
                        block_arg: None,
                        block: None,
                    },
                    line,
                ))
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            Token::Not => {
                self.advance();
                let operand = self.parse_unary()?;
                Some(Node::new(NodeKind::Not(Box::new(operand)), line))
            }
            Token::Tilde => {
                self.advance();
                let operand = self.parse_unary()?;
                Some(Node::new(
                    NodeKind::Call {
                        recv: Some(Box::new(operand)),
                        name: "~".into(),
                        args: vec![],
                        block_arg: None,
                        block: None,
                    },
                    line,
                ))
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix_from(primary)
            }
        }
    }

    /// Postfix chain: `.name`, `::Name`, `[index]`, attached blocks.
    pub(crate) fn parse_postfix_from(&mut self, mut node: Node) -> Option<Node> {
        loop {
            let line = self.line();
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    self.skip_newlines();
                    let name = match self.advance() {
                        Token::Ident(name) | Token::Const(name) => name,
                        other => {
                            self.error_here(&format!("expected method name after '.', found {other}"));
                            return None;
                        }
                    };
                    node = self.finish_call(Some(Box::new(node)), name, line)?;
                }
                Token::ColonColon => {
                    if let Token::Const(_) = self.peek_nth(1) {
                        // constant path unless parentheses follow
                        if matches!(self.peek_nth(2), Token::LParen) {
                            self.advance();
                            let name = match self.advance() {
                                Token::Const(name) => name,
                                _ => unreachable!("checked above"),
                            };
                            node = self.finish_call(Some(Box::new(node)), name, line)?;
                        } else {
                            self.advance();
                            let name = match self.advance() {
                                Token::Const(name) => name,
                                _ => unreachable!("checked above"),
                            };
                            node = Node::new(
                                NodeKind::Colon2 {
                                    base: Box::new(node),
                                    name,
                                },
                                line,
                            );
                        }
                    } else {
                        self.advance();
                        let name = match self.advance() {
                            Token::Ident(name) => name,
                            other => {
                                self.error_here(&format!(
                                    "expected method or constant name after '::', found {other}"
                                ));
                                return None;
                            }
                        };
                        node = self.finish_call(Some(Box::new(node)), name, line)?;
                    }
                }
                Token::LBracket => {
                    self.advance();
                    self.skip_newlines();
                    let mut args = Vec::new();
                    while !self.check(&Token::RBracket) {
                        args.push(self.parse_argument()?);
                        self.skip_newlines();
                        if !self.eat(&Token::Comma) {
                            break;
                        }
                        self.skip_newlines();
                    }
                    self.expect(&Token::RBracket, "index expression");
                    node = Node::new(
                        NodeKind::Call {
                            recv: Some(Box::new(node)),
                            name: "[]".into(),
                            args,
                            block_arg: None,
                            block: None,
                        },
                        line,
                    );
                }
                _ => break,
            }
        }
        Some(node)
    }

    /// Arguments and block for a just-parsed method name.
    fn finish_call(&mut self, recv: Option<Box<Node>>, name: String, line: u32) -> Option<Node> {
        let (args, block_arg) = if self.check(&Token::LParen) {
            self.parse_paren_args()?
        } else if self.can_start_command_arg() {
            self.parse_command_args()?
        } else {
            (Vec::new(), None)
        };
        let block = self.try_parse_block()?;
        Some(Node::new(
            NodeKind::Call {
                recv,
                name,
                args,
                block_arg,
                block,
            },
            line,
        ))
    }

    /// `( args )`, returning positional args and an optional `&block`.
    pub(crate) fn parse_paren_args(&mut self) -> Option<(Vec<Node>, Option<Box<Node>>)> {
        self.expect(&Token::LParen, "argument list");
        self.skip_newlines();
        let mut args = Vec::new();
        let mut block_arg = None;
        let mut hash_pairs: Vec<(Node, Node)> = Vec::new();
        while !self.check(&Token::RParen) {
            if self.eat(&Token::Amp) {
                let expr = self.parse_ternary()?;
                block_arg = Some(Box::new(expr));
            } else {
                self.parse_arg_or_pair(&mut args, &mut hash_pairs)?;
            }
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        if !hash_pairs.is_empty() {
            let line = self.line();
            args.push(Node::new(NodeKind::Hash(hash_pairs), line));
        }
        self.expect(&Token::RParen, "argument list");
        Some((args, block_arg))
    }

    /// Paren-less arguments after a command-style call.
    pub(crate) fn parse_command_args(&mut self) -> Option<(Vec<Node>, Option<Box<Node>>)> {
        let mut args = Vec::new();
        let mut block_arg = None;
        let mut hash_pairs: Vec<(Node, Node)> = Vec::new();
        loop {
            if self.eat(&Token::Amp) {
                let expr = self.parse_ternary()?;
                block_arg = Some(Box::new(expr));
            } else {
                self.parse_arg_or_pair(&mut args, &mut hash_pairs)?;
            }
            if !self.eat(&Token::Comma) {
                break;
            }
            self.skip_newlines();
        }
        if !hash_pairs.is_empty() {
            let line = self.line();
            args.push(Node::new(NodeKind::Hash(hash_pairs), line));
        }
        Some((args, block_arg))
    }

    /// One argument; `k => v` pairs divert into the trailing hash.
    fn parse_arg_or_pair(
        &mut self,
        args: &mut Vec<Node>,
        hash_pairs: &mut Vec<(Node, Node)>,
    ) -> Option<()> {
        let line = self.line();
        if self.eat(&Token::Star) {
            let inner = self.parse_ternary()?;
            args.push(Node::new(NodeKind::Splat(Box::new(inner)), line));
            return Some(());
        }
        let expr = self.parse_ternary()?;
        if self.eat(&Token::FatArrow) {
            self.skip_newlines();
            let value = self.parse_ternary()?;
            hash_pairs.push((expr, value));
        } else {
            args.push(expr);
        }
        Some(())
    }

    /// True when the current token can begin a paren-less argument.
    ///
    /// `-`, `*` and `&` are ambiguous with their binary readings; they
    /// start an argument only when glued to the token after them
    /// (`puts -1`, `foo *args`), never when spaced out (`size - 1`).
    pub(crate) fn can_start_command_arg(&self) -> bool {
        use Token::*;
        match self.peek() {
            Int { .. } | Float(_) | Str(_) | RawStr(_) | XStr(_) | Regexp { .. } | Symbol(_)
            | DSymbol(_) | Words(_) | Symbols(_) | Ident(_) | Const(_) | IVar(_) | CVar(_)
            | GVar(_) | BackRef(_) | NthRef(_) | KwSelf | KwNil | KwTrue | KwFalse | LBracket
            | Arrow | Not => true,
            Minus => {
                matches!(self.peek_nth(1), Int { .. } | Float(_)) && self.glued_to_next()
            }
            Star | Amp => {
                matches!(
                    self.peek_nth(1),
                    Ident(_) | IVar(_) | GVar(_) | Symbol(_) | Const(_) | LBracket
                ) && self.glued_to_next()
            }
            _ => false,
        }
    }

    /// No whitespace between the current token and the next.
    fn glued_to_next(&self) -> bool {
        let here = self.span();
        let next = self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].span;
        here.end == next.start
    }

    /// Attach `{ ... }` or `do ... end` if present.
    pub(crate) fn try_parse_block(&mut self) -> Option<Option<Box<BlockNode>>> {
        if self.check(&Token::LBrace) {
            self.advance();
            Some(Some(Box::new(self.parse_block_body(&Token::RBrace)?)))
        } else if self.check(&Token::KwDo) {
            self.advance();
            Some(Some(Box::new(self.parse_block_body(&Token::KwEnd)?)))
        } else {
            Some(None)
        }
    }

    /// Block body after the opener, through the matching closer.
    pub(crate) fn parse_block_body(&mut self, closer: &Token) -> Option<BlockNode> {
        let line = self.line();
        self.push_scope(true);
        let params = self.parse_block_params();
        let body = self.parse_stmts(std::slice::from_ref(closer));
        self.expect(closer, "block body");
        let locals = self.pop_scope();
        Some(BlockNode {
            params,
            body,
            locals,
            line,
        })
    }

    /// `|a, b, *rest, &blk|` after a block opener. `||` lexes as one
    /// token and means an empty parameter list.
    fn parse_block_params(&mut self) -> Params {
        self.skip_newlines();
        if self.eat(&Token::PipePipe) {
            return Params::default();
        }
        if !self.eat(&Token::Pipe) {
            return Params::default();
        }
        let params = self.parse_params(&[Token::Pipe]);
        self.expect(&Token::Pipe, "block parameters");
        params
    }

    /// Shared parameter-list parser; stops before any token in `stop`.
    /// Declares every parameter as a local in the current scope.
    pub(crate) fn parse_params(&mut self, stop: &[Token]) -> Params {
        let mut params = Params::default();
        loop {
            self.skip_newlines();
            if stop.iter().any(|t| self.check(t)) || self.at_eof() {
                break;
            }
            match self.peek().clone() {
                Token::Star => {
                    self.advance();
                    if let Token::Ident(name) = self.peek().clone() {
                        self.advance();
                        self.declare_local(&name);
                        params.rest = Some(Some(name));
                    } else {
                        params.rest = Some(None);
                    }
                }
                Token::Amp => {
                    self.advance();
                    if let Token::Ident(name) = self.peek().clone() {
                        self.advance();
                        self.declare_local(&name);
                        params.block = Some(name);
                    } else {
                        self.error_here("expected block parameter name after '&'");
                    }
                }
                Token::Ident(name) => {
                    self.advance();
                    self.declare_local(&name);
                    if self.eat(&Token::Assign) {
                        match self.parse_ternary() {
                            Some(default) => params.optional.push((name, default)),
                            None => break,
                        }
                    } else if params.rest.is_some() || !params.optional.is_empty() {
                        params.post.push(name);
                    } else {
                        params.required.push(name);
                    }
                }
                other => {
                    self.error_here(&format!("unexpected {other} in parameter list"));
                    self.advance();
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        params
    }

    /// A splat-capable argument used by array literals and indexes.
    pub(crate) fn parse_argument(&mut self) -> Option<Node> {
        let line = self.line();
        if self.eat(&Token::Star) {
            let inner = self.parse_ternary()?;
            return Some(Node::new(NodeKind::Splat(Box::new(inner)), line));
        }
        self.parse_ternary()
    }

    // -----------------------------------------------------------------
    // primaries
    // -----------------------------------------------------------------

    pub(crate) fn parse_primary(&mut self) -> Option<Node> {
        let line = self.line();
        match self.peek().clone() {
            Token::Int { value, base } => {
                self.advance();
                Some(Node::new(NodeKind::Int { value, base }, line))
            }
            Token::Float(v) => {
                self.advance();
                Some(Node::new(NodeKind::Float(v), line))
            }
            Token::RawStr(text) => {
                self.advance();
                Some(Node::new(NodeKind::Str(vec![StrSeg::Lit(text)]), line))
            }
            Token::Str(parts) => {
                self.advance();
                let segs = self.convert_str_parts(parts, line)?;
                Some(Node::new(NodeKind::Str(segs), line))
            }
            Token::XStr(parts) => {
                self.advance();
                let segs = self.convert_str_parts(parts, line)?;
                Some(Node::new(NodeKind::XStr(segs), line))
            }
            Token::Regexp { parts, flags } => {
                self.advance();
                let segs = self.convert_str_parts(parts, line)?;
                Some(Node::new(NodeKind::Regexp { parts: segs, flags }, line))
            }
            Token::Symbol(name) => {
                self.advance();
                Some(Node::new(NodeKind::Sym(name), line))
            }
            Token::DSymbol(parts) => {
                self.advance();
                let segs = self.convert_str_parts(parts, line)?;
                Some(Node::new(NodeKind::DSym(segs), line))
            }
            Token::Words(words) => {
                self.advance();
                Some(Node::new(NodeKind::Words(words), line))
            }
            Token::Symbols(words) => {
                self.advance();
                Some(Node::new(NodeKind::Symbols(words), line))
            }
            Token::KwNil => {
                self.advance();
                Some(Node::new(NodeKind::Nil, line))
            }
            Token::KwTrue => {
                self.advance();
                Some(Node::new(NodeKind::True, line))
            }
            Token::KwFalse => {
                self.advance();
                Some(Node::new(NodeKind::False, line))
            }
            Token::KwSelf => {
                self.advance();
                Some(Node::new(NodeKind::SelfRef, line))
            }
            Token::IVar(name) => {
                self.advance();
                Some(Node::new(NodeKind::IVar(name), line))
            }
            Token::CVar(name) => {
                self.advance();
                Some(Node::new(NodeKind::CVar(name), line))
            }
            Token::GVar(name) => {
                self.advance();
                Some(Node::new(NodeKind::GVar(name), line))
            }
            Token::BackRef(c) => {
                self.advance();
                Some(Node::new(NodeKind::BackRef(c), line))
            }
            Token::NthRef(n) => {
                self.advance();
                Some(Node::new(NodeKind::NthRef(n), line))
            }
            Token::Const(name) => {
                self.advance();
                // `Foo(...)` is a method call, `Foo` a constant
                if self.check(&Token::LParen) {
                    self.finish_call(None, name, line)
                } else {
                    Some(Node::new(NodeKind::Const(name), line))
                }
            }
            Token::ColonColon => {
                self.advance();
                match self.advance() {
                    Token::Const(name) => Some(Node::new(NodeKind::Colon3(name), line)),
                    other => {
                        self.error_here(&format!("expected constant after '::', found {other}"));
                        None
                    }
                }
            }
            Token::Ident(name) => {
                self.advance();
                let has_call_shape = self.check(&Token::LParen)
                    || self.check(&Token::LBrace)
                    || self.check(&Token::KwDo);
                if self.local_visible(&name) && !has_call_shape {
                    Some(Node::new(NodeKind::LVar(name), line))
                } else {
                    self.finish_call(None, name, line)
                }
            }
            Token::LParen => {
                self.advance();
                self.skip_terms();
                let body = self.parse_stmts(&[Token::RParen]);
                self.expect(&Token::RParen, "parenthesized expression");
                match body.len() {
                    0 => Some(Node::new(NodeKind::Nil, line)),
                    1 => Some(body.into_iter().next().expect("length checked")),
                    _ => Some(Node::new(
                        NodeKind::Begin {
                            body,
                            rescues: vec![],
                            else_body: vec![],
                            ensure_body: None,
                        },
                        line,
                    )),
                }
            }
            Token::LBracket => {
                self.advance();
                self.skip_newlines();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) && !self.at_eof() {
                    items.push(self.parse_argument()?);
                    self.skip_newlines();
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&Token::RBracket, "array literal");
                Some(Node::new(NodeKind::Array(items), line))
            }
            Token::LBrace => {
                self.advance();
                self.skip_newlines();
                let mut pairs = Vec::new();
                while !self.check(&Token::RBrace) && !self.at_eof() {
                    let key = self.parse_ternary()?;
                    self.skip_newlines();
                    self.expect(&Token::FatArrow, "hash literal");
                    self.skip_newlines();
                    let value = self.parse_ternary()?;
                    pairs.push((key, value));
                    self.skip_newlines();
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
                self.expect(&Token::RBrace, "hash literal");
                Some(Node::new(NodeKind::Hash(pairs), line))
            }
            Token::Arrow => self.parse_lambda(),
            Token::KwYield => {
                self.advance();
                let args = if self.check(&Token::LParen) {
                    self.parse_paren_args()?.0
                } else if self.can_start_command_arg() {
                    self.parse_command_args()?.0
                } else {
                    Vec::new()
                };
                Some(Node::new(NodeKind::Yield(args), line))
            }
            Token::KwSuper => self.parse_super(),
            Token::KwReturn => {
                self.advance();
                let value = self.parse_jump_value()?;
                Some(Node::new(NodeKind::Return(value), line))
            }
            Token::KwBreak => {
                self.advance();
                let value = self.parse_jump_value()?;
                Some(Node::new(NodeKind::Break(value), line))
            }
            Token::KwNext => {
                self.advance();
                let value = self.parse_jump_value()?;
                Some(Node::new(NodeKind::Next(value), line))
            }
            Token::KwRedo => {
                self.advance();
                Some(Node::new(NodeKind::Redo, line))
            }
            Token::KwRetry => {
                self.advance();
                Some(Node::new(NodeKind::Retry, line))
            }
            Token::KwIf => self.parse_if(false),
            Token::KwUnless => self.parse_if(true),
            Token::KwCase => self.parse_case(),
            Token::KwWhile => self.parse_while(false),
            Token::KwUntil => self.parse_while(true),
            Token::KwFor => self.parse_for(),
            Token::KwBegin => self.parse_begin(),
            Token::KwDef => self.parse_def(),
            Token::KwClass => self.parse_class(),
            Token::KwModule => self.parse_module(),
            Token::KwAlias => self.parse_alias(),
            Token::KwUndef => self.parse_undef(),
            Token::KwCapBegin => {
                self.error_here("BEGIN blocks are not supported");
                self.advance();
                None
            }
            Token::KwCapEnd => self.parse_post_exe(),
            other => {
                self.error_here(&format!("unexpected {other}"));
                None
            }
        }
    }

    /// Optional value after `return`/`break`/`next`.
    fn parse_jump_value(&mut self) -> Option<Option<Box<Node>>> {
        if self.can_start_command_arg() || self.check(&Token::LParen) {
            let line = self.line();
            let (mut args, _) = if self.check(&Token::LParen) {
                self.parse_paren_args()?
            } else {
                self.parse_command_args()?
            };
            let value = match args.len() {
                0 => None,
                1 => Some(Box::new(args.remove(0))),
                _ => Some(Box::new(Node::new(NodeKind::Array(args), line))),
            };
            Some(value)
        } else {
            Some(None)
        }
    }

    /// String token parts into AST segments; interpolations re-parse.
    pub(crate) fn convert_str_parts(
        &mut self,
        parts: Vec<berylc_lex::StrPart>,
        line: u32,
    ) -> Option<Vec<StrSeg>> {
        let mut segs = Vec::new();
        for part in parts {
            match part {
                berylc_lex::StrPart::Lit(text) => segs.push(StrSeg::Lit(text)),
                berylc_lex::StrPart::Interp(src) => {
                    let tokens = berylc_lex::tokenize(&src, self.diags);
                    // sub-parse sharing this parser's scope stack so
                    // interpolated locals resolve
                    let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
                    let saved_pos = std::mem::replace(&mut self.pos, 0);
                    let body = self.parse_stmts(&[]);
                    self.tokens = saved_tokens;
                    self.pos = saved_pos;
                    match body.len() {
                        0 => segs.push(StrSeg::Lit(String::new())),
                        1 => segs.push(StrSeg::Node(Box::new(
                            body.into_iter().next().expect("length checked"),
                        ))),
                        _ => segs.push(StrSeg::Node(Box::new(Node::new(
                            NodeKind::Begin {
                                body,
                                rescues: vec![],
                                else_body: vec![],
                                ensure_body: None,
                            },
                            line,
                        )))),
                    }
                }
            }
        }
        Some(segs)
    }
}
