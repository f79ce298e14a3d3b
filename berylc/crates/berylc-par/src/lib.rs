//! berylc-par - Parser (Syntactic Analyzer)
//!
//! A recursive-descent parser over the `berylc-lex` token stream with a
//! Pratt core for operator precedence (`expr` module) and dedicated
//! routines for definitions and compound statements (`items` module).
//!
//! # Scope tracking
//!
//! The parser maintains a stack of local-variable scopes so that a bare
//! identifier can be classified at parse time: a name assigned earlier in
//! the scope chain reads as a local variable, anything else is a method
//! call on `self`. Method definitions open an opaque scope; blocks and
//! lambdas open a transparent scope that can see outward, which is what
//! makes upvalue references possible downstream. `for` loops bind their
//! variables in the *enclosing* scope.
//!
//! # Error handling
//!
//! Errors accumulate in the shared [`Diagnostics`] sink (capped); the
//! parser synchronizes at statement boundaries and keeps going. When the
//! input ends inside an open construct the outcome is flagged
//! `incomplete`, which the REPL uses to keep reading lines.

pub mod ast;
mod expr;
mod items;

use berylc_lex::{Token, TokenWithSpan};
use berylc_util::{Diagnostics, Span};

pub use ast::{BlockNode, Node, NodeKind, Params, RescueClause, StrSeg};

/// A parsed compilation unit: top-level statements plus the locals of the
/// top-level scope.
#[derive(Debug)]
pub struct Program {
    pub body: Vec<Node>,
    pub locals: Vec<String>,
}

/// Result of a parse attempt.
#[derive(Debug)]
pub struct ParseOutcome {
    pub program: Program,
    /// True when the input ended inside an open construct (unterminated
    /// `def`/`if`/string/...); the REPL keeps accumulating lines.
    pub incomplete: bool,
}

/// Parse a whole source buffer.
pub fn parse_program(source: &str, diags: &mut Diagnostics) -> ParseOutcome {
    let tokens = berylc_lex::tokenize(source, diags);
    let mut parser = Parser::new(tokens, diags);
    parser.run()
}

/// One local-variable scope.
struct Scope {
    vars: Vec<String>,
    /// Transparent scopes (blocks, lambdas) can see enclosing locals.
    transparent: bool,
}

pub struct Parser<'a> {
    tokens: Vec<TokenWithSpan>,
    pos: usize,
    pub(crate) diags: &'a mut Diagnostics,
    scopes: Vec<Scope>,
    incomplete: bool,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: Vec<TokenWithSpan>, diags: &'a mut Diagnostics) -> Self {
        Parser {
            tokens,
            pos: 0,
            diags,
            scopes: Vec::new(),
            incomplete: false,
        }
    }

    fn run(&mut self) -> ParseOutcome {
        self.push_scope(false);
        let body = self.parse_stmts(&[]);
        if !self.check(&Token::Eof) {
            let msg = format!("unexpected {}", self.peek().clone());
            self.error_here(&msg);
        }
        let locals = self.pop_scope();
        // unterminated strings and heredocs surface as lexer errors;
        // they leave the input open just like an unclosed `def`
        let lexer_hit_eof = self
            .diags
            .iter()
            .any(|d| d.message.contains("end of input") || d.message.contains("end of file"));
        ParseOutcome {
            program: Program { body, locals },
            incomplete: self.incomplete || lexer_hit_eof,
        }
    }

    // ---------------------------------------------------------------
    // token plumbing
    // ---------------------------------------------------------------

    pub(crate) fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    pub(crate) fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].token
    }

    pub(crate) fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    pub(crate) fn line(&self) -> u32 {
        self.span().line
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    pub(crate) fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, token: &Token, context: &str) -> bool {
        if self.eat(token) {
            return true;
        }
        let msg = format!("expected {token} in {context}, found {}", self.peek().clone());
        self.error_here(&msg);
        false
    }

    pub(crate) fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    pub(crate) fn error_here(&mut self, message: &str) {
        if self.at_eof() {
            self.incomplete = true;
            self.diags
                .error(format!("{message} (unexpected end of input)"), self.span());
        } else {
            self.diags.error(message.to_string(), self.span());
        }
    }

    /// Skip ahead to a statement boundary after an error.
    pub(crate) fn synchronize(&mut self) {
        while !self.at_eof() {
            if matches!(
                self.peek(),
                Token::Newline | Token::Semicolon | Token::KwEnd
            ) {
                return;
            }
            self.advance();
        }
    }

    pub(crate) fn skip_terms(&mut self) {
        while matches!(self.peek(), Token::Newline | Token::Semicolon) {
            self.advance();
        }
    }

    pub(crate) fn skip_newlines(&mut self) {
        while matches!(self.peek(), Token::Newline) {
            self.advance();
        }
    }

    // ---------------------------------------------------------------
    // scopes and locals
    // ---------------------------------------------------------------

    pub(crate) fn push_scope(&mut self, transparent: bool) {
        self.scopes.push(Scope {
            vars: Vec::new(),
            transparent,
        });
    }

    pub(crate) fn pop_scope(&mut self) -> Vec<String> {
        self.scopes.pop().map(|s| s.vars).unwrap_or_default()
    }

    /// Register a local in the innermost scope if it is not already
    /// visible.
    pub(crate) fn declare_local(&mut self, name: &str) {
        if self.local_visible(name) {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.push(name.to_string());
        }
    }

    /// Whether `name` resolves as a local here, walking out through
    /// transparent scopes.
    pub(crate) fn local_visible(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.vars.iter().any(|v| v == name) {
                return true;
            }
            if !scope.transparent {
                break;
            }
        }
        false
    }

    // ---------------------------------------------------------------
    // statements
    // ---------------------------------------------------------------

    /// Parse statements until one of `stop` (or EOF). Stop tokens are
    /// not consumed.
    pub(crate) fn parse_stmts(&mut self, stop: &[Token]) -> Vec<Node> {
        let mut body = Vec::new();
        self.skip_terms();
        while !self.at_eof() && !stop.iter().any(|t| self.check(t)) {
            let before = self.pos;
            match self.parse_stmt() {
                Some(node) => body.push(node),
                None => self.synchronize(),
            }
            if self.pos == before {
                // no forward progress; drop the offending token
                self.advance();
            }
            self.skip_terms();
        }
        body
    }

    /// One statement: an expression plus any modifiers.
    pub(crate) fn parse_stmt(&mut self) -> Option<Node> {
        let mut node = self.parse_expr()?;
        loop {
            let line = self.line();
            match self.peek() {
                Token::KwIf => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then_body: vec![node],
                            else_body: vec![],
                        },
                        line,
                    );
                }
                Token::KwUnless => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then_body: vec![],
                            else_body: vec![node],
                        },
                        line,
                    );
                }
                Token::KwWhile => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::new(
                        NodeKind::While {
                            cond: Box::new(cond),
                            body: vec![node],
                            until: false,
                        },
                        line,
                    );
                }
                Token::KwUntil => {
                    self.advance();
                    let cond = self.parse_expr()?;
                    node = Node::new(
                        NodeKind::While {
                            cond: Box::new(cond),
                            body: vec![node],
                            until: true,
                        },
                        line,
                    );
                }
                Token::KwRescue => {
                    // modifier rescue: `expr rescue fallback`
                    self.advance();
                    let fallback = self.parse_expr()?;
                    node = Node::new(
                        NodeKind::Begin {
                            body: vec![node],
                            rescues: vec![RescueClause {
                                classes: vec![],
                                var: None,
                                body: vec![fallback],
                            }],
                            else_body: vec![],
                            ensure_body: None,
                        },
                        line,
                    );
                }
                _ => break,
            }
        }
        Some(node)
    }

    // ---------------------------------------------------------------
    // expressions: and/or/not level plus assignment
    // ---------------------------------------------------------------

    /// Lowest-precedence expression: `not`, `and`, `or` and assignment.
    pub(crate) fn parse_expr(&mut self) -> Option<Node> {
        if self.check(&Token::KwNot) {
            let line = self.line();
            self.advance();
            let operand = self.parse_expr()?;
            return Some(Node::new(NodeKind::Not(Box::new(operand)), line));
        }
        let mut left = self.parse_assignment()?;
        loop {
            let line = self.line();
            match self.peek() {
                Token::KwAnd => {
                    self.advance();
                    self.skip_newlines();
                    let right = if self.check(&Token::KwNot) {
                        self.parse_expr()?
                    } else {
                        self.parse_assignment()?
                    };
                    left = Node::new(NodeKind::And(Box::new(left), Box::new(right)), line);
                }
                Token::KwOr => {
                    self.advance();
                    self.skip_newlines();
                    let right = if self.check(&Token::KwNot) {
                        self.parse_expr()?
                    } else {
                        self.parse_assignment()?
                    };
                    left = Node::new(NodeKind::Or(Box::new(left), Box::new(right)), line);
                }
                _ => break,
            }
        }
        Some(left)
    }

    /// Assignment level: `lhs = rhs`, `lhs op= rhs`, multiple assignment.
    pub(crate) fn parse_assignment(&mut self) -> Option<Node> {
        // leading splat: `*a, b = rhs`
        if self.check(&Token::Star) && self.splat_starts_masgn() {
            return self.parse_masgn(None);
        }

        let left = self.parse_ternary()?;
        let line = self.line();
        let left = if matches!(
            self.peek(),
            Token::Assign | Token::OpAssign(_) | Token::Comma
        ) {
            self.to_lhs(left)
        } else {
            left
        };
        match self.peek().clone() {
            Token::Assign => {
                if !left.assignable() {
                    self.error_here("can't assign to this expression");
                }
                self.declare_assign_target(&left);
                self.advance();
                self.skip_newlines();
                let rhs = self.parse_rhs()?;
                Some(Node::new(
                    NodeKind::Assign {
                        lhs: Box::new(left),
                        rhs: Box::new(rhs),
                    },
                    line,
                ))
            }
            Token::OpAssign(op) => {
                if !left.assignable() {
                    self.error_here("can't assign to this expression");
                }
                self.declare_assign_target(&left);
                self.advance();
                self.skip_newlines();
                let rhs = self.parse_assignment()?;
                Some(Node::new(
                    NodeKind::OpAssign {
                        lhs: Box::new(left),
                        op,
                        rhs: Box::new(rhs),
                    },
                    line,
                ))
            }
            Token::Comma if left.assignable() => self.parse_masgn(Some(left)),
            _ => Some(left),
        }
    }

    /// Lookahead check: does `*x` begin a multiple-assignment target
    /// list rather than a splat argument?
    fn splat_starts_masgn(&self) -> bool {
        // `*a = ...` or `*a, b = ...`
        let mut n = 1;
        if matches!(self.peek_nth(n), Token::Ident(_) | Token::IVar(_) | Token::GVar(_)) {
            n += 1;
        }
        matches!(self.peek_nth(n), Token::Assign | Token::Comma)
    }

    /// Multiple assignment after the first target (or from a leading
    /// splat when `first` is `None`).
    fn parse_masgn(&mut self, first: Option<Node>) -> Option<Node> {
        let line = self.line();
        let mut pre = Vec::new();
        let mut splat: Option<Option<Box<Node>>> = None;
        let mut post = Vec::new();

        if let Some(node) = first {
            self.declare_assign_target(&node);
            pre.push(node);
        }

        loop {
            if splat.is_none() && self.eat(&Token::Star) {
                if matches!(self.peek(), Token::Assign | Token::Comma) {
                    splat = Some(None);
                } else {
                    let target = self.parse_ternary()?;
                    let target = self.to_lhs(target);
                    self.declare_assign_target(&target);
                    splat = Some(Some(Box::new(target)));
                }
            } else if !self.check(&Token::Assign) {
                let target = self.parse_ternary()?;
                let target = self.to_lhs(target);
                if !target.assignable() {
                    self.error_here("can't assign to this expression");
                }
                self.declare_assign_target(&target);
                if splat.is_some() {
                    post.push(target);
                } else {
                    pre.push(target);
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        if !self.expect(&Token::Assign, "multiple assignment") {
            return None;
        }
        self.skip_newlines();
        let rhs = self.parse_rhs()?;
        Some(Node::new(
            NodeKind::MAssign {
                pre,
                splat,
                post,
                rhs: Box::new(rhs),
            },
            line,
        ))
    }

    /// Right-hand side of an assignment: a single expression or a comma
    /// list folding into an array (`a = 1, 2`).
    fn parse_rhs(&mut self) -> Option<Node> {
        let line = self.line();
        let first = if self.eat(&Token::Star) {
            let inner = self.parse_ternary()?;
            Node::new(NodeKind::Splat(Box::new(inner)), line)
        } else {
            self.parse_assignment()?
        };
        if !self.check(&Token::Comma) {
            return Some(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            self.skip_newlines();
            let line = self.line();
            if self.eat(&Token::Star) {
                let inner = self.parse_ternary()?;
                items.push(Node::new(NodeKind::Splat(Box::new(inner)), line));
            } else {
                items.push(self.parse_ternary()?);
            }
        }
        Some(Node::new(NodeKind::Array(items), line))
    }

    /// A bare self-call on the left of an assignment is really a fresh
    /// local: `a = 1` introduces `a` even when no local `a` exists yet.
    pub(crate) fn to_lhs(&mut self, node: Node) -> Node {
        if let NodeKind::Call {
            recv: None,
            name,
            args,
            block_arg: None,
            block: None,
        } = &node.kind
        {
            if args.is_empty() && !name.ends_with(['?', '!', '=']) {
                let line = node.line;
                let name = name.clone();
                self.declare_local(&name);
                return Node::new(NodeKind::LVar(name), line);
            }
        }
        node
    }

    /// Record the locals an assignment target introduces.
    pub(crate) fn declare_assign_target(&mut self, target: &Node) {
        match &target.kind {
            NodeKind::LVar(name) => {
                let name = name.clone();
                self.declare_local(&name);
            }
            NodeKind::Splat(inner) => self.declare_assign_target(inner),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests;
