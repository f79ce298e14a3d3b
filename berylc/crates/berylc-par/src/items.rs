//! Compound statements and definitions: conditionals, loops, exception
//! scaffolding, method/class/module definitions.

use berylc_lex::Token;

use crate::ast::{Node, NodeKind, RescueClause};
use crate::Parser;

impl<'a> Parser<'a> {
    /// `if`/`unless` expression form (the keyword is current).
    pub(crate) fn parse_if(&mut self, invert: bool) -> Option<Node> {
        let line = self.line();
        self.advance();
        let cond = self.parse_expr()?;
        self.eat(&Token::KwThen);
        self.skip_terms();
        let body = self.parse_stmts(&[Token::KwElsif, Token::KwElse, Token::KwEnd]);
        let else_body = self.parse_else_chain()?;
        self.expect(&Token::KwEnd, "if expression");
        let (then_body, else_body) = if invert { (else_body, body) } else { (body, else_body) };
        Some(Node::new(
            NodeKind::If {
                cond: Box::new(cond),
                then_body,
                else_body,
            },
            line,
        ))
    }

    /// `elsif`/`else` tail; leaves `end` for the caller.
    fn parse_else_chain(&mut self) -> Option<Vec<Node>> {
        if self.check(&Token::KwElsif) {
            let line = self.line();
            self.advance();
            let cond = self.parse_expr()?;
            self.eat(&Token::KwThen);
            self.skip_terms();
            let body = self.parse_stmts(&[Token::KwElsif, Token::KwElse, Token::KwEnd]);
            let else_body = self.parse_else_chain()?;
            return Some(vec![Node::new(
                NodeKind::If {
                    cond: Box::new(cond),
                    then_body: body,
                    else_body,
                },
                line,
            )]);
        }
        if self.eat(&Token::KwElse) {
            self.skip_terms();
            return Some(self.parse_stmts(&[Token::KwEnd]));
        }
        Some(Vec::new())
    }

    /// `case [subject] when ... end`
    pub(crate) fn parse_case(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        let subject = if matches!(self.peek(), Token::Newline | Token::Semicolon | Token::KwWhen) {
            None
        } else {
            Some(Box::new(self.parse_expr()?))
        };
        self.skip_terms();
        let mut whens = Vec::new();
        while self.eat(&Token::KwWhen) {
            let mut tests = Vec::new();
            loop {
                self.skip_newlines();
                tests.push(self.parse_argument()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.eat(&Token::KwThen);
            self.skip_terms();
            let body = self.parse_stmts(&[Token::KwWhen, Token::KwElse, Token::KwEnd]);
            whens.push((tests, body));
        }
        if whens.is_empty() {
            self.error_here("case expression needs at least one when clause");
        }
        let else_body = if self.eat(&Token::KwElse) {
            self.skip_terms();
            self.parse_stmts(&[Token::KwEnd])
        } else {
            Vec::new()
        };
        self.expect(&Token::KwEnd, "case expression");
        Some(Node::new(
            NodeKind::Case {
                subject,
                whens,
                else_body,
            },
            line,
        ))
    }

    /// `while`/`until` loop with leading condition.
    pub(crate) fn parse_while(&mut self, until: bool) -> Option<Node> {
        let line = self.line();
        self.advance();
        let cond = self.parse_expr()?;
        self.eat(&Token::KwDo);
        self.skip_terms();
        let body = self.parse_stmts(&[Token::KwEnd]);
        self.expect(&Token::KwEnd, "loop body");
        Some(Node::new(
            NodeKind::While {
                cond: Box::new(cond),
                body,
                until,
            },
            line,
        ))
    }

    /// `for x, y in expr ... end`; loop variables bind in the enclosing
    /// scope, deliberately leaking past the loop.
    pub(crate) fn parse_for(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        let mut vars = Vec::new();
        loop {
            let vline = self.line();
            match self.advance() {
                Token::Ident(name) => {
                    self.declare_local(&name);
                    vars.push(Node::new(NodeKind::LVar(name), vline));
                }
                Token::IVar(name) => vars.push(Node::new(NodeKind::IVar(name), vline)),
                Token::GVar(name) => vars.push(Node::new(NodeKind::GVar(name), vline)),
                other => {
                    self.error_here(&format!("cannot use {other} as a loop variable"));
                    return None;
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        if !self.expect(&Token::KwIn, "for loop") {
            return None;
        }
        let iter = self.parse_expr()?;
        self.eat(&Token::KwDo);
        self.skip_terms();
        let body = self.parse_stmts(&[Token::KwEnd]);
        self.expect(&Token::KwEnd, "for loop");
        Some(Node::new(
            NodeKind::For {
                vars,
                iter: Box::new(iter),
                body,
            },
            line,
        ))
    }

    /// `begin ... [rescue]* [else] [ensure] end`
    pub(crate) fn parse_begin(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        self.skip_terms();
        let body = self.parse_stmts(&[
            Token::KwRescue,
            Token::KwElse,
            Token::KwEnsure,
            Token::KwEnd,
        ]);
        let (rescues, else_body, ensure_body) = self.parse_rescue_tail()?;
        self.expect(&Token::KwEnd, "begin expression");
        Some(Node::new(
            NodeKind::Begin {
                body,
                rescues,
                else_body,
                ensure_body,
            },
            line,
        ))
    }

    /// Shared `rescue`/`else`/`ensure` tail for `begin` and `def`.
    pub(crate) fn parse_rescue_tail(
        &mut self,
    ) -> Option<(Vec<RescueClause>, Vec<Node>, Option<Vec<Node>>)> {
        let mut rescues = Vec::new();
        while self.check(&Token::KwRescue) {
            self.advance();
            let mut classes = Vec::new();
            while !matches!(
                self.peek(),
                Token::FatArrow | Token::KwThen | Token::Newline | Token::Semicolon | Token::Eof
            ) {
                classes.push(self.parse_ternary()?);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            let var = if self.eat(&Token::FatArrow) {
                let vline = self.line();
                let target = match self.advance() {
                    Token::Ident(name) => {
                        self.declare_local(&name);
                        Node::new(NodeKind::LVar(name), vline)
                    }
                    Token::IVar(name) => Node::new(NodeKind::IVar(name), vline),
                    Token::GVar(name) => Node::new(NodeKind::GVar(name), vline),
                    other => {
                        self.error_here(&format!("cannot bind exception to {other}"));
                        return None;
                    }
                };
                Some(Box::new(target))
            } else {
                None
            };
            self.eat(&Token::KwThen);
            self.skip_terms();
            let body = self.parse_stmts(&[
                Token::KwRescue,
                Token::KwElse,
                Token::KwEnsure,
                Token::KwEnd,
            ]);
            rescues.push(RescueClause {
                classes,
                var,
                body,
            });
        }
        let else_body = if self.eat(&Token::KwElse) {
            self.skip_terms();
            self.parse_stmts(&[Token::KwEnsure, Token::KwEnd])
        } else {
            Vec::new()
        };
        let ensure_body = if self.eat(&Token::KwEnsure) {
            self.skip_terms();
            Some(self.parse_stmts(&[Token::KwEnd]))
        } else {
            None
        };
        Some((rescues, else_body, ensure_body))
    }

    /// `def name(params) ... end`, including singleton forms.
    pub(crate) fn parse_def(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();

        let first = self.advance();
        let (recv, name) = if self.check(&Token::Dot) {
            // def self.x / def Const.x / def obj.x
            self.advance();
            let recv = match first {
                Token::KwSelf => Node::new(NodeKind::SelfRef, line),
                Token::Const(name) => Node::new(NodeKind::Const(name), line),
                Token::Ident(name) => {
                    if self.local_visible(&name) {
                        Node::new(NodeKind::LVar(name), line)
                    } else {
                        self.error_here("singleton method receiver must be a known object");
                        Node::new(NodeKind::Nil, line)
                    }
                }
                other => {
                    self.error_here(&format!("cannot define singleton method on {other}"));
                    Node::new(NodeKind::Nil, line)
                }
            };
            let name = match self.advance() {
                Token::Ident(name) | Token::Const(name) => name,
                other => {
                    self.error_here(&format!("expected method name, found {other}"));
                    return None;
                }
            };
            (Some(recv), name)
        } else {
            let name = match first {
                Token::Ident(name) | Token::Const(name) => name,
                other => {
                    self.error_here(&format!("expected method name, found {other}"));
                    return None;
                }
            };
            (None, name)
        };

        self.push_scope(false);
        let params = if self.eat(&Token::LParen) {
            let params = self.parse_params(&[Token::RParen]);
            self.expect(&Token::RParen, "method parameters");
            params
        } else if matches!(self.peek(), Token::Newline | Token::Semicolon) {
            Default::default()
        } else {
            self.parse_params(&[Token::Newline, Token::Semicolon])
        };
        self.skip_terms();
        let body = self.parse_stmts(&[
            Token::KwRescue,
            Token::KwElse,
            Token::KwEnsure,
            Token::KwEnd,
        ]);
        let (rescues, else_body, ensure_body) = self.parse_rescue_tail()?;
        self.expect(&Token::KwEnd, "method definition");
        if !else_body.is_empty() && rescues.is_empty() {
            self.error_here("else without rescue in method body");
        }
        let locals = self.pop_scope();

        match recv {
            Some(recv) => Some(Node::new(
                NodeKind::SDef {
                    recv: Box::new(recv),
                    name,
                    params,
                    body: merge_else(body, else_body),
                    locals,
                },
                line,
            )),
            None => Some(Node::new(
                NodeKind::Def {
                    name,
                    params,
                    body: merge_else(body, else_body),
                    rescues,
                    ensure_body,
                    locals,
                },
                line,
            )),
        }
    }

    /// `class Name < Super ... end`, `class << obj ... end`,
    /// `module Name ... end`.
    pub(crate) fn parse_class(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();

        if self.eat(&Token::LShift) {
            let expr = self.parse_expr()?;
            self.skip_terms();
            self.push_scope(false);
            let body = self.parse_stmts(&[Token::KwEnd]);
            let locals = self.pop_scope();
            self.expect(&Token::KwEnd, "singleton class body");
            return Some(Node::new(
                NodeKind::SClassDef {
                    expr: Box::new(expr),
                    body,
                    locals,
                },
                line,
            ));
        }

        let (base, name, absolute) = self.parse_cpath()?;
        let superclass = if self.eat(&Token::Lt) {
            Some(Box::new(self.parse_expr()?))
        } else {
            None
        };
        self.skip_terms();
        self.push_scope(false);
        let body = self.parse_stmts(&[Token::KwEnd]);
        let locals = self.pop_scope();
        self.expect(&Token::KwEnd, "class body");
        Some(Node::new(
            NodeKind::ClassDef {
                base,
                name,
                absolute,
                superclass,
                body,
                locals,
            },
            line,
        ))
    }

    pub(crate) fn parse_module(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        let (base, name, absolute) = self.parse_cpath()?;
        self.skip_terms();
        self.push_scope(false);
        let body = self.parse_stmts(&[Token::KwEnd]);
        let locals = self.pop_scope();
        self.expect(&Token::KwEnd, "module body");
        Some(Node::new(
            NodeKind::ModuleDef {
                base,
                name,
                absolute,
                body,
                locals,
            },
            line,
        ))
    }

    /// Constant path of a class/module definition:
    /// `A`, `::A`, `A::B::C`.
    fn parse_cpath(&mut self) -> Option<(Option<Box<Node>>, String, bool)> {
        let absolute = self.eat(&Token::ColonColon);
        let line = self.line();
        let mut name = match self.advance() {
            Token::Const(name) => name,
            other => {
                self.error_here(&format!("expected class or module name, found {other}"));
                return None;
            }
        };
        let mut base: Option<Box<Node>> = None;
        while self.check(&Token::ColonColon) && matches!(self.peek_nth(1), Token::Const(_)) {
            self.advance();
            let next = match self.advance() {
                Token::Const(next) => next,
                _ => unreachable!("checked above"),
            };
            let prev = match base.take() {
                None if absolute => Node::new(NodeKind::Colon3(name), line),
                None => Node::new(NodeKind::Const(name), line),
                Some(existing) => Node::new(
                    NodeKind::Colon2 {
                        base: existing,
                        name,
                    },
                    line,
                ),
            };
            base = Some(Box::new(prev));
            name = next;
        }
        let base_is_none = base.is_none();
        Some((base, name, absolute && base_is_none))
    }

    pub(crate) fn parse_alias(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        let new_name = self.parse_method_name()?;
        let old_name = self.parse_method_name()?;
        Some(Node::new(NodeKind::Alias { new_name, old_name }, line))
    }

    pub(crate) fn parse_undef(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        let mut names = Vec::new();
        loop {
            names.push(self.parse_method_name()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Some(Node::new(NodeKind::Undef(names), line))
    }

    /// A method name in `alias`/`undef` position: bare or symbol.
    fn parse_method_name(&mut self) -> Option<String> {
        match self.advance() {
            Token::Ident(name) | Token::Const(name) | Token::Symbol(name) => Some(name),
            other => {
                self.error_here(&format!("expected method name, found {other}"));
                None
            }
        }
    }

    /// `super` with explicit args, or zsuper forwarding the current ones.
    pub(crate) fn parse_super(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        let (args, block_arg) = if self.check(&Token::LParen) {
            let (args, block_arg) = self.parse_paren_args()?;
            (Some(args), block_arg)
        } else if self.can_start_command_arg() {
            let (args, block_arg) = self.parse_command_args()?;
            (Some(args), block_arg)
        } else {
            (None, None)
        };
        let block = self.try_parse_block()?;
        Some(Node::new(
            NodeKind::Super {
                args,
                block_arg,
                block,
            },
            line,
        ))
    }

    /// `->(params) { body }` / `-> do body end`
    pub(crate) fn parse_lambda(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance(); // ->
        self.push_scope(true);
        let params = if self.eat(&Token::LParen) {
            let params = self.parse_params(&[Token::RParen]);
            self.expect(&Token::RParen, "lambda parameters");
            params
        } else {
            Default::default()
        };
        let closer = if self.eat(&Token::LBrace) {
            Token::RBrace
        } else if self.eat(&Token::KwDo) {
            Token::KwEnd
        } else {
            self.error_here("expected lambda body");
            self.pop_scope();
            return None;
        };
        let body = self.parse_stmts(std::slice::from_ref(&closer));
        self.expect(&closer, "lambda body");
        let locals = self.pop_scope();
        Some(Node::new(
            NodeKind::Lambda(Box::new(crate::ast::BlockNode {
                params,
                body,
                locals,
                line,
            })),
            line,
        ))
    }

    /// `END { stmts }`
    pub(crate) fn parse_post_exe(&mut self) -> Option<Node> {
        let line = self.line();
        self.advance();
        if !self.expect(&Token::LBrace, "END block") {
            return None;
        }
        let body = self.parse_stmts(&[Token::RBrace]);
        self.expect(&Token::RBrace, "END block");
        Some(Node::new(NodeKind::PostExe(body), line))
    }
}

/// Append a rescue-else body after the main body (it runs only when no
/// exception was raised, which the code generator arranges).
fn merge_else(body: Vec<Node>, else_body: Vec<Node>) -> Vec<Node> {
    if else_body.is_empty() {
        body
    } else {
        let mut merged = body;
        merged.extend(else_body);
        merged
    }
}
