//! Core lexer implementation.
//!
//! The entry point is [`tokenize`], which scans the whole input into a
//! token vector. Scanning the entire input up front keeps heredoc
//! splicing simple: the `<<ID` marker pushes a placeholder token whose
//! content is patched in once the body has been consumed after the next
//! newline.

mod number;
mod operator;
mod string;

use berylc_util::{Diagnostics, Span};

use crate::cursor::{is_ident_continue, is_ident_start, Cursor};
use crate::token::{Token, TokenWithSpan};

/// Expression state, deciding how ambiguous characters lex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LexState {
    /// A term is expected: `/` starts a regexp, `<<` a heredoc, newlines
    /// are insignificant.
    Beg,
    /// An expression just ended: operators are binary, newlines terminate.
    End,
    /// After an identifier: like `End`, except `<<ID` still opens a
    /// heredoc (`puts <<EOS`).
    Arg,
    /// After `def`, `alias` or `undef`: operator method names allowed.
    Fname,
    /// After `.` or `::`: keywords lex as plain method names.
    Dot,
}

/// A heredoc whose body has not been consumed yet.
struct PendingHeredoc {
    /// Index of the placeholder token to patch.
    token_index: usize,
    id: String,
    /// `<<'ID'` suppresses interpolation and escapes.
    interp: bool,
    /// `<<-ID` allows an indented terminator.
    indent: bool,
}

pub struct Lexer<'a> {
    pub(crate) cursor: Cursor<'a>,
    pub(crate) diags: &'a mut Diagnostics,
    pub(crate) state: LexState,
    /// Nesting depth of `(` and `[`; newlines inside are insignificant.
    paren_depth: u32,
    pending_heredocs: Vec<PendingHeredoc>,
    tokens: Vec<TokenWithSpan>,
    token_start: usize,
    token_line: u32,
    token_column: u32,
}

/// Tokenize an entire source buffer.
///
/// Problems are reported into `diags`; the returned stream is always
/// terminated by [`Token::Eof`].
pub fn tokenize(source: &str, diags: &mut Diagnostics) -> Vec<TokenWithSpan> {
    Lexer::new(source, diags).run()
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, diags: &'a mut Diagnostics) -> Self {
        Lexer {
            cursor: Cursor::new(source),
            diags,
            state: LexState::Beg,
            paren_depth: 0,
            pending_heredocs: Vec::new(),
            tokens: Vec::new(),
            token_start: 0,
            token_line: 1,
            token_column: 1,
        }
    }

    fn run(mut self) -> Vec<TokenWithSpan> {
        loop {
            if !self.next_token() {
                break;
            }
        }
        // a heredoc marker with no body before EOF is an error
        self.drain_heredocs();
        self.mark_token_start();
        self.push(Token::Eof);
        self.tokens
    }

    /// Scan one token; false at end of input.
    fn next_token(&mut self) -> bool {
        self.skip_insignificant();
        if self.cursor.is_at_end() {
            return false;
        }
        self.mark_token_start();

        // operator method names in `def`/`alias`/`undef` position win over
        // ordinary operator lexing: `def +(other)`, `alias << push`
        if self.state == LexState::Fname {
            if let Some(name) = self.scan_operator_fname() {
                self.push(Token::Ident(name));
                return true;
            }
        }

        let c = self.cursor.current();
        match c {
            '\n' => self.lex_newline(),
            ';' => {
                self.cursor.advance();
                self.push(Token::Semicolon);
            }
            ',' => {
                self.cursor.advance();
                self.push(Token::Comma);
            }
            '(' => {
                self.cursor.advance();
                self.paren_depth += 1;
                self.push(Token::LParen);
            }
            ')' => {
                self.cursor.advance();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                self.push(Token::RParen);
            }
            '[' => {
                self.cursor.advance();
                self.paren_depth += 1;
                self.push(Token::LBracket);
            }
            ']' => {
                self.cursor.advance();
                self.paren_depth = self.paren_depth.saturating_sub(1);
                self.push(Token::RBracket);
            }
            '{' => {
                self.cursor.advance();
                self.push(Token::LBrace);
            }
            '}' => {
                self.cursor.advance();
                self.push(Token::RBrace);
            }
            '"' => self.lex_dquote_string(),
            '\'' => self.lex_squote_string(),
            '`' => self.lex_xstring(),
            '#' => {
                self.cursor.take_while(|ch| ch != '\n');
            }
            '+' => self.lex_plus(),
            '-' => self.lex_minus(),
            '*' => self.lex_star(),
            '/' => self.lex_slash(),
            '%' => self.lex_percent(),
            '=' => self.lex_equals(),
            '!' => self.lex_bang(),
            '<' => self.lex_less(),
            '>' => self.lex_greater(),
            '&' => self.lex_ampersand(),
            '|' => self.lex_pipe(),
            '^' => self.lex_simple_op(Token::Caret, "^"),
            '~' => {
                self.cursor.advance();
                self.push(Token::Tilde);
            }
            '?' => self.lex_question(),
            ':' => self.lex_colon(),
            '.' => self.lex_dot(),
            '@' => self.lex_at_variable(),
            '$' => self.lex_global(),
            c if c.is_ascii_digit() => self.lex_number(),
            c if is_ident_start(c) => self.lex_identifier(),
            other => {
                self.error(format!("unexpected character {other:?}"));
                self.cursor.advance();
            }
        }
        true
    }

    // -- whitespace, comments, continuations ---------------------------

    fn skip_insignificant(&mut self) {
        loop {
            let c = self.cursor.current();
            match c {
                ' ' | '\t' | '\r' => {
                    self.cursor.advance();
                }
                '\\' if self.cursor.peek(1) == '\n' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    self.drain_heredocs();
                }
                '=' if self.at_line_start() && self.cursor.rest().starts_with("=begin") => {
                    self.skip_block_comment();
                }
                '_' if self.at_line_start() && self.is_data_marker() => {
                    // __END__ cuts the input
                    while !self.cursor.is_at_end() {
                        self.cursor.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn at_line_start(&self) -> bool {
        self.cursor.column() == 1
    }

    fn is_data_marker(&self) -> bool {
        let rest = self.cursor.rest();
        rest.starts_with("__END__")
            && matches!(rest.as_bytes().get(7), None | Some(b'\n') | Some(b'\r'))
    }

    fn skip_block_comment(&mut self) {
        let start_line = self.cursor.line();
        loop {
            if self.cursor.is_at_end() {
                self.error_at(start_line, "embedded document meets end of file");
                return;
            }
            if self.at_line_start() && self.cursor.rest().starts_with("=end") {
                self.cursor.take_while(|ch| ch != '\n');
                return;
            }
            self.cursor.advance();
        }
    }

    fn lex_newline(&mut self) {
        self.cursor.advance();
        self.drain_heredocs();
        let significant = self.paren_depth == 0
            && matches!(self.state, LexState::End | LexState::Arg);
        if significant {
            self.push(Token::Newline);
        }
    }

    // -- identifiers and keywords --------------------------------------

    fn lex_identifier(&mut self) {
        let mut name = self
            .cursor
            .take_while(is_ident_continue)
            .to_string();
        // method-name suffix: `alive?`, `map!`
        let c = self.cursor.current();
        if (c == '?' || c == '!') && self.cursor.peek(1) != '=' {
            self.cursor.advance();
            name.push(c);
        }
        // setter names after `def` / `.`: `def size=(n)`
        if matches!(self.state, LexState::Fname)
            && self.cursor.current() == '='
            && !matches!(self.cursor.peek(1), '=' | '~' | '>')
        {
            self.cursor.advance();
            name.push('=');
            self.push(Token::Ident(name));
            return;
        }

        if matches!(self.state, LexState::Fname | LexState::Dot) {
            // keywords are plain names after `def`/`.`
            self.push(classify_name(name));
            return;
        }
        match Token::keyword(&name) {
            Some(kw) => self.push(kw),
            None => self.push(classify_name(name)),
        }
    }

    /// Operator method names in `def`/`alias` position.
    fn scan_operator_fname(&mut self) -> Option<String> {
        const OPS: &[&str] = &[
            "<=>", "===", "[]=", "**", "==", "!=", "<=", ">=", "<<", ">>", "[]", "=~", "+@", "-@",
            "+", "-", "*", "/", "%", "<", ">", "!", "~", "`",
        ];
        let rest = self.cursor.rest();
        for op in OPS {
            if rest.starts_with(op) {
                for _ in 0..op.chars().count() {
                    self.cursor.advance();
                }
                return Some((*op).to_string());
            }
        }
        None
    }

    fn lex_at_variable(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('@') {
            let name = self.cursor.take_while(is_ident_continue);
            if name.is_empty() {
                self.error("class variable name missing");
            }
            let name = name.to_string();
            self.push(Token::CVar(name));
        } else {
            let name = self.cursor.take_while(is_ident_continue);
            if name.is_empty() {
                self.error("instance variable name missing");
            }
            let name = name.to_string();
            self.push(Token::IVar(name));
        }
    }

    fn lex_global(&mut self) {
        self.cursor.advance();
        let c = self.cursor.current();
        match c {
            '&' | '`' | '\'' | '+' => {
                self.cursor.advance();
                self.push(Token::BackRef(c));
            }
            '1'..='9' => {
                self.cursor.advance();
                self.push(Token::NthRef(c as u8 - b'0'));
            }
            c if is_ident_start(c) || c == '0' => {
                let name = self.cursor.take_while(is_ident_continue).to_string();
                self.push(Token::GVar(name));
            }
            _ => {
                self.error("global variable name missing");
                self.push(Token::GVar(String::new()));
            }
        }
    }

    // -- helpers -------------------------------------------------------

    pub(crate) fn mark_token_start(&mut self) {
        self.token_start = self.cursor.position();
        self.token_line = self.cursor.line();
        self.token_column = self.cursor.column();
    }

    /// Append a token and update the expression state it implies.
    pub(crate) fn push(&mut self, token: Token) {
        self.state = state_after(&token, self.state);
        let span = Span::new(
            self.token_start,
            self.cursor.position(),
            self.token_line,
            self.token_column,
        );
        self.tokens.push(TokenWithSpan { token, span });
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        let span = Span::new(
            self.token_start,
            self.cursor.position(),
            self.token_line,
            self.token_column,
        );
        self.diags.error(message, span);
    }

    fn error_at(&mut self, line: u32, message: impl Into<String>) {
        self.diags.error(message, Span::point(line, 1));
    }

    // -- heredocs ------------------------------------------------------

    /// Called by the `<` scanner when a heredoc marker is recognized.
    pub(crate) fn queue_heredoc(&mut self, id: String, interp: bool, indent: bool) {
        self.push(Token::Str(Vec::new()));
        let token_index = self.tokens.len() - 1;
        self.pending_heredocs.push(PendingHeredoc {
            token_index,
            id,
            interp,
            indent,
        });
    }

    /// Consume the bodies of every queued heredoc; the cursor sits just
    /// past a newline.
    fn drain_heredocs(&mut self) {
        while !self.pending_heredocs.is_empty() {
            let pending = self.pending_heredocs.remove(0);
            let body = self.read_heredoc_body(&pending);
            let token = if pending.interp {
                Token::Str(self.scan_heredoc_parts(&body))
            } else {
                Token::RawStr(body)
            };
            self.tokens[pending.token_index].token = token;
        }
    }

    fn read_heredoc_body(&mut self, pending: &PendingHeredoc) -> String {
        let mut body = String::new();
        loop {
            if self.cursor.is_at_end() {
                self.error(format!(
                    "can't find heredoc terminator \"{}\" before end of input",
                    pending.id
                ));
                return body;
            }
            let line_start = self.cursor.position();
            let line = self.cursor.take_while(|ch| ch != '\n');
            let terminated = {
                let candidate = if pending.indent { line.trim_start() } else { line };
                candidate.trim_end_matches('\r') == pending.id
            };
            let line = self.cursor.slice(line_start, self.cursor.position()).to_string();
            if !self.cursor.is_at_end() {
                self.cursor.advance(); // the newline
            }
            if terminated {
                return body;
            }
            body.push_str(&line);
            body.push('\n');
        }
    }
}

/// Classify a bare name: constant or identifier.
fn classify_name(name: String) -> Token {
    if name.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
        Token::Const(name)
    } else {
        Token::Ident(name)
    }
}

/// The expression state in force after `token`.
fn state_after(token: &Token, current: LexState) -> LexState {
    use Token::*;
    match token {
        KwDef | KwAlias | KwUndef => LexState::Fname,
        Dot | ColonColon => LexState::Dot,
        Ident(_) | Const(_) => LexState::Arg,
        t if t.ends_expr() => LexState::End,
        Eof => current,
        _ => LexState::Beg,
    }
}

#[cfg(test)]
mod tests;
