//! String-like literal scanning: quoted strings, xstrings, regexps,
//! percent literals, and heredoc body processing.

use crate::cursor::EOF_CHAR;
use crate::token::{StrPart, Token};

use super::{LexState, Lexer};

impl<'a> Lexer<'a> {
    /// Double-quoted string with escapes and `#{}` interpolation.
    pub(crate) fn lex_dquote_string(&mut self) {
        self.cursor.advance();
        let parts = self.scan_quoted_parts('"', true);
        self.push(Token::Str(parts));
    }

    /// Single-quoted string: only `\'` and `\\` are escapes.
    pub(crate) fn lex_squote_string(&mut self) {
        self.cursor.advance();
        let mut text = String::new();
        loop {
            match self.cursor.current() {
                EOF_CHAR => {
                    self.error("unterminated string meets end of input");
                    break;
                }
                '\'' => {
                    self.cursor.advance();
                    break;
                }
                '\\' if matches!(self.cursor.peek(1), '\'' | '\\') => {
                    self.cursor.advance();
                    text.push(self.cursor.advance());
                }
                _ => text.push(self.cursor.advance()),
            }
        }
        self.push(Token::RawStr(text));
    }

    /// Backquoted command string.
    pub(crate) fn lex_xstring(&mut self) {
        self.cursor.advance();
        let parts = self.scan_quoted_parts('`', true);
        self.push(Token::XStr(parts));
    }

    /// `/.../` regexp literal when a term is expected, division otherwise.
    pub(crate) fn lex_slash(&mut self) {
        if self.state == LexState::Beg {
            self.cursor.advance();
            let parts = self.scan_quoted_parts('/', true);
            let flags = self
                .cursor
                .take_while(|c| matches!(c, 'i' | 'm' | 'x'))
                .to_string();
            self.push(Token::Regexp { parts, flags });
            return;
        }
        self.cursor.advance();
        if self.cursor.eat('=') {
            self.push(Token::OpAssign("/".into()));
        } else {
            self.push(Token::Slash);
        }
    }

    /// `%w[..]`, `%i[..]` word/symbol lists when a term is expected,
    /// otherwise `%` the operator.
    pub(crate) fn lex_percent(&mut self) {
        if self.state == LexState::Beg {
            let kind = self.cursor.peek(1);
            if matches!(kind, 'w' | 'i') && is_percent_open(self.cursor.peek(2)) {
                self.cursor.advance(); // %
                self.cursor.advance(); // w / i
                let open = self.cursor.advance();
                let close = matching_close(open);
                let words = self.scan_word_list(close);
                if kind == 'w' {
                    self.push(Token::Words(words));
                } else {
                    self.push(Token::Symbols(words));
                }
                return;
            }
        }
        self.cursor.advance();
        if self.cursor.eat('=') {
            self.push(Token::OpAssign("%".into()));
        } else {
            self.push(Token::Percent);
        }
    }

    fn scan_word_list(&mut self, close: char) -> Vec<String> {
        let mut words = Vec::new();
        let mut current = String::new();
        loop {
            let c = self.cursor.current();
            match c {
                EOF_CHAR => {
                    self.error("unterminated word list meets end of input");
                    break;
                }
                c if c == close => {
                    self.cursor.advance();
                    break;
                }
                c if c.is_whitespace() => {
                    self.cursor.advance();
                    if !current.is_empty() {
                        words.push(std::mem::take(&mut current));
                    }
                }
                '\\' => {
                    self.cursor.advance();
                    current.push(self.cursor.advance());
                }
                _ => current.push(self.cursor.advance()),
            }
        }
        if !current.is_empty() {
            words.push(current);
        }
        words
    }

    /// Scan the inside of a quoted literal until `close`, splitting out
    /// `#{...}` interpolations when `interp` is set.
    pub(crate) fn scan_quoted_parts(&mut self, close: char, interp: bool) -> Vec<StrPart> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        loop {
            let c = self.cursor.current();
            match c {
                EOF_CHAR => {
                    self.error("unterminated string meets end of input");
                    break;
                }
                c if c == close => {
                    self.cursor.advance();
                    break;
                }
                '\\' => {
                    self.cursor.advance();
                    let esc = self.cursor.advance();
                    if close == '/' {
                        // regexps keep their escapes verbatim
                        lit.push('\\');
                        lit.push(esc);
                    } else if esc == 'x' {
                        let mut hex = String::new();
                        while hex.len() < 2 && self.cursor.current().is_ascii_hexdigit() {
                            hex.push(self.cursor.advance());
                        }
                        match u8::from_str_radix(&hex, 16) {
                            Ok(byte) => lit.push(byte as char),
                            Err(_) => self.error("invalid hex escape"),
                        }
                    } else {
                        self.push_escape(esc, &mut lit);
                    }
                }
                '#' if interp && self.cursor.peek(1) == '{' => {
                    self.cursor.advance();
                    self.cursor.advance();
                    if !lit.is_empty() {
                        parts.push(StrPart::Lit(std::mem::take(&mut lit)));
                    }
                    parts.push(StrPart::Interp(self.scan_interp_source()));
                }
                _ => lit.push(self.cursor.advance()),
            }
        }
        if !lit.is_empty() || parts.is_empty() {
            parts.push(StrPart::Lit(lit));
        }
        parts
    }

    /// Source text between `#{` and its matching `}`. Braces nest;
    /// strings inside the interpolation are skipped opaquely.
    fn scan_interp_source(&mut self) -> String {
        let mut depth = 1usize;
        let mut src = String::new();
        loop {
            let c = self.cursor.current();
            match c {
                EOF_CHAR => {
                    self.error("unterminated string interpolation");
                    return src;
                }
                '{' => {
                    depth += 1;
                    src.push(self.cursor.advance());
                }
                '}' => {
                    depth -= 1;
                    self.cursor.advance();
                    if depth == 0 {
                        return src;
                    }
                    src.push('}');
                }
                '"' | '\'' => {
                    let quote = self.cursor.advance();
                    src.push(quote);
                    loop {
                        let inner = self.cursor.current();
                        if inner == EOF_CHAR {
                            self.error("unterminated string interpolation");
                            return src;
                        }
                        if inner == '\\' {
                            src.push(self.cursor.advance());
                            src.push(self.cursor.advance());
                            continue;
                        }
                        src.push(self.cursor.advance());
                        if inner == quote {
                            break;
                        }
                    }
                }
                _ => src.push(self.cursor.advance()),
            }
        }
    }

    /// Heredoc bodies run the same interpolation splitting as
    /// double-quoted strings, over an already-collected buffer.
    pub(crate) fn scan_heredoc_parts(&mut self, body: &str) -> Vec<StrPart> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    let esc = chars.next().unwrap_or('\\');
                    self.push_escape(esc, &mut lit);
                }
                '#' if chars.peek() == Some(&'{') => {
                    chars.next();
                    if !lit.is_empty() {
                        parts.push(StrPart::Lit(std::mem::take(&mut lit)));
                    }
                    let mut depth = 1usize;
                    let mut src = String::new();
                    for inner in chars.by_ref() {
                        match inner {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        src.push(inner);
                    }
                    parts.push(StrPart::Interp(src));
                }
                _ => lit.push(c),
            }
        }
        if !lit.is_empty() || parts.is_empty() {
            parts.push(StrPart::Lit(lit));
        }
        parts
    }

    /// Resolve one escape character into `out`. Unknown escapes keep the
    /// escaped character, as the modeled language does.
    pub(crate) fn push_escape(&mut self, esc: char, out: &mut String) {
        match esc {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            'a' => out.push('\x07'),
            'e' => out.push('\x1b'),
            'b' => out.push('\x08'),
            's' => out.push(' '),
            '0' => out.push('\0'),
            EOF_CHAR => self.error("escape meets end of input"),
            other => out.push(other),
        }
    }
}

fn is_percent_open(c: char) -> bool {
    matches!(c, '[' | '(' | '{' | '<' | '|' | '!')
}

fn matching_close(open: char) -> char {
    match open {
        '[' => ']',
        '(' => ')',
        '{' => '}',
        '<' => '>',
        other => other,
    }
}
