//! Operator and punctuation scanning.

use crate::cursor::{is_ident_continue, is_ident_start};
use crate::token::Token;

use super::{LexState, Lexer};

impl<'a> Lexer<'a> {
    pub(crate) fn lex_simple_op(&mut self, token: Token, text: &str) {
        self.cursor.advance();
        if self.cursor.eat('=') {
            self.push(Token::OpAssign(text.into()));
        } else {
            self.push(token);
        }
    }

    pub(crate) fn lex_plus(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('=') {
            self.push(Token::OpAssign("+".into()));
        } else {
            self.push(Token::Plus);
        }
    }

    pub(crate) fn lex_minus(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('=') {
            self.push(Token::OpAssign("-".into()));
        } else if self.cursor.eat('>') {
            self.push(Token::Arrow);
        } else {
            self.push(Token::Minus);
        }
    }

    pub(crate) fn lex_star(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('*') {
            if self.cursor.eat('=') {
                self.push(Token::OpAssign("**".into()));
            } else {
                self.push(Token::Pow);
            }
        } else if self.cursor.eat('=') {
            self.push(Token::OpAssign("*".into()));
        } else {
            self.push(Token::Star);
        }
    }

    pub(crate) fn lex_equals(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('=') {
            if self.cursor.eat('=') {
                self.push(Token::EqEqEq);
            } else {
                self.push(Token::EqEq);
            }
        } else if self.cursor.eat('~') {
            self.push(Token::Match);
        } else if self.cursor.eat('>') {
            self.push(Token::FatArrow);
        } else {
            self.push(Token::Assign);
        }
    }

    pub(crate) fn lex_bang(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('=') {
            self.push(Token::Neq);
        } else {
            self.push(Token::Not);
        }
    }

    pub(crate) fn lex_less(&mut self) {
        // heredoc?  <<ID / <<"ID" / <<'ID' / <<-ID
        if self.cursor.peek(1) == '<'
            && matches!(self.state, LexState::Beg | LexState::Arg)
            && self.try_lex_heredoc()
        {
            return;
        }
        self.cursor.advance();
        if self.cursor.eat('=') {
            if self.cursor.eat('>') {
                self.push(Token::Cmp);
            } else {
                self.push(Token::Le);
            }
        } else if self.cursor.eat('<') {
            if self.cursor.eat('=') {
                self.push(Token::OpAssign("<<".into()));
            } else {
                self.push(Token::LShift);
            }
        } else {
            self.push(Token::Lt);
        }
    }

    fn try_lex_heredoc(&mut self) -> bool {
        // past `<<`, accept an optional `-`, then an identifier or a
        // quoted identifier with no intervening space
        let mut offset = 2usize;
        let mut indent = false;
        if self.cursor.peek(offset) == '-' {
            indent = true;
            offset += 1;
        }
        let open = self.cursor.peek(offset);
        let quoted = matches!(open, '"' | '\'');
        if !quoted && !is_ident_start(open) {
            return false;
        }

        for _ in 0..offset {
            self.cursor.advance();
        }
        let (id, interp) = if quoted {
            self.cursor.advance();
            let id: String = self.cursor.take_while(|c| c != open && c != '\n').into();
            if !self.cursor.eat(open) {
                self.error("unterminated heredoc identifier");
            }
            (id, open == '"')
        } else {
            (self.cursor.take_while(is_ident_continue).to_string(), true)
        };
        self.queue_heredoc(id, interp, indent);
        true
    }

    pub(crate) fn lex_greater(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('=') {
            self.push(Token::Ge);
        } else if self.cursor.eat('>') {
            if self.cursor.eat('=') {
                self.push(Token::OpAssign(">>".into()));
            } else {
                self.push(Token::RShift);
            }
        } else {
            self.push(Token::Gt);
        }
    }

    pub(crate) fn lex_ampersand(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('&') {
            if self.cursor.eat('=') {
                self.push(Token::OpAssign("&&".into()));
            } else {
                self.push(Token::AmpAmp);
            }
        } else if self.cursor.eat('=') {
            self.push(Token::OpAssign("&".into()));
        } else {
            self.push(Token::Amp);
        }
    }

    pub(crate) fn lex_pipe(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('|') {
            if self.cursor.eat('=') {
                self.push(Token::OpAssign("||".into()));
            } else {
                self.push(Token::PipePipe);
            }
        } else if self.cursor.eat('=') {
            self.push(Token::OpAssign("|".into()));
        } else {
            self.push(Token::Pipe);
        }
    }

    /// `?c` character literal when a term is expected, else ternary `?`.
    pub(crate) fn lex_question(&mut self) {
        if self.state == LexState::Beg {
            let next = self.cursor.peek(1);
            if next == '\\' {
                self.cursor.advance();
                self.cursor.advance();
                let esc = self.cursor.advance();
                let mut text = String::new();
                self.push_escape(esc, &mut text);
                self.push(Token::RawStr(text));
                return;
            }
            if (is_ident_continue(next) || next.is_ascii_punctuation())
                && !is_ident_continue(self.cursor.peek(2))
            {
                self.cursor.advance();
                let c = self.cursor.advance();
                self.push(Token::RawStr(c.to_string()));
                return;
            }
        }
        self.cursor.advance();
        self.push(Token::Question);
    }

    /// `::`, symbols, or a bare ternary colon.
    pub(crate) fn lex_colon(&mut self) {
        if self.cursor.peek(1) == ':' {
            self.cursor.advance();
            self.cursor.advance();
            self.push(Token::ColonColon);
            return;
        }
        let next = self.cursor.peek(1);
        if self.state != LexState::End {
            if next == '"' {
                self.cursor.advance();
                self.cursor.advance();
                let parts = self.scan_quoted_parts('"', true);
                // a fully literal quoted symbol folds to a plain one
                if let [crate::token::StrPart::Lit(name)] = parts.as_slice() {
                    let name = name.clone();
                    self.push(Token::Symbol(name));
                } else {
                    self.push(Token::DSymbol(parts));
                }
                return;
            }
            if is_ident_start(next) || next == '@' || next == '$' {
                self.cursor.advance();
                let mut name = String::new();
                if self.cursor.current() == '@' {
                    name.push(self.cursor.advance());
                    if self.cursor.current() == '@' {
                        name.push(self.cursor.advance());
                    }
                } else if self.cursor.current() == '$' {
                    name.push(self.cursor.advance());
                }
                name.push_str(self.cursor.take_while(is_ident_continue));
                let c = self.cursor.current();
                if (c == '?' || c == '!') && self.cursor.peek(1) != '=' {
                    self.cursor.advance();
                    name.push(c);
                } else if c == '=' && !matches!(self.cursor.peek(1), '=' | '~' | '>') {
                    self.cursor.advance();
                    name.push('=');
                }
                self.push(Token::Symbol(name));
                return;
            }
            // operator symbols: :+, :[], :<=>, ...
            const OPS: &[&str] = &[
                "<=>", "===", "[]=", "**", "==", "!=", "<=", ">=", "<<", ">>", "[]", "=~", "+@",
                "-@", "+", "-", "*", "/", "%", "<", ">", "!", "~", "&", "|", "^", "`",
            ];
            let rest = &self.cursor.rest()[1..];
            for op in OPS {
                if rest.starts_with(op) {
                    self.cursor.advance();
                    for _ in 0..op.len() {
                        self.cursor.advance();
                    }
                    self.push(Token::Symbol((*op).to_string()));
                    return;
                }
            }
        }
        self.cursor.advance();
        self.push(Token::Colon);
    }

    pub(crate) fn lex_dot(&mut self) {
        self.cursor.advance();
        if self.cursor.eat('.') {
            if self.cursor.eat('.') {
                self.push(Token::DotDotDot);
            } else {
                self.push(Token::DotDot);
            }
        } else {
            self.push(Token::Dot);
        }
    }
}
